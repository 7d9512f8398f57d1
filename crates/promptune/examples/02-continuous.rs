//! Supervise a program with the continuous controller.
//!
//! Spawns the controller with aggressive (seconds, not hours) intervals so
//! the quality-check → re-optimize → adopt cycle is observable in one run:
//!
//! ```bash
//! cargo run --example 02-continuous
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use promptune::{
    CallOptions, ContinuousController, ControllerConfig, Demonstration, Example, ExactMatch,
    FieldMap, ForwardError, ProgramDescriptor, ProgramRunner, Teleprompter, example_from_pairs,
    init_tracing,
};
use serde_json::Value;

/// Answers correctly only once an instruction is installed, so the first
/// optimization visibly lifts quality.
#[derive(Clone)]
struct Trainee {
    answers: HashMap<String, String>,
    instruction: Option<String>,
}

impl Trainee {
    fn new(pairs: &[(&str, &str)], instructed: bool) -> Arc<dyn ProgramRunner> {
        Arc::new(Self {
            answers: pairs
                .iter()
                .map(|(q, a)| (q.to_string(), a.to_string()))
                .collect(),
            instruction: instructed.then(|| "Answer the question.".to_string()),
        })
    }
}

#[async_trait]
impl ProgramRunner for Trainee {
    async fn forward(
        &self,
        inputs: FieldMap,
        _options: &CallOptions,
    ) -> Result<FieldMap, ForwardError> {
        let question = match inputs.get("question") {
            Some(Value::String(question)) => question.clone(),
            _ => String::new(),
        };
        let answer = match (&self.instruction, self.answers.get(&question)) {
            (Some(_), Some(answer)) => answer.clone(),
            (Some(_), None) => question.clone(),
            (None, _) => "???".to_string(),
        };
        let mut outputs = FieldMap::new();
        outputs.insert("answer".to_string(), Value::String(answer));
        Ok(outputs)
    }

    fn descriptor(&self) -> ProgramDescriptor {
        let mut descriptor =
            ProgramDescriptor::new(vec!["question".to_string()], vec!["answer".to_string()]);
        descriptor.instruction = self.instruction.clone();
        descriptor
    }

    fn with_overrides(
        &self,
        instruction: Option<String>,
        _demos: &[Demonstration],
    ) -> Arc<dyn ProgramRunner> {
        let mut program = self.clone();
        if instruction.is_some() {
            program.instruction = instruction;
        }
        Arc::new(program)
    }
}

fn qa(question: &str, answer: &str) -> Example {
    example_from_pairs(&[("question", question), ("answer", answer)], &["question"])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let facts = [
        ("2+2", "4"),
        ("3*3", "9"),
        ("10-7", "3"),
        ("8/2", "4"),
        ("5+5", "10"),
    ];
    let trainset: Vec<Example> = facts.iter().map(|(q, a)| qa(q, a)).collect();

    let handle = ContinuousController::spawn(
        Trainee::new(&facts, false),
        Trainee::new(&facts, true),
        trainset,
        Arc::new(ExactMatch::new("answer")),
        Teleprompter::builder()
            .seed(7)
            .num_instruction_candidates(4)
            .max_demos(2)
            .num_initial_samples(3)
            .max_iterations(5)
            .build(),
        ControllerConfig::builder()
            .quality_check_interval(Duration::from_secs(1))
            .optimization_interval(Duration::from_secs(20))
            .build(),
    );

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = handle.status().await?;
        println!(
            "status={:?} optimizations={} history={:?}",
            status.status,
            status.optimization_count,
            status
                .quality_history
                .iter()
                .map(|record| record.score)
                .collect::<Vec<_>>()
        );
    }

    handle.stop().await?;
    Ok(())
}
