//! Compile a toy QA student against a scripted teacher.
//!
//! Both programs implement the `ProgramRunner` contract in-process, so the
//! whole optimization loop runs without any live provider:
//!
//! ```bash
//! cargo run --example 01-compile
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use promptune::{
    CallOptions, Demonstration, Example, ExactMatch, FieldMap, ForwardError, ProgramDescriptor,
    ProgramRunner, Teleprompter, example_from_pairs, init_tracing,
};
use serde_json::Value;

#[derive(Clone)]
struct ScriptedProgram {
    answers: HashMap<String, String>,
    instruction: Option<String>,
    demos: Vec<Demonstration>,
}

impl ScriptedProgram {
    fn new(pairs: &[(&str, &str)]) -> Arc<dyn ProgramRunner> {
        Arc::new(Self {
            answers: pairs
                .iter()
                .map(|(q, a)| (q.to_string(), a.to_string()))
                .collect(),
            instruction: None,
            demos: Vec::new(),
        })
    }
}

#[async_trait]
impl ProgramRunner for ScriptedProgram {
    async fn forward(
        &self,
        inputs: FieldMap,
        _options: &CallOptions,
    ) -> Result<FieldMap, ForwardError> {
        let question = match inputs.get("question") {
            Some(Value::String(question)) => question.clone(),
            _ => String::new(),
        };
        let answer = self
            .answers
            .get(&question)
            .cloned()
            .unwrap_or_else(|| question.clone());
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
        demos: &[Demonstration],
    ) -> Arc<dyn ProgramRunner> {
        let mut program = self.clone();
        if instruction.is_some() {
            program.instruction = instruction;
        }
        program.demos = demos.to_vec();
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
        ("capital of France", "Paris"),
        ("capital of Japan", "Tokyo"),
        ("capital of Kenya", "Nairobi"),
        ("capital of Peru", "Lima"),
        ("capital of Norway", "Oslo"),
    ];
    let student = ScriptedProgram::new(&facts);
    let teacher = ScriptedProgram::new(&facts);
    let trainset: Vec<Example> = facts.iter().map(|(q, a)| qa(q, a)).collect();

    let teleprompter = Teleprompter::builder()
        .seed(42)
        .num_instruction_candidates(5)
        .max_demos(3)
        .num_initial_samples(4)
        .max_iterations(10)
        .on_progress(Arc::new(|event| {
            println!(
                "[{}] {}/{} best={:?}",
                event.phase.as_str(),
                event.completed,
                event.total,
                event.score
            );
        }))
        .build();

    let optimized = teleprompter
        .compile(student, teacher, &trainset, Arc::new(ExactMatch::new("answer")))
        .await?;

    println!("\nbest score: {:.3}", optimized.metadata.best_score);
    println!("demos installed: {}", optimized.metadata.demo_count);
    println!("instruction:\n{}", optimized.instruction_text);

    let outputs = optimized
        .forward(trainset[0].inputs(), &CallOptions::default())
        .await?;
    println!("\nstudent answer: {:?}", outputs.get("answer"));
    Ok(())
}
