use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::acquisition::Acquisition;
use super::bayesian::{BayesianOptimizer, Objective, OptimizeReport, OptimizerStats};
use super::miner::DemonstrationMiner;
use super::space::{Configuration, SearchSpace};
use crate::core::{
    CallOptions, CompileError, Event, EventSink, NullSink, Phase, ProgramDescriptor,
    ProgramRunner, ProgressCallback, ProgressEvent, emit_progress, forward_with_timeout,
};
use crate::data::{Demonstration, Example, Instruction};
use crate::evaluate::{Metric, SafeMetric, average_score};

/// Library of prompting tips folded into instruction candidates.
pub struct PromptingTips {
    pub tips: Vec<String>,
}

impl PromptingTips {
    pub fn default_tips() -> Self {
        Self {
            tips: [
                "Use clear and specific language",
                "Provide context about the task domain",
                "Specify the desired output format",
                "Break down complex instructions into steps",
                "Specify constraints and edge cases",
                "Use positive framing (what to do vs. what not to do)",
                "Be explicit about what to avoid or exclude",
                "Use delimiters or markers to separate different sections",
                "Request only the declared output fields",
                "State assumptions explicitly when inputs are ambiguous",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Orchestrates the end-to-end compile: validate, split, mine demos,
/// generate instruction candidates, search, assemble.
///
/// Transient program failures never surface from `compile`; only contract
/// violations it can observe synchronously and the two structural optimizer
/// failures do.
///
/// ```ignore
/// let teleprompter = Teleprompter::builder().max_demos(4).build();
/// let optimized = teleprompter
///     .compile(student, teacher, &trainset, metric)
///     .await?;
/// let outputs = optimized.forward(inputs, &CallOptions::default()).await?;
/// ```
#[derive(Builder, Clone)]
pub struct Teleprompter {
    #[builder(default = 20)]
    pub num_instruction_candidates: usize,

    #[builder(default = 4)]
    pub max_demos: usize,

    #[builder(default = 0.7)]
    pub quality_threshold: f32,

    #[builder(default = 10)]
    pub num_initial_samples: usize,

    #[builder(default = 50)]
    pub max_iterations: usize,

    #[builder(default = 5)]
    pub convergence_patience: usize,

    #[builder(default = Acquisition::ExpectedImprovement)]
    pub acquisition: Acquisition,

    #[builder(default = 2.0)]
    pub exploration_weight: f32,

    #[builder(default = 20)]
    pub concurrency: usize,

    #[builder(default = Duration::from_secs(60))]
    pub per_call_timeout: Duration,

    pub overall_timeout: Option<Duration>,

    /// Fixed seed for reproducible compiles.
    pub seed: Option<u64>,

    pub on_progress: Option<ProgressCallback>,

    #[builder(default = Arc::new(NullSink))]
    pub events: Arc<dyn EventSink>,
}

impl Teleprompter {
    pub async fn compile(
        &self,
        student: Arc<dyn ProgramRunner>,
        teacher: Arc<dyn ProgramRunner>,
        trainset: &[Example],
        metric: Arc<dyn Metric>,
    ) -> Result<OptimizedProgram, CompileError> {
        let correlation_id = Uuid::new_v4().to_string();

        // Recompiling with nothing to learn from is a no-op, not an error.
        if trainset.is_empty() && self.max_demos == 0 {
            self.progress(Phase::Done, 5, None, &correlation_id);
            return Ok(OptimizedProgram::passthrough(student));
        }

        self.progress(Phase::Validate, 0, None, &correlation_id);
        self.validate(&student, &teacher, trainset)?;

        let (demo_source, validation) = split_trainset(trainset);
        debug!(
            demo_source = demo_source.len(),
            validation = validation.len(),
            "trainset split"
        );

        self.progress(Phase::Mine, 1, None, &correlation_id);
        let metric = Arc::new(SafeMetric::new(metric));
        let demos = self.mine_demos(&teacher, demo_source, &metric).await?;
        self.events.on_event(
            Event::new("compile.mined")
                .measure("pool_size", demos.len() as f64)
                .tag("correlation_id", correlation_id.clone()),
        );

        self.progress(Phase::Instruct, 2, None, &correlation_id);
        let instructions = self
            .generate_instructions(&teacher, &student.descriptor(), &demos, &correlation_id)
            .await;
        self.events.on_event(
            Event::new("compile.instructions")
                .measure("pool_size", instructions.len() as f64)
                .tag("correlation_id", correlation_id.clone()),
        );

        self.progress(Phase::Optimize, 3, None, &correlation_id);
        let space = Arc::new(SearchSpace::new(instructions, demos, self.max_demos));
        let objective = InstallObjective {
            student: Arc::clone(&student),
            space: Arc::clone(&space),
            validation: validation.to_vec(),
            metric,
            concurrency: self.concurrency,
            per_call_timeout: self.per_call_timeout,
            correlation_id: correlation_id.clone(),
        };

        let report = self
            .build_optimizer(&correlation_id)
            .optimize(&space, &objective)
            .await?;

        let optimized = self.assemble(student, &space, report);
        self.progress(
            Phase::Done,
            5,
            Some(optimized.metadata.best_score),
            &correlation_id,
        );
        self.events.on_event(
            Event::new("compile.done")
                .measure("best_score", f64::from(optimized.metadata.best_score))
                .tag("correlation_id", correlation_id),
        );
        info!(
            best_score = optimized.metadata.best_score,
            demos = optimized.metadata.demo_count,
            "compile finished"
        );
        Ok(optimized)
    }

    fn validate(
        &self,
        student: &Arc<dyn ProgramRunner>,
        teacher: &Arc<dyn ProgramRunner>,
        trainset: &[Example],
    ) -> Result<(), CompileError> {
        if trainset.is_empty() {
            return Err(CompileError::InvalidInputs("trainset is empty".to_string()));
        }
        for (role, descriptor) in [
            ("student", student.descriptor()),
            ("teacher", teacher.descriptor()),
        ] {
            if descriptor.input_fields.is_empty() || descriptor.output_fields.is_empty() {
                return Err(CompileError::InvalidInputs(format!(
                    "{role} declares no input or output fields"
                )));
            }
        }
        Ok(())
    }

    async fn mine_demos(
        &self,
        teacher: &Arc<dyn ProgramRunner>,
        demo_source: &[Example],
        metric: &Arc<SafeMetric>,
    ) -> Result<Vec<Demonstration>, CompileError> {
        if self.max_demos == 0 {
            return Ok(Vec::new());
        }

        let miner = DemonstrationMiner::builder()
            .quality_threshold(self.quality_threshold)
            .max_demos(self.max_demos)
            .concurrency(self.concurrency)
            .per_example_timeout(self.per_call_timeout)
            .build();
        let demos = miner.mine(teacher, demo_source, metric).await;
        if demos.is_empty() {
            return Err(CompileError::NoBootstrappedDemos);
        }
        Ok(demos)
    }

    /// Generates the instruction-candidate pool.
    ///
    /// Each candidate asks the teacher to propose an instruction from a
    /// meta-prompt (signature description, one prompting tip, demo samples).
    /// A failed teacher call falls back to a deterministic tip-derived text,
    /// so the pool never ends up empty: the descriptor-derived default is
    /// always its first member.
    async fn generate_instructions(
        &self,
        teacher: &Arc<dyn ProgramRunner>,
        descriptor: &ProgramDescriptor,
        demos: &[Demonstration],
        correlation_id: &str,
    ) -> Vec<Instruction> {
        let default_text = default_instruction(descriptor);
        let tips = PromptingTips::default_tips();
        let description = describe_fields(descriptor);

        let mut pool = vec![Instruction::new(default_text.clone())];
        let mut seen: Vec<String> = vec![pool[0].normalized_text()];

        for index in 0..self.num_instruction_candidates.saturating_sub(1) {
            let tip = &tips.tips[index % tips.tips.len()];
            let prompt = meta_prompt(&description, &default_text, tip, demos);
            let text = match self
                .propose_instruction(teacher, descriptor, prompt, correlation_id)
                .await
            {
                Some(text) => text,
                None => format!("{default_text}\n\nCandidate {}:\n- {tip}", index + 1),
            };

            let candidate = Instruction::new(text);
            let normalized = candidate.normalized_text();
            if normalized.is_empty() || seen.contains(&normalized) {
                continue;
            }
            seen.push(normalized);
            pool.push(candidate);
        }

        pool
    }

    async fn propose_instruction(
        &self,
        teacher: &Arc<dyn ProgramRunner>,
        descriptor: &ProgramDescriptor,
        prompt: String,
        correlation_id: &str,
    ) -> Option<String> {
        let input_field = descriptor.input_fields.first()?;
        let output_field = descriptor.output_fields.first()?;

        let mut inputs = crate::data::FieldMap::new();
        inputs.insert(input_field.clone(), Value::String(prompt));
        let options = CallOptions::new(self.per_call_timeout, correlation_id);

        match forward_with_timeout(teacher.as_ref(), inputs, &options).await {
            Ok(outputs) => outputs.get(output_field).map(value_to_text),
            Err(err) => {
                debug!(error = %err, "instruction proposal failed; using fallback");
                None
            }
        }
    }

    fn build_optimizer(&self, correlation_id: &str) -> BayesianOptimizer {
        BayesianOptimizer::builder()
            .num_initial_samples(self.num_initial_samples)
            .max_iterations(self.max_iterations)
            .convergence_patience(self.convergence_patience)
            .acquisition(self.acquisition)
            .exploration_weight(self.exploration_weight)
            .concurrency(self.concurrency)
            .maybe_overall_timeout(self.overall_timeout)
            .maybe_seed(self.seed)
            .maybe_on_progress(self.on_progress.clone())
            .correlation_id(correlation_id.to_string())
            .build()
    }

    fn assemble(
        &self,
        student: Arc<dyn ProgramRunner>,
        space: &SearchSpace,
        report: OptimizeReport,
    ) -> OptimizedProgram {
        let instruction_text = space
            .instruction(&report.best_configuration.instruction_id)
            .map(|instruction| instruction.text.clone())
            .unwrap_or_default();
        let demonstrations = space.resolve_demos(&report.best_configuration.demo_ids);
        let program =
            student.with_overrides(Some(instruction_text.clone()), &demonstrations);

        OptimizedProgram {
            base: student,
            program,
            instruction_text,
            demonstrations: demonstrations.clone(),
            metadata: OptimizedProgramMetadata {
                created_at: Utc::now(),
                demo_count: demonstrations.len(),
                best_score: report.best_score,
                optimizer_stats: report.stats,
            },
        }
    }

    fn progress(
        &self,
        phase: Phase,
        completed: usize,
        score: Option<f32>,
        correlation_id: &str,
    ) {
        emit_progress(
            &self.on_progress,
            ProgressEvent {
                phase,
                completed,
                total: 5,
                score,
                correlation_id: correlation_id.to_string(),
            },
        );
    }
}

/// Deterministic 80/20 demo-source/validation split.
///
/// Both slices are always non-empty: a single-example trainset is used for
/// both mining and validation.
fn split_trainset(trainset: &[Example]) -> (&[Example], &[Example]) {
    if trainset.len() < 2 {
        return (trainset, trainset);
    }
    let split = (trainset.len() * 4 / 5).clamp(1, trainset.len() - 1);
    (&trainset[..split], &trainset[split..])
}

fn default_instruction(descriptor: &ProgramDescriptor) -> String {
    if let Some(instruction) = &descriptor.instruction {
        if !instruction.trim().is_empty() {
            return instruction.clone();
        }
    }
    format!(
        "Given the fields {}, produce the fields {}.",
        join_fields(&descriptor.input_fields),
        join_fields(&descriptor.output_fields),
    )
}

fn join_fields(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| format!("`{field}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_fields(descriptor: &ProgramDescriptor) -> String {
    let mut description = String::from("Input Fields:\n");
    for field in &descriptor.input_fields {
        description.push_str(&format!("  - {field}\n"));
    }
    description.push_str("\nOutput Fields:\n");
    for field in &descriptor.output_fields {
        description.push_str(&format!("  - {field}\n"));
    }
    description
}

fn meta_prompt(
    description: &str,
    current_instruction: &str,
    tip: &str,
    demos: &[Demonstration],
) -> String {
    let mut prompt = format!(
        "Propose an improved instruction for a language-model program.\n\n\
         {description}\nCurrent instruction: {current_instruction}\n\nTip: {tip}\n",
    );
    for demo in demos.iter().take(3) {
        prompt.push_str("\nExample:\n");
        for (key, value) in &demo.example.data {
            prompt.push_str(&format!("  {key}: {value}\n"));
        }
    }
    prompt.push_str("\nRespond with the instruction text only.");
    prompt
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Objective used by `compile`: install a configuration into a student clone
/// and average the metric over the validation slice. A failed student call
/// contributes `0.0`.
struct InstallObjective {
    student: Arc<dyn ProgramRunner>,
    space: Arc<SearchSpace>,
    validation: Vec<Example>,
    metric: Arc<SafeMetric>,
    concurrency: usize,
    per_call_timeout: Duration,
    correlation_id: String,
}

#[async_trait]
impl Objective for InstallObjective {
    async fn evaluate(&self, candidate: &Configuration) -> anyhow::Result<f32> {
        let instruction = self
            .space
            .instruction(&candidate.instruction_id)
            .map(|instruction| instruction.text.clone());
        let demos = self.space.resolve_demos(&candidate.demo_ids);
        let program = self.student.with_overrides(instruction, &demos);

        let scores = futures::stream::iter(self.validation.iter().cloned().map(|example| {
            let program = Arc::clone(&program);
            let metric = Arc::clone(&self.metric);
            let options = CallOptions::new(self.per_call_timeout, self.correlation_id.clone());
            async move {
                match forward_with_timeout(program.as_ref(), example.inputs(), &options).await {
                    Ok(outputs) => metric.score(&example, &outputs).await,
                    Err(err) => {
                        debug!(error = %err, "student call failed; scoring 0.0");
                        0.0
                    }
                }
            }
        }))
        .buffered(self.concurrency.max(1))
        .collect::<Vec<f32>>()
        .await;

        Ok(average_score(&scores))
    }
}

/// A student with the winning instruction and demo set installed, plus
/// provenance metadata. Exposes the same forward-call contract as the base
/// program; the base and the configured program are immutable snapshots.
pub struct OptimizedProgram {
    base: Arc<dyn ProgramRunner>,
    program: Arc<dyn ProgramRunner>,
    pub instruction_text: String,
    pub demonstrations: Vec<Demonstration>,
    pub metadata: OptimizedProgramMetadata,
}

impl std::fmt::Debug for OptimizedProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizedProgram")
            .field("base", &self.base.descriptor())
            .field("program", &self.program.descriptor())
            .field("instruction_text", &self.instruction_text)
            .field("demonstrations", &self.demonstrations)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OptimizedProgramMetadata {
    pub created_at: DateTime<Utc>,
    pub demo_count: usize,
    pub best_score: f32,
    pub optimizer_stats: OptimizerStats,
}

/// The serializable slice of an [`OptimizedProgram`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OptimizedProgramState {
    pub instruction_text: String,
    pub demonstrations: Vec<Demonstration>,
    pub metadata: OptimizedProgramMetadata,
}

impl OptimizedProgram {
    /// Wraps a program without optimizing it (the no-op compile path).
    fn passthrough(base: Arc<dyn ProgramRunner>) -> Self {
        let descriptor = base.descriptor();
        Self {
            program: Arc::clone(&base),
            base,
            instruction_text: descriptor.instruction.unwrap_or_default(),
            demonstrations: Vec::new(),
            metadata: OptimizedProgramMetadata {
                created_at: Utc::now(),
                demo_count: 0,
                best_score: 0.0,
                optimizer_stats: OptimizerStats::default(),
            },
        }
    }

    pub fn base(&self) -> Arc<dyn ProgramRunner> {
        Arc::clone(&self.base)
    }

    /// The configured student.
    pub fn program(&self) -> Arc<dyn ProgramRunner> {
        Arc::clone(&self.program)
    }

    pub fn dump_state(&self) -> OptimizedProgramState {
        OptimizedProgramState {
            instruction_text: self.instruction_text.clone(),
            demonstrations: self.demonstrations.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Reinstalls a dumped state onto `base`.
    pub fn load_state(base: Arc<dyn ProgramRunner>, state: OptimizedProgramState) -> Self {
        let program = base.with_overrides(
            Some(state.instruction_text.clone()),
            &state.demonstrations,
        );
        Self {
            base,
            program,
            instruction_text: state.instruction_text,
            demonstrations: state.demonstrations,
            metadata: state.metadata,
        }
    }
}

#[async_trait]
impl ProgramRunner for OptimizedProgram {
    async fn forward(
        &self,
        inputs: crate::data::FieldMap,
        options: &CallOptions,
    ) -> Result<crate::data::FieldMap, crate::core::ForwardError> {
        self.program.forward(inputs, options).await
    }

    fn descriptor(&self) -> ProgramDescriptor {
        self.program.descriptor()
    }

    fn with_overrides(
        &self,
        instruction: Option<String>,
        demos: &[Demonstration],
    ) -> Arc<dyn ProgramRunner> {
        self.program.with_overrides(instruction, demos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::example_from_pairs;

    #[test]
    fn split_keeps_both_slices_non_empty() {
        let one = vec![example_from_pairs(&[("q", "a")], &["q"])];
        let (demo_source, validation) = split_trainset(&one);
        assert_eq!(demo_source.len(), 1);
        assert_eq!(validation.len(), 1);

        let five: Vec<Example> = (0..5)
            .map(|i| example_from_pairs(&[("q", &i.to_string())], &["q"]))
            .collect();
        let (demo_source, validation) = split_trainset(&five);
        assert_eq!(demo_source.len(), 4);
        assert_eq!(validation.len(), 1);
    }

    #[test]
    fn default_instruction_prefers_existing_text() {
        let descriptor = ProgramDescriptor::new(
            vec!["question".to_string()],
            vec!["answer".to_string()],
        );
        assert_eq!(
            default_instruction(&descriptor),
            "Given the fields `question`, produce the fields `answer`."
        );

        let with_text = descriptor.with_instruction("Answer concisely.");
        assert_eq!(default_instruction(&with_text), "Answer concisely.");
    }

    #[test]
    fn meta_prompt_includes_demo_samples() {
        let descriptor = ProgramDescriptor::new(vec!["q".to_string()], vec!["a".to_string()]);
        let demo = Demonstration::new(example_from_pairs(&[("q", "x"), ("a", "y")], &["q"]), 1.0);
        let prompt = meta_prompt(
            &describe_fields(&descriptor),
            "base",
            "tip",
            std::slice::from_ref(&demo),
        );
        assert!(prompt.contains("Input Fields:"));
        assert!(prompt.contains("Tip: tip"));
        assert!(prompt.contains("\"x\""));
    }
}
