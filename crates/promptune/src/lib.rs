//! Prompt optimization for language-model programs.
//!
//! Given a *student* program (a prompt template with declared input/output
//! fields), a stronger *teacher* program, a labeled training set, and a
//! scalar metric, `promptune` searches for the instruction string and
//! few-shot demonstrations that maximize the metric when installed into the
//! student.
//!
//! # The mental model
//!
//! Three layers:
//!
//! | Layer | Concept | Key types |
//! |-------|---------|-----------|
//! | **Programs** | The forward-call contract collaborators provide | [`ProgramRunner`], [`ProgramDescriptor`] |
//! | **Evaluation** | What "good" means | [`Metric`], [`ExactMatch`], [`SafeMetric`] |
//! | **Optimization** | Searching instructions and demos | [`Teleprompter`], [`BayesianOptimizer`], [`ContinuousController`] |
//!
//! The engine never calls an LLM itself. Students and teachers arrive behind
//! `Arc<dyn ProgramRunner>`; installing an instruction or demos produces a
//! *new* program value through [`ProgramRunner::with_overrides`] — nothing is
//! mutated in place.
//!
//! # Quick start
//!
//! ```ignore
//! use promptune::*;
//! use std::sync::Arc;
//!
//! # async fn example(student: Arc<dyn ProgramRunner>, teacher: Arc<dyn ProgramRunner>,
//! #                  trainset: Vec<Example>) -> Result<(), CompileError> {
//! let teleprompter = Teleprompter::builder()
//!     .max_demos(4)
//!     .num_instruction_candidates(10)
//!     .build();
//!
//! let metric = Arc::new(ExactMatch::new("answer"));
//! let optimized = teleprompter
//!     .compile(student, teacher, &trainset, metric)
//!     .await?;
//!
//! println!("best score: {}", optimized.metadata.best_score);
//! let outputs = optimized
//!     .forward(trainset[0].inputs(), &CallOptions::default())
//!     .await;
//! # Ok(())
//! # }
//! ```
//!
//! For unattended operation, [`ContinuousController::spawn`] supervises one
//! program long-term: periodic quality checks, scheduled re-optimization with
//! adaptive intensity, and capped-backoff retries, all behind an opaque
//! [`ControllerHandle`].
//!
//! # Crate organization
//!
//! - [`core`] — collaborator contracts ([`ProgramRunner`], progress/events)
//!   and the error taxonomy
//! - [`data`] — [`Example`], [`Demonstration`], [`Instruction`]
//! - [`evaluate`] — metrics and the error-absorbing wrapper
//! - [`optimize`] — miner, surrogate, acquisition, optimizer, teleprompter,
//!   controller
//! - [`utils`] — tracing setup

pub mod core;
pub mod data;
pub mod evaluate;
pub mod optimize;
pub mod utils;

pub use core::*;
pub use data::*;
pub use evaluate::*;
pub use optimize::*;
pub use utils::*;
