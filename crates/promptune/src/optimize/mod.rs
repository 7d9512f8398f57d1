//! The optimization subsystem.
//!
//! Three coupled parts drive a compile:
//!
//! 1. [`DemonstrationMiner`] runs the teacher over the training set and keeps
//!    the highest-quality traces as few-shot demonstrations.
//! 2. [`BayesianOptimizer`] searches (instruction, demo-subset)
//!    configurations: a [`Surrogate`] predicts scores from configuration
//!    features, an [`Acquisition`] function picks the next candidate, and the
//!    loop stops on convergence patience, exhaustion, or timeout.
//! 3. [`Teleprompter`] orchestrates the whole compile and assembles the
//!    [`OptimizedProgram`]; [`ContinuousController`] re-runs it on a schedule
//!    with adaptive intensity.
//!
//! | Part | Strategy | Cost |
//! |------|----------|------|
//! | [`DemonstrationMiner`] | One teacher call per training example | trainset × 1 |
//! | [`BayesianOptimizer`] | Seeded surrogate search | ≤ seeds + iterations objective calls |
//! | [`Teleprompter`] | Mine → instruct → optimize | miner + candidates + search × validation |

pub mod acquisition;
pub mod bayesian;
pub mod continuous;
pub mod miner;
pub mod space;
pub mod surrogate;
pub mod teleprompter;

pub use acquisition::*;
pub use bayesian::*;
pub use continuous::*;
pub use miner::*;
pub use space::*;
pub use surrogate::*;
pub use teleprompter::*;
