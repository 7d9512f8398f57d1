//! Collaborator contracts and error taxonomy.
//!
//! The engine never talks to an LLM itself. Everything it needs from the
//! outside world arrives through two seams: the [`ProgramRunner`] forward
//! contract (student and teacher programs) and the [`crate::evaluate::Metric`]
//! scoring contract. Both are object-safe so callers can hand in
//! `Arc<dyn …>` collaborators, including test doubles.

pub mod errors;
pub mod program;
pub mod progress;

pub use errors::*;
pub use program::*;
pub use progress::*;
