use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::ForwardError;
use crate::data::{Demonstration, FieldMap};

/// Per-call options passed through to the program collaborator.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub timeout: Duration,
    pub correlation_id: String,
}

impl CallOptions {
    pub fn new(timeout: Duration, correlation_id: impl Into<String>) -> Self {
        Self {
            timeout,
            correlation_id: correlation_id.into(),
        }
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

/// What a program consumes and produces, plus its current instruction text.
///
/// This is the only signature information the engine reads. Richer field
/// constraints belong to the collaborator; it validates them before returning
/// predictions.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProgramDescriptor {
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
    pub instruction: Option<String>,
}

impl ProgramDescriptor {
    pub fn new(input_fields: Vec<String>, output_fields: Vec<String>) -> Self {
        Self {
            input_fields,
            output_fields,
            instruction: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }
}

/// The program-call contract provided by collaborators.
///
/// `forward` is pure with respect to the program value: installing an
/// instruction or demos via [`ProgramRunner::with_overrides`] produces a *new*
/// program; the original is never mutated. The engine only ever holds programs
/// behind `Arc<dyn ProgramRunner>` and treats them as immutable snapshots.
///
/// # Errors
///
/// `forward` fails with a [`ForwardError`] kind the evaluation layer knows how
/// to absorb: timeouts and transport errors are recoverable per-call failures,
/// malformed outputs score zero.
#[async_trait]
pub trait ProgramRunner: Send + Sync {
    async fn forward(
        &self,
        inputs: FieldMap,
        options: &CallOptions,
    ) -> Result<FieldMap, ForwardError>;

    fn descriptor(&self) -> ProgramDescriptor;

    /// Returns a copy of this program with `instruction` and `demos`
    /// installed. `None` keeps the program's current instruction.
    fn with_overrides(
        &self,
        instruction: Option<String>,
        demos: &[Demonstration],
    ) -> Arc<dyn ProgramRunner>;
}

/// Runs `program.forward` under an enforced timeout.
///
/// Collaborators are expected to honor `options.timeout` themselves; this
/// wrapper guarantees the cap even when they do not. On trip the call is
/// abandoned and surfaces as [`ForwardError::Timeout`].
pub async fn forward_with_timeout(
    program: &dyn ProgramRunner,
    inputs: FieldMap,
    options: &CallOptions,
) -> Result<FieldMap, ForwardError> {
    match tokio::time::timeout(options.timeout, program.forward(inputs, options)).await {
        Ok(result) => result,
        Err(_) => Err(ForwardError::Timeout {
            after: options.timeout,
        }),
    }
}
