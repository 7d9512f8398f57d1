use std::time::Duration;

/// Coarse classification used by retry and recovery policies.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    Temporary,
    BadResponse,
    BadRequest,
    Internal,
}

/// A single program call failed.
///
/// These are the per-call failure kinds of the forward contract. They are
/// absorbed at the evaluation layer: a failed teacher call drops one candidate
/// demonstration, a failed student call contributes a zero score.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("call timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("transport failure: {detail}")]
    Transport { detail: String },

    #[error("malformed output: {detail}")]
    Malformed { detail: String },

    #[error("upstream failure: {detail}")]
    Upstream { detail: String },
}

impl ForwardError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } => ErrorClass::Temporary,
            Self::Transport { .. } => ErrorClass::Temporary,
            Self::Malformed { .. } => ErrorClass::BadResponse,
            Self::Upstream { .. } => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Temporary)
    }
}

/// Structural failures of the search loop.
#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("search space yields no valid candidate")]
    NoCandidates,

    #[error("every seed evaluation failed")]
    NoInitialObservations,
}

/// Fatal failures surfaced from `Teleprompter::compile`.
///
/// Transient program failures never reach this level; only contract
/// violations the compile operation can observe synchronously, plus the two
/// structural optimizer failures, do.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("invalid inputs: {0}")]
    InvalidInputs(String),

    #[error("demonstration miner produced an empty pool")]
    NoBootstrappedDemos,

    #[error("optimization failed")]
    OptimizationFailed {
        #[source]
        source: OptimizeError,
    },
}

impl From<OptimizeError> for CompileError {
    fn from(source: OptimizeError) -> Self {
        CompileError::OptimizationFailed { source }
    }
}
