//! Crate-wide error currency and structured error-event plumbing.
//!
//! Every component defines its own typed error enum (`GraphError`,
//! `EvaluatorError`, `PersistenceError`, `ResilienceError`); each converts
//! into [`WardenError`] via `#[from]` so dispatcher-facing APIs have a single
//! return type. `WardenError` carries the §7 error kinds verbatim.

use miette::Diagnostic;
use thiserror::Error;

use crate::commands::command::CommandError;
use crate::entities::graph::GraphError;
use crate::evaluator::EvaluatorError;
use crate::persistence::PersistenceError;
use crate::resilience::ResilienceError;

/// The single error type returned at the crate's outer boundary.
///
/// Component errors fold into this via `#[from]`; callers that only care
/// about the coarse kind can match on `WardenError::kind()`.
#[derive(Debug, Error, Diagnostic)]
pub enum WardenError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Evaluator(#[from] EvaluatorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resilience(#[from] ResilienceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Command(#[from] CommandError),

    #[error("internal error: {0}")]
    #[diagnostic(code(warden::internal))]
    Internal(String),
}

/// The coarse error kind named in §7, used for mapping onto transport-level
/// status codes by an external handler. This is a classification, not a new
/// error type — every `WardenError` variant maps to exactly one `ErrorKind`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    WouldCreateCycle,
    Conflict,
    NotSupported,
    Unauthorized,
    CircuitOpen,
    Timeout,
    Canceled,
    ShuttingDown,
    PersistenceFailure,
    Internal,
}

impl ErrorKind {
    /// Exit code for the companion CLI, per §6: `2` invalid argument, `3` not
    /// found, `4` conflict/cycle, `5` service unavailable, `1` other failure.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => 2,
            ErrorKind::NotFound => 3,
            ErrorKind::WouldCreateCycle | ErrorKind::Conflict | ErrorKind::AlreadyExists => 4,
            ErrorKind::CircuitOpen | ErrorKind::ShuttingDown => 5,
            _ => 1,
        }
    }
}

impl WardenError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            WardenError::Graph(e) => e.kind(),
            WardenError::Evaluator(e) => e.kind(),
            WardenError::Persistence(e) => e.kind(),
            WardenError::Resilience(e) => e.kind(),
            WardenError::Command(e) => e.kind(),
            WardenError::Internal(_) => ErrorKind::Internal,
        }
    }
}
