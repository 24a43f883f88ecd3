//! Component D: the persistence port, its sqlx-backed and in-memory
//! implementations, the write-behind coordinator, and the dead-letter
//! queue for failed writes.

pub mod coordinator;
pub mod dead_letter;
pub mod port;
pub mod sqlite;

use miette::Diagnostic;
use thiserror::Error;

use crate::errors::ErrorKind;
use crate::resilience::Retryable;

/// Errors a [`port::PersistencePort`] or [`port::Transaction`] implementation
/// may raise.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("backend error: {0}")]
    #[diagnostic(code(warden::persistence::backend))]
    Backend(String),

    #[error("operation timed out")]
    #[diagnostic(code(warden::persistence::timeout))]
    Timeout,

    #[error("transaction already completed")]
    #[diagnostic(code(warden::persistence::transaction_closed))]
    TransactionClosed,

    #[error("serialization error: {0}")]
    #[diagnostic(code(warden::persistence::serde))]
    Serde(#[from] serde_json::Error),
}

impl PersistenceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PersistenceError::Backend(_) | PersistenceError::TransactionClosed | PersistenceError::Serde(_) => {
                ErrorKind::PersistenceFailure
            }
            PersistenceError::Timeout => ErrorKind::Timeout,
        }
    }
}

/// Transport and backend-level failures are retryable (§4.E); malformed
/// data (serialization, a transaction used after it closed) is not.
impl Retryable for PersistenceError {
    fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::Backend(_) | PersistenceError::Timeout)
    }
}
