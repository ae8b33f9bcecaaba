//! Error types for lbtags.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by a [`ResourceProvider`](crate::provider::ResourceProvider).
///
/// `NotFound` and `Conflict` are distinct so the controller can branch on them
/// (create-vs-update, lost creation race) instead of failing the pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Request never produced an API answer (connection, decode).
    #[error("transport: {0}")]
    Transport(String),

    /// No access token could be obtained.
    #[error("authentication: {0}")]
    Auth(String),

    /// API answered with an error status.
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    /// The provider cannot perform this call for the given resource kind.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ProviderError::Conflict(_))
    }
}

/// Errors that abort a convergence pass.
#[derive(Debug, Error)]
pub enum Error {
    /// Unrecoverable provider error (anything but an absorbed 404/409).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An asynchronous operation finished with an embedded error.
    #[error("operation {operation} failed: {message}{}", status_suffix(.status))]
    OperationFailed {
        operation: String,
        message: String,
        status: Option<u16>,
    },

    /// An operation did not reach a terminal state in time.
    #[error("operation {operation} did not finish within {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// Invariant violation by the caller.
    #[error("misuse: {0}")]
    Misuse(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (http {})", code),
        None => String::new(),
    }
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, Error>;
