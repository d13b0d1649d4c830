use thiserror::Error;

#[derive(Debug, Error)]
pub enum GarimpoError {
    #[error("Invalid profile address: {0}")]
    InvalidTarget(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a failed collaborator call, decided by the adapter
/// that observed the error and consumed by the retry executor.
///
/// Returned as data, never thrown across the retry boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// Worth retrying (network hiccup, timeout, temporary block).
    Transient(String),
    /// Retrying can never succeed (malformed target, gone endpoint).
    Fatal(String),
}

impl FetchFailure {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchFailure::Fatal(_))
    }
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::Transient(msg) => write!(f, "Transient failure: {msg}"),
            FetchFailure::Fatal(msg) => write!(f, "Fatal failure: {msg}"),
        }
    }
}
