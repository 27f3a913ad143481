//! Error taxonomy for the deal lifecycle layer.
//!
//! Validation failures carry enough detail for the caller to correct the
//! input; `Conflict` is kept distinct from generic failures so callers can
//! implement retry-with-reread.

use crate::state::DealState;

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unknown deal state '{0}'")]
    InvalidState(String),

    #[error("cannot transition from '{from}' to '{to}', allowed next states: [{allowed}]")]
    InvalidTransition {
        from: DealState,
        to: DealState,
        allowed: String,
    },

    #[error("a justification comment of at least {min} trimmed characters is required")]
    MissingJustification { min: usize },

    #[error("version conflict on '{id}': {reason}. Reload the record before retrying")]
    Conflict { id: String, reason: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

impl From<sled::Error> for LifecycleError {
    fn from(e: sled::Error) -> Self {
        LifecycleError::Unavailable(e.to_string())
    }
}

impl LifecycleError {
    /// Wrap a codec error from the storage layer. A record that no longer
    /// decodes is indistinguishable from an unreachable backend for callers.
    pub fn codec<E: std::fmt::Display>(e: E) -> Self {
        LifecycleError::Unavailable(format!("codec: {e}"))
    }
}
