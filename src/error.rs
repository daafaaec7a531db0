//! Error taxonomy shared by the store, domain operations and sync engine.

use thiserror::Error;

/// Errors surfaced to callers of domain operations.
///
/// Remote failures are listed for completeness but never escape a domain
/// operation: the sync engine folds them into [`crate::sync::SyncStatus::Error`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PosError {
    #[error("{0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("local storage failure: {0}")]
    Storage(String),

    #[error("remote store failure: {0}")]
    Remote(String),

    #[error("operation declined")]
    Declined,
}

impl PosError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type PosResult<T> = Result<T, PosError>;
