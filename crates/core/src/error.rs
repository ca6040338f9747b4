use serde::{Deserialize, Serialize};

/// Errors suitable for surfacing across crate boundaries (and RPC later).
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum VantageError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("http: {0}")]
    Http(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl VantageError {
    /// True for create/patch rejections caused by an already-existing object.
    pub fn is_conflict(&self) -> bool {
        matches!(self, VantageError::Conflict(_))
    }
}

pub type VantageResult<T> = Result<T, VantageError>;
