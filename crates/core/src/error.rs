/// Error taxonomy for the registry components.
///
/// Tenant-scoping failures surface as `NotFound` so a caller can never
/// distinguish "does not exist" from "belongs to another tenant".
/// `Conflict` marks a uniqueness race on upsert; components recover from it
/// by re-reading and merging, so it should never reach the HTTP layer.
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found")]
    NotFound,

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("uniqueness conflict")]
    Conflict,

    #[error("storage error: {0}")]
    Storage(String),
}

impl RegistryError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        RegistryError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        RegistryError::Storage(err.to_string())
    }
}

/// Per-item failure inside a batch request. Batch endpoints are best-effort:
/// one bad item is reported here while its siblings are still applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    pub index: usize,
    pub field: String,
    pub message: String,
}

impl ItemError {
    pub fn new(index: usize, field: &str, message: impl Into<String>) -> Self {
        ItemError {
            index,
            field: field.to_string(),
            message: message.into(),
        }
    }
}
