use thiserror::Error;

use crate::backend::TransportError;

/// Failures surfaced by the core. Nothing here is fatal: read-path transport
/// failures are absorbed by the fallback policy and only reach callers as
/// advisories, write-path failures leave the optimistic state in place.
#[derive(Debug, Error)]
pub enum Error {
    #[error("backend request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

impl Error {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Error::NotFound { entity, id }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
