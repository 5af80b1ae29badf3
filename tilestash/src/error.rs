//! Error types used by the crate.

use thiserror::Error;

use crate::region::RegionId;

/// Tilestash error type.
#[derive(Debug, Error)]
pub enum OfflineError {
    /// Network request failed.
    #[error("network request failed: {0}")]
    Network(String),
    /// Requested item is not present in the cache or on the server.
    #[error("item not found")]
    NotFound,
    /// The style or a tile source manifest could not be parsed.
    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),
    /// A region definition failed validation.
    #[error("invalid region definition: {0}")]
    InvalidDefinition(String),
    /// No region with the given id exists in the store.
    #[error("offline region {0} does not exist")]
    RegionNotFound(RegionId),
    /// Error reading or writing the cache database.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    /// Error reading/writing data to the FS.
    #[error("failed to read file")]
    Io(#[from] std::io::Error),
    /// Error serializing or deserializing a persisted value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Generic error - details are inside.
    #[error("{0}")]
    Generic(String),
}

impl From<reqwest::Error> for OfflineError {
    fn from(value: reqwest::Error) -> Self {
        Self::Network(value.to_string())
    }
}
