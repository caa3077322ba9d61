//! Error types shared across the replay crate.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplayError>;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A single record in a container could not be decoded. Non-fatal during
    /// index builds; the scan resynchronizes and continues.
    #[error("invalid record in {file} at offset {offset}: {reason}")]
    InvalidRecord {
        file: PathBuf,
        offset: u64,
        reason: String,
    },

    /// A record pointed to by the index could not be fetched back at serve
    /// time. Fatal for the single request only.
    #[error("record retrieval failed for {file} at offset {offset}: {reason}")]
    Retrieval {
        file: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("malformed archived http response: {reason}")]
    InvalidResponse { reason: String },

    #[error("malformed proxy request: {reason}")]
    InvalidRequest { reason: String },

    #[error("cdx header does not start with 'CDX'")]
    MalformedCdxHeader,
}
