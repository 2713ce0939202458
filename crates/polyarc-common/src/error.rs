//! Error types for Polyarc

use thiserror::Error;

/// Result type alias for Polyarc operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Main error type shared by Polyarc crates
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unknown entity kind: {0}")]
    UnknownEntity(String),

    #[error("Invalid partition: {0}")]
    InvalidPartition(String),
}
