//! Checksum utilities for archive documents
//!
//! The archive compares SHA-256 digests to detect byte-identical rewrites and
//! uses them as version tokens for conditional checkpoint overwrites.

use crate::error::{ArchiveError, Result};
use sha2::{Digest, Sha256};

/// Compute the hex SHA-256 of an in-memory buffer
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify that a buffer matches an expected digest
pub fn verify_bytes(data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_bytes(data);
    if actual == expected {
        Ok(())
    } else {
        Err(ArchiveError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
