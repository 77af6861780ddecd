//! # Ferry Files
//!
//! File handling for the Ferry transfer protocol.
//!
//! This crate provides:
//! - File metadata with a chunk count both sides recompute identically
//! - A lazy, restartable chunker that never holds more than one chunk
//! - An in-memory reassembler with an idempotent finalize
//! - BLAKE3 digest of the finished artifact

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod error;
pub mod reassembler;

pub use chunker::{Chunk, Chunker};
pub use error::{FilesError, Result};
pub use reassembler::{Artifact, Reassembler};

use serde::{Deserialize, Serialize};

/// Default chunk size (16 KiB).
///
/// Small enough to stay under the message size limit of common data-channel
/// implementations.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// File metadata announced before any chunk is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// File name as offered by the sender
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Declared media type, if known
    #[serde(default)]
    pub media_type: Option<String>,
    /// Chunk size used to partition the file
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Number of chunks, `ceil(size / chunk_size)`
    pub total_chunks: u64,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl FileMetadata {
    /// Build metadata, computing the chunk count
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidChunkSize`] if `chunk_size` is zero.
    pub fn new(
        name: impl Into<String>,
        size: u64,
        media_type: Option<String>,
        chunk_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            size,
            media_type,
            chunk_size,
            total_chunks: chunk_count(size, chunk_size)?,
        })
    }

    /// Recompute the chunk count and check it against the declared one
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::MetadataMismatch`] when the declared count differs
    /// from `ceil(size / chunk_size)`, or [`FilesError::InvalidChunkSize`] for a
    /// zero chunk size.
    pub fn validate(&self) -> Result<()> {
        let expected = chunk_count(self.size, self.chunk_size)?;
        if expected != self.total_chunks {
            return Err(FilesError::MetadataMismatch {
                declared: self.total_chunks,
                expected,
            });
        }
        Ok(())
    }

    /// Expected payload length of the chunk at `index`
    #[must_use]
    pub fn expected_chunk_len(&self, index: u64) -> usize {
        let offset = index.saturating_mul(self.chunk_size as u64);
        self.size.saturating_sub(offset).min(self.chunk_size as u64) as usize
    }
}

/// Number of chunks needed for `size` bytes
///
/// A zero-byte file has zero chunks.
///
/// # Errors
///
/// Returns [`FilesError::InvalidChunkSize`] if `chunk_size` is zero.
pub fn chunk_count(size: u64, chunk_size: usize) -> Result<u64> {
    if chunk_size == 0 {
        return Err(FilesError::InvalidChunkSize);
    }
    Ok(size.div_ceil(chunk_size as u64))
}

/// Integer percentage `floor(done / total * 100)`, clamped to 100
///
/// An empty total counts as complete.
#[must_use]
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((u128::from(done) * 100 / u128::from(total)).min(100)) as u8
}
