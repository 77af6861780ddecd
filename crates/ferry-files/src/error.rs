//! Error types for chunking and reassembly

use thiserror::Error;

/// Errors raised while chunking or reassembling a file
#[derive(Debug, Error)]
pub enum FilesError {
    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Chunk size of zero
    #[error("Chunk size must be non-zero")]
    InvalidChunkSize,

    /// Chunk index outside `0..total`
    #[error("Chunk index {index} out of range (total {total})")]
    IndexOutOfRange {
        /// Offending index
        index: u64,
        /// Declared chunk count
        total: u64,
    },

    /// Payload longer than the chunk size
    #[error("Chunk {index} is {len} bytes, exceeds chunk size {max}")]
    OversizedChunk {
        /// Chunk index
        index: u64,
        /// Payload length
        len: usize,
        /// Chunk size
        max: usize,
    },

    /// Finalize called before every chunk arrived
    #[error("Transfer incomplete: {received}/{total} chunks received")]
    Incomplete {
        /// Chunks stored so far
        received: u64,
        /// Declared chunk count
        total: u64,
    },

    /// Reassembled length differs from the declared size
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Declared size
        expected: u64,
        /// Reassembled size
        actual: u64,
    },

    /// Declared chunk count disagrees with size and chunk size
    #[error("Chunk count mismatch: declared {declared}, expected {expected}")]
    MetadataMismatch {
        /// Count carried in the metadata
        declared: u64,
        /// Count recomputed locally
        expected: u64,
    },
}

/// Result type for file operations
pub type Result<T> = std::result::Result<T, FilesError>;
