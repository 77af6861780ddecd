//! Lazy, restartable file chunking.
//!
//! The chunker reads one chunk per call and never buffers ahead, so memory use
//! stays at one chunk regardless of file size.

use crate::error::{FilesError, Result};
use crate::{FileMetadata, percent};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// One ordered slice of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk index (0-based)
    pub index: u64,
    /// Payload bytes, at most one chunk size long
    pub data: Vec<u8>,
    /// True iff this is chunk `total_chunks - 1`
    pub is_last: bool,
}

/// Sequential chunker over a seekable source
///
/// Yields chunks strictly in index order starting at offset 0. After the last
/// chunk it keeps returning `None` until [`Chunker::reset`] rewinds it.
pub struct Chunker<R = File> {
    source: R,
    chunk_size: usize,
    total_size: u64,
    current_offset: u64,
}

impl Chunker<File> {
    /// Open a file for chunking
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, its metadata cannot be
    /// read, or `chunk_size` is zero.
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        let total_size = file.metadata()?.len();
        Self::from_reader(file, total_size, chunk_size)
    }
}

impl<R: Read + Seek> Chunker<R> {
    /// Chunk an arbitrary seekable reader of known length
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidChunkSize`] if `chunk_size` is zero.
    pub fn from_reader(source: R, total_size: u64, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(FilesError::InvalidChunkSize);
        }

        Ok(Self {
            source,
            chunk_size,
            total_size,
            current_offset: 0,
        })
    }

    /// Get total number of chunks
    #[must_use]
    pub fn num_chunks(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size as u64)
    }

    /// Get chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Get total file size
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Byte offset of the next chunk
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.current_offset
    }

    /// Metadata describing this file for the file-info announcement
    #[must_use]
    pub fn metadata(&self, name: impl Into<String>, media_type: Option<String>) -> FileMetadata {
        FileMetadata {
            name: name.into(),
            size: self.total_size,
            media_type,
            chunk_size: self.chunk_size,
            total_chunks: self.num_chunks(),
        }
    }

    /// Read the next chunk
    ///
    /// Returns `Ok(None)` once the cursor reaches the end of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the source fails, including a source
    /// that is shorter than its declared size.
    pub fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        if self.current_offset >= self.total_size {
            return Ok(None);
        }

        let remaining = self.total_size - self.current_offset;
        let chunk_len = remaining.min(self.chunk_size as u64) as usize;
        let index = self.current_offset / self.chunk_size as u64;

        let mut data = vec![0u8; chunk_len];
        self.source.read_exact(&mut data)?;

        self.current_offset += chunk_len as u64;

        Ok(Some(Chunk {
            index,
            data,
            is_last: self.current_offset >= self.total_size,
        }))
    }

    /// Rewind to the first chunk
    ///
    /// # Errors
    ///
    /// Returns an error if seeking fails.
    pub fn reset(&mut self) -> io::Result<()> {
        self.source.seek(SeekFrom::Start(0))?;
        self.current_offset = 0;
        Ok(())
    }

    /// Percentage of the file read so far, `floor(offset / size * 100)`
    ///
    /// An empty file reports 100.
    #[must_use]
    pub fn progress(&self) -> u8 {
        percent(self.current_offset, self.total_size)
    }
}

impl<R: Read + Seek> Iterator for Chunker<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
