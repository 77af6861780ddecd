//! In-memory reassembly of a chunked file.
//!
//! Chunks are stored by index as they arrive, so memory grows with the bytes
//! actually received rather than the announced chunk count. Out-of-order
//! arrival is accepted; the finished artifact is produced at most once.

use crate::error::{FilesError, Result};
use crate::{FileMetadata, percent};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A fully reassembled file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name from the announcement
    pub name: String,
    /// Declared media type
    pub media_type: Option<String>,
    /// File content
    pub data: Vec<u8>,
    /// BLAKE3 hash of `data`
    pub digest: [u8; 32],
}

impl Artifact {
    /// Content length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-byte file
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Hex form of the content digest
    #[must_use]
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Receiver-side chunk accumulator
pub struct Reassembler {
    metadata: FileMetadata,
    slots: BTreeMap<u64, Vec<u8>>,
    received_count: u64,
    received_bytes: u64,
    artifact: Option<Arc<Artifact>>,
}

impl Reassembler {
    /// Create an empty accumulator for the announced file
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata's chunk count does not match its size
    /// and chunk size.
    pub fn new(metadata: FileMetadata) -> Result<Self> {
        metadata.validate()?;

        Ok(Self {
            metadata,
            slots: BTreeMap::new(),
            received_count: 0,
            received_bytes: 0,
            artifact: None,
        })
    }

    /// Metadata this accumulator was built for
    #[must_use]
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    /// Store a chunk payload at `index`
    ///
    /// Returns `Ok(false)` if the slot was already filled; the duplicate is
    /// dropped and not counted again.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::IndexOutOfRange`] for an index past the last chunk
    /// and [`FilesError::OversizedChunk`] for a payload longer than the chunk
    /// size. A short payload (the file tail) is accepted.
    pub fn insert(&mut self, index: u64, data: Vec<u8>) -> Result<bool> {
        let total = self.metadata.total_chunks;
        if index >= total {
            return Err(FilesError::IndexOutOfRange { index, total });
        }
        if data.len() > self.metadata.chunk_size {
            return Err(FilesError::OversizedChunk {
                index,
                len: data.len(),
                max: self.metadata.chunk_size,
            });
        }

        if self.slots.contains_key(&index) || self.artifact.is_some() {
            tracing::debug!("Ignoring duplicate chunk {}", index);
            return Ok(false);
        }

        self.received_bytes += data.len() as u64;
        self.received_count += 1;
        self.slots.insert(index, data);

        Ok(true)
    }

    /// Check if chunk is received
    #[must_use]
    pub fn has_chunk(&self, index: u64) -> bool {
        self.artifact.is_some() || self.slots.contains_key(&index)
    }

    /// Indices not yet received, ascending
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<u64> {
        if self.artifact.is_some() {
            return Vec::new();
        }
        (0..self.metadata.total_chunks)
            .filter(|index| !self.slots.contains_key(index))
            .collect()
    }

    /// Number of chunks stored
    #[must_use]
    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    /// Payload bytes stored
    #[must_use]
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// `floor(received_bytes / size * 100)`; 100 for an empty file
    #[must_use]
    pub fn progress(&self) -> u8 {
        percent(self.received_bytes, self.metadata.size)
    }

    /// True once every slot is filled
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received_count == self.metadata.total_chunks
    }

    /// The finished artifact, if [`Reassembler::finalize`] has run
    #[must_use]
    pub fn artifact(&self) -> Option<&Arc<Artifact>> {
        self.artifact.as_ref()
    }

    /// Concatenate the slots into the artifact
    ///
    /// Idempotent: the first successful call builds the artifact and releases
    /// the slot buffers; later calls return the same artifact.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::Incomplete`] if any slot is empty and
    /// [`FilesError::SizeMismatch`] if the concatenated length differs from the
    /// declared size. Neither error exposes partial content.
    pub fn finalize(&mut self) -> Result<Arc<Artifact>> {
        if let Some(artifact) = &self.artifact {
            return Ok(Arc::clone(artifact));
        }

        if !self.is_complete() {
            return Err(FilesError::Incomplete {
                received: self.received_count,
                total: self.metadata.total_chunks,
            });
        }

        if self.received_bytes != self.metadata.size {
            return Err(FilesError::SizeMismatch {
                expected: self.metadata.size,
                actual: self.received_bytes,
            });
        }

        let mut data = Vec::with_capacity(self.metadata.size as usize);
        // Ascending key order; is_complete() means every index is present
        for chunk in std::mem::take(&mut self.slots).into_values() {
            data.extend_from_slice(&chunk);
        }

        let digest = *blake3::hash(&data).as_bytes();
        let artifact = Arc::new(Artifact {
            name: self.metadata.name.clone(),
            media_type: self.metadata.media_type.clone(),
            data,
            digest,
        });
        self.artifact = Some(Arc::clone(&artifact));

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chunker, DEFAULT_CHUNK_SIZE};
    use std::io::Cursor;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn chunks_of(data: &[u8], chunk_size: usize) -> (FileMetadata, Vec<(u64, Vec<u8>)>) {
        let chunker =
            Chunker::from_reader(Cursor::new(data.to_vec()), data.len() as u64, chunk_size)
                .unwrap();
        let meta = chunker.metadata("data.bin", None);
        let chunks = chunker
            .map(|c| {
                let c = c.unwrap();
                (c.index, c.data)
            })
            .collect();
        (meta, chunks)
    }

    #[test]
    fn test_in_order_reassembly() {
        let data = pattern(40_000);
        let (meta, chunks) = chunks_of(&data, DEFAULT_CHUNK_SIZE);
        let mut reassembler = Reassembler::new(meta).unwrap();

        for (index, payload) in chunks {
            assert!(reassembler.insert(index, payload).unwrap());
        }

        assert!(reassembler.is_complete());
        assert_eq!(reassembler.progress(), 100);
        let artifact = reassembler.finalize().unwrap();
        assert_eq!(artifact.len(), 40_000);
        assert_eq!(artifact.data, data);
        assert_eq!(artifact.digest, *blake3::hash(&data).as_bytes());
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let data = pattern(5 * 1024 + 3);
        let (meta, mut chunks) = chunks_of(&data, 1024);
        chunks.reverse();

        let mut reassembler = Reassembler::new(meta).unwrap();
        for (index, payload) in chunks {
            reassembler.insert(index, payload).unwrap();
        }

        assert_eq!(reassembler.finalize().unwrap().data, data);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let data = pattern(3000);
        let (meta, chunks) = chunks_of(&data, 1024);
        let mut reassembler = Reassembler::new(meta).unwrap();
        for (index, payload) in chunks {
            reassembler.insert(index, payload).unwrap();
        }

        let first = reassembler.finalize().unwrap();
        let second = reassembler.finalize().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reassembler.artifact().map(|a| a.len()), Some(3000));
    }

    #[test]
    fn test_incomplete_finalize_fails() {
        let data = pattern(3000);
        let (meta, chunks) = chunks_of(&data, 1024);
        let mut reassembler = Reassembler::new(meta).unwrap();
        let (index, payload) = chunks[0].clone();
        reassembler.insert(index, payload).unwrap();

        match reassembler.finalize() {
            Err(FilesError::Incomplete { received, total }) => {
                assert_eq!(received, 1);
                assert_eq!(total, 3);
            }
            other => panic!("Expected Incomplete, got {other:?}"),
        }
        assert!(reassembler.artifact().is_none());
        assert_eq!(reassembler.missing_chunks(), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_chunk_not_double_counted() {
        let data = pattern(2048);
        let (meta, chunks) = chunks_of(&data, 1024);
        let mut reassembler = Reassembler::new(meta).unwrap();

        let (index, payload) = chunks[0].clone();
        assert!(reassembler.insert(index, payload.clone()).unwrap());
        assert!(!reassembler.insert(index, payload).unwrap());
        assert_eq!(reassembler.received_count(), 1);
        assert_eq!(reassembler.received_bytes(), 1024);
        assert!(reassembler.has_chunk(0));
        assert!(!reassembler.has_chunk(1));
    }

    #[test]
    fn test_index_out_of_range() {
        let meta = FileMetadata::new("report.pdf", 40_000, None, DEFAULT_CHUNK_SIZE).unwrap();
        let mut reassembler = Reassembler::new(meta).unwrap();
        assert!(matches!(
            reassembler.insert(5, vec![0u8; 10]),
            Err(FilesError::IndexOutOfRange { index: 5, total: 3 })
        ));
    }

    #[test]
    fn test_oversized_chunk_rejected_short_tail_accepted() {
        let meta = FileMetadata::new("report.pdf", 40_000, None, DEFAULT_CHUNK_SIZE).unwrap();
        let mut reassembler = Reassembler::new(meta).unwrap();

        assert!(matches!(
            reassembler.insert(0, vec![0u8; DEFAULT_CHUNK_SIZE + 1]),
            Err(FilesError::OversizedChunk { index: 0, .. })
        ));
        assert!(reassembler.insert(2, vec![0u8; 7_232]).unwrap());
    }

    #[test]
    fn test_short_chunks_fail_size_check() {
        let meta = FileMetadata::new("a.bin", 2048, None, 1024).unwrap();
        let mut reassembler = Reassembler::new(meta).unwrap();
        reassembler.insert(0, vec![1u8; 1024]).unwrap();
        reassembler.insert(1, vec![1u8; 1000]).unwrap();

        assert!(matches!(
            reassembler.finalize(),
            Err(FilesError::SizeMismatch {
                expected: 2048,
                actual: 2024
            })
        ));
    }

    #[test]
    fn test_zero_byte_file_complete_immediately() {
        let meta = FileMetadata::new("empty.txt", 0, None, DEFAULT_CHUNK_SIZE).unwrap();
        let mut reassembler = Reassembler::new(meta).unwrap();
        assert!(reassembler.is_complete());
        assert_eq!(reassembler.progress(), 100);
        let artifact = reassembler.finalize().unwrap();
        assert!(artifact.is_empty());
        assert_eq!(artifact.name, "empty.txt");
    }

    #[test]
    fn test_huge_chunk_count_allocates_nothing_up_front() {
        let meta = FileMetadata::new("huge.bin", 4 * 1024 * 1024 * 1024, None, 1).unwrap();
        assert_eq!(meta.total_chunks, 4 * 1024 * 1024 * 1024);

        let mut reassembler = Reassembler::new(meta).unwrap();
        assert!(reassembler.insert(7, vec![0u8]).unwrap());
        assert!(reassembler.has_chunk(7));
        assert_eq!(reassembler.received_count(), 1);
        assert!(!reassembler.is_complete());
    }

    #[test]
    fn test_inconsistent_metadata_rejected() {
        let mut meta = FileMetadata::new("a.bin", 100, None, 10).unwrap();
        meta.total_chunks = 3;
        assert!(matches!(
            Reassembler::new(meta),
            Err(FilesError::MetadataMismatch { .. })
        ));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn shuffled_chunks() -> impl Strategy<Value = (Vec<u8>, usize, Vec<usize>)> {
            (prop::collection::vec(any::<u8>(), 0..8_000), 1usize..2048).prop_flat_map(
                |(data, chunk_size)| {
                    let n = data.len().div_ceil(chunk_size);
                    let order: Vec<usize> = (0..n).collect();
                    (Just(data), Just(chunk_size), Just(order).prop_shuffle())
                },
            )
        }

        proptest! {
            #[test]
            fn prop_any_arrival_order_reassembles((data, chunk_size, order) in shuffled_chunks()) {
                let (meta, chunks) = chunks_of(&data, chunk_size);
                let mut reassembler = Reassembler::new(meta).unwrap();

                for i in order {
                    let (index, payload) = chunks[i].clone();
                    prop_assert!(reassembler.insert(index, payload).unwrap());
                }

                let first = reassembler.finalize().unwrap();
                let second = reassembler.finalize().unwrap();
                prop_assert_eq!(&first.data, &data);
                prop_assert!(Arc::ptr_eq(&first, &second));
            }
        }
    }
}
