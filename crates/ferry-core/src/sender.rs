//! Sender side of a transfer session.
//!
//! `Idle → Announced → Sending → Done`, or `Failed` when the channel breaks.
//! A failed session is restarted from `Idle` on a fresh channel; it never
//! resumes mid-file.

use crate::TransferEvent;
use crate::channel::DataChannel;
use crate::error::{Result, TransferError};
use crate::protocol::{ChannelMessage, ChunkHeader, TransferMessage};
use ferry_files::{Chunker, FileMetadata};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use tokio::sync::mpsc;

/// Sender session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Not started
    Idle,
    /// File info sent
    Announced,
    /// Emitting chunks
    Sending,
    /// Completion marker sent
    Done,
    /// Channel failed before completion
    Failed,
}

/// Drives one file over one channel
pub struct SenderSession<R = File> {
    chunker: Chunker<R>,
    metadata: FileMetadata,
    state: SenderState,
    progress: u8,
    chunks_sent: u64,
    events: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl SenderSession<File> {
    /// Open a file and prepare a session for it
    ///
    /// The announced name is the file's final path component.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or `chunk_size` is zero.
    pub fn open<P: AsRef<Path>>(
        path: P,
        media_type: Option<String>,
        chunk_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let chunker = Chunker::open(path, chunk_size)?;
        Ok(Self::new(chunker, name, media_type))
    }
}

impl<R: Read + Seek + Send> SenderSession<R> {
    /// Create a session over an existing chunker
    pub fn new(chunker: Chunker<R>, name: impl Into<String>, media_type: Option<String>) -> Self {
        let metadata = chunker.metadata(name, media_type);
        Self {
            chunker,
            metadata,
            state: SenderState::Idle,
            progress: 0,
            chunks_sent: 0,
            events: None,
        }
    }

    /// Report progress and outcome on `events`
    #[must_use]
    pub fn with_events(mut self, events: mpsc::UnboundedSender<TransferEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Metadata announced to the receiver
    #[must_use]
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    /// Last reported progress percentage
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Chunks emitted in the current run
    #[must_use]
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Return to `Idle` so the session can run again on a new channel
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] while a run is in progress, or
    /// an I/O error if the chunker cannot rewind.
    pub fn reset(&mut self) -> Result<()> {
        if matches!(self.state, SenderState::Announced | SenderState::Sending) {
            return Err(TransferError::InvalidState(format!(
                "cannot reset sender while {:?}",
                self.state
            )));
        }
        self.chunker.reset()?;
        self.state = SenderState::Idle;
        self.progress = 0;
        self.chunks_sent = 0;
        Ok(())
    }

    /// Send the whole file: file info, header/payload pairs, completion marker
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] unless the session is `Idle`.
    /// Any channel or read failure moves the session to `Failed` and is
    /// returned.
    pub async fn run<C: DataChannel + ?Sized>(&mut self, channel: &C) -> Result<()> {
        if self.state != SenderState::Idle {
            return Err(TransferError::InvalidState(format!(
                "sender must be Idle to run, is {:?}",
                self.state
            )));
        }

        match self.drive(channel).await {
            Ok(()) => {
                self.state = SenderState::Done;
                self.emit(TransferEvent::Completed);
                tracing::info!(
                    "Sent {} ({} bytes, {} chunks)",
                    self.metadata.name,
                    self.metadata.size,
                    self.chunks_sent
                );
                Ok(())
            }
            Err(e) => {
                self.state = SenderState::Failed;
                tracing::warn!("Send of {} failed: {}", self.metadata.name, e);
                self.emit(TransferEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn drive<C: DataChannel + ?Sized>(&mut self, channel: &C) -> Result<()> {
        self.chunker.reset()?;
        self.chunks_sent = 0;

        channel
            .send(TransferMessage::FileInfo(self.metadata.clone()).encode()?)
            .await?;
        self.state = SenderState::Announced;

        tracing::debug!(
            "Announced {} ({} bytes, {} chunks)",
            self.metadata.name,
            self.metadata.size,
            self.metadata.total_chunks
        );

        self.state = SenderState::Sending;
        let total_chunks = self.metadata.total_chunks;

        while let Some(chunk) = self.chunker.next_chunk()? {
            let header = ChunkHeader {
                index: chunk.index,
                total_chunks,
                is_last: chunk.is_last,
            };
            let len = chunk.data.len();

            // Header and payload are consecutive on the ordered channel
            channel.send(TransferMessage::Chunk(header).encode()?).await?;
            channel.send(ChannelMessage::Binary(chunk.data)).await?;
            self.chunks_sent += 1;

            tracing::trace!(
                "Sent chunk {}/{} ({} bytes)",
                header.index + 1,
                total_chunks,
                len
            );

            let progress = self.chunker.progress();
            if progress != self.progress {
                self.progress = progress;
                self.emit(TransferEvent::Progress(progress));
            }

            tokio::task::yield_now().await;
        }

        channel
            .send(TransferMessage::TransferComplete.encode()?)
            .await?;

        if self.progress != 100 {
            self.progress = 100;
            self.emit(TransferEvent::Progress(100));
        }

        Ok(())
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
