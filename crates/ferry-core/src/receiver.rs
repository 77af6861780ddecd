//! Receiver side of a transfer session.
//!
//! `AwaitingInfo → Receiving → Complete`, or `Failed`. The session owns its
//! accumulator outright; callers on other tasks feed it through the channel's
//! event queue (see [`ReceiverSession::run`]) rather than sharing it.

use crate::TransferEvent;
use crate::channel::{ChannelEvent, EventReceiver};
use crate::error::{Result, TransferError};
use crate::protocol::{ChannelMessage, ChunkHeader, TransferMessage};
use ferry_files::{Artifact, FileMetadata, FilesError, Reassembler, chunk_count};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Receiver session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Waiting for the file announcement
    AwaitingInfo,
    /// Accumulating chunks
    Receiving,
    /// Artifact produced
    Complete,
    /// Protocol violation or channel failure; no artifact
    Failed,
}

/// Bounds on what a sender may announce
///
/// The whole file is held in memory until finalize, so the announced size is
/// capped before anything is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverLimits {
    /// Largest accepted chunk size
    pub max_chunk_size: usize,
    /// Largest accepted file size
    pub max_file_size: u64,
    /// Largest accepted chunk count; bounds tiny chunk sizes on large files
    pub max_chunks: u64,
}

impl Default for ReceiverLimits {
    fn default() -> Self {
        Self {
            max_chunk_size: 256 * 1024,
            max_file_size: 4 * 1024 * 1024 * 1024,
            max_chunks: 1 << 20,
        }
    }
}

/// Accumulates one announced file from a channel
pub struct ReceiverSession {
    state: ReceiverState,
    limits: ReceiverLimits,
    reassembler: Option<Reassembler>,
    pending: Option<ChunkHeader>,
    progress: u8,
    events: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl Default for ReceiverSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiverSession {
    /// Create a session with default limits
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(ReceiverLimits::default())
    }

    /// Create a session with explicit limits
    #[must_use]
    pub fn with_limits(limits: ReceiverLimits) -> Self {
        Self {
            state: ReceiverState::AwaitingInfo,
            limits,
            reassembler: None,
            pending: None,
            progress: 0,
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
    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Announced metadata, once file info has arrived
    #[must_use]
    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.reassembler.as_ref().map(Reassembler::metadata)
    }

    /// `floor(received_bytes / size * 100)`, never decreasing
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Payload bytes stored so far
    #[must_use]
    pub fn received_bytes(&self) -> u64 {
        self.reassembler
            .as_ref()
            .map_or(0, Reassembler::received_bytes)
    }

    /// The finished artifact; `None` unless the session is `Complete`
    #[must_use]
    pub fn artifact(&self) -> Option<Arc<Artifact>> {
        if self.state != ReceiverState::Complete {
            return None;
        }
        self.reassembler
            .as_ref()
            .and_then(|r| r.artifact().cloned())
    }

    /// Process one channel event
    ///
    /// Returns the artifact the first time the transfer completes and
    /// `Ok(None)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Channel`] for an error or close before
    /// completion and [`TransferError::Protocol`] for framing violations. Either
    /// moves the session to `Failed`.
    pub fn handle_event(&mut self, event: ChannelEvent) -> Result<Option<Arc<Artifact>>> {
        match event {
            ChannelEvent::Data(message) => self.handle_message(message),
            ChannelEvent::Close => self.on_channel_down("channel closed before transfer completed"),
            ChannelEvent::Error(e) => self.on_channel_down(&e),
            ChannelEvent::Connect | ChannelEvent::Signal(_) => Ok(None),
        }
    }

    /// Process one data-channel message
    ///
    /// Messages arriving after completion (a duplicate `transfer_complete`,
    /// for instance) or after failure are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Protocol`] for any framing violation, which
    /// moves the session to `Failed`.
    pub fn handle_message(&mut self, message: ChannelMessage) -> Result<Option<Arc<Artifact>>> {
        if matches!(self.state, ReceiverState::Complete | ReceiverState::Failed) {
            tracing::debug!(
                "Ignoring {}-byte message in {:?} state",
                message.len(),
                self.state
            );
            return Ok(None);
        }

        let result = match message {
            ChannelMessage::Text(text) => {
                TransferMessage::decode(&text).and_then(|msg| self.on_control(msg))
            }
            ChannelMessage::Binary(data) => self.on_payload(data),
        };

        result.map_err(|e| self.fail(e))
    }

    /// Drive the session from a channel's event stream until it finishes
    ///
    /// After the artifact is produced the session keeps reading until the
    /// sender's `transfer_complete` or a close, so the sender never writes
    /// into a dropped queue. The end of the stream counts as a close.
    ///
    /// # Errors
    ///
    /// Returns the error that moved the session to `Failed`.
    pub async fn run(mut self, mut events: EventReceiver) -> Result<Arc<Artifact>> {
        let mut artifact = None;
        loop {
            let event = events.recv().await.unwrap_or(ChannelEvent::Close);
            let last = ends_transfer(&event);
            if let Some(done) = self.handle_event(event)? {
                artifact = Some(done);
            }
            if last {
                return artifact.ok_or_else(|| {
                    TransferError::Channel("channel closed before transfer completed".into())
                });
            }
        }
    }

    /// Run the session on its own task
    pub fn spawn(self, events: EventReceiver) -> JoinHandle<Result<Arc<Artifact>>> {
        tokio::spawn(self.run(events))
    }

    fn on_control(&mut self, message: TransferMessage) -> Result<Option<Arc<Artifact>>> {
        match message {
            TransferMessage::FileInfo(metadata) => self.on_file_info(metadata),
            TransferMessage::Chunk(header) => {
                self.on_chunk_header(header)?;
                Ok(None)
            }
            TransferMessage::TransferComplete => self.on_transfer_complete(),
        }
    }

    fn on_file_info(&mut self, metadata: FileMetadata) -> Result<Option<Arc<Artifact>>> {
        if self.state != ReceiverState::AwaitingInfo {
            return Err(TransferError::Protocol("duplicate file-info".into()));
        }
        if metadata.chunk_size > self.limits.max_chunk_size {
            return Err(TransferError::Protocol(format!(
                "chunk size {} exceeds limit {}",
                metadata.chunk_size, self.limits.max_chunk_size
            )));
        }
        if metadata.size > self.limits.max_file_size {
            return Err(TransferError::Protocol(format!(
                "file size {} exceeds limit {}",
                metadata.size, self.limits.max_file_size
            )));
        }

        let chunks = chunk_count(metadata.size, metadata.chunk_size).map_err(protocol)?;
        if chunks > self.limits.max_chunks {
            return Err(TransferError::Protocol(format!(
                "{} chunks of {} bytes exceeds limit of {} chunks",
                chunks, metadata.chunk_size, self.limits.max_chunks
            )));
        }

        let reassembler = Reassembler::new(metadata).map_err(protocol)?;
        let meta = reassembler.metadata();
        tracing::info!(
            "Receiving {} ({} bytes, {} chunks)",
            meta.name,
            meta.size,
            meta.total_chunks
        );

        let empty = meta.total_chunks == 0;
        self.reassembler = Some(reassembler);
        self.state = ReceiverState::Receiving;

        if empty {
            return self.complete().map(Some);
        }
        Ok(None)
    }

    fn on_chunk_header(&mut self, header: ChunkHeader) -> Result<()> {
        let Some(reassembler) = self.reassembler.as_ref() else {
            return Err(TransferError::Protocol(
                "chunk header before file-info".into(),
            ));
        };
        if let Some(pending) = self.pending {
            return Err(TransferError::Protocol(format!(
                "chunk header {} arrived before payload of chunk {}",
                header.index, pending.index
            )));
        }

        let total = reassembler.metadata().total_chunks;
        if header.total_chunks != total {
            return Err(TransferError::Protocol(format!(
                "chunk header declares {} chunks, file-info declared {}",
                header.total_chunks, total
            )));
        }
        if header.index >= total {
            return Err(TransferError::Protocol(format!(
                "chunk index {} out of range (total {})",
                header.index, total
            )));
        }
        if header.is_last != (header.index + 1 == total) {
            return Err(TransferError::Protocol(format!(
                "chunk {} has inconsistent last flag",
                header.index
            )));
        }

        self.pending = Some(header);
        Ok(())
    }

    fn on_payload(&mut self, data: Vec<u8>) -> Result<Option<Arc<Artifact>>> {
        let Some(header) = self.pending.take() else {
            return Err(TransferError::Protocol(
                "payload without chunk header".into(),
            ));
        };
        let Some(reassembler) = self.reassembler.as_mut() else {
            return Err(TransferError::Protocol("payload before file-info".into()));
        };

        let len = data.len();
        reassembler.insert(header.index, data).map_err(protocol)?;
        let progress = reassembler.progress();
        let complete = reassembler.is_complete();

        tracing::trace!(
            "Stored chunk {}/{} ({} bytes)",
            header.index + 1,
            header.total_chunks,
            len
        );

        if progress > self.progress {
            self.progress = progress;
            self.emit(TransferEvent::Progress(progress));
        }

        // Completion on the last chunk or on a full accumulator, whichever
        // comes first; both require every slot to be filled.
        if complete {
            return self.complete().map(Some);
        }
        if header.is_last {
            tracing::debug!("Last chunk stored with chunks still missing, waiting");
        }
        Ok(None)
    }

    fn on_transfer_complete(&mut self) -> Result<Option<Arc<Artifact>>> {
        if self.state == ReceiverState::AwaitingInfo {
            return Err(TransferError::Protocol(
                "transfer-complete before file-info".into(),
            ));
        }
        if let Some(pending) = self.pending {
            return Err(TransferError::Protocol(format!(
                "transfer-complete while payload of chunk {} pending",
                pending.index
            )));
        }
        self.complete().map(Some)
    }

    fn complete(&mut self) -> Result<Arc<Artifact>> {
        let Some(reassembler) = self.reassembler.as_mut() else {
            return Err(TransferError::InvalidState(
                "finalize without accumulator".into(),
            ));
        };
        let artifact = reassembler.finalize().map_err(protocol)?;

        self.state = ReceiverState::Complete;
        if self.progress < 100 {
            self.progress = 100;
            self.emit(TransferEvent::Progress(100));
        }
        self.emit(TransferEvent::Completed);

        tracing::info!(
            "Received {} ({} bytes, blake3 {})",
            artifact.name,
            artifact.len(),
            artifact.digest_hex()
        );

        Ok(artifact)
    }

    fn on_channel_down(&mut self, reason: &str) -> Result<Option<Arc<Artifact>>> {
        if matches!(self.state, ReceiverState::Complete | ReceiverState::Failed) {
            return Ok(None);
        }
        Err(self.fail(TransferError::Channel(reason.to_string())))
    }

    fn fail(&mut self, err: TransferError) -> TransferError {
        if self.state != ReceiverState::Failed {
            self.state = ReceiverState::Failed;
            // Drop everything received so far; nothing partial is exposed
            self.reassembler = None;
            self.pending = None;
            tracing::warn!("Receive failed: {}", err);
            self.emit(TransferEvent::Failed(err.to_string()));
        }
        err
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Close, error, or the sender's `transfer_complete`
fn ends_transfer(event: &ChannelEvent) -> bool {
    match event {
        ChannelEvent::Close | ChannelEvent::Error(_) => true,
        ChannelEvent::Data(ChannelMessage::Text(text)) => matches!(
            TransferMessage::decode(text),
            Ok(TransferMessage::TransferComplete)
        ),
        _ => false,
    }
}

fn protocol(err: FilesError) -> TransferError {
    TransferError::Protocol(err.to_string())
}
