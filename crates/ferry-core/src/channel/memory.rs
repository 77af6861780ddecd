//! In-process channel pair backed by bounded tokio queues.
//!
//! Ordered and reliable; `send` waits while the peer's queue is full.

use super::{ChannelEstablishment, ChannelEvent, DataChannel, EventReceiver};
use crate::error::{Result, TransferError};
use crate::protocol::ChannelMessage;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

/// One endpoint of an in-memory channel
pub struct MemoryChannel {
    /// Queue feeding the peer's event stream
    peer: mpsc::Sender<ChannelEvent>,
    closed: AtomicBool,
}

impl MemoryChannel {
    /// Create a connected pair of endpoints
    ///
    /// Each endpoint's event stream starts with [`ChannelEvent::Connect`].
    /// `capacity` bounds the number of undelivered events per direction.
    #[must_use]
    pub fn pair(
        capacity: usize,
    ) -> ((MemoryChannel, EventReceiver), (MemoryChannel, EventReceiver)) {
        let capacity = capacity.max(1);
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);

        // Queues are empty, so the first try_send always fits
        let _ = a_tx.try_send(ChannelEvent::Connect);
        let _ = b_tx.try_send(ChannelEvent::Connect);

        let a = MemoryChannel {
            peer: b_tx,
            closed: AtomicBool::new(false),
        };
        let b = MemoryChannel {
            peer: a_tx,
            closed: AtomicBool::new(false),
        };

        ((a, a_rx), (b, b_rx))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransferError::Channel("channel closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    async fn send(&self, message: ChannelMessage) -> Result<()> {
        self.ensure_open()?;
        self.peer
            .send(ChannelEvent::Data(message))
            .await
            .map_err(|_| TransferError::Channel("peer endpoint dropped".into()))
    }

    async fn signal(&self, payload: Value) -> Result<()> {
        // Already connected; negotiation payloads are only logged
        self.ensure_open()?;
        tracing::trace!("Ignoring negotiation payload on memory channel: {}", payload);
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.peer.send(ChannelEvent::Close).await;
        }
    }
}

/// [`ChannelEstablishment`] that pairs consecutive `create_channel` calls
///
/// The first call creates a pair and parks the second endpoint; the next call
/// takes it.
pub struct MemoryRendezvous {
    capacity: usize,
    parked: Mutex<Option<(MemoryChannel, EventReceiver)>>,
}

impl MemoryRendezvous {
    /// Create a rendezvous whose channels hold `capacity` undelivered events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            parked: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChannelEstablishment for MemoryRendezvous {
    async fn create_channel(
        &self,
        is_initiator: bool,
    ) -> Result<(Box<dyn DataChannel>, EventReceiver)> {
        let mut parked = self.parked.lock().await;

        let (channel, events) = match parked.take() {
            Some(endpoint) => endpoint,
            None => {
                let (local, remote) = MemoryChannel::pair(self.capacity);
                *parked = Some(remote);
                local
            }
        };

        tracing::debug!(
            "Memory channel endpoint created (initiator: {})",
            is_initiator
        );

        Ok((Box::new(channel), events))
    }
}
