//! Abstract direct channel between sender and receiver.
//!
//! Channel establishment (NAT traversal, ICE, DTLS) lives outside this crate.
//! The core only needs a handle it can send messages and negotiation payloads
//! through, plus a stream of [`ChannelEvent`]s.
//!
//! Implementations must deliver messages in order, reliably, and must apply
//! backpressure: `send` waits when the channel is at capacity and never drops.

pub mod memory;

pub use memory::{MemoryChannel, MemoryRendezvous};

use crate::error::{Result, TransferError};
use crate::protocol::ChannelMessage;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Events raised by a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Local negotiation payload to forward to the peer via signaling
    Signal(Value),
    /// Direct channel is open
    Connect,
    /// Message from the peer
    Data(ChannelMessage),
    /// Transport failure
    Error(String),
    /// Channel closed by either side
    Close,
}

/// Receiving half of a channel's event stream
pub type EventReceiver = mpsc::Receiver<ChannelEvent>;

/// Handle to an established or establishing direct channel
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Send one message to the peer, waiting for capacity
    async fn send(&self, message: ChannelMessage) -> Result<()>;

    /// Feed a negotiation payload received from the peer into the channel
    async fn signal(&self, payload: Value) -> Result<()>;

    /// Close the channel; the peer observes [`ChannelEvent::Close`]
    async fn close(&self);
}

/// Factory for direct channels
#[async_trait]
pub trait ChannelEstablishment: Send + Sync {
    /// Create a channel endpoint
    ///
    /// The initiator side starts negotiation; the other side answers.
    async fn create_channel(
        &self,
        is_initiator: bool,
    ) -> Result<(Box<dyn DataChannel>, EventReceiver)>;
}

/// Wait until the channel reports [`ChannelEvent::Connect`]
///
/// Negotiation payloads raised before the connection opens are returned so the
/// caller can relay them.
///
/// # Errors
///
/// Returns [`TransferError::Channel`] if the channel errors or closes first,
/// and [`TransferError::Protocol`] if data arrives before the connection opens.
pub async fn wait_for_connect(events: &mut EventReceiver) -> Result<Vec<Value>> {
    let mut signals = Vec::new();
    loop {
        match events.recv().await {
            Some(ChannelEvent::Connect) => return Ok(signals),
            Some(ChannelEvent::Signal(payload)) => signals.push(payload),
            Some(ChannelEvent::Data(_)) => {
                return Err(TransferError::Protocol(
                    "data received before channel opened".into(),
                ));
            }
            Some(ChannelEvent::Error(e)) => return Err(TransferError::Channel(e)),
            Some(ChannelEvent::Close) | None => {
                return Err(TransferError::Channel(
                    "channel closed during negotiation".into(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_wait_for_connect_collects_signals() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(ChannelEvent::Signal(json!({"type": "offer"})))
            .await
            .unwrap();
        tx.send(ChannelEvent::Signal(json!({"candidate": "c1"})))
            .await
            .unwrap();
        tx.send(ChannelEvent::Connect).await.unwrap();

        let signals = wait_for_connect(&mut rx).await.unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0]["type"], "offer");
    }

    #[tokio::test]
    async fn test_wait_for_connect_reports_error() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(ChannelEvent::Error("ice failed".into())).await.unwrap();
        let err = wait_for_connect(&mut rx).await.unwrap_err();
        assert!(matches!(err, TransferError::Channel(ref m) if m == "ice failed"));
    }

    #[tokio::test]
    async fn test_wait_for_connect_stream_end() {
        let (tx, mut rx) = mpsc::channel::<ChannelEvent>(1);
        drop(tx);
        assert!(matches!(
            wait_for_connect(&mut rx).await,
            Err(TransferError::Channel(_))
        ));
    }
}
