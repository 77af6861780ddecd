//! In-process handoff: one coordinator, one sender, one receiver.
//!
//! Runs every stage a real handoff goes through (room, joins, negotiation
//! relay, direct channel, chunked transfer, reports) without a network.

use crate::config::Config;
use crate::progress::{TransferProgress, format_bytes};
use anyhow::Context;
use ferry_core::channel::{MemoryRendezvous, wait_for_connect};
use ferry_core::{
    ChannelEstablishment, DataChannel, ReceiverSession, SenderSession, TransferEvent,
};
use ferry_signal::{ConnectionId, Coordinator, Role, ServerEvent};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Outcome of a loopback handoff
#[derive(Debug)]
pub struct LoopbackReport {
    /// Where the received copy was written
    pub saved_to: PathBuf,
    /// Bytes received
    pub bytes: u64,
    /// BLAKE3 digest of the received copy
    pub digest: String,
    /// Progress updates the sender saw through the coordinator
    pub sender_updates: usize,
}

struct Participant {
    id: ConnectionId,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Participant {
    fn connect(coordinator: &Coordinator) -> anyhow::Result<Self> {
        let (outbox, events) = mpsc::unbounded_channel();
        let id = coordinator.connect(outbox)?;
        Ok(Self { id, events })
    }

    async fn wait_for(&mut self, name: &str) -> anyhow::Result<ServerEvent> {
        loop {
            let event = self
                .events
                .recv()
                .await
                .with_context(|| format!("Event stream closed while waiting for {name}"))?;
            if event.event_name() == name {
                return Ok(event);
            }
            if let ServerEvent::Error { message } = event {
                anyhow::bail!("Coordinator error: {message}");
            }
        }
    }

    fn drain(&mut self) -> Vec<ServerEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }
}

/// Hand `file` to an in-process receiver and save the copy under `output`
pub async fn run(
    file: &Path,
    output: &Path,
    config: &Config,
    show_progress: bool,
) -> anyhow::Result<LoopbackReport> {
    let mut sender_session =
        SenderSession::open(file, None, config.transfer.chunk_size).context("Failed to open file")?;
    let metadata = sender_session.metadata().clone();

    let coordinator = Coordinator::new(config.coordinator_config());
    let mut sender = Participant::connect(&coordinator)?;
    let mut receiver = Participant::connect(&coordinator)?;
    sender.wait_for("connected").await?;
    receiver.wait_for("connected").await?;

    let ticket = coordinator.create_room(Some(metadata.clone()))?;
    tracing::info!("Share URL: {}", ticket.share_url);

    coordinator
        .join_room(ticket.room_id, Role::Sender, sender.id, Some(metadata.clone()))
        .await?;
    coordinator
        .join_room(ticket.room_id, Role::Receiver, receiver.id, None)
        .await?;

    let ServerEvent::FileReady {
        file: announced,
        sender_id,
    } = receiver.wait_for("file_ready").await?
    else {
        anyhow::bail!("Unexpected pairing event");
    };
    sender.wait_for("receiver_joined").await?;
    tracing::debug!(
        "Receiver paired with {} for {:?}",
        sender_id,
        announced.as_ref().map(|f| &f.name)
    );

    // Direct channel: both ends come from the rendezvous; the offer/answer
    // exchange goes through the coordinator like a real negotiation would.
    let rendezvous = MemoryRendezvous::new(config.transfer.channel_capacity);
    let (sender_channel, mut sender_channel_events) = rendezvous.create_channel(true).await?;
    let (receiver_channel, receiver_channel_events) = rendezvous.create_channel(false).await?;

    coordinator.relay_signal(
        sender.id,
        receiver.id,
        json!({"type": "offer", "transport": "memory"}),
    )?;
    if let ServerEvent::WebrtcSignal { signal, .. } = receiver.wait_for("webrtc_signal").await? {
        receiver_channel.signal(signal).await?;
    }
    coordinator.relay_signal(
        receiver.id,
        sender_id,
        json!({"type": "answer", "transport": "memory"}),
    )?;
    if let ServerEvent::WebrtcSignal { signal, .. } = sender.wait_for("webrtc_signal").await? {
        sender_channel.signal(signal).await?;
    }
    wait_for_connect(&mut sender_channel_events).await?;

    let (transfer_tx, mut transfer_events) = mpsc::unbounded_channel();
    let receive = ReceiverSession::new()
        .with_events(transfer_tx)
        .spawn(receiver_channel_events);

    let send = tokio::spawn(async move {
        let result = sender_session.run(sender_channel.as_ref()).await;
        sender_channel.close().await;
        result
    });

    let progress = if show_progress {
        TransferProgress::new(metadata.size, &metadata.name)
    } else {
        TransferProgress::hidden(metadata.size)
    };

    while let Some(event) = transfer_events.recv().await {
        match event {
            TransferEvent::Progress(percent) => {
                progress.set_percent(percent);
                coordinator
                    .report_progress(ticket.room_id, receiver.id, u32::from(percent))
                    .await?;
            }
            TransferEvent::Completed => {
                coordinator
                    .report_complete(ticket.room_id, receiver.id)
                    .await?;
                progress.finish_with_message(format!("{} received", metadata.name));
            }
            TransferEvent::Failed(reason) => {
                progress.abandon_with_message(format!("failed: {reason}"));
            }
        }
    }

    let artifact = receive.await.context("Receiver task panicked")??;
    send.await.context("Sender task panicked")??;

    let sender_updates = sender
        .drain()
        .iter()
        .filter(|e| matches!(e, ServerEvent::TransferProgressUpdate { .. }))
        .count();

    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let saved_to = output.join(safe_file_name(&artifact.name));
    std::fs::write(&saved_to, &artifact.data)
        .with_context(|| format!("Failed to write {}", saved_to.display()))?;

    coordinator.leave(sender.id).await?;
    coordinator.leave(receiver.id).await?;

    tracing::info!(
        "Saved {} ({}) to {}",
        artifact.name,
        format_bytes(artifact.len() as u64),
        saved_to.display()
    );

    Ok(LoopbackReport {
        saved_to,
        bytes: artifact.len() as u64,
        digest: artifact.digest_hex(),
        sender_updates,
    })
}

/// Reduce a peer-supplied name to a single safe path component
pub fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');

    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}
