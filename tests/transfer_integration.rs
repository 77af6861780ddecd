//! End-to-end transfers over in-memory channels.

use ferry_core::channel::MemoryChannel;
use ferry_core::{
    ChannelMessage, ChunkHeader, DataChannel, ReceiverSession, ReceiverState, SenderSession,
    TransferError, TransferEvent, TransferMessage,
};
use ferry_files::{Chunker, DEFAULT_CHUNK_SIZE, FileMetadata};
use ferry_integration_tests::{TEST_TIMEOUT, pattern};
use proptest::prelude::*;
use std::io::Cursor;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn transfer_bytes(
    data: Vec<u8>,
    chunk_size: usize,
    capacity: usize,
) -> (ferry_core::Result<std::sync::Arc<ferry_files::Artifact>>, Vec<TransferEvent>) {
    let ((tx, _tx_events), (_rx, rx_events)) = MemoryChannel::pair(capacity);
    let len = data.len() as u64;
    let chunker = Chunker::from_reader(Cursor::new(data), len, chunk_size).unwrap();
    let mut sender = SenderSession::new(chunker, "blob.bin", None);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let receive = ReceiverSession::new()
        .with_events(events_tx)
        .spawn(rx_events);

    sender.run(&tx).await.unwrap();
    let result = timeout(TEST_TIMEOUT, receive).await.unwrap().unwrap();

    let events = std::iter::from_fn(|| events_rx.try_recv().ok()).collect();
    (result, events)
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_report_pdf_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("report.pdf");
    let data = pattern(40_000);
    std::fs::write(&path, &data).unwrap();

    let ((tx, _tx_events), (_rx, rx_events)) = MemoryChannel::pair(64);
    let mut sender =
        SenderSession::open(&path, Some("application/pdf".into()), DEFAULT_CHUNK_SIZE).unwrap();
    assert_eq!(sender.metadata().total_chunks, 3);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let receive = ReceiverSession::new()
        .with_events(events_tx)
        .spawn(rx_events);

    let send = tokio::spawn(async move {
        sender.run(&tx).await?;
        tx.close().await;
        Ok::<_, TransferError>(sender.progress())
    });

    let artifact = timeout(TEST_TIMEOUT, receive)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(send.await.unwrap().unwrap(), 100);

    assert_eq!(artifact.name, "report.pdf");
    assert_eq!(artifact.media_type.as_deref(), Some("application/pdf"));
    assert_eq!(artifact.len(), 40_000);
    assert_eq!(artifact.data, data);
    assert_eq!(artifact.digest, *blake3::hash(&data).as_bytes());

    let events: Vec<_> = std::iter::from_fn(|| events_rx.try_recv().ok()).collect();
    assert_eq!(events.last(), Some(&TransferEvent::Completed));
    assert!(events.contains(&TransferEvent::Progress(100)));
}

#[tokio::test]
async fn test_single_slot_channel_still_completes() {
    let data = pattern(100_000);
    let (result, events) = transfer_bytes(data.clone(), 4096, 1).await;
    assert_eq!(result.unwrap().data, data);
    assert_eq!(events.last(), Some(&TransferEvent::Completed));
}

#[tokio::test]
async fn test_zero_byte_transfer() {
    let (result, events) = transfer_bytes(Vec::new(), DEFAULT_CHUNK_SIZE, 8).await;
    assert!(result.unwrap().is_empty());
    assert_eq!(
        events,
        vec![TransferEvent::Progress(100), TransferEvent::Completed]
    );
}

#[tokio::test]
async fn test_exact_multiple_of_chunk_size() {
    let data = pattern(3 * DEFAULT_CHUNK_SIZE);
    let (result, _) = transfer_bytes(data.clone(), DEFAULT_CHUNK_SIZE, 16).await;
    assert_eq!(result.unwrap().data, data);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let (_, events) = transfer_bytes(pattern(50_000), 1000, 8).await;
    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(percents.last(), Some(&100));
}

// ---------------------------------------------------------------------------
// Protocol violations
// ---------------------------------------------------------------------------

async fn send_raw(channel: &MemoryChannel, messages: Vec<ChannelMessage>) {
    for message in messages {
        channel.send(message).await.unwrap();
    }
}

fn control(message: TransferMessage) -> ChannelMessage {
    message.encode().unwrap()
}

#[tokio::test]
async fn test_out_of_range_header_fails_receiver() {
    let ((tx, _tx_events), (_rx, rx_events)) = MemoryChannel::pair(16);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let receive = ReceiverSession::new()
        .with_events(events_tx)
        .spawn(rx_events);

    let meta = FileMetadata::new("report.pdf", 40_000, None, DEFAULT_CHUNK_SIZE).unwrap();
    send_raw(
        &tx,
        vec![
            control(TransferMessage::FileInfo(meta)),
            control(TransferMessage::Chunk(ChunkHeader {
                index: 5,
                total_chunks: 3,
                is_last: false,
            })),
        ],
    )
    .await;

    let err = timeout(TEST_TIMEOUT, receive)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_protocol());

    let failures: Vec<_> = std::iter::from_fn(|| events_rx.try_recv().ok())
        .filter(|e| matches!(e, TransferEvent::Failed(_)))
        .collect();
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn test_garbage_control_message_fails_receiver() {
    let ((tx, _tx_events), (_rx, rx_events)) = MemoryChannel::pair(4);
    let receive = ReceiverSession::new().spawn(rx_events);
    send_raw(&tx, vec![ChannelMessage::Text("{\"type\":".into())]).await;

    let err = timeout(TEST_TIMEOUT, receive)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_protocol());
}

#[test]
fn test_failed_receiver_exposes_nothing() {
    let mut session = ReceiverSession::new();
    let meta = FileMetadata::new("a.bin", 100, None, 10).unwrap();
    session
        .handle_message(control(TransferMessage::FileInfo(meta)))
        .unwrap();
    session
        .handle_message(ChannelMessage::Binary(vec![1; 10]))
        .unwrap_err();

    assert_eq!(session.state(), ReceiverState::Failed);
    assert!(session.artifact().is_none());
    assert_eq!(session.received_bytes(), 0);
}

// ---------------------------------------------------------------------------
// Channel failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sender_close_midway_fails_receiver() {
    let ((tx, _tx_events), (_rx, rx_events)) = MemoryChannel::pair(16);
    let receive = ReceiverSession::new().spawn(rx_events);

    let meta = FileMetadata::new("a.bin", 40_000, None, DEFAULT_CHUNK_SIZE).unwrap();
    send_raw(
        &tx,
        vec![
            control(TransferMessage::FileInfo(meta)),
            control(TransferMessage::Chunk(ChunkHeader {
                index: 0,
                total_chunks: 3,
                is_last: false,
            })),
            ChannelMessage::Binary(vec![0; DEFAULT_CHUNK_SIZE]),
        ],
    )
    .await;
    tx.close().await;

    let err = timeout(TEST_TIMEOUT, receive)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, TransferError::Channel(_)));
}

#[tokio::test]
async fn test_receiver_gone_fails_sender() {
    let ((tx, _tx_events), (rx, rx_events)) = MemoryChannel::pair(2);
    drop(rx);
    drop(rx_events);

    let chunker = Chunker::from_reader(Cursor::new(pattern(10_000)), 10_000, 1000).unwrap();
    let mut sender = SenderSession::new(chunker, "a.bin", None);
    assert!(matches!(
        sender.run(&tx).await,
        Err(TransferError::Channel(_))
    ));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_transfer_is_lossless(
        data in proptest::collection::vec(any::<u8>(), 0..20_000),
        chunk_size in 1usize..5000,
        capacity in 1usize..8,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (result, _) = runtime.block_on(transfer_bytes(data.clone(), chunk_size, capacity));
        prop_assert_eq!(&result.unwrap().data, &data);
    }
}
