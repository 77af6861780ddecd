//! # Ferry Core
//!
//! Transfer protocol for Ferry, run once a direct channel exists between a
//! sender and a receiver.
//!
//! # Transfer Flow
//!
//! ```text
//! Sender                                 Receiver
//!     |                                      |
//!     |-- file_info (text) ----------------->|  allocate accumulator
//!     |-- chunk {index 0} (text) ----------->|  pending header
//!     |-- payload 0 (binary) --------------->|  store slot 0
//!     |-- ...                                |
//!     |-- chunk {index N-1, is_last} ------->|
//!     |-- payload N-1 (binary) ------------->|  store, finalize
//!     |-- transfer_complete (text) --------->|  no-op if finalized
//! ```
//!
//! The channel must be ordered and reliable; nothing is resent.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod sender;

pub use channel::{ChannelEstablishment, ChannelEvent, DataChannel, EventReceiver};
pub use error::{Result, TransferError};
pub use protocol::{ChannelMessage, ChunkHeader, TransferMessage};
pub use receiver::{ReceiverLimits, ReceiverSession, ReceiverState};
pub use sender::{SenderSession, SenderState};

/// Progress and outcome notifications from a transfer session
///
/// Delivered on an optional unbounded channel so observers never slow the
/// session down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Progress percentage changed (monotonic)
    Progress(u8),
    /// Transfer finished successfully
    Completed,
    /// Transfer failed; reported once
    Failed(String),
}
