//! Signaling message definitions.
//!
//! Every message is a JSON object `{"event": "<name>", "data": {...}}`.
//! Negotiation payloads are opaque [`Value`]s relayed unmodified.

use crate::error::Result;
use crate::room::{ConnectionId, Role, RoomId};
use ferry_files::FileMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requests sent by a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Allocate a room
    CreateRoom {
        /// File to announce, if already chosen
        #[serde(default)]
        file: Option<FileMetadata>,
    },
    /// Join a room in a role
    JoinRoom {
        /// Target room
        room_id: RoomId,
        /// Sender or receiver
        role: Role,
        /// File metadata, for senders
        #[serde(default)]
        file: Option<FileMetadata>,
    },
    /// Announce or replace the room's file, sender only
    FileInfo {
        /// Room
        room_id: RoomId,
        /// New metadata
        file: FileMetadata,
    },
    /// Negotiation payload for another participant
    WebrtcSignal {
        /// Recipient connection
        target_id: ConnectionId,
        /// Opaque payload
        signal: Value,
    },
    /// Transfer progress, forwarded to the other participants
    TransferProgress {
        /// Room
        room_id: RoomId,
        /// Percentage; values above 100 are clamped
        progress: u32,
    },
    /// Transfer finished
    TransferComplete {
        /// Room
        room_id: RoomId,
    },
}

impl ClientRequest {
    /// Parse one text frame
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as one text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Get the event name
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientRequest::CreateRoom { .. } => "create_room",
            ClientRequest::JoinRoom { .. } => "join_room",
            ClientRequest::FileInfo { .. } => "file_info",
            ClientRequest::WebrtcSignal { .. } => "webrtc_signal",
            ClientRequest::TransferProgress { .. } => "transfer_progress",
            ClientRequest::TransferComplete { .. } => "transfer_complete",
        }
    }
}

/// Events delivered to a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection registered
    Connected {
        /// Id other participants address this connection by
        connection_id: ConnectionId,
    },
    /// Room allocated
    RoomCreated {
        /// New room
        room_id: RoomId,
        /// URL to hand to receivers
        share_url: String,
    },
    /// Receiver paired with the room's sender
    FileReady {
        /// Announced file, if the sender provided one
        file: Option<FileMetadata>,
        /// Sender connection to negotiate with
        sender_id: ConnectionId,
    },
    /// Relayed negotiation payload
    WebrtcSignal {
        /// Originating connection
        sender_id: ConnectionId,
        /// Opaque payload
        signal: Value,
    },
    /// Sender left before the transfer completed
    SenderDisconnected,
    /// Receiver paired with this sender
    ReceiverJoined {
        /// Receiver connection to negotiate with
        receiver_id: ConnectionId,
    },
    /// Receiver left the room
    ReceiverLeft {
        /// Departed receiver
        receiver_id: ConnectionId,
    },
    /// Progress reported by another participant
    TransferProgressUpdate {
        /// Percentage, never decreasing within a room
        progress: u8,
    },
    /// Completion reported by another participant
    TransferComplete,
    /// Request failed or room expired
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl ServerEvent {
    /// Parse one text frame
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as one text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Get the event name
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::RoomCreated { .. } => "room_created",
            ServerEvent::FileReady { .. } => "file_ready",
            ServerEvent::WebrtcSignal { .. } => "webrtc_signal",
            ServerEvent::SenderDisconnected => "sender_disconnected",
            ServerEvent::ReceiverJoined { .. } => "receiver_joined",
            ServerEvent::ReceiverLeft { .. } => "receiver_left",
            ServerEvent::TransferProgressUpdate { .. } => "transfer_progress_update",
            ServerEvent::TransferComplete => "transfer_complete",
            ServerEvent::Error { .. } => "error",
        }
    }
}
