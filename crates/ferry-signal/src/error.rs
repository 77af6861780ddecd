//! Signaling error types

use crate::room::{ConnectionId, RoomId};
use thiserror::Error;

/// Errors returned by the coordinator, server and client
#[derive(Debug, Error)]
pub enum SignalError {
    /// Room does not exist, has expired, or was abandoned
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Room already has a sender
    #[error("Room {0} already has a sender")]
    RoomConflict(RoomId),

    /// Room id could not be allocated
    #[error("Room allocation failed: {0}")]
    Allocation(String),

    /// Connection is already bound to a different room
    #[error("Connection {connection} already joined room {room}")]
    AlreadyInRoom {
        /// Connection attempting the join
        connection: ConnectionId,
        /// Room it is bound to
        room: RoomId,
    },

    /// Connection is not a participant of the room
    #[error("Connection {connection} is not a participant of room {room}")]
    NotInRoom {
        /// Reporting connection
        connection: ConnectionId,
        /// Target room
        room: RoomId,
    },

    /// Only the room's sender may announce its file
    #[error("Connection {connection} is not the sender of room {room}")]
    NotSender {
        /// Announcing connection
        connection: ConnectionId,
        /// Target room
        room: RoomId,
    },

    /// Connection id is not registered
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Malformed room or connection identifier
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// File metadata failed validation
    #[error("Invalid file metadata: {0}")]
    InvalidFile(#[from] ferry_files::FilesError),

    /// Message (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for signaling operations
pub type Result<T> = std::result::Result<T, SignalError>;
