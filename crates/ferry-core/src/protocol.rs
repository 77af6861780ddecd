//! Transfer protocol message definitions.
//!
//! Control messages travel as JSON text; chunk payloads travel as raw binary
//! messages immediately after their header.

use crate::error::{Result, TransferError};
use ferry_files::FileMetadata;
use serde::{Deserialize, Serialize};

/// A message on the data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// Text message carrying an encoded [`TransferMessage`]
    Text(String),
    /// Binary message carrying a chunk payload
    Binary(Vec<u8>),
}

impl ChannelMessage {
    /// Message length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ChannelMessage::Text(text) => text.len(),
            ChannelMessage::Binary(data) => data.len(),
        }
    }

    /// True for an empty message
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Header announcing the next binary payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// Chunk index
    pub index: u64,
    /// Total chunk count, repeated for cross-checking
    pub total_chunks: u64,
    /// Whether this is the final chunk
    pub is_last: bool,
}

/// Transfer control messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TransferMessage {
    /// File announcement, sent once before any chunk
    FileInfo(FileMetadata),
    /// Header for the binary payload that follows
    Chunk(ChunkHeader),
    /// Sender has emitted every chunk
    TransferComplete,
}

impl TransferMessage {
    /// Encode as a text channel message
    pub fn encode(&self) -> Result<ChannelMessage> {
        serde_json::to_string(self)
            .map(ChannelMessage::Text)
            .map_err(|e| TransferError::Encoding(e.to_string()))
    }

    /// Decode from the body of a text channel message
    ///
    /// Unparsable input is a protocol error.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| TransferError::Protocol(format!("malformed control message: {e}")))
    }

    /// Get the message type name
    pub fn message_type(&self) -> &'static str {
        match self {
            TransferMessage::FileInfo(_) => "file_info",
            TransferMessage::Chunk(_) => "chunk",
            TransferMessage::TransferComplete => "transfer_complete",
        }
    }
}
