//! Rooms and participant identifiers.

use crate::error::{Result, SignalError};
use ferry_files::FileMetadata;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Identifier length in bytes (128 bits)
pub const ID_LEN: usize = 16;

/// Fill an identifier from the OS CSPRNG
fn random_token() -> Result<[u8; ID_LEN]> {
    let mut bytes = [0u8; ID_LEN];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| SignalError::Allocation(format!("randomness unavailable: {e}")))?;
    Ok(bytes)
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; ID_LEN]);

        impl $name {
            /// Generate a fresh random identifier
            ///
            /// # Errors
            ///
            /// Returns [`SignalError::Allocation`] if the OS CSPRNG fails.
            pub fn generate() -> Result<Self> {
                random_token().map(Self)
            }

            /// Wrap raw bytes
            #[must_use]
            pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }

            /// Raw bytes
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }

            /// Lowercase hex encoding
            #[must_use]
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..8])
            }
        }

        impl FromStr for $name {
            type Err = SignalError;

            fn from_str(s: &str) -> Result<Self> {
                let mut bytes = [0u8; ID_LEN];
                hex::decode_to_slice(s, &mut bytes)
                    .map_err(|e| SignalError::InvalidId(format!("{s:?}: {e}")))?;
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id! {
    /// Unguessable room identifier; knowing it is the only admission check
    RoomId
}

hex_id! {
    /// Identifier of one signaling connection
    ConnectionId
}

/// Participant role within a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Owner of the file
    Sender,
    /// Downloader
    Receiver,
}

/// Room lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Created, no receiver paired yet
    AwaitingReceiver,
    /// Sender and receiver exchanging negotiation payloads
    Negotiating,
    /// Progress reported by a participant
    Transferring,
    /// Completion reported by a participant
    Completed,
    /// Sender left before completion
    Abandoned,
}

impl RoomStatus {
    /// Completed or abandoned
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RoomStatus::Completed | RoomStatus::Abandoned)
    }
}

/// One file handoff between a sender and its receivers
///
/// Participants are connection ids; the coordinator's connection registry
/// routes events to them.
#[derive(Debug, Clone)]
pub struct Room {
    /// Room identifier
    pub id: RoomId,
    /// Sender connection, once joined
    pub sender: Option<ConnectionId>,
    /// Receiver connections
    pub receivers: BTreeSet<ConnectionId>,
    /// Announced file
    pub file: Option<FileMetadata>,
    /// Lifecycle status
    pub status: RoomStatus,
    /// Creation instant
    pub created_at: Instant,
    /// Instant after which the room is swept
    pub expires_at: Instant,
    /// Highest reported progress percentage
    pub progress: u8,
    /// Set once removed from the registry; a handle cloned before removal
    /// must not be joined
    pub(crate) closed: bool,
}

impl Room {
    /// Create a room awaiting its receiver
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Allocation`] if `ttl` puts the expiry past what
    /// an [`Instant`] can represent.
    pub fn new(id: RoomId, file: Option<FileMetadata>, ttl: Duration) -> Result<Self> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).ok_or_else(|| {
            SignalError::Allocation(format!("room ttl of {}s is too large", ttl.as_secs()))
        })?;
        Ok(Self {
            id,
            sender: None,
            receivers: BTreeSet::new(),
            file,
            status: RoomStatus::AwaitingReceiver,
            created_at: now,
            expires_at,
            progress: 0,
            closed: false,
        })
    }

    /// Whether `now` is past the expiry instant
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// No sender and no receivers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sender.is_none() && self.receivers.is_empty()
    }

    /// Whether `connection` is the sender or a receiver
    #[must_use]
    pub fn contains(&self, connection: &ConnectionId) -> bool {
        self.sender.as_ref() == Some(connection) || self.receivers.contains(connection)
    }

    /// Sender first, then receivers
    #[must_use]
    pub fn participants(&self) -> Vec<ConnectionId> {
        self.sender
            .iter()
            .chain(self.receivers.iter())
            .copied()
            .collect()
    }

    /// Every participant except `connection`
    #[must_use]
    pub fn others(&self, connection: &ConnectionId) -> Vec<ConnectionId> {
        self.participants()
            .into_iter()
            .filter(|c| c != connection)
            .collect()
    }
}
