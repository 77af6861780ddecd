//! Signaling for Ferry.
//!
//! A [`Coordinator`] pairs one sender with the receivers of a room and relays
//! their connection-negotiation payloads. It never sees file content; once the
//! direct channel is up its only role is forwarding progress and completion
//! reports between participants.
//!
//! [`SignalServer`] exposes the coordinator over WebSocket, one text frame per
//! [`ClientRequest`] or [`ServerEvent`]. [`SignalClient`] is the matching
//! participant side.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod room;
pub mod server;

pub use client::SignalClient;
pub use coordinator::{Coordinator, CoordinatorConfig, Outbox, RoomTicket};
pub use error::{Result, SignalError};
pub use events::{ClientRequest, ServerEvent};
pub use room::{ConnectionId, Role, Room, RoomId, RoomStatus};
pub use server::SignalServer;
