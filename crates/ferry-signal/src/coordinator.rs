//! Room coordinator.
//!
//! Holds the room registry and the connection registry. Each room sits behind
//! its own mutex so that joins, leaves and reports on one room are serialized
//! while distinct rooms proceed in parallel. Registry guards are never held
//! across an `.await`: the room handle is cloned out first, then locked.
//!
//! Delivery is fire-and-forget onto each connection's unbounded outbox; a
//! departed participant simply misses the event.

use crate::error::{Result, SignalError};
use crate::events::{ClientRequest, ServerEvent};
use crate::room::{ConnectionId, Role, Room, RoomId, RoomStatus};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ferry_files::FileMetadata;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default room lifetime
pub const DEFAULT_ROOM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default cap on live rooms
pub const DEFAULT_MAX_ROOMS: usize = 10_000;

/// Attempts at drawing an unused room id before giving up
const MAX_ID_ATTEMPTS: usize = 4;

/// Event queue of one participant
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

type RoomHandle = Arc<Mutex<Room>>;

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Base URL share links are built on
    pub public_url: String,
    /// Lifetime of a room from creation
    pub room_ttl: Duration,
    /// Maximum number of live rooms
    pub max_rooms: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:5000".to_string(),
            room_ttl: DEFAULT_ROOM_TTL,
            max_rooms: DEFAULT_MAX_ROOMS,
        }
    }
}

/// Result of [`Coordinator::create_room`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTicket {
    /// New room
    pub room_id: RoomId,
    /// `<public_url>/receive/<room_id>`
    pub share_url: String,
}

struct Connection {
    outbox: Outbox,
    room: Option<RoomId>,
}

/// Pairs senders with receivers and relays negotiation between them
pub struct Coordinator {
    config: CoordinatorConfig,
    rooms: DashMap<RoomId, RoomHandle>,
    connections: DashMap<ConnectionId, Connection>,
}

impl Coordinator {
    /// Create an empty coordinator
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            rooms: DashMap::new(),
            connections: DashMap::new(),
        }
    }

    /// Coordinator settings
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Register a participant's outbox
    ///
    /// The outbox immediately receives [`ServerEvent::Connected`] carrying the
    /// new id.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Allocation`] if no id can be drawn.
    pub fn connect(&self, outbox: Outbox) -> Result<ConnectionId> {
        let connection_id = loop {
            let id = ConnectionId::generate()?;
            if !self.connections.contains_key(&id) {
                break id;
            }
        };

        let _ = outbox.send(ServerEvent::Connected { connection_id });
        self.connections.insert(
            connection_id,
            Connection {
                outbox,
                room: None,
            },
        );

        debug!("Connection {} registered", connection_id);
        Ok(connection_id)
    }

    /// Allocate a room awaiting its receiver
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Allocation`] when randomness is unavailable, the
    /// registry is full, fresh ids keep colliding or the ttl overflows, and
    /// [`SignalError::InvalidFile`] for inconsistent metadata.
    pub fn create_room(&self, file: Option<FileMetadata>) -> Result<RoomTicket> {
        if let Some(file) = &file {
            file.validate()?;
        }
        if self.rooms.len() >= self.config.max_rooms {
            return Err(SignalError::Allocation(format!(
                "room limit of {} reached",
                self.config.max_rooms
            )));
        }

        let mut file = file;
        for _ in 0..MAX_ID_ATTEMPTS {
            let room_id = RoomId::generate()?;
            if let Entry::Vacant(entry) = self.rooms.entry(room_id) {
                let room = Room::new(room_id, file.take(), self.config.room_ttl)?;
                entry.insert(Arc::new(Mutex::new(room)));

                info!("Room {} created", room_id);
                return Ok(RoomTicket {
                    room_id,
                    share_url: self.share_url(&room_id),
                });
            }
        }

        Err(SignalError::Allocation(
            "repeated room id collisions".to_string(),
        ))
    }

    /// Add a participant to a room
    ///
    /// Pairing a sender with a receiver notifies both: the sender gets
    /// `receiver_joined`, the receiver gets `file_ready`. Repeating an identical
    /// join is a no-op.
    ///
    /// # Errors
    ///
    /// - [`SignalError::RoomNotFound`]: unknown, expired or abandoned room
    /// - [`SignalError::RoomConflict`]: the room already has a different sender,
    ///   or the connection already holds the other role
    /// - [`SignalError::AlreadyInRoom`]: connection bound to another room
    /// - [`SignalError::UnknownConnection`]: connection not registered
    pub async fn join_room(
        &self,
        room_id: RoomId,
        role: Role,
        connection_id: ConnectionId,
        file: Option<FileMetadata>,
    ) -> Result<()> {
        if let Some(file) = &file {
            file.validate()?;
        }

        let handle = self.room_handle(&room_id)?;
        let mut room = handle.lock().await;

        if room.closed || room.status == RoomStatus::Abandoned || room.is_expired(Instant::now()) {
            return Err(SignalError::RoomNotFound(room_id));
        }

        match role {
            Role::Sender => {
                if room.sender == Some(connection_id) {
                    debug!("Repeated sender join of {} to room {}", connection_id, room_id);
                    return Ok(());
                }
                if room.sender.is_some() || room.receivers.contains(&connection_id) {
                    return Err(SignalError::RoomConflict(room_id));
                }
            }
            Role::Receiver => {
                if room.receivers.contains(&connection_id) {
                    debug!("Repeated receiver join of {} to room {}", connection_id, room_id);
                    return Ok(());
                }
                if room.sender == Some(connection_id) {
                    return Err(SignalError::RoomConflict(room_id));
                }
            }
        }

        self.bind(connection_id, room_id)?;

        let mut notifications = Vec::new();
        match role {
            Role::Sender => {
                room.sender = Some(connection_id);
                if file.is_some() {
                    room.file = file;
                }
                for receiver in room.receivers.iter().copied() {
                    pair(&room, connection_id, receiver, &mut notifications);
                }
            }
            Role::Receiver => {
                room.receivers.insert(connection_id);
                if let Some(sender) = room.sender {
                    pair(&room, sender, connection_id, &mut notifications);
                }
            }
        }

        if !notifications.is_empty() && room.status == RoomStatus::AwaitingReceiver {
            room.status = RoomStatus::Negotiating;
        }

        info!(
            "Connection {} joined room {} as {:?} ({} receivers)",
            connection_id,
            room_id,
            role,
            room.receivers.len()
        );

        self.deliver_all(notifications);
        Ok(())
    }

    /// Forward a negotiation payload unmodified
    ///
    /// Returns whether the payload was queued. An unknown target, or one in a
    /// different room, is logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::UnknownConnection`] if `from` is not registered.
    pub fn relay_signal(
        &self,
        from: ConnectionId,
        target: ConnectionId,
        signal: Value,
    ) -> Result<bool> {
        let from_room = self
            .connections
            .get(&from)
            .map(|c| c.room)
            .ok_or(SignalError::UnknownConnection(from))?;

        let target_room = self.connections.get(&target).map(|c| c.room);
        match target_room {
            None => {
                warn!("Dropping signal from {} to unknown connection {}", from, target);
                Ok(false)
            }
            Some(room) if room != from_room || room.is_none() => {
                warn!("Dropping signal from {} to {} outside its room", from, target);
                Ok(false)
            }
            Some(_) => {
                debug!("Relaying signal {} -> {}", from, target);
                Ok(self.send_to(
                    &target,
                    ServerEvent::WebrtcSignal {
                        sender_id: from,
                        signal,
                    },
                ))
            }
        }
    }

    /// Unregister a connection and remove it from its room
    ///
    /// A sender leaving before completion abandons the room and notifies every
    /// receiver. A receiver leaving notifies the sender. Terminal rooms left
    /// without participants are removed.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::UnknownConnection`] if the id is not registered.
    pub async fn leave(&self, connection_id: ConnectionId) -> Result<()> {
        let (_, connection) = self
            .connections
            .remove(&connection_id)
            .ok_or(SignalError::UnknownConnection(connection_id))?;
        debug!("Connection {} unregistered", connection_id);

        let Some(room_id) = connection.room else {
            return Ok(());
        };
        let Ok(handle) = self.room_handle(&room_id) else {
            return Ok(());
        };
        let mut room = handle.lock().await;

        let mut notifications = Vec::new();
        if room.sender == Some(connection_id) {
            room.sender = None;
            if room.status != RoomStatus::Completed {
                room.status = RoomStatus::Abandoned;
                for receiver in room.receivers.iter().copied() {
                    notifications.push((receiver, ServerEvent::SenderDisconnected));
                }
                info!("Sender left room {}, room abandoned", room_id);
            }
        } else if room.receivers.remove(&connection_id) {
            if let Some(sender) = room.sender {
                notifications.push((
                    sender,
                    ServerEvent::ReceiverLeft {
                        receiver_id: connection_id,
                    },
                ));
            }
            if room.receivers.is_empty() && room.status == RoomStatus::Negotiating {
                room.status = RoomStatus::AwaitingReceiver;
            }
            info!("Receiver {} left room {}", connection_id, room_id);
        }

        if room.status.is_terminal() && room.is_empty() {
            room.closed = true;
            self.rooms.remove(&room_id);
            debug!("Room {} removed", room_id);
        }

        self.deliver_all(notifications);
        Ok(())
    }

    /// Record progress and forward it to the other participants
    ///
    /// The value is clamped to 100 and the room keeps the highest value seen,
    /// which is what gets forwarded.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::RoomNotFound`] for an unknown or abandoned room,
    /// or [`SignalError::NotInRoom`].
    pub async fn report_progress(
        &self,
        room_id: RoomId,
        from: ConnectionId,
        progress: u32,
    ) -> Result<u8> {
        let handle = self.room_handle(&room_id)?;
        let mut room = handle.lock().await;
        check_participant(&room, room_id, from)?;

        let progress = progress.min(100) as u8;
        room.progress = room.progress.max(progress);
        if !room.status.is_terminal() {
            room.status = RoomStatus::Transferring;
        }

        let update = room.progress;
        for other in room.others(&from) {
            self.send_to(&other, ServerEvent::TransferProgressUpdate { progress: update });
        }
        Ok(update)
    }

    /// Mark the room completed and notify the other participants
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::RoomNotFound`] for an unknown or abandoned room,
    /// or [`SignalError::NotInRoom`].
    pub async fn report_complete(&self, room_id: RoomId, from: ConnectionId) -> Result<()> {
        let handle = self.room_handle(&room_id)?;
        let mut room = handle.lock().await;
        check_participant(&room, room_id, from)?;

        room.status = RoomStatus::Completed;
        room.progress = 100;
        info!("Transfer in room {} completed", room_id);

        for other in room.others(&from) {
            self.send_to(&other, ServerEvent::TransferComplete);
        }
        Ok(())
    }

    /// Store new file metadata from the room's sender and announce it
    ///
    /// Every receiver gets a fresh `file_ready`.
    ///
    /// # Errors
    ///
    /// - [`SignalError::InvalidFile`]: inconsistent metadata
    /// - [`SignalError::RoomNotFound`]: unknown or abandoned room
    /// - [`SignalError::NotSender`]: `from` is not the room's sender
    pub async fn announce_file(
        &self,
        room_id: RoomId,
        from: ConnectionId,
        file: FileMetadata,
    ) -> Result<()> {
        file.validate()?;

        let handle = self.room_handle(&room_id)?;
        let mut room = handle.lock().await;
        check_participant(&room, room_id, from)?;
        if room.sender != Some(from) {
            return Err(SignalError::NotSender {
                connection: from,
                room: room_id,
            });
        }

        info!(
            "File {} ({} bytes) announced in room {}",
            file.name, file.size, room_id
        );
        room.file = Some(file);

        let mut notifications = Vec::new();
        for receiver in room.receivers.iter().copied() {
            notifications.push((
                receiver,
                ServerEvent::FileReady {
                    file: room.file.clone(),
                    sender_id: from,
                },
            ));
        }
        self.deliver_all(notifications);
        Ok(())
    }

    /// Dispatch one participant request
    ///
    /// `create_room` replies to `from` with `room_created`; other requests
    /// produce events only for the participants they concern.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying operation.
    pub async fn handle_request(&self, from: ConnectionId, request: ClientRequest) -> Result<()> {
        if !self.connections.contains_key(&from) {
            return Err(SignalError::UnknownConnection(from));
        }
        debug!("{} request from {}", request.event_name(), from);

        match request {
            ClientRequest::CreateRoom { file } => {
                let ticket = self.create_room(file)?;
                self.send_to(
                    &from,
                    ServerEvent::RoomCreated {
                        room_id: ticket.room_id,
                        share_url: ticket.share_url,
                    },
                );
            }
            ClientRequest::JoinRoom {
                room_id,
                role,
                file,
            } => self.join_room(room_id, role, from, file).await?,
            ClientRequest::FileInfo { room_id, file } => {
                self.announce_file(room_id, from, file).await?;
            }
            ClientRequest::WebrtcSignal { target_id, signal } => {
                self.relay_signal(from, target_id, signal)?;
            }
            ClientRequest::TransferProgress { room_id, progress } => {
                self.report_progress(room_id, from, progress).await?;
            }
            ClientRequest::TransferComplete { room_id } => {
                self.report_complete(room_id, from).await?;
            }
        }
        Ok(())
    }

    /// Remove rooms past their expiry, and terminal rooms without participants
    ///
    /// Participants of an expired room get an `error` event and are unbound
    /// from it. Returns the number of rooms removed.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    /// [`Coordinator::sweep_expired`] evaluated at `now`
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let handles: Vec<(RoomId, RoomHandle)> = self
            .rooms
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut removed = 0;
        for (room_id, handle) in handles {
            let mut room = handle.lock().await;
            if room.closed {
                continue;
            }

            if room.is_expired(now) {
                for participant in room.participants() {
                    if let Some(mut connection) = self.connections.get_mut(&participant)
                        && connection.room == Some(room_id)
                    {
                        connection.room = None;
                    }
                    self.send_to(
                        &participant,
                        ServerEvent::Error {
                            message: format!("room {room_id} expired"),
                        },
                    );
                }
                info!("Room {} expired", room_id);
            } else if !(room.status.is_terminal() && room.is_empty()) {
                continue;
            }

            room.closed = true;
            self.rooms.remove(&room_id);
            removed += 1;
        }

        if removed > 0 {
            debug!("Swept {} rooms, {} remain", removed, self.rooms.len());
        }
        removed
    }

    /// Sweep on `interval` until `shutdown` flips or its sender is dropped
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        coordinator.sweep_expired().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Room reaper stopped");
        })
    }

    /// Queue an event on a connection's outbox
    ///
    /// Returns false if the connection is unknown or its outbox is closed.
    pub fn send_to(&self, to: &ConnectionId, event: ServerEvent) -> bool {
        let Some(connection) = self.connections.get(to) else {
            debug!("Dropping {} for departed connection {}", event.event_name(), to);
            return false;
        };
        connection.outbox.send(event).is_ok()
    }

    /// Status of a live room
    pub async fn room_status(&self, room_id: &RoomId) -> Option<RoomStatus> {
        self.room_snapshot(room_id).await.map(|room| room.status)
    }

    /// Copy of a live room's state
    pub async fn room_snapshot(&self, room_id: &RoomId) -> Option<Room> {
        let handle = self.room_handle(room_id).ok()?;
        let room = handle.lock().await;
        (!room.closed).then(|| room.clone())
    }

    /// Room a connection is bound to
    #[must_use]
    pub fn room_of(&self, connection_id: &ConnectionId) -> Option<RoomId> {
        self.connections.get(connection_id).and_then(|c| c.room)
    }

    /// Number of live rooms
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of registered connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn share_url(&self, room_id: &RoomId) -> String {
        format!(
            "{}/receive/{}",
            self.config.public_url.trim_end_matches('/'),
            room_id
        )
    }

    fn room_handle(&self, room_id: &RoomId) -> Result<RoomHandle> {
        self.rooms
            .get(room_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SignalError::RoomNotFound(*room_id))
    }

    fn bind(&self, connection_id: ConnectionId, room_id: RoomId) -> Result<()> {
        let mut connection = self
            .connections
            .get_mut(&connection_id)
            .ok_or(SignalError::UnknownConnection(connection_id))?;
        match connection.room {
            Some(bound) if bound != room_id => Err(SignalError::AlreadyInRoom {
                connection: connection_id,
                room: bound,
            }),
            _ => {
                connection.room = Some(room_id);
                Ok(())
            }
        }
    }

    fn deliver_all(&self, notifications: Vec<(ConnectionId, ServerEvent)>) {
        for (to, event) in notifications {
            self.send_to(&to, event);
        }
    }
}

/// Queue the pairing notifications for one sender/receiver pair
fn pair(
    room: &Room,
    sender: ConnectionId,
    receiver: ConnectionId,
    notifications: &mut Vec<(ConnectionId, ServerEvent)>,
) {
    notifications.push((
        sender,
        ServerEvent::ReceiverJoined {
            receiver_id: receiver,
        },
    ));
    notifications.push((
        receiver,
        ServerEvent::FileReady {
            file: room.file.clone(),
            sender_id: sender,
        },
    ));
}

fn check_participant(room: &Room, room_id: RoomId, connection: ConnectionId) -> Result<()> {
    if room.closed || room.status == RoomStatus::Abandoned {
        return Err(SignalError::RoomNotFound(room_id));
    }
    if !room.contains(&connection) {
        return Err(SignalError::NotInRoom {
            connection,
            room: room_id,
        });
    }
    Ok(())
}
