//! Session registry: live connections, their identities and room
//! memberships.
//!
//! Delivery is at-most-once and best-effort. Each connection owns a bounded
//! outbox; a full or closed outbox drops the frame. Clients reconcile through
//! the list endpoints, which are the source of truth.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use swarg_shared::{GroupId, Room, SessionClaims, SessionVerifier, TokenError, UserId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::protocol::ServerEvent;

/// One encoded JSON frame, shared between every recipient of a fan-out.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Connection {
    user: UserId,
    outbox: mpsc::Sender<Frame>,
    rooms: HashSet<Room>,
}

#[derive(Default)]
struct Tables {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

impl Tables {
    fn join(&mut self, id: ConnectionId, room: Room) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        if conn.rooms.insert(room) {
            self.rooms.entry(room).or_default().insert(id);
        }
        true
    }

    fn leave(&mut self, id: ConnectionId, room: Room) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.rooms.remove(&room);
        }
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
    }

    fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&id)?;
        for room in &conn.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        Some(conn)
    }

    fn connections_of(&self, user: UserId) -> Vec<ConnectionId> {
        self.rooms
            .get(&Room::User(user))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Result of a successful bind.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection: ConnectionId,
    pub claims: SessionClaims,
}

#[derive(Clone)]
pub struct SessionRegistry {
    tables: Arc<RwLock<Tables>>,
    verifier: Arc<SessionVerifier>,
    next_id: Arc<AtomicU64>,
    outbox_capacity: usize,
}

impl SessionRegistry {
    pub fn new(verifier: Arc<SessionVerifier>, outbox_capacity: usize) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            verifier,
            next_id: Arc::new(AtomicU64::new(1)),
            outbox_capacity: outbox_capacity.max(1),
        }
    }

    /// A fresh outbox pair sized for this registry.
    pub fn outbox(&self) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        mpsc::channel(self.outbox_capacity)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Validate `token` and register the connection in its personal room.
    /// Nothing is registered when the token is rejected.
    pub async fn bind(
        &self,
        token: &str,
        outbox: mpsc::Sender<Frame>,
    ) -> Result<Session, TokenError> {
        let claims = self.verifier.verify(token)?;
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut tables = self.tables.write().await;
        tables.connections.insert(
            id,
            Connection {
                user: claims.sub,
                outbox,
                rooms: HashSet::new(),
            },
        );
        tables.join(id, Room::User(claims.sub));
        let devices = tables.connections_of(claims.sub).len();
        drop(tables);

        info!(connection = %id, user = %claims.sub, devices, "connection bound");
        Ok(Session {
            connection: id,
            claims,
        })
    }

    /// Idempotent. Membership is the caller's responsibility.
    pub async fn join_group_room(&self, connection: ConnectionId, group: GroupId) {
        let joined = self.tables.write().await.join(connection, Room::Group(group));
        if joined {
            debug!(connection = %connection, room = %Room::Group(group), "joined room");
        }
    }

    /// Idempotent.
    pub async fn leave_group_room(&self, connection: ConnectionId, group: GroupId) {
        self.tables.write().await.leave(connection, Room::Group(group));
    }

    /// Drop the connection from every room it joined.
    pub async fn unbind(&self, connection: ConnectionId) {
        let removed = self.tables.write().await.remove(connection);
        if let Some(conn) = removed {
            info!(connection = %connection, user = %conn.user, "connection unbound");
        }
    }

    /// Unbind every connection of `user`. Their outboxes are dropped, which
    /// ends each writer task and closes the socket.
    pub async fn disconnect_user(&self, user: UserId) -> usize {
        let mut tables = self.tables.write().await;
        let ids = tables.connections_of(user);
        for id in &ids {
            tables.remove(*id);
        }
        drop(tables);
        if !ids.is_empty() {
            info!(user = %user, connections = ids.len(), "user disconnected");
        }
        ids.len()
    }

    /// Put every live connection of `user` into the group room.
    pub async fn subscribe_user(&self, user: UserId, group: GroupId) {
        let mut tables = self.tables.write().await;
        for id in tables.connections_of(user) {
            tables.join(id, Room::Group(group));
        }
    }

    /// Take every live connection of `user` out of the group room.
    pub async fn unsubscribe_user(&self, user: UserId, group: GroupId) {
        let mut tables = self.tables.write().await;
        for id in tables.connections_of(user) {
            tables.leave(id, Room::Group(group));
        }
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Fire-and-forget fan-out to every connection in `room`.
    pub async fn emit(&self, room: Room, event: &ServerEvent) {
        self.fan_out(room, event, None).await;
    }

    /// Like [`emit`](Self::emit), skipping one connection (the origin of the
    /// event, which renders its own copy).
    pub async fn emit_except(&self, room: Room, event: &ServerEvent, except: ConnectionId) {
        self.fan_out(room, event, Some(except)).await;
    }

    async fn fan_out(&self, room: Room, event: &ServerEvent, except: Option<ConnectionId>) {
        let Some(frame) = encode(event) else {
            return;
        };

        let tables = self.tables.read().await;
        let Some(members) = tables.rooms.get(&room) else {
            return;
        };
        for id in members {
            if Some(*id) == except {
                continue;
            }
            if let Some(conn) = tables.connections.get(id) {
                push(*id, conn, &frame);
            }
        }
    }

    /// Deliver to one connection only.
    pub async fn send_to(&self, connection: ConnectionId, event: &ServerEvent) {
        let Some(frame) = encode(event) else {
            return;
        };
        if let Some(conn) = self.tables.read().await.connections.get(&connection) {
            push(connection, conn, &frame);
        }
    }

    /// Every live connection, regardless of rooms.
    pub async fn broadcast_all(&self, event: &ServerEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let tables = self.tables.read().await;
        for (id, conn) in &tables.connections {
            push(*id, conn, &frame);
        }
        tables.connections.len()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub async fn connection_count(&self) -> usize {
        self.tables.read().await.connections.len()
    }

    pub async fn room_size(&self, room: Room) -> usize {
        self.tables
            .read()
            .await
            .rooms
            .get(&room)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn rooms_of(&self, connection: ConnectionId) -> HashSet<Room> {
        self.tables
            .read()
            .await
            .connections
            .get(&connection)
            .map(|c| c.rooms.clone())
            .unwrap_or_default()
    }
}

fn encode(event: &ServerEvent) -> Option<Frame> {
    match event.encode() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(error = %e, "failed to encode server event");
            None
        }
    }
}

fn push(id: ConnectionId, conn: &Connection, frame: &Frame) {
    if conn.outbox.try_send(frame.clone()).is_err() {
        debug!(connection = %id, user = %conn.user, "dropping frame for slow or closed connection");
    }
}
