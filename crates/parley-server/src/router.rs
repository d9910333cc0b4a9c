//! Event routing to live push connections.
//!
//! The router owns both the session registry and the connection table
//! behind one mutex. Every presence broadcast is built and queued while the
//! lock is held, so the snapshot a client sees always matches the registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use parley_core::events::ServerEvent;
use parley_core::ids::{ConnectionId, UserId};
use tracing::{debug, error, warn};

use crate::registry::SessionRegistry;
use crate::websocket::connection::{ClientConnection, SendFailure};

/// Outcome of a targeted push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Queued on the target's live connection.
    Delivered,
    /// No live connection, or its queue refused the frame.
    Offline,
}

impl DeliveryResult {
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered)
    }
}

#[derive(Default)]
struct RouterState {
    registry: SessionRegistry,
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
}

impl RouterState {
    fn broadcast_frame(&self, frame: &Arc<String>) -> usize {
        self.connections
            .values()
            .filter(|conn| conn.send(Arc::clone(frame)).is_ok())
            .count()
    }

    fn broadcast_presence(&self) {
        let event = ServerEvent::GetOnlineUsers(self.registry.online_users());
        if let Some(frame) = serialize(&event) {
            let reached = self.broadcast_frame(&frame);
            debug!(online = self.registry.online_count(), reached, "presence broadcast");
        }
    }
}

fn serialize(event: &ServerEvent) -> Option<Arc<String>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            error!(event = event.name(), error = %e, "failed to serialize event");
            None
        }
    }
}

#[derive(Default)]
pub struct EventRouter {
    state: Mutex<RouterState>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the broadcast table.
    pub fn attach(&self, connection: Arc<ClientConnection>) {
        let _ = self
            .state
            .lock()
            .connections
            .insert(connection.id.clone(), connection);
    }

    pub fn detach(&self, conn_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.state.lock().connections.remove(conn_id)
    }

    /// Bind `user_id` to `conn_id` and broadcast the new presence snapshot.
    /// Returns the connection this replaced, if any.
    pub fn register_session(&self, user_id: &UserId, conn_id: &ConnectionId) -> Option<ConnectionId> {
        let mut state = self.state.lock();
        let previous = state.registry.register(user_id.clone(), conn_id.clone());
        if let Some(prev) = &previous {
            debug!(user_id = %user_id, previous = %prev, "session replaced");
        }
        state.broadcast_presence();
        previous
    }

    /// Drop the session if `conn_id` still owns it, broadcasting presence
    /// only when something was removed.
    pub fn unregister_session(&self, user_id: &UserId, conn_id: &ConnectionId) -> bool {
        let mut state = self.state.lock();
        let removed = state.registry.unregister(user_id, conn_id);
        if removed {
            state.broadcast_presence();
        } else {
            debug!(user_id = %user_id, conn_id = %conn_id, "stale disconnect ignored");
        }
        removed
    }

    /// Push `event` to the live connection of `target`, if any.
    pub fn deliver(&self, target: &UserId, event: &ServerEvent) -> DeliveryResult {
        let Some(frame) = serialize(event) else {
            return DeliveryResult::Offline;
        };

        let state = self.state.lock();
        let Some(conn) = state
            .registry
            .lookup(target)
            .and_then(|conn_id| state.connections.get(conn_id))
        else {
            debug!(target = %target, event = event.name(), "recipient offline");
            return DeliveryResult::Offline;
        };

        match conn.send(frame) {
            Ok(()) => DeliveryResult::Delivered,
            Err(SendFailure::QueueFull) => {
                warn!(target = %target, conn_id = %conn.id, event = event.name(), "send queue full, dropping event");
                DeliveryResult::Offline
            }
            Err(SendFailure::Closed) => {
                debug!(target = %target, conn_id = %conn.id, event = event.name(), "connection closing, dropping event");
                DeliveryResult::Offline
            }
        }
    }

    /// Push `event` to every live connection. Returns how many accepted it.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let Some(frame) = serialize(event) else {
            return 0;
        };
        self.state.lock().broadcast_frame(&frame)
    }

    pub fn lookup(&self, user_id: &UserId) -> Option<ConnectionId> {
        self.state.lock().registry.lookup(user_id).cloned()
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.state.lock().registry.online_users()
    }

    pub fn online_count(&self) -> usize {
        self.state.lock().registry.online_count()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::messages::Message;
    use tokio::sync::mpsc;

    fn connect(
        router: &EventRouter,
        user: &str,
        conn: &str,
        cap: usize,
    ) -> (UserId, ConnectionId, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(cap);
        let user_id = UserId::from_raw(user);
        let conn_id = ConnectionId::from_raw(conn);
        router.attach(Arc::new(ClientConnection::new(
            conn_id.clone(),
            user_id.clone(),
            tx,
        )));
        router.register_session(&user_id, &conn_id);
        (user_id, conn_id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    fn message(from: &str, to: &str, text: &str) -> Message {
        let now = chrono::Utc::now();
        Message {
            id: parley_core::ids::MessageId::from_raw("m1"),
            sender_id: UserId::from_raw(from),
            receiver_id: UserId::from_raw(to),
            text: Some(text.into()),
            image: None,
            created_at: now,
            updated_at: now,
            is_read: false,
            read_at: None,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn deliver_to_registered_user() {
        let router = EventRouter::new();
        let (u2, _, mut rx) = connect(&router, "u2", "c7", 8);
        drain(&mut rx);

        let result = router.deliver(&u2, &ServerEvent::NewMessage(message("u1", "u2", "hi")));
        assert_eq!(result, DeliveryResult::Delivered);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "newMessage");
        assert_eq!(frames[0]["data"]["senderId"], "u1");
        assert_eq!(frames[0]["data"]["text"], "hi");
    }

    #[test]
    fn deliver_to_offline_user() {
        let router = EventRouter::new();
        let result = router.deliver(
            &UserId::from_raw("ghost"),
            &ServerEvent::NewMessage(message("u1", "ghost", "hi")),
        );
        assert_eq!(result, DeliveryResult::Offline);
    }

    #[test]
    fn full_queue_counts_as_offline() {
        let router = EventRouter::new();
        // Capacity 1 is used up by the presence broadcast.
        let (u2, _, _rx) = connect(&router, "u2", "c7", 1);
        let result = router.deliver(&u2, &ServerEvent::NewMessage(message("u1", "u2", "hi")));
        assert_eq!(result, DeliveryResult::Offline);
    }

    #[test]
    fn presence_broadcast_matches_registry() {
        let router = EventRouter::new();
        let (_, _, mut rx1) = connect(&router, "u1", "c1", 8);
        let frames = drain(&mut rx1);
        assert_eq!(frames.last().unwrap()["data"], serde_json::json!(["u1"]));

        let (u2, c2, mut rx2) = connect(&router, "u2", "c2", 8);
        let expected = serde_json::json!(["u1", "u2"]);
        assert_eq!(drain(&mut rx1).last().unwrap()["data"], expected);
        assert_eq!(drain(&mut rx2).last().unwrap()["data"], expected);

        router.detach(&c2);
        assert!(router.unregister_session(&u2, &c2));
        assert_eq!(drain(&mut rx1).last().unwrap()["data"], serde_json::json!(["u1"]));
        assert_eq!(router.online_users(), vec![UserId::from_raw("u1")]);
    }

    #[test]
    fn stale_disconnect_keeps_new_session() {
        let router = EventRouter::new();
        let (u1, old, _rx_old) = connect(&router, "u1", "old", 8);
        let (_, new, mut rx_new) = connect(&router, "u1", "new", 8);
        drain(&mut rx_new);

        router.detach(&old);
        assert!(!router.unregister_session(&u1, &old));
        assert_eq!(router.lookup(&u1), Some(new));
        // No presence broadcast for a no-op unregister.
        assert!(drain(&mut rx_new).is_empty());

        let result = router.deliver(&u1, &ServerEvent::UserTyping {
            sender_id: UserId::from_raw("u2"),
            is_typing: true,
        });
        assert!(result.is_delivered());
        assert_eq!(drain(&mut rx_new).len(), 1);
    }

    #[test]
    fn broadcast_reaches_all_connections() {
        let router = EventRouter::new();
        let (_, _, mut rx1) = connect(&router, "u1", "c1", 8);
        let (_, _, mut rx2) = connect(&router, "u2", "c2", 8);
        drain(&mut rx1);
        drain(&mut rx2);

        let reached = router.broadcast(&ServerEvent::GetOnlineUsers(router.online_users()));
        assert_eq!(reached, 2);
        assert_eq!(router.connection_count(), 2);
        assert_eq!(router.online_count(), 2);
    }
}
