//! In-memory user → connection association.
//!
//! One live connection per user; the newest registration wins. Not
//! synchronised on its own: [`crate::router::EventRouter`] owns it behind
//! the same lock as the connection table.

use std::collections::HashMap;

use parley_core::ids::{ConnectionId, UserId};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<UserId, ConnectionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `user_id` with `conn_id`, returning the connection it replaced.
    pub fn register(&mut self, user_id: UserId, conn_id: ConnectionId) -> Option<ConnectionId> {
        self.sessions.insert(user_id, conn_id)
    }

    /// Remove the entry only while it still points at `conn_id`.
    ///
    /// A disconnect from a superseded connection leaves the newer session in
    /// place and returns `false`.
    pub fn unregister(&mut self, user_id: &UserId, conn_id: &ConnectionId) -> bool {
        match self.sessions.get(user_id) {
            Some(current) if current == conn_id => {
                let _ = self.sessions.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, user_id: &UserId) -> Option<&ConnectionId> {
        self.sessions.get(user_id)
    }

    /// Every registered user, sorted.
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.sessions.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }
}
