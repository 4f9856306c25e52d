use crate::protocol::OutboundEvent;
use crate::session::SessionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

const LOG_TARGET: &str = "hub";

/// Per-session broadcast rooms. An event emitted for one session is only ever
/// delivered to receivers that joined that session.
pub struct SessionHub {
    rooms: RwLock<HashMap<SessionId, broadcast::Sender<OutboundEvent>>>,
    capacity: usize,
}

impl SessionHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn join(&self, session: &SessionId) -> broadcast::Receiver<OutboundEvent> {
        if let Some(tx) = self.rooms.read().get(session) {
            return tx.subscribe();
        }
        let mut rooms = self.rooms.write();
        rooms
            .entry(session.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends `event` to everyone in the session's room; returns how many
    /// receivers got it.
    pub fn emit(&self, session: &SessionId, event: OutboundEvent) -> usize {
        let Some(tx) = self.rooms.read().get(session).cloned() else {
            tracing::trace!(target: LOG_TARGET, session = %session, event = event.name(), "no listeners");
            return 0;
        };
        let name = event.name();
        match tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                tracing::trace!(target: LOG_TARGET, session = %session, event = name, "room empty");
                0
            }
        }
    }

    /// Drops the room once its last receiver is gone.
    pub fn leave(&self, session: &SessionId) {
        let mut rooms = self.rooms.write();
        if rooms
            .get(session)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            rooms.remove(session);
            tracing::debug!(target: LOG_TARGET, session = %session, "room closed");
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }
}
