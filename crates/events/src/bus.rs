//! Process-wide feed of every session's events, behind `/api/events`.
//!
//! Sessions keep their own sequenced history; this bus only fans out live
//! envelopes. Subscribers may narrow the feed to a set of sessions.

use std::collections::HashSet;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::EventEnvelope;

const DEFAULT_CAPACITY: usize = 1000;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { sender }
    }

    /// Fan an envelope out to current subscribers. Returns how many got it;
    /// with nobody listening the envelope is dropped.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Live envelopes of the given sessions, or of all sessions for `None`.
    pub fn subscribe(&self, sessions: Option<HashSet<Uuid>>) -> BusSubscription {
        BusSubscription {
            receiver: self.sender.subscribe(),
            sessions,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

pub struct BusSubscription {
    receiver: broadcast::Receiver<EventEnvelope>,
    sessions: Option<HashSet<Uuid>>,
}

impl BusSubscription {
    /// Next envelope that passes the session filter. A lagging subscriber
    /// skips what it missed; clients catch up through the per-session feed.
    /// Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if self.accepts(&envelope) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Global event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, envelope: &EventEnvelope) -> bool {
        self.sessions
            .as_ref()
            .map_or(true, |ids| ids.contains(&envelope.session_id))
    }
}
