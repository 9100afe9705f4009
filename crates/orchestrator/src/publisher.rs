//! Per-session, sequenced progress events.
//!
//! Every published event gets the next sequence number for its session and
//! is kept in memory, mirrored into the `session_events` table and forwarded
//! to the process-wide [`EventBus`]. Subscribers pass the last sequence
//! number they saw and receive everything after it, then live events, with
//! no duplicates.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use db::{CreateSessionEvent, EventRepository};
use events::{EventBus, EventEnvelope};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::Result;

const HISTORY_LIMIT: usize = 5_000;
const CHANNEL_CAPACITY: usize = 1000;

pub type EventStream = Pin<Box<dyn Stream<Item = EventEnvelope> + Send>>;

struct PublisherInner {
    next_seq: u64,
    history: VecDeque<EventEnvelope>,
}

pub struct SessionPublisher {
    session_id: Uuid,
    inner: RwLock<PublisherInner>,
    sender: broadcast::Sender<EventEnvelope>,
    repository: Option<EventRepository>,
    bus: Option<EventBus>,
}

impl SessionPublisher {
    pub fn new(session_id: Uuid) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            session_id,
            inner: RwLock::new(PublisherInner {
                next_seq: 1,
                history: VecDeque::with_capacity(64),
            }),
            sender,
            repository: None,
            bus: None,
        }
    }

    pub fn with_repository(mut self, repository: EventRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Load persisted events so numbering continues after a restart.
    pub async fn load_from_db(&self) -> Result<usize> {
        let Some(ref repo) = self.repository else {
            return Ok(0);
        };

        let records = repo.find_by_session_id(self.session_id).await?;
        let count = records.len();

        let mut inner = self.write();
        for record in records {
            inner.next_seq = inner.next_seq.max(record.seq + 1);
            match serde_json::from_value::<EventEnvelope>(record.data) {
                Ok(envelope) => push_bounded(&mut inner.history, envelope),
                Err(e) => tracing::warn!(
                    session_id = %self.session_id,
                    seq = record.seq,
                    "Skipping unreadable stored event: {}",
                    e
                ),
            }
        }

        Ok(count)
    }

    /// Sequence, record and broadcast an event.
    pub async fn publish(&self, mut envelope: EventEnvelope) -> EventEnvelope {
        {
            let mut inner = self.write();
            envelope.seq = inner.next_seq;
            inner.next_seq += 1;
            push_bounded(&mut inner.history, envelope.clone());
            // Sent under the lock so a concurrent subscriber sees each event
            // either in its backlog or live, never both.
            let _ = self.sender.send(envelope.clone());
        }

        if let Some(ref bus) = self.bus {
            bus.publish(envelope.clone());
        }

        if let Some(ref repo) = self.repository {
            let data = serde_json::to_value(&envelope).unwrap_or(serde_json::Value::Null);
            let create =
                CreateSessionEvent::new(self.session_id, envelope.seq, envelope.event.kind(), data);
            if let Err(e) = repo.create(&create).await {
                tracing::warn!(
                    session_id = %self.session_id,
                    seq = envelope.seq,
                    "Failed to persist event: {:?}",
                    e
                );
            }
        }

        tracing::debug!(
            session_id = %self.session_id,
            seq = envelope.seq,
            kind = envelope.event.kind(),
            "Event published"
        );
        envelope
    }

    /// Sequence number of the most recent event, 0 when none.
    pub fn last_seq(&self) -> u64 {
        self.read().next_seq - 1
    }

    /// Events with `seq > after_seq`, oldest first.
    pub async fn events_after(&self, after_seq: u64) -> Result<Vec<EventEnvelope>> {
        let (mut events, oldest) = {
            let inner = self.read();
            (
                inner
                    .history
                    .iter()
                    .filter(|e| e.seq > after_seq)
                    .cloned()
                    .collect::<Vec<_>>(),
                inner.history.front().map(|e| e.seq),
            )
        };

        if let (Some(oldest), Some(repo)) = (oldest, self.repository.as_ref()) {
            if after_seq + 1 < oldest {
                let mut older: Vec<EventEnvelope> = repo
                    .find_by_session_id_after(self.session_id, after_seq)
                    .await?
                    .into_iter()
                    .filter(|r| r.seq < oldest)
                    .filter_map(|r| serde_json::from_value(r.data).ok())
                    .collect();
                older.append(&mut events);
                events = older;
            }
        }

        Ok(events)
    }

    /// Backlog after `after_seq` followed by live events. With `until_halt`
    /// the stream ends after the first event that ends a run.
    pub async fn stream_after(&self, after_seq: u64, until_halt: bool) -> Result<EventStream> {
        let rx = {
            // Subscribe before reading the backlog; duplicates are dropped by seq.
            let _inner = self.read();
            self.sender.subscribe()
        };
        let backlog = self.events_after(after_seq).await?;
        let last = backlog.last().map(|e| e.seq).unwrap_or(after_seq);

        let live = BroadcastStream::new(rx).filter_map(move |res| async move {
            match res {
                Ok(envelope) if envelope.seq > last => Some(envelope),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Event subscriber lagged: {}", e);
                    None
                }
            }
        });
        let stream = futures::stream::iter(backlog).chain(live);

        if !until_halt {
            return Ok(Box::pin(stream));
        }

        // Checked before polling, so the halting event is the last item.
        let halting = futures::stream::unfold(
            (Box::pin(stream), false),
            |(mut inner, halted)| async move {
                if halted {
                    return None;
                }
                let envelope = inner.next().await?;
                let halted = envelope.event.ends_stream();
                Some((envelope, (inner, halted)))
            },
        );
        Ok(Box::pin(halting))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PublisherInner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PublisherInner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn push_bounded(history: &mut VecDeque<EventEnvelope>, envelope: EventEnvelope) {
    if history.len() >= HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(envelope);
}

#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: Arc<RwLock<HashMap<Uuid, Arc<SessionPublisher>>>>,
    repository: Option<EventRepository>,
    bus: Option<EventBus>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(mut self, repository: EventRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Get the session's publisher, creating it from persisted events first.
    pub async fn get_or_load(&self, session_id: Uuid) -> Result<Arc<SessionPublisher>> {
        if let Some(publisher) = self.get(session_id) {
            return Ok(publisher);
        }

        let mut publisher = SessionPublisher::new(session_id);
        if let Some(ref repo) = self.repository {
            publisher = publisher.with_repository(repo.clone());
        }
        if let Some(ref bus) = self.bus {
            publisher = publisher.with_bus(bus.clone());
        }
        publisher.load_from_db().await?;
        let publisher = Arc::new(publisher);

        let mut publishers = self
            .publishers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Another caller may have loaded it while we were reading the DB.
        let entry = publishers
            .entry(session_id)
            .or_insert_with(|| Arc::clone(&publisher));
        Ok(Arc::clone(entry))
    }

    pub fn get(&self, session_id: Uuid) -> Option<Arc<SessionPublisher>> {
        self.publishers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&session_id)
            .cloned()
    }

    pub fn remove(&self, session_id: Uuid) {
        self.publishers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&session_id);
    }
}
