use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use council_core::Session;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::publisher::SessionPublisher;

/// Live state of one loaded session.
///
/// The write lock on `session` serializes log appends, so the in-memory
/// session and the log never disagree about the last sequence number.
pub(crate) struct SessionHandle {
    pub(crate) id: Uuid,
    pub(crate) session: RwLock<Session>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) publisher: Arc<SessionPublisher>,
    cancel: watch::Sender<bool>,
    deleted: AtomicBool,
}

impl SessionHandle {
    pub(crate) fn new(session: Session, publisher: Arc<SessionPublisher>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            id: session.id,
            session: RwLock::new(session),
            running: Arc::new(AtomicBool::new(false)),
            publisher,
            cancel,
            deleted: AtomicBool::new(false),
        }
    }

    pub(crate) async fn current(&self) -> Session {
        self.session.read().await.clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set while holding the session write lock; later commits are refused.
    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the session has been ended.
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives as long as the handle, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
