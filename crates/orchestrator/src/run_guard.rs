//! Single-flight guard for session runs.
//!
//! At most one run (run, continue, diversify, finalize) may be in flight per
//! session. The guard holds the session's run flag and releases it when
//! dropped, including when the run task panics or is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(20);

pub struct RunGuard {
    session_id: Uuid,
    flag: Arc<AtomicBool>,
    finished: bool,
}

impl RunGuard {
    /// Claim the run flag, failing with a concurrency conflict if it is taken.
    pub fn acquire(session_id: Uuid, flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| OrchestratorError::ConcurrencyConflict(session_id))?;

        debug!(session_id = %session_id, "Run guard acquired");
        Ok(Self {
            session_id,
            flag: Arc::clone(flag),
            finished: false,
        })
    }

    /// Mark the run as having reached a halt point normally.
    pub fn mark_finished(&mut self) {
        self.finished = true;
    }

    /// Wait for an in-flight run to let go of the flag, polling until
    /// `timeout` passes.
    pub async fn acquire_within(
        session_id: Uuid,
        flag: &Arc<AtomicBool>,
        timeout: Duration,
    ) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match Self::acquire(session_id, flag) {
                Ok(guard) => return Ok(guard),
                Err(e) if tokio::time::Instant::now() >= deadline => return Err(e),
                Err(_) => tokio::time::sleep(RETRY_INTERVAL).await,
            }
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                session_id = %self.session_id,
                "Run ended without reaching a halt point"
            );
        }
        self.flag.store(false, Ordering::Release);
        debug!(session_id = %self.session_id, "Run guard released");
    }
}
