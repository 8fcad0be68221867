//! Recurring task registry swept by the engine's coordinator thread.
//!
//! Each due entry is resubmitted through [`WorkerPool::submit`], so recurring
//! work passes the same admission checks, priority ordering and metrics as
//! any other task. One-shot delayed tasks never come through here; the queue
//! holds them until their ready time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::{AppResult, LogLevel, SchedulerError, WorkerPool};
use crate::util::clock::instant_after;
use crate::util::types::Priority;

/// Identifier returned by `schedule_recurring`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecurringId(Uuid);

impl RecurringId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RecurringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type RecurringFn = Arc<dyn Fn() -> AppResult<()> + Send + Sync>;

struct RecurringTaskEntry {
    interval: Duration,
    priority: Priority,
    callable: RecurringFn,
    next_execution: Instant,
    cancelled: bool,
    fired: u64,
}

/// Registry of recurring entries.
#[derive(Default)]
pub struct RecurringScheduler {
    entries: Mutex<HashMap<RecurringId, RecurringTaskEntry>>,
}

impl RecurringScheduler {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callable` to run every `interval`, first one interval from
    /// now.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for a zero interval.
    pub fn schedule_recurring<F>(
        &self,
        interval: Duration,
        priority: Priority,
        callable: F,
    ) -> Result<RecurringId, SchedulerError>
    where
        F: Fn() -> AppResult<()> + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "recurring interval must be greater than 0".into(),
            ));
        }
        let id = RecurringId::new();
        self.entries.lock().insert(
            id,
            RecurringTaskEntry {
                interval,
                priority,
                callable: Arc::new(callable),
                next_execution: instant_after(interval),
                cancelled: false,
                fired: 0,
            },
        );
        debug!(recurring_id = %id, interval_ms = interval.as_millis(), "Recurring task registered");
        Ok(id)
    }

    /// Flag an entry as cancelled; the next sweep removes it.
    ///
    /// Returns `false` if the id is unknown or already cancelled.
    pub fn cancel_recurring(&self, id: RecurringId) -> bool {
        self.entries
            .lock()
            .get_mut(&id)
            .is_some_and(|entry| !std::mem::replace(&mut entry.cancelled, true))
    }

    /// Submit every due entry to `pool` and advance its next execution.
    ///
    /// Cancelled entries are removed. Missed periods are skipped rather than
    /// replayed. A submission error is logged and that occurrence dropped.
    /// Returns the number of submissions that were accepted.
    pub fn sweep(&self, pool: &WorkerPool, now: Instant) -> usize {
        let due: Vec<(RecurringId, Priority, RecurringFn)> = {
            let mut entries = self.entries.lock();
            entries.retain(|_, entry| !entry.cancelled);
            entries
                .iter_mut()
                .filter(|(_, entry)| entry.next_execution <= now)
                .map(|(id, entry)| {
                    entry.next_execution = next_after(entry.next_execution, entry.interval, now);
                    entry.fired += 1;
                    (*id, entry.priority, Arc::clone(&entry.callable))
                })
                .collect()
        };

        let mut submitted = 0;
        for (id, priority, callable) in due {
            match pool.submit(priority, move || callable()) {
                Ok(_handle) => submitted += 1,
                Err(err) => {
                    warn!(recurring_id = %id, error = %err, "Recurring submission skipped");
                    pool.sink().log(
                        LogLevel::Warn,
                        &format!("recurring task {id} skipped: {err}"),
                    );
                }
            }
        }
        submitted
    }

    /// Earliest next execution among live entries.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.cancelled)
            .map(|entry| entry.next_execution)
            .min()
    }

    /// Times an entry has fired, or `None` if it is not registered.
    #[must_use]
    pub fn fire_count(&self, id: RecurringId) -> Option<u64> {
        self.entries.lock().get(&id).map(|entry| entry.fired)
    }

    /// Entries registered, including cancelled ones awaiting removal.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entry is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl fmt::Debug for RecurringScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurringScheduler")
            .field("entries", &self.len())
            .finish()
    }
}

/// First multiple of `interval` after `scheduled` that is later than `now`.
fn next_after(scheduled: Instant, interval: Duration, now: Instant) -> Instant {
    let behind = now.saturating_duration_since(scheduled);
    let interval_nanos = interval.as_nanos().max(1);
    let skipped = behind.as_nanos() / interval_nanos + 1;
    let skipped = u32::try_from(skipped).unwrap_or(u32::MAX);
    interval
        .checked_mul(skipped)
        .and_then(|advance| scheduled.checked_add(advance))
        .or_else(|| now.checked_add(interval))
        .unwrap_or_else(|| instant_after(interval))
}
