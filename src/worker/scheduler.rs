//! In-process delayed task queue with sliding-window deduplication.
//!
//! Pending timers live in a table keyed by dedup id. Scheduling an id that is
//! already pending aborts the old timer and arms a new one, so the delay
//! restarts from the latest call. A timer that fires removes its own entry
//! before the handler runs; a later schedule then arms a fresh timer instead of
//! touching the running one. Runs for the same dedup id never overlap.
//!
//! Failed runs are re-armed under the same dedup id with exponential backoff
//! until the [`RetryPolicy`] is exhausted. A newer schedule that arrives while
//! a retry is pending replaces it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::error::JobError;
use crate::worker::task::{DelayedTaskQueue, ScheduledTask, TaskContext, TaskHandler};

/// A pending timer.
struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    handlers: DashMap<String, Arc<dyn TaskHandler>>,
    timers: Mutex<HashMap<String, TimerEntry>>,
    /// Serializes handler runs per dedup id.
    run_locks: DashMap<String, Arc<Mutex<()>>>,
    next_generation: AtomicU64,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

/// Delayed task queue backed by tokio timers.
///
/// Not durable: pending timers are lost on restart.
#[derive(Clone)]
pub struct TimerQueue {
    inner: Arc<Inner>,
}

impl TimerQueue {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: DashMap::new(),
                timers: Mutex::new(HashMap::new()),
                run_locks: DashMap::new(),
                next_generation: AtomicU64::new(1),
                retry,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Route tasks with `key` to `handler`. Replaces any previous handler.
    pub fn register_handler(&self, key: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let key = key.into();
        debug!(key = %key, "Registered task handler");
        self.inner.handlers.insert(key, handler);
    }

    /// Number of timers that have not fired yet.
    pub async fn pending_count(&self) -> usize {
        self.inner.timers.lock().await.len()
    }

    /// Whether a timer for `dedup_id` is waiting to fire.
    pub async fn is_pending(&self, dedup_id: &str) -> bool {
        self.inner.timers.lock().await.contains_key(dedup_id)
    }

    /// Abort every pending timer and refuse new schedules.
    ///
    /// Handlers already running are left to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut timers = self.inner.timers.lock().await;
        let count = timers.len();
        for (_, entry) in timers.drain() {
            entry.handle.abort();
        }
        info!(aborted = count, "Timer queue shut down");
    }
}

#[async_trait]
impl DelayedTaskQueue for TimerQueue {
    async fn schedule(&self, task: ScheduledTask) -> Result<(), JobError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(JobError::Shutdown);
        }
        if !self.inner.handlers.contains_key(&task.key) {
            return Err(JobError::NoHandler { key: task.key });
        }

        let mut timers = self.inner.timers.lock().await;
        let delay = task.delay;
        let replaced = Inner::arm(&self.inner, &mut timers, task, delay, 1);
        debug!(replaced, pending = timers.len(), "Task scheduled");
        Ok(())
    }
}

impl Inner {
    /// Arm a timer for `task`, replacing any pending one. Returns whether a
    /// pending timer was replaced. Caller holds the timer table lock.
    fn arm(
        this: &Arc<Self>,
        timers: &mut HashMap<String, TimerEntry>,
        task: ScheduledTask,
        delay: Duration,
        attempt: u32,
    ) -> bool {
        let generation = this.next_generation.fetch_add(1, Ordering::Relaxed);
        let dedup_id = task.dedup_id.clone();

        let replaced = match timers.remove(&dedup_id) {
            Some(old) => {
                old.handle.abort();
                debug!(dedup_id = %dedup_id, "Replaced pending timer");
                true
            }
            None => false,
        };

        let handle = tokio::spawn(Self::fire(Arc::clone(this), task, delay, generation, attempt));
        timers.insert(dedup_id, TimerEntry { generation, handle });
        replaced
    }

    async fn fire(
        this: Arc<Self>,
        task: ScheduledTask,
        delay: Duration,
        generation: u64,
        attempt: u32,
    ) {
        tokio::select! {
            _ = this.shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        // Claim the entry. A mismatched generation means a newer schedule owns it.
        {
            let mut timers = this.timers.lock().await;
            match timers.get(&task.dedup_id) {
                Some(entry) if entry.generation == generation => {
                    timers.remove(&task.dedup_id);
                }
                _ => return,
            }
        }

        let Some(handler) = this.handlers.get(&task.key).map(|h| Arc::clone(h.value())) else {
            error!(key = %task.key, "Task fired with no handler");
            return;
        };

        let run_lock = Arc::clone(
            this.run_locks
                .entry(task.dedup_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let ctx = TaskContext {
            dedup_id: task.dedup_id.clone(),
            attempt,
            max_attempts: this.retry.max_attempts,
        };
        let outcome = {
            let _running = run_lock.lock().await;
            info!(key = %task.key, dedup_id = %task.dedup_id, attempt, "Task fired");
            handler.run(task.payload.clone(), &ctx).await
        };

        // Drop the lock entry unless another run of this id still holds a clone.
        this.run_locks.remove_if(&task.dedup_id, |_, held| {
            Arc::ptr_eq(held, &run_lock) && Arc::strong_count(held) == 2
        });
        drop(run_lock);

        match outcome {
            Ok(()) => {
                debug!(dedup_id = %task.dedup_id, attempt, "Task completed");
            }
            Err(e) if e.is_retryable() && !ctx.is_final_attempt() && !this.shutdown.is_cancelled() => {
                let backoff = this.retry.backoff(attempt);
                warn!(
                    dedup_id = %task.dedup_id,
                    attempt,
                    max_attempts = ctx.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Task failed, retrying"
                );
                let mut timers = this.timers.lock().await;
                if timers.contains_key(&task.dedup_id) {
                    debug!(dedup_id = %task.dedup_id, "Newer schedule pending, dropping retry");
                    return;
                }
                Self::arm(&this, &mut timers, task, backoff, attempt + 1);
            }
            Err(e) => {
                error!(
                    dedup_id = %task.dedup_id,
                    attempt,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Task failed, giving up"
                );
            }
        }
    }
}
