//! Per-process registry of live cancellation tokens.
//!
//! A process holds a user's token only while it is executing that user's
//! batch. Abort notices from any process arrive over the [`AbortBus`]; the
//! process holding the token cancels it, every other process ignores the
//! notice.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::types::{ABORT_TOPIC, AbortNotice};
use crate::error::StoreError;
use crate::store::AbortBus;

struct LiveToken {
    generation: u64,
    token: CancellationToken,
}

/// Map from user to the token of that user's in-flight execution.
pub struct CancellationRegistry {
    live: DashMap<String, LiveToken>,
    next_generation: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
}

/// Token handed to one execution. Dropping it releases the registry entry if
/// the entry still belongs to this lease.
pub struct TokenLease {
    registry: Arc<CancellationRegistry>,
    user_id: String,
    generation: u64,
    token: CancellationToken,
}

impl TokenLease {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for TokenLease {
    fn drop(&mut self) {
        self.registry.release(&self.user_id, self.generation);
    }
}

impl CancellationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            live: DashMap::new(),
            next_generation: AtomicU64::new(1),
            listener: Mutex::new(None),
            stop: CancellationToken::new(),
        })
    }

    /// Subscribe to abort notices. Call once at startup.
    pub async fn start(self: &Arc<Self>, bus: Arc<dyn AbortBus>) -> Result<(), StoreError> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Ok(());
        }

        let mut notices = bus.subscribe(ABORT_TOPIC).await?;
        let registry = Arc::clone(self);
        *listener = Some(tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = registry.stop.cancelled() => break,
                    next = notices.next() => match next {
                        Some(payload) => payload,
                        None => break,
                    },
                };
                match serde_json::from_str::<AbortNotice>(&payload) {
                    Ok(notice) => {
                        registry.cancel(&notice.user_id);
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed abort notice"),
                }
            }
            debug!("Abort listener stopped");
        }));
        info!(topic = ABORT_TOPIC, "Cancellation registry listening");
        Ok(())
    }

    /// Create the live token for `user_id`, cancelling and replacing any
    /// token already held for that user.
    pub fn register(self: &Arc<Self>, user_id: &str) -> TokenLease {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self.live.insert(
            user_id.to_string(),
            LiveToken {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            debug!(user_id, "Superseded live token");
        }
        TokenLease {
            registry: Arc::clone(self),
            user_id: user_id.to_string(),
            generation,
            token,
        }
    }

    /// Trigger and remove the user's live token. Returns whether one was held.
    pub fn cancel(&self, user_id: &str) -> bool {
        match self.live.remove(user_id) {
            Some((_, live)) => {
                live.token.cancel();
                info!(user_id, "Cancelled in-flight execution");
                true
            }
            None => false,
        }
    }

    /// Whether this process holds a live token for `user_id`.
    pub fn is_live(&self, user_id: &str) -> bool {
        self.live.contains_key(user_id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    fn release(&self, user_id: &str, generation: u64) {
        self.live
            .remove_if(user_id, |_, live| live.generation == generation);
    }

    /// Cancel every held token, then stop listening.
    pub async fn shutdown(&self) {
        let users: Vec<String> = self.live.iter().map(|e| e.key().clone()).collect();
        for user_id in &users {
            self.cancel(user_id);
        }
        self.stop.cancel();
        if let Some(handle) = self.listener.lock().await.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Abort listener ended abnormally");
        }
        info!(cancelled = users.len(), "Cancellation registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::InMemoryAbortBus;

    async fn publish_abort(bus: &InMemoryAbortBus, user_id: &str) {
        let payload = serde_json::to_string(&AbortNotice {
            user_id: user_id.into(),
        })
        .unwrap();
        bus.publish(ABORT_TOPIC, payload).await.unwrap();
    }

    async fn wait_cancelled(token: &CancellationToken) -> bool {
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn notice_cancels_live_token() {
        let bus = Arc::new(InMemoryAbortBus::new());
        let registry = CancellationRegistry::new();
        registry.start(bus.clone()).await.unwrap();

        let lease = registry.register("u1");
        publish_abort(&bus, "u1").await;

        assert!(wait_cancelled(&lease.token()).await);
        assert!(!registry.is_live("u1"));
    }

    #[tokio::test]
    async fn notice_for_unknown_user_is_noop() {
        let bus = Arc::new(InMemoryAbortBus::new());
        let registry = CancellationRegistry::new();
        registry.start(bus.clone()).await.unwrap();

        let lease = registry.register("u1");
        publish_abort(&bus, "someone-else").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!lease.token().is_cancelled());
        assert!(registry.is_live("u1"));
    }

    #[tokio::test]
    async fn register_overwrites_and_cancels_previous() {
        let registry = CancellationRegistry::new();
        let first = registry.register("u1");
        let second = registry.register("u1");

        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());
        assert_eq!(registry.live_count(), 1);

        // The superseded lease must not evict the newer entry.
        drop(first);
        assert!(registry.is_live("u1"));
        drop(second);
        assert!(!registry.is_live("u1"));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let registry = CancellationRegistry::new();
        let _lease = registry.register("u1");
        assert!(registry.cancel("u1"));
        assert!(!registry.cancel("u1"));
    }

    #[tokio::test]
    async fn shutdown_cancels_everything() {
        let bus = Arc::new(InMemoryAbortBus::new());
        let registry = CancellationRegistry::new();
        registry.start(bus).await.unwrap();

        let a = registry.register("a");
        let b = registry.register("b");
        registry.shutdown().await;

        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
        assert_eq!(registry.live_count(), 0);
    }
}
