//! Pending Request Store.
//!
//! Maps correlation ids to callers waiting for a response on a
//! fire-and-forget transport.

use bridge_types::{BridgeError, CorrelationId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What a waiting caller eventually receives.
pub type PendingResult = Result<Value, BridgeError>;

/// A pending request waiting for response
struct PendingRequest {
    sender: oneshot::Sender<PendingResult>,
    created_at: Instant,
    /// Method name (for logging)
    method: String,
    /// `None` waits forever
    timeout: Option<Duration>,
}

/// Statistics for pending request store
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_timeouts: AtomicU64,
    /// Cancelled locally or receiver dropped before the response arrived
    pub total_cancelled: AtomicU64,
    /// Responses whose id matched nothing
    pub total_unmatched: AtomicU64,
}

/// Pending request store.
///
/// Flow:
/// 1. Caller calls `register()` and gets the id plus a oneshot receiver
/// 2. Caller dispatches the request carrying that id
/// 3. The inbound listener calls `complete()` when a response arrives
/// 4. Caller awaits the receiver or gives up at its deadline
///
/// Every entry is settled at most once: whichever of `complete`, `expire`,
/// `cancel` or `drain` removes it first wins.
pub struct PendingRequestStore {
    pending: DashMap<CorrelationId, PendingRequest>,
    default_timeout: Option<Duration>,
    stats: Arc<PendingStats>,
}

impl PendingRequestStore {
    pub fn new(default_timeout: Option<Duration>) -> Self {
        Self {
            pending: DashMap::new(),
            default_timeout,
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// Deadline a request registered with `timeout` actually gets.
    pub fn effective_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout.or(self.default_timeout)
    }

    /// Register a pending request.
    ///
    /// Generates a fresh id unless `correlation_id` is supplied. Supplying an
    /// id that is still pending fails with
    /// [`BridgeError::DuplicateCorrelation`] and leaves the existing entry
    /// untouched.
    pub fn register(
        &self,
        method: &str,
        correlation_id: Option<CorrelationId>,
        timeout: Option<Duration>,
    ) -> Result<(CorrelationId, oneshot::Receiver<PendingResult>), BridgeError> {
        let correlation_id = correlation_id.unwrap_or_default();
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(correlation_id.clone()) {
            Entry::Occupied(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    method = method,
                    "Correlation id already pending"
                );
                return Err(BridgeError::DuplicateCorrelation(correlation_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    sender: tx,
                    created_at: Instant::now(),
                    method: method.to_string(),
                    timeout: self.effective_timeout(timeout),
                });
            }
        }
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            correlation_id = %correlation_id,
            method = method,
            "Registered pending request"
        );

        Ok((correlation_id, rx))
    }

    /// Settle a pending request with its response.
    ///
    /// Returns `false` for unknown, already settled or abandoned ids.
    pub fn complete(&self, correlation_id: &CorrelationId, result: PendingResult) -> bool {
        let Some((_, pending)) = self.pending.remove(correlation_id) else {
            self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %correlation_id,
                "Response for unknown or settled correlation id"
            );
            return false;
        };

        let response_time = pending.created_at.elapsed();
        match pending.sender.send(result) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    method = pending.method,
                    response_time_ms = response_time.as_millis(),
                    "Completed pending request"
                );
                true
            }
            Err(_) => {
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    method = pending.method,
                    "Pending request receiver dropped"
                );
                false
            }
        }
    }

    /// Remove a request whose caller hit its deadline.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, pending)) => {
                self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = %correlation_id,
                    method = pending.method,
                    "Pending request timed out"
                );
                true
            }
            None => false,
        }
    }

    /// Reject and remove requests whose deadline passed (TTL sweep).
    ///
    /// Returns the number of requests removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| match entry.timeout {
                Some(timeout) => now.duration_since(entry.created_at) > timeout,
                None => false,
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            // A response may have won the race since the scan.
            let Some((_, request)) = self.pending.remove(&id) else {
                continue;
            };
            let timeout = request.timeout.unwrap_or_default();
            warn!(
                correlation_id = %id,
                method = request.method,
                timeout_ms = timeout.as_millis(),
                "Removing expired pending request"
            );
            let _ = request.sender.send(Err(BridgeError::Timeout(timeout)));
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            removed += 1;
        }
        removed
    }

    /// Remove a request without settling it (its receiver sees a closed channel).
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Reject every outstanding request with a transport error.
    pub fn drain(&self, reason: &str) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending
                    .sender
                    .send(Err(BridgeError::Transport(reason.to_string())));
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                drained += 1;
            }
        }
        if drained > 0 {
            debug!(drained, reason, "Drained pending requests");
        }
        drained
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }
}

/// Background task to clean up expired requests
pub async fn cleanup_task(store: Arc<PendingRequestStore>, interval: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        let removed = store.remove_expired();
        if removed > 0 {
            debug!(removed = removed, "Cleaned up expired pending requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_complete() {
        let store = PendingRequestStore::new(None);

        let (correlation_id, rx) = store.register("getBalance", None, None).unwrap();
        assert!(store.is_pending(&correlation_id));
        assert_eq!(store.pending_count(), 1);

        assert!(store.complete(&correlation_id, Ok(json!("0x1234"))));
        assert_eq!(rx.await.unwrap(), Ok(json!("0x1234")));
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_twice_is_noop() {
        let store = PendingRequestStore::new(None);
        let (id, _rx) = store.register("getBalance", None, None).unwrap();

        assert!(store.complete(&id, Ok(json!(1))));
        assert!(!store.complete(&id, Ok(json!(2))));
        assert_eq!(store.stats().total_unmatched.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_complete_unknown_id() {
        let store = PendingRequestStore::new(None);
        assert!(!store.complete(&CorrelationId::new(), Ok(json!(null))));
    }

    #[tokio::test]
    async fn test_supplied_id_is_used() {
        let store = PendingRequestStore::new(None);
        let (id, _rx) = store
            .register("getBalance", Some(CorrelationId::from("page-1")), None)
            .unwrap();
        assert_eq!(id.as_str(), "page-1");
    }

    #[tokio::test]
    async fn test_duplicate_live_id_is_rejected() {
        let store = PendingRequestStore::new(None);
        let id = CorrelationId::from("dup");
        let (_, rx) = store.register("a", Some(id.clone()), None).unwrap();

        let err = store.register("b", Some(id.clone()), None).unwrap_err();
        assert_eq!(err, BridgeError::DuplicateCorrelation(id.clone()));

        // The original entry is unaffected.
        assert!(store.complete(&id, Ok(json!("first"))));
        assert_eq!(rx.await.unwrap(), Ok(json!("first")));

        // Once settled, the id may be reused.
        assert!(store.register("c", Some(id), None).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_expired() {
        let store = PendingRequestStore::new(Some(Duration::from_millis(10)));

        let (id1, rx1) = store.register("getBalance", None, None).unwrap();
        let (id2, _rx2) = store.register("getUtxos", None, None).unwrap();
        assert_eq!(store.pending_count(), 2);

        tokio::time::advance(Duration::from_millis(50)).await;

        assert_eq!(store.remove_expired(), 2);
        assert_eq!(
            rx1.await.unwrap(),
            Err(BridgeError::Timeout(Duration::from_millis(10)))
        );
        assert_eq!(store.pending_count(), 0);
        assert!(!store.is_pending(&id1));
        assert!(!store.is_pending(&id2));
        assert_eq!(store.stats().total_timeouts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deadline_never_expires() {
        let store = PendingRequestStore::new(None);
        let (_id, _rx) = store.register("enable", None, None).unwrap();

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(store.remove_expired(), 0);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timeout() {
        let store = PendingRequestStore::new(None);
        let (_id, _rx) = store
            .register("getBalance", None, Some(Duration::from_millis(5)))
            .unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(store.remove_expired(), 1);
    }

    #[tokio::test]
    async fn test_cancel() {
        let store = PendingRequestStore::new(None);

        let (correlation_id, _rx) = store.register("getBalance", None, None).unwrap();
        assert!(store.cancel(&correlation_id));
        assert!(!store.is_pending(&correlation_id));
        assert!(!store.cancel(&correlation_id));
    }

    #[tokio::test]
    async fn test_drain_rejects_everything() {
        let store = PendingRequestStore::new(None);
        let (_a, rx_a) = store.register("a", None, None).unwrap();
        let (_b, rx_b) = store.register("b", None, None).unwrap();

        assert_eq!(store.drain("relay torn down"), 2);
        assert_eq!(
            rx_a.await.unwrap(),
            Err(BridgeError::Transport("relay torn down".into()))
        );
        assert!(rx_b.await.unwrap().is_err());
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = PendingRequestStore::new(None);

        let (id1, _rx1) = store.register("getBalance", None, None).unwrap();
        let (id2, _rx2) = store.register("getUtxos", None, None).unwrap();
        assert_eq!(store.stats().total_registered.load(Ordering::Relaxed), 2);

        store.complete(&id1, Ok(json!(null)));
        assert_eq!(store.stats().total_completed.load(Ordering::Relaxed), 1);

        store.cancel(&id2);
        assert_eq!(store.stats().total_cancelled.load(Ordering::Relaxed), 1);
    }
}
