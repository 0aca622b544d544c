/// Heartbeat polling for cross-device change detection.
///
/// No push channel exists, so the engine periodically reads a single remote
/// scalar: the timestamp of the last upload by any device. When the value
/// grows past the last one this process observed, another device changed
/// something and a download cycle is due. The staleness bound equals the
/// poll interval.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::store::RemoteStore;

/// Sentinel for "no value observed yet".
const UNSEEN: i64 = i64::MIN;

pub struct HeartbeatPoller {
    store: Arc<dyn RemoteStore>,
    key: String,
    interval: Duration,
    last_seen: AtomicI64,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl HeartbeatPoller {
    pub fn new(store: Arc<dyn RemoteStore>, key: impl Into<String>, interval: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            interval,
            last_seen: AtomicI64::new(UNSEEN),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Record a value this process itself wrote (or already merged), so the
    /// poller never treats the engine's own upload as a remote change.
    pub fn observe(&self, value: i64) {
        self.last_seen.fetch_max(value, Ordering::AcqRel);
    }

    pub fn last_seen(&self) -> Option<i64> {
        match self.last_seen.load(Ordering::Acquire) {
            UNSEEN => None,
            v => Some(v),
        }
    }

    /// Start polling. `on_change` is invoked (synchronously, from the poll
    /// task) whenever the remote scalar exceeds the last observed value.
    /// The very first successful read only primes the baseline.
    pub fn start(self: &Arc<Self>, on_change: impl Fn() + Send + Sync + 'static) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let poller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        poller.poll_once(&on_change).await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("heartbeat poller shutting down");
                        break;
                    }
                }
            }
        });
    }

    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }

    async fn poll_once(&self, on_change: &(impl Fn() + Send + Sync)) {
        match self.store.read_scalar(&self.key).await {
            Ok(Some(value)) => {
                let previous = self.last_seen.fetch_max(value, Ordering::AcqRel);
                if previous != UNSEEN && value > previous {
                    tracing::debug!(value, previous, "remote heartbeat advanced");
                    on_change();
                }
            }
            Ok(None) => {
                // No scalar yet: prime a zero baseline so the first upload
                // by another device still registers as an increase.
                let _ = self
                    .last_seen
                    .compare_exchange(UNSEEN, 0, Ordering::AcqRel, Ordering::Acquire);
            }
            Err(e) => {
                // Poll failures are transient; the next tick retries.
                tracing::warn!(error = %e, "heartbeat poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    const KEY: &str = "last-modified";
    const INTERVAL: Duration = Duration::from_secs(30);

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_read_only_primes() {
        let store = Arc::new(MemoryStore::new());
        store.write_scalar(KEY, 100).await.unwrap();

        let poller = Arc::new(HeartbeatPoller::new(store, KEY, INTERVAL));
        let (count, on_change) = counter();
        poller.start(on_change);

        tokio::time::sleep(INTERVAL + Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(poller.last_seen(), Some(100));
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_increase_triggers_callback() {
        let store = Arc::new(MemoryStore::new());
        store.write_scalar(KEY, 100).await.unwrap();

        let poller = Arc::new(HeartbeatPoller::new(store.clone(), KEY, INTERVAL));
        let (count, on_change) = counter();
        poller.start(on_change);

        // Prime, then another device bumps the scalar.
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.write_scalar(KEY, 200).await.unwrap();

        tokio::time::sleep(INTERVAL + Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Unchanged value stays quiet.
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_scalar_primes_zero_baseline() {
        let store = Arc::new(MemoryStore::new());
        let poller = Arc::new(HeartbeatPoller::new(store.clone(), KEY, INTERVAL));
        let (count, on_change) = counter();
        poller.start(on_change);

        // First tick finds no scalar at all.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(poller.last_seen(), Some(0));

        // The very first write by another device must still register.
        store.write_scalar(KEY, 100).await.unwrap();
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_write_does_not_trigger() {
        let store = Arc::new(MemoryStore::new());
        store.write_scalar(KEY, 100).await.unwrap();

        let poller = Arc::new(HeartbeatPoller::new(store.clone(), KEY, INTERVAL));
        let (count, on_change) = counter();
        poller.start(on_change);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // This process uploads: scalar written, then observed locally.
        store.write_scalar(KEY, 500).await.unwrap();
        poller.observe(500);

        tokio::time::sleep(INTERVAL + Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.write_scalar(KEY, 100).await.unwrap();

        let poller = Arc::new(HeartbeatPoller::new(store.clone(), KEY, INTERVAL));
        let (count, on_change) = counter();
        poller.start(on_change);
        tokio::time::sleep(Duration::from_millis(50)).await;

        store.set_offline(true);
        store.write_scalar(KEY, 900).await.ok();
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Back online with a newer value: the next tick catches up.
        store.set_offline(false);
        store.write_scalar(KEY, 900).await.unwrap();
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        poller.stop().await;
    }
}
