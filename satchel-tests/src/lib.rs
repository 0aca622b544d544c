/// Test utilities and helpers for satchel integration tests.
///
/// Integration tests run the engine against a shared in-memory store under
/// tokio's paused clock; `TestDevice` wires one engine up the way a real
/// device would be, and the window helpers sleep just past the relevant
/// debounce or heartbeat deadline.

use std::sync::Arc;
use std::time::Duration;

use satchel_core::{Clock, CollectionKind, ManualClock, Record, Session};
use satchel_sync::{MemoryStore, SyncEngine, SyncEngineBuilder};

pub const HOT: Duration = Duration::from_secs(2);
pub const COLD: Duration = Duration::from_secs(15);
pub const HEARTBEAT: Duration = Duration::from_secs(30);

/// One device's engine over a (possibly shared) in-memory store, with a
/// manually-advanced wall clock.
pub struct TestDevice {
    pub engine: Arc<SyncEngine>,
    pub store: Arc<MemoryStore>,
    pub clock: ManualClock,
}

impl TestDevice {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self::with_start_time(store, 1_000)
    }

    pub fn with_start_time(store: Arc<MemoryStore>, now_ms: i64) -> Self {
        init_tracing();
        let clock = ManualClock::new(now_ms);
        let engine = SyncEngineBuilder::new()
            .store(store.clone())
            .clock(Arc::new(clock.clone()))
            .hot_debounce(HOT)
            .cold_debounce(COLD)
            .heartbeat_interval(HEARTBEAT)
            .build()
            .expect("engine builds");

        Self {
            engine,
            store,
            clock,
        }
    }

    /// Start the engine and let the initial download settle.
    pub async fn start(&self) {
        self.engine.start();
        settle().await;
    }

    /// Put a fresh session stamped with this device's clock; returns its id.
    pub fn put_session(&self, title: &str) -> String {
        let session = Session::new(title, self.clock.now_ms());
        self.engine
            .hub()
            .put_record(CollectionKind::Sessions, &session)
            .expect("encode session");
        session.id().to_string()
    }
}

/// Install a log subscriber honoring RUST_LOG. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let spawned tasks drain without crossing any debounce window.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn past_hot_window() {
    tokio::time::sleep(HOT + Duration::from_millis(50)).await;
}

pub async fn past_cold_window() {
    tokio::time::sleep(COLD + Duration::from_millis(50)).await;
}

pub async fn past_heartbeat() {
    tokio::time::sleep(HEARTBEAT + Duration::from_millis(50)).await;
}
