/// The synchronization engine.
///
/// Ties the pieces together: the state hub feeds change events to a driver
/// task, which observes collections into the dirty tracker and arms the
/// debounce scheduler; elapsed windows run upload cycles, the heartbeat
/// poller runs download cycles, and direction locks with pending flags keep
/// at most one cycle per direction in flight. Uploads stay blocked until
/// the first download has replaced local state.

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use satchel_core::{Cadence, Clock, CollectionKind, RecordDoc};

use crate::dirty::{DirtyStats, DirtyTracker};
use crate::gate::{DirectionLock, InitialSyncGate};
use crate::heartbeat::HeartbeatPoller;
use crate::hub::{ChangeEvent, StateHub};
use crate::manifest::Manifest;
use crate::merge::merge;
use crate::scheduler::UploadScheduler;
use crate::store::RemoteStore;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Debounce window for latency-sensitive collections.
    pub hot_debounce: Duration,
    /// Debounce window for everything else.
    pub cold_debounce: Duration,
    /// How often the heartbeat scalar is polled. Also the staleness bound
    /// for detecting other devices' changes.
    pub heartbeat_interval: Duration,
    /// Key of the remote scalar bumped after every successful upload.
    pub heartbeat_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hot_debounce: Duration::from_secs(2),
            cold_debounce: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_key: "last-modified".to_string(),
        }
    }
}

/// Which direction is currently in flight, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Idle,
    Uploading,
    Downloading,
}

/// Point-in-time snapshot of the engine's sync state.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub direction: SyncDirection,
    pub last_synced_at: Option<i64>,
    pub upload_pending: bool,
    pub download_pending: bool,
    pub initial_sync_complete: bool,
}

impl SyncStatus {
    pub fn is_syncing(&self) -> bool {
        self.direction != SyncDirection::Idle
    }
}

/// Events emitted to subscribers.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    StatusChanged(SyncStatus),
    UploadCompleted { uploaded: usize, deleted: usize },
    DownloadCompleted { merged: usize, locally_deleted: usize },
    RemoteChangeDetected,
    Failed { direction: SyncDirection, error: String },
}

/// Cumulative counters since engine creation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub upload_cycles: u64,
    pub download_cycles: u64,
    pub failed_cycles: u64,
    pub records_uploaded: u64,
    pub records_deleted_remote: u64,
    pub records_merged: u64,
    pub records_deleted_local: u64,
}

#[derive(Debug, Default)]
struct UploadSummary {
    uploaded: usize,
    deleted: usize,
    failed: Vec<CollectionKind>,
}

#[derive(Debug, Default)]
struct DownloadSummary {
    merged: usize,
    locally_deleted: usize,
    /// Local removals surfaced mid-download; they skip the debounce and
    /// need an upload cycle as soon as the download releases its lock.
    deletes_queued: bool,
}

/// One collection's share of an upload cycle, snapshotted at cycle start.
struct CollectionPush {
    kind: CollectionKind,
    docs: Vec<RecordDoc>,
    deletes: Vec<String>,
    manifest: Manifest,
}

const NEVER: i64 = i64::MIN;

pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    hub: Arc<StateHub>,
    change_rx: Mutex<Option<mpsc::UnboundedReceiver<ChangeEvent>>>,
    dirty: DirtyTracker,
    upload_lock: DirectionLock,
    download_lock: DirectionLock,
    initial_gate: InitialSyncGate,
    /// Ids removed locally, awaiting a remote delete. Restored on failed
    /// cycles so deletes are never lost.
    pending_deletes: RwLock<HashMap<CollectionKind, HashSet<String>>>,
    direction: RwLock<SyncDirection>,
    last_synced_at: AtomicI64,
    stats: RwLock<SyncStats>,
    heartbeat: Arc<HeartbeatPoller>,
    scheduler: Mutex<Option<UploadScheduler>>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncEvent>>>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>, config: SyncConfig) -> Arc<Self> {
        let (hub, change_rx) = StateHub::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let heartbeat = Arc::new(HeartbeatPoller::new(
            Arc::clone(&store),
            config.heartbeat_key.clone(),
            config.heartbeat_interval,
        ));

        Arc::new(Self {
            store,
            clock,
            config,
            hub,
            change_rx: Mutex::new(Some(change_rx)),
            dirty: DirtyTracker::new(),
            upload_lock: DirectionLock::new(),
            download_lock: DirectionLock::new(),
            initial_gate: InitialSyncGate::new(),
            pending_deletes: RwLock::new(HashMap::new()),
            direction: RwLock::new(SyncDirection::Idle),
            last_synced_at: AtomicI64::new(NEVER),
            stats: RwLock::new(SyncStats::default()),
            heartbeat,
            scheduler: Mutex::new(None),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            shutdown_tx: Mutex::new(None),
        })
    }

    pub fn builder() -> crate::SyncEngineBuilder {
        crate::SyncEngineBuilder::new()
    }

    /// Local state lives here; the host application reads and mutates
    /// collections through the hub and the engine picks changes up.
    pub fn hub(&self) -> Arc<StateHub> {
        Arc::clone(&self.hub)
    }

    /// Take the event receiver. Only one subscriber is supported; returns
    /// None on later calls.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.event_rx.lock().take()
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            direction: *self.direction.read(),
            last_synced_at: match self.last_synced_at.load(Ordering::Acquire) {
                NEVER => None,
                v => Some(v),
            },
            upload_pending: self.upload_lock.has_pending(),
            download_pending: self.download_lock.has_pending(),
            initial_sync_complete: self.initial_gate.is_open(),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    pub fn dirty_stats(&self) -> DirtyStats {
        self.dirty.stats()
    }

    /// Spawn the driver task, the heartbeat poller, and the initial
    /// download. Calling start twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Some(mut change_rx) = self.change_rx.lock().take() else {
            warn!("sync engine already started");
            return;
        };

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let (fire_tx, mut fire_rx) = mpsc::unbounded_channel();
        let scheduler = UploadScheduler::spawn(
            self.config.hot_debounce,
            self.config.cold_debounce,
            fire_tx,
        );
        *self.scheduler.lock() = Some(scheduler);

        let weak = Arc::downgrade(self);
        self.heartbeat.start(move || {
            if let Some(engine) = weak.upgrade() {
                engine.emit(SyncEvent::RemoteChangeDetected);
                tokio::spawn(async move { engine.run_download_cycle().await });
            }
        });

        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_download_cycle().await });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = change_rx.recv() => {
                        let Some(ChangeEvent { kind }) = event else { break };
                        let Some(engine) = weak.upgrade() else { break };
                        let removal = engine.observe_collection(kind);
                        if removal {
                            // Deletions skip the debounce.
                            engine.run_upload_cycle().await;
                        }
                    }
                    fired = fire_rx.recv() => {
                        if fired.is_none() {
                            break;
                        }
                        let Some(engine) = weak.upgrade() else { break };
                        engine.run_upload_cycle().await;
                    }
                }
            }
            debug!("sync driver stopped");
        });
    }

    /// Stop background tasks. Local state stays intact; cycles already in
    /// flight run to completion.
    pub async fn stop(&self) {
        self.heartbeat.stop().await;
        *self.scheduler.lock() = None;
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }

    /// Mark every known record dirty and run an upload cycle followed by a
    /// download cycle, regardless of debounce state. Cycles already in
    /// flight are waited out, so this resolves only after both of its own
    /// cycles have completed.
    pub async fn force_sync(&self) -> anyhow::Result<()> {
        let was_gated = !self.initial_gate.is_open();
        for kind in CollectionKind::ALL {
            for id in self.hub.ids(kind) {
                self.dirty.mark_dirty(kind, &id);
            }
        }
        if !was_gated {
            self.upload_lock.acquire().await;
            self.upload_while_held().await;
        }
        self.download_lock.acquire().await;
        self.download_while_held().await;
        if was_gated && self.initial_gate.is_open() {
            // The upload was blocked by the initial-sync gate; the download
            // just opened it, so push the local edits now.
            self.upload_lock.acquire().await;
            self.upload_while_held().await;
        }
        Ok(())
    }

    /// Feed one collection's current state through the dirty tracker.
    /// Returns true when removals were found (those need an immediate
    /// upload cycle for the remote deletes).
    fn observe_collection(&self, kind: CollectionKind) -> bool {
        let changes = self.hub.read(kind, |docs| self.dirty.observe(kind, docs));

        if !changes.removed.is_empty() {
            debug!(collection = %kind, removed = changes.removed.len(), "local removals observed");
            self.pending_deletes
                .write()
                .entry(kind)
                .or_default()
                .extend(changes.removed.iter().cloned());
        }
        if !changes.dirtied.is_empty() {
            self.request_upload(kind.cadence());
        }
        !changes.removed.is_empty()
    }

    fn request_upload(&self, cadence: Cadence) {
        if let Some(scheduler) = self.scheduler.lock().as_ref() {
            scheduler.request(cadence);
        }
    }

    /// Run one upload cycle, or queue a follow-up if one is in flight.
    pub async fn run_upload_cycle(&self) {
        if !self.initial_gate.is_open() {
            debug!("upload blocked until the initial download completes");
            return;
        }
        if !self.upload_lock.try_acquire() {
            self.upload_lock.mark_pending();
            return;
        }
        self.upload_while_held().await;
    }

    /// Run upload cycles until the pending flag stays clear, then release
    /// the lock. Requests queued behind a running cycle collapse into one
    /// follow-up iteration of this loop.
    async fn upload_while_held(&self) {
        loop {
            self.set_direction(SyncDirection::Uploading);

            match self.upload_once().await {
                Ok(summary) => {
                    let mut stats = self.stats.write();
                    stats.upload_cycles += 1;
                    stats.records_uploaded += summary.uploaded as u64;
                    stats.records_deleted_remote += summary.deleted as u64;
                    if !summary.failed.is_empty() {
                        stats.failed_cycles += 1;
                    }
                    drop(stats);

                    if summary.failed.is_empty() {
                        self.last_synced_at
                            .store(self.clock.now_ms(), Ordering::Release);
                    } else {
                        self.emit(SyncEvent::Failed {
                            direction: SyncDirection::Uploading,
                            error: format!("collections failed to upload: {:?}", summary.failed),
                        });
                        // Dirty flags and deletes survived; retry on the cold
                        // cadence instead of hammering the store.
                        self.request_upload(Cadence::Cold);
                    }
                    if summary.uploaded > 0 || summary.deleted > 0 {
                        info!(
                            uploaded = summary.uploaded,
                            deleted = summary.deleted,
                            "upload cycle complete"
                        );
                        self.emit(SyncEvent::UploadCompleted {
                            uploaded: summary.uploaded,
                            deleted: summary.deleted,
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "upload cycle failed");
                    self.stats.write().failed_cycles += 1;
                    self.emit(SyncEvent::Failed {
                        direction: SyncDirection::Uploading,
                        error: e.to_string(),
                    });
                }
            }

            self.set_direction(SyncDirection::Idle);
            if !self.upload_lock.take_pending() {
                break;
            }
            debug!("draining queued upload request");
        }
        self.upload_lock.release();
    }

    /// Run one download cycle, or queue a follow-up if one is in flight.
    pub async fn run_download_cycle(&self) {
        if !self.download_lock.try_acquire() {
            self.download_lock.mark_pending();
            return;
        }
        self.download_while_held().await;
    }

    /// Download-side counterpart of `upload_while_held`, plus the
    /// follow-up uploads a download can trigger: flushing edits that
    /// accumulated behind the initial-sync gate, and issuing remote
    /// deletes for removals the download itself observed.
    async fn download_while_held(&self) {
        let mut first_success = false;
        let mut deletes_queued = false;
        loop {
            self.set_direction(SyncDirection::Downloading);

            match self.download_once().await {
                Ok(summary) => {
                    if !self.initial_gate.is_open() {
                        first_success = true;
                        self.initial_gate.open();
                    }
                    deletes_queued |= summary.deletes_queued;
                    self.last_synced_at
                        .store(self.clock.now_ms(), Ordering::Release);

                    let mut stats = self.stats.write();
                    stats.download_cycles += 1;
                    stats.records_merged += summary.merged as u64;
                    stats.records_deleted_local += summary.locally_deleted as u64;
                    drop(stats);

                    info!(
                        merged = summary.merged,
                        locally_deleted = summary.locally_deleted,
                        "download cycle complete"
                    );
                    self.emit(SyncEvent::DownloadCompleted {
                        merged: summary.merged,
                        locally_deleted: summary.locally_deleted,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "download cycle failed");
                    self.stats.write().failed_cycles += 1;
                    self.emit(SyncEvent::Failed {
                        direction: SyncDirection::Downloading,
                        error: e.to_string(),
                    });
                }
            }

            self.set_direction(SyncDirection::Idle);
            if !self.download_lock.take_pending() {
                break;
            }
            debug!("draining queued download request");
        }
        self.download_lock.release();

        if first_success {
            info!("initial download complete; uploads unblocked");
        }
        let gated_backlog = first_success && self.dirty.stats().total_dirty > 0;
        if deletes_queued || gated_backlog {
            self.run_upload_cycle().await;
        }
    }

    /// Push dirty records and pending deletes, collections in parallel.
    /// Each collection writes its records first and rewrites its manifest
    /// last, from the start-of-cycle id snapshot, so the manifest never
    /// names a record whose delete has not already been applied. A failed
    /// collection skips its manifest, keeps its dirty flags, and gets its
    /// deletes restored for the next cycle.
    async fn upload_once(&self) -> anyhow::Result<UploadSummary> {
        let now = self.clock.now_ms();
        let mut work = Vec::new();

        for kind in CollectionKind::ALL {
            // Snapshot and observation happen under one hub lock, so every
            // snapshot id is either dirty (written this cycle) or already
            // confirmed remote. Mutations whose change events are still
            // queued behind the driver get swept into this cycle.
            let (snapshot, changes) = self
                .hub
                .read(kind, |docs| (docs.clone(), self.dirty.observe(kind, docs)));
            if !changes.removed.is_empty() {
                self.pending_deletes
                    .write()
                    .entry(kind)
                    .or_default()
                    .extend(changes.removed.iter().cloned());
            }

            let dirty_ids = self.dirty.all_dirty(kind);
            let deletes: Vec<String> = self
                .pending_deletes
                .write()
                .get_mut(&kind)
                .map(|set| set.drain().collect())
                .unwrap_or_default();
            if dirty_ids.is_empty() && deletes.is_empty() {
                continue;
            }

            let docs: Vec<RecordDoc> = dirty_ids
                .iter()
                .filter_map(|id| snapshot.get(id).cloned())
                .collect();
            let manifest = Manifest::from_ids(snapshot.keys().cloned(), now);
            work.push(CollectionPush {
                kind,
                docs,
                deletes,
                manifest,
            });
        }

        let mut summary = UploadSummary::default();
        if work.is_empty() {
            return Ok(summary);
        }

        let mut join = JoinSet::new();
        for push in work {
            let store = Arc::clone(&self.store);
            join.spawn(async move {
                let result = push_collection(store.as_ref(), &push).await;
                (push, result)
            });
        }

        let mut any_success = false;
        while let Some(joined) = join.join_next().await {
            let (push, result) = joined.context("upload task panicked")?;
            match result {
                Ok(()) => {
                    any_success = true;
                    summary.uploaded += push.docs.len();
                    summary.deleted += push.deletes.len();
                    for doc in &push.docs {
                        self.dirty.clear_if_unchanged(push.kind, &doc.id, &doc.signature);
                    }
                }
                Err(e) => {
                    warn!(
                        collection = %push.kind,
                        error = %e,
                        "collection upload failed; records stay dirty for the next cycle"
                    );
                    // Deletes are idempotent, so restoring all of them for
                    // replay is safe even if some already applied.
                    if !push.deletes.is_empty() {
                        self.pending_deletes
                            .write()
                            .entry(push.kind)
                            .or_default()
                            .extend(push.deletes.iter().cloned());
                    }
                    summary.failed.push(push.kind);
                }
            }
        }

        if any_success {
            match self.store.write_scalar(&self.config.heartbeat_key, now).await {
                Ok(()) => self.heartbeat.observe(now),
                // Other devices just stay stale until the next upload.
                Err(e) => warn!(error = %e, "heartbeat bump failed"),
            }
        }
        Ok(summary)
    }

    /// Load every collection (all-or-nothing), then observe, merge, and
    /// swap each one under the hub lock so the merged output and the
    /// signature cache land together.
    async fn download_once(&self) -> anyhow::Result<DownloadSummary> {
        // Prime the heartbeat baseline before loading anything, so a remote
        // upload landing mid-cycle still registers as an increase on the
        // next poll instead of being absorbed into an unseen baseline.
        let baseline = self
            .store
            .read_scalar(&self.config.heartbeat_key)
            .await
            .context("reading heartbeat scalar")?;
        self.heartbeat.observe(baseline.unwrap_or(0));

        let mut join = JoinSet::new();
        for kind in CollectionKind::ALL {
            let store = Arc::clone(&self.store);
            join.spawn(async move { (kind, store.load_collection(kind).await) });
        }

        let mut remote_by_kind: HashMap<CollectionKind, HashMap<String, RecordDoc>> =
            HashMap::new();
        while let Some(joined) = join.join_next().await {
            let (kind, result) = joined.context("download task panicked")?;
            let docs = result.with_context(|| format!("loading {kind}"))?;
            remote_by_kind.insert(
                kind,
                docs.into_iter().map(|d| (d.id.clone(), d)).collect(),
            );
        }

        let mut summary = DownloadSummary::default();
        for kind in CollectionKind::ALL {
            let remote = remote_by_kind.remove(&kind).unwrap_or_default();

            // Everything from observation to the swap happens under the hub
            // write lock. Mutations whose change events are still queued
            // behind the driver are observed here first, so a fresh local
            // record is dirty before the merge decides what a missing
            // remote copy means, and no host edit can interleave between
            // the merge and the swap.
            self.hub.rewrite(kind, |local| {
                let changes = self.dirty.observe(kind, local);
                if !changes.removed.is_empty() {
                    self.pending_deletes
                        .write()
                        .entry(kind)
                        .or_default()
                        .extend(changes.removed.iter().cloned());
                    summary.deletes_queued = true;
                }
                if !changes.dirtied.is_empty() {
                    // Their change events will observe as no-ops now; arm
                    // the debounce window here instead.
                    self.request_upload(kind.cadence());
                }
                let dirty = self.dirty.all_dirty(kind);

                let outcome = merge(&remote, local, |id| dirty.contains(id));
                if !outcome.locally_deleted.is_empty() {
                    debug!(
                        collection = %kind,
                        ids = ?outcome.locally_deleted,
                        "records deleted locally to match remote"
                    );
                }
                summary.merged += outcome.merged.len();
                summary.locally_deleted += outcome.locally_deleted.len();

                self.dirty.reset_observed(kind, &outcome.merged);
                outcome.merged
            });
        }
        Ok(summary)
    }

    fn set_direction(&self, direction: SyncDirection) {
        *self.direction.write() = direction;
        self.emit(SyncEvent::StatusChanged(self.status()));
    }

    fn emit(&self, event: SyncEvent) {
        // Send fails only when no subscriber exists or it hung up.
        let _ = self.event_tx.send(event);
    }
}

async fn push_collection(
    store: &dyn RemoteStore,
    push: &CollectionPush,
) -> satchel_core::Result<()> {
    for id in &push.deletes {
        store.delete_record(push.kind, id).await?;
    }
    if !push.docs.is_empty() {
        store.save_records(push.kind, &push.docs).await?;
    }
    store.update_manifest(push.kind, &push.manifest).await?;
    Ok(())
}
