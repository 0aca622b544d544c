/// Advisory locks for sync cycles.
///
/// Upload and download each get an independent lock so a running download
/// never blocks an upload request from being queued. A caller that fails to
/// acquire sets the pending flag instead of blocking; the running cycle
/// drains that flag before releasing and runs exactly one follow-up cycle,
/// so backlogged requests collapse into one follow-up instead of an
/// unbounded queue.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// One direction's advisory lock plus its pending flag.
#[derive(Debug)]
pub struct DirectionLock {
    held: AtomicBool,
    pending: AtomicBool,
    released: Notify,
}

impl Default for DirectionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectionLock {
    pub fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            released: Notify::new(),
        }
    }

    /// Try to take the lock. Returns false if a cycle of this direction is
    /// already running.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Take the lock, parking until the current holder releases. Used by
    /// callers that must run their own cycle rather than piggyback on the
    /// pending flag.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            self.released.notified().await;
        }
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
        // Stores a permit even with no waiter parked yet, so a release
        // landing between a failed try_acquire and notified() is not lost.
        self.released.notify_one();
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Record that a cycle was requested while one was in flight.
    pub fn mark_pending(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Consume the pending flag. Returns true at most once per mark.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

/// Blocks uploads until the first successful download has replaced local
/// state. Local data from a previous run may be stale and must not
/// overwrite newer remote state before it has even been observed.
#[derive(Debug, Default)]
pub struct InitialSyncGate {
    open: AtomicBool,
}

impl InitialSyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let lock = DirectionLock::new();

        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        assert!(lock.is_held());

        lock.release();
        assert!(lock.try_acquire());
    }

    #[test]
    fn test_pending_taken_at_most_once() {
        let lock = DirectionLock::new();

        lock.mark_pending();
        lock.mark_pending();

        assert!(lock.take_pending());
        assert!(!lock.take_pending());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        use std::sync::Arc;

        let lock = Arc::new(DirectionLock::new());
        assert!(lock.try_acquire());

        let waiter = Arc::clone(&lock);
        let handle = tokio::spawn(async move { waiter.acquire().await });

        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        lock.release();
        handle.await.unwrap();
        assert!(lock.is_held());
    }

    #[test]
    fn test_directions_are_independent() {
        let upload = DirectionLock::new();
        let download = DirectionLock::new();

        assert!(upload.try_acquire());
        assert!(download.try_acquire());
    }

    #[test]
    fn test_initial_gate_starts_closed() {
        let gate = InitialSyncGate::new();
        assert!(!gate.is_open());

        gate.open();
        assert!(gate.is_open());
    }
}
