use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::value::{Entries, Value};

/// State guarded by the modify lock
#[derive(Debug, Default)]
pub(crate) struct SnapshotInner {
    /// Memory storage of the preferences
    pub(crate) objects: Entries,
    /// Set while a committed mutation has not reached durable storage
    pub(crate) pending_flush: bool,
}

/// Flush progress, guarded apart from the map
#[derive(Debug, Default)]
struct Durability {
    /// Highest version known to be durable
    version: u64,
    /// Flush attempts that ended in an error
    failures: u64,
}

/// Shared in-memory state of one logical store.
///
/// Every read of the map and every mutation happens under the modify lock.
/// The version counter only moves while that lock is held, but may be read
/// without it; persistence backends compare versions to prove that what they
/// wrote is still current.
#[derive(Debug)]
pub struct Snapshot {
    /// Modify lock and the data it protects
    inner: Mutex<SnapshotInner>,
    /// Number of applied actions, plus one for the initial load
    version: AtomicU64,
    durable: Mutex<Durability>,
    /// Signalled after every finished flush attempt and when waiters must give up
    flushed: Condvar,
}

/// How often a blocked commit re-checks for cancellation
const WAIT_SLICE: Duration = Duration::from_millis(100);

impl Snapshot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SnapshotInner::default()),
            version: AtomicU64::new(0),
            durable: Mutex::new(Durability::default()),
            flushed: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SnapshotInner> {
        self.inner.lock()
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Advance the version by `applied`. Taking the guarded state proves the
    /// modify lock is held.
    pub(crate) fn advance(&self, _inner: &mut SnapshotInner, applied: u64) -> u64 {
        self.version.fetch_add(applied, Ordering::SeqCst) + applied
    }

    /// Version and a copy of the map, taken atomically
    pub fn capture(&self) -> (u64, Entries) {
        let inner = self.lock();
        (self.version(), inner.objects.clone())
    }

    /// Copy of the map
    pub fn entries(&self) -> Entries {
        self.lock().objects.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a committed mutation has not been flushed
    pub fn has_pending_flush(&self) -> bool {
        self.lock().pending_flush
    }

    /// Highest version made durable so far
    pub fn durable_version(&self) -> u64 {
        self.durable.lock().version
    }

    /// Number of failed flush attempts so far
    pub(crate) fn failures(&self) -> u64 {
        self.durable.lock().failures
    }

    /// Record that `version` reached durable storage
    pub(crate) fn mark_durable(&self, version: u64) {
        {
            let mut inner = self.lock();
            if self.version() == version {
                inner.pending_flush = false;
            }
        }

        let mut durable = self.durable.lock();
        if version > durable.version {
            durable.version = version;
        }
        self.flushed.notify_all();
    }

    /// Record a flush attempt that failed; blocked committers give up
    pub(crate) fn mark_failed(&self) {
        let mut durable = self.durable.lock();
        durable.failures += 1;
        self.flushed.notify_all();
    }

    /// Wake blocked committers without changing state
    pub(crate) fn wake_waiters(&self) {
        let _durable = self.durable.lock();
        self.flushed.notify_all();
    }

    /// Block until `version` is durable, a flush attempt fails after
    /// `failures` were counted, or `cancelled` reports true. Returns whether
    /// the version was reached.
    pub(crate) fn wait_durable(
        &self,
        version: u64,
        failures: u64,
        cancelled: impl Fn() -> bool,
    ) -> bool {
        let mut durable = self.durable.lock();
        while durable.version < version {
            if durable.failures != failures || cancelled() {
                return false;
            }
            self.flushed.wait_for(&mut durable, WAIT_SLICE);
        }
        true
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}
