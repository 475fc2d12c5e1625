use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::action::Action;
use crate::error::Result;
use crate::listener::{ChangeListener, CommitListener, Listeners};
use crate::persistence::Persistence;
use crate::scheduler::{SavePool, SaveTask};
use crate::snapshot::Snapshot;
use crate::stats::Statistics;

/// Outcome of an in-memory transaction that changed something
#[derive(Debug)]
pub(crate) struct Committed {
    /// Version after the transaction
    pub(crate) version: u64,
    /// Keys touched, first occurrence order, without duplicates
    pub(crate) keys: Vec<String>,
}

/// Everything shared by the handles opened on one store identity
pub(crate) struct Store {
    /// Dedup identity inside the save queue
    pub(crate) id: u64,
    /// Canonical identity the store was opened under
    pub(crate) identity: String,
    pub(crate) snapshot: Snapshot,
    pub(crate) backend: Arc<dyn Persistence>,
    /// Held for a whole flush; one write to the backend at a time
    flush_lock: Mutex<()>,
    /// Backend's own view of transactions, held strongly
    backend_hook: Option<Arc<dyn CommitListener>>,
    pub(crate) change_listeners: Listeners<dyn ChangeListener>,
    pub(crate) commit_listeners: Listeners<dyn CommitListener>,
    pub(crate) pool: Arc<SavePool>,
    pub(crate) stats: Arc<Statistics>,
}

impl Store {
    /// Build the store and load it from the backend. An unreadable backend
    /// leaves the store empty; the version still moves so the store counts
    /// as loaded.
    pub(crate) fn initialize(
        id: u64,
        identity: String,
        backend: Arc<dyn Persistence>,
        pool: Arc<SavePool>,
        stats: Arc<Statistics>,
    ) -> Arc<Self> {
        let backend_hook = backend.clone().commit_listener();
        let store = Arc::new(Self {
            id,
            identity,
            snapshot: Snapshot::new(),
            backend,
            flush_lock: Mutex::new(()),
            backend_hook,
            change_listeners: Listeners::new(),
            commit_listeners: Listeners::new(),
            pool,
            stats,
        });

        let loaded = match store.backend.load() {
            Ok(entries) => entries,
            Err(e) => {
                log::error!(
                    "cannot load {} from {}: {}",
                    store.identity,
                    store.backend.describe(),
                    e
                );
                Default::default()
            }
        };

        let version = {
            let mut inner = store.snapshot.lock();
            inner.objects.extend(loaded);
            store.snapshot.advance(&mut inner, 1)
        };
        store.snapshot.mark_durable(version);

        log::debug!(
            "loaded {} ({} entries) from {}",
            store.identity,
            store.snapshot.len(),
            store.backend.describe()
        );
        store
    }

    /// Apply the actions atomically. Commit listeners run under the modify
    /// lock; change notification is left to the caller.
    pub(crate) fn commit_to_memory(&self, actions: Vec<Action>) -> Option<Committed> {
        Statistics::bump(&self.stats.memory_commits);

        if actions.is_empty() {
            return None;
        }

        let listeners = self.commit_listeners.live();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        let version = {
            let mut inner = self.snapshot.lock();

            if let Some(hook) = &self.backend_hook {
                hook.on_commit_start(&actions);
            }
            for listener in &listeners {
                listener.on_commit_start(&actions);
            }

            for action in &actions {
                action.apply(&mut inner.objects);

                if let Some(key) = action.key() {
                    if seen.insert(key) {
                        keys.push(key.to_owned());
                    }
                }
            }

            let version = self.snapshot.advance(&mut inner, actions.len() as u64);
            inner.pending_flush = true;

            if let Some(hook) = &self.backend_hook {
                hook.on_commit_end();
            }
            for listener in &listeners {
                listener.on_commit_end();
            }

            version
        };

        Some(Committed { version, keys })
    }

    /// Queue a background flush
    pub(crate) fn schedule_flush(self: &Arc<Self>) {
        let task: Arc<dyn SaveTask> = self.clone();
        if let Err(e) = self.pool.submit(task) {
            log::warn!("flush of {} not scheduled: {}", self.identity, e);
        }
    }

    /// Queue a flush and block until `version` is durable, a flush attempt
    /// fails or the pool stops
    pub(crate) fn force_flush(self: &Arc<Self>, version: u64) -> bool {
        let failures = self.snapshot.failures();
        self.schedule_flush();
        let pool = self.pool.clone();
        self.snapshot.wait_durable(version, failures, || pool.is_shutdown())
    }

    /// One flush attempt on the calling thread. Waits for a flush of the
    /// same store running elsewhere, so files are rotated and rows written
    /// in version order.
    pub(crate) fn flush_now(&self) -> Result<u64> {
        let _flushing = self.flush_lock.lock();
        let version = self.backend.flush(&self.snapshot)?;
        self.snapshot.mark_durable(version);
        Ok(version)
    }

    /// Merge a fresh read from the backend into memory. Returns the keys
    /// whose value changed.
    pub(crate) fn merge_reload(&self) -> Result<Vec<String>> {
        let fresh = self.backend.reload()?;

        let mut changed = Vec::new();
        let (version, was_pending) = {
            let mut inner = self.snapshot.lock();
            for (key, value) in fresh {
                if inner.objects.get(&key) != Some(&value) {
                    inner.objects.insert(key.clone(), value);
                    changed.push(key);
                }
            }
            if changed.is_empty() {
                return Ok(changed);
            }
            let version = self.snapshot.advance(&mut inner, changed.len() as u64);
            (version, inner.pending_flush)
        };

        // Merged values came from the backend, nothing new to write
        if !was_pending {
            self.snapshot.mark_durable(version);
        }
        Ok(changed)
    }
}

impl SaveTask for Store {
    fn task_id(&self) -> u64 {
        self.id
    }

    fn save(&self) -> Result<()> {
        self.flush_now().map(|_| ())
    }

    fn failed(&self) {
        self.snapshot.mark_failed();
    }

    fn abandon(&self) {
        self.snapshot.wake_waiters();
    }
}
