use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::action::{ActionFactory, DefaultFactory};
use crate::error::Result;
use crate::listener::{ChangeListener, CommitListener};
use crate::store::Store;
use crate::transaction::Editor;
use crate::value::{Entries, Value};

/// Handle on a store opened through an [`Environment`](crate::Environment).
///
/// Every handle opened under the same identity shares one in-memory
/// snapshot, so a value written through one handle is immediately visible
/// through all others. Reads never fail: a missing key or a value of the
/// wrong type yields the supplied default.
pub struct Preferences {
    store: Arc<Store>,
    /// Factory used by editors of this handle
    factory: RwLock<Arc<dyn ActionFactory>>,
}

impl Preferences {
    pub(crate) fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            factory: RwLock::new(Arc::new(DefaultFactory)),
        }
    }

    pub(crate) fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Identity the store was opened under, such as `file:settings`
    pub fn identity(&self) -> &str {
        &self.store.identity
    }

    /// Raw value stored under `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.snapshot.get(key)
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.get(key).and_then(|v| v.as_int()).unwrap_or(default)
    }

    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.as_long()).unwrap_or(default)
    }

    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        self.get(key).and_then(|v| v.as_float()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s,
            _ => default.to_owned(),
        }
    }

    pub fn get_string_set(&self, key: &str, default: BTreeSet<String>) -> BTreeSet<String> {
        match self.get(key) {
            Some(Value::StringSet(set)) => set,
            _ => default,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.snapshot.contains(key)
    }

    /// Copy of every entry
    pub fn get_all(&self) -> Entries {
        self.store.snapshot.entries()
    }

    pub fn len(&self) -> usize {
        self.store.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.snapshot.is_empty()
    }

    /// Start an editing session
    pub fn edit(&self) -> Editor<'_> {
        Editor::new(self, self.factory())
    }

    fn factory(&self) -> Arc<dyn ActionFactory> {
        self.factory.read().clone()
    }

    /// Replace the action factory of this handle; `None` restores the default
    pub fn set_factory(&self, factory: Option<Arc<dyn ActionFactory>>) {
        let factory = factory.unwrap_or_else(|| Arc::new(DefaultFactory));
        *self.factory.write() = factory;
    }

    /// Listen for changed keys. Only a weak reference is kept: the listener
    /// stops receiving events once the caller drops it.
    pub fn register_change_listener<L: ChangeListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<dyn ChangeListener> = Arc::downgrade(listener) as Weak<dyn ChangeListener>;
        self.store.change_listeners.register(weak);
    }

    pub fn unregister_change_listener<L: ChangeListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<dyn ChangeListener> = Arc::downgrade(listener) as Weak<dyn ChangeListener>;
        self.store.change_listeners.unregister(&weak);
    }

    /// Listen for in-memory transactions. Held weakly, like change listeners.
    pub fn register_commit_listener<L: CommitListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<dyn CommitListener> = Arc::downgrade(listener) as Weak<dyn CommitListener>;
        self.store.commit_listeners.register(weak);
    }

    pub fn unregister_commit_listener<L: CommitListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<dyn CommitListener> = Arc::downgrade(listener) as Weak<dyn CommitListener>;
        self.store.commit_listeners.unregister(&weak);
    }

    pub(crate) fn notify_changed(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }

        for listener in self.store.change_listeners.live() {
            for key in keys {
                listener.on_changed(self, key);
            }
        }
    }

    /// Number of actions applied, plus one for the initial load
    pub fn version(&self) -> u64 {
        self.store.snapshot.version()
    }

    /// Highest version known to be persisted
    pub fn durable_version(&self) -> u64 {
        self.store.snapshot.durable_version()
    }

    /// True while committed changes still wait for a flush
    pub fn has_unflushed_writes(&self) -> bool {
        self.store.snapshot.has_pending_flush()
    }

    /// Merge what the backend holds now into memory, notifying listeners of
    /// every key whose value changed. Returns the number of such keys.
    pub fn reload(&self) -> Result<usize> {
        let changed = self.store.merge_reload()?;
        self.notify_changed(&changed);
        Ok(changed.len())
    }

    /// Log a diagnostic report of the store; `full` adds every entry
    pub fn dump(&self, full: bool) {
        let store = &self.store;
        let stat = store.stats.snapshot();

        log::debug!("---- {} ----", store.identity);
        log::debug!("backend: {}", store.backend.describe());
        log::debug!(
            "workers: {} live / {} max, {} running, {} queued",
            store.pool.live_workers(),
            store.pool.max_workers(),
            store.pool.running(),
            store.pool.queued()
        );
        log::debug!(
            "version: {} (durable {}), unflushed: {}",
            self.version(),
            self.durable_version(),
            self.has_unflushed_writes()
        );
        log::debug!(
            "saves: {} done, {} rescheduled, {} failed, {} queued, {} skipped",
            stat.done_saves,
            stat.rescheduled_saves,
            stat.failed_saves,
            stat.queued_saves,
            stat.skipped_saves
        );
        log::debug!(
            "commits: {} in memory, {} apply, {} commit",
            stat.memory_commits,
            stat.applies,
            stat.commits
        );
        log::debug!(
            "entries: {}, change listeners: {}, commit listeners: {}, factory: {}",
            self.len(),
            store.change_listeners.len(),
            store.commit_listeners.len(),
            self.factory().name()
        );

        if full {
            for (key, value) in self.get_all() {
                log::trace!("  {} [{:?}] = {}", key, value.type_tag(), value);
            }
        }
    }
}

impl Clone for Preferences {
    /// The clone shares the store but carries its own factory slot
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            factory: RwLock::new(self.factory()),
        }
    }
}

/// Copy every entry of `from` into `to` in one transaction, waiting for the
/// destination to persist. Returns whether the destination changed.
pub fn copy(from: &Preferences, to: &Preferences) -> bool {
    let entries = from.get_all();
    if entries.is_empty() {
        return false;
    }

    let mut editor = to.edit();
    for (key, value) in entries {
        editor.put(&key, value);
    }
    editor.commit()
}
