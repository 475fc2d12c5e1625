use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};

use crate::codec::{BinarySerializer, Serializer};
use crate::config::EnvConfig;
use crate::error::{Error, Result};
use crate::persistence::{FileBackend, NullPersistence, Persistence, TableBackend};
use crate::preferences::Preferences;
use crate::scheduler::SavePool;
use crate::stats::{Stat, Statistics};
use crate::store::Store;

type StoreCell = Arc<OnceCell<Arc<Store>>>;

/// Registry of open stores and owner of the write-back pool.
///
/// Each identity is loaded once; every later open of the same identity gets
/// a handle on the same in-memory snapshot. Stores stay registered until
/// [`reset`](Environment::reset) or until the environment is dropped; a
/// store dropped from the registry is still flushed at shutdown while any
/// handle keeps it alive.
pub struct Environment {
    /// Environment configuration
    config: EnvConfig,
    /// Save workers shared by every store
    pool: Arc<SavePool>,
    /// Counters shared by every store
    stats: Arc<Statistics>,
    /// Identity to store, initialized on first open
    stores: Mutex<HashMap<String, StoreCell>>,
    /// Every store ever initialized here, registered or not
    initialized: Mutex<Vec<Weak<Store>>>,
    /// Source of store ids for the save queue
    next_id: AtomicU64,
    /// Shutdown already ran
    closed: AtomicBool,
}

impl Environment {
    /// Create an environment. No thread is started until the first flush.
    pub fn new(config: EnvConfig) -> Self {
        let stats = Arc::new(Statistics::default());
        let pool = SavePool::new(&config, stats.clone());

        Self {
            config,
            pool,
            stats,
            stores: Mutex::new(HashMap::new()),
            initialized: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    fn stores(&self) -> MutexGuard<'_, HashMap<String, StoreCell>> {
        self.stores.lock()
    }

    /// Store persisted as one file in the configured directory
    pub fn open_file(&self, name: &str) -> Result<Preferences> {
        self.open_file_with(name, Arc::new(BinarySerializer))
    }

    /// Like [`open_file`](Environment::open_file) with a custom on-disk
    /// format. The serializer only matters to the first open of `name`.
    pub fn open_file_with(&self, name: &str, serializer: Arc<dyn Serializer>) -> Result<Preferences> {
        self.open_with(&format!("file:{}", name), || {
            self.ensure_dir();
            let backend = FileBackend::with_serializer(&self.config.dir, name, serializer)?
                .buffer_size(self.config.write_buffer_size);
            Ok(Arc::new(backend) as Arc<dyn Persistence>)
        })
    }

    /// Store persisted as rows of a SQLite table in the configured directory
    pub fn open_table(&self, name: &str) -> Result<Preferences> {
        self.open_with(&format!("table:{}", name), || {
            self.ensure_dir();
            let backend = TableBackend::new(&self.config.dir, name)?;
            Ok(Arc::new(backend) as Arc<dyn Persistence>)
        })
    }

    /// Store that lives in memory only
    pub fn open_memory(&self, name: &str) -> Result<Preferences> {
        self.open_with(&format!("memory:{}", name), || {
            Ok(Arc::new(NullPersistence) as Arc<dyn Persistence>)
        })
    }

    /// Open `identity`, building its backend with `make` if this is the
    /// first open. Concurrent first opens block until the load is done; a
    /// failed initialization leaves the identity unopened.
    pub fn open_with<F>(&self, identity: &str, make: F) -> Result<Preferences>
    where
        F: FnOnce() -> Result<Arc<dyn Persistence>>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }

        let cell = self
            .stores()
            .entry(identity.to_owned())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let store = cell.get_or_try_init(|| -> Result<Arc<Store>> {
            let backend = make()?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let store = Store::initialize(
                id,
                identity.to_owned(),
                backend,
                self.pool.clone(),
                self.stats.clone(),
            );

            let mut initialized = self.initialized.lock();
            initialized.retain(|weak| weak.strong_count() > 0);
            initialized.push(Arc::downgrade(&store));
            Ok(store)
        })?;

        Ok(Preferences::new(store.clone()))
    }

    fn ensure_dir(&self) {
        if let Err(e) = fs::create_dir_all(&self.config.dir) {
            log::error!("cannot create {}: {}", self.config.dir.display(), e);
        }
    }

    fn open_stores(&self) -> Vec<Arc<Store>> {
        self.stores()
            .values()
            .filter_map(|cell| cell.get().cloned())
            .collect()
    }

    /// True when a store named `name` is loaded, under any backend. A full
    /// identity such as `table:name` is accepted too.
    pub fn exists(&self, name: &str) -> bool {
        self.stores().iter().any(|(identity, cell)| {
            let matches = identity == name
                || identity
                    .split_once(':')
                    .map_or(false, |(_, bare)| bare == name);
            matches && cell.get().is_some()
        })
    }

    /// Forget every store; the next open loads from the backend again.
    /// Forgotten stores with live handles keep flushing, and are flushed at
    /// shutdown.
    pub fn reset(&self) {
        let mut stores = self.stores();
        log::debug!("dropping {} stores from the registry", stores.len());
        stores.clear();
    }

    /// Number of loaded stores
    pub fn len(&self) -> usize {
        self.open_stores().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Stat {
        self.stats.snapshot()
    }

    /// Stop the save workers, then flush every live store that still has
    /// unflushed writes on the calling thread, including stores forgotten by
    /// [`reset`](Environment::reset). Later opens fail with
    /// [`Error::Shutdown`].
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pool.shutdown();

        let live: Vec<Arc<Store>> = self
            .initialized
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        for store in live {
            if !store.snapshot.has_pending_flush() {
                continue;
            }
            final_flush(&store, self.config.final_flush_attempts);
        }
    }
}

fn final_flush(store: &Store, attempts: usize) {
    for attempt in 1..=attempts {
        match store.flush_now() {
            Ok(version) => {
                log::debug!("{}: final flush of version {}", store.identity, version);
                return;
            }
            Err(e) if e.is_reschedule() => {
                log::trace!("{}: final flush attempt {} was stale", store.identity, attempt);
            }
            Err(e) => {
                log::error!(
                    "{}: final flush attempt {} failed: {}",
                    store.identity,
                    attempt,
                    e
                );
            }
        }
    }
    log::warn!("{}: unflushed writes lost at shutdown", store.identity);
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.shutdown();
    }
}
