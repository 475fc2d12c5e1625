use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, Transaction};

use crate::action::Action;
use crate::codec::{decode, encode, type_of};
use crate::constants::{DATABASE_SUFFIX, SCHEMA_VERSION, TABLE_NAME};
use crate::error::{Error, Result};
use crate::listener::CommitListener;
use crate::persistence::{validate_name, Persistence};
use crate::snapshot::Snapshot;
use crate::stats::{DbStat, DbStatistics};
use crate::value::Entries;

/// How long a statement waits on a locked database file
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Row-level change replayed inside a database transaction
#[derive(Debug)]
enum RowAction {
    Put { key: String, tag: u32, bytes: Vec<u8> },
    Remove { key: String },
    Clear,
}

impl RowAction {
    fn apply(&self, tx: &Transaction<'_>, timestamp: i64) -> Result<()> {
        match self {
            RowAction::Put { key, tag, bytes } => {
                let updated = tx.execute(
                    &format!(
                        "UPDATE {} SET \"value\" = ?1, \"type\" = ?2, \"time\" = ?3 WHERE \"key\" = ?4",
                        TABLE_NAME
                    ),
                    params![bytes, tag, timestamp, key],
                )?;
                if updated == 0 {
                    tx.execute(
                        &format!(
                            "INSERT INTO {} (\"key\", \"value\", \"type\", \"time\") VALUES (?1, ?2, ?3, ?4)",
                            TABLE_NAME
                        ),
                        params![key, bytes, tag, timestamp],
                    )?;
                }
            }
            RowAction::Remove { key } => {
                tx.execute(
                    &format!("DELETE FROM {} WHERE \"key\" = ?1", TABLE_NAME),
                    params![key],
                )?;
            }
            RowAction::Clear => {
                tx.execute(&format!("DELETE FROM {}", TABLE_NAME), [])?;
            }
        }
        Ok(())
    }
}

/// Actions of one in-memory transaction, stamped once
#[derive(Debug)]
struct Commit {
    timestamp: i64,
    actions: Vec<RowAction>,
}

impl Commit {
    fn from_actions(actions: &[Action]) -> Self {
        let mut rows = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                Action::Put { key, value } => rows.push(RowAction::Put {
                    key: key.clone(),
                    tag: type_of(value).bits(),
                    bytes: encode(value),
                }),
                Action::Remove { key } => rows.push(RowAction::Remove { key: key.clone() }),
                Action::Clear => {
                    // Everything queued before the clear is moot
                    rows.clear();
                    rows.push(RowAction::Clear);
                }
            }
        }

        Self {
            timestamp: now_nanos(),
            actions: rows,
        }
    }
}

/// Store kept in a SQLite table, one row per key.
///
/// Every in-memory transaction is recorded as a [`Commit`] through the commit
/// hook; a flush replays all recorded commits inside one database
/// transaction. Loads are incremental: only rows stamped after the
/// high-water mark are read. Deleted rows are never reported by an
/// incremental read, they simply stop showing up.
pub struct TableBackend {
    path: PathBuf,
    /// Opened on first use
    conn: Mutex<Option<Connection>>,
    /// Commits waiting for the next flush, oldest first
    queue: Mutex<VecDeque<Commit>>,
    /// In-memory transactions that finished
    confirmed: AtomicU64,
    /// Commits written to the database
    applied: AtomicU64,
    /// Latest row timestamp observed by a read
    high_water_mark: Mutex<i64>,
    stats: DbStatistics,
}

impl TableBackend {
    /// Backend storing `name` as `<dir>/<name>.s3db`
    pub fn new(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        validate_name(name)?;

        Ok(Self {
            path: dir.as_ref().join(format!("{}{}", name, DATABASE_SUFFIX)),
            conn: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            confirmed: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            high_water_mark: Mutex::new(0),
            stats: DbStatistics::default(),
        })
    }

    /// Database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn high_water_mark(&self) -> i64 {
        *self.mark()
    }

    /// Move the incremental read position
    pub fn set_high_water_mark(&self, mark: i64) {
        *self.mark() = mark;
    }

    /// Commits recorded but not yet written
    pub fn pending_commits(&self) -> usize {
        self.queue().len()
    }

    pub fn stats(&self) -> DbStat {
        self.stats.snapshot()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Commit>> {
        self.queue.lock()
    }

    fn mark(&self) -> MutexGuard<'_, i64> {
        self.high_water_mark.lock()
    }

    /// Run `f` against the connection, opening it first if needed
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(open_database(&self.path)?);
        }

        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(Error::corrupted("database connection unavailable")),
        }
    }

    /// Write every queued commit in one database transaction. On failure the
    /// commits go back to the head of the queue for the next attempt.
    fn drain_to_db(&self) -> Result<()> {
        let commits: Vec<Commit> = self.queue().drain(..).collect();
        if commits.is_empty() {
            return Ok(());
        }

        let result = self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let mut updates = 0u64;
            for commit in &commits {
                for action in &commit.actions {
                    action.apply(&tx, commit.timestamp)?;
                    updates += 1;
                }
            }
            tx.commit()?;
            Ok(updates)
        });

        match result {
            Ok(updates) => {
                self.stats.db_updates.fetch_add(updates, Ordering::Relaxed);
                self.applied
                    .fetch_add(commits.len() as u64, Ordering::SeqCst);
                log::trace!(
                    "wrote {} commits ({} rows) to {}",
                    commits.len(),
                    updates,
                    self.path.display()
                );
                Ok(())
            }
            Err(e) => {
                let mut queue = self.queue();
                for commit in commits.into_iter().rev() {
                    queue.push_front(commit);
                }
                Err(e)
            }
        }
    }

    /// Rows stamped after the high-water mark. The mark moves to the newest
    /// stamp seen, or to now when nothing matched.
    fn read_newer(&self) -> Result<Entries> {
        let mut mark = self.mark();
        let since = *mark;

        let (entries, newest) = self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT \"key\", \"type\", \"value\", \"time\" FROM {} WHERE \"time\" > ?1",
                TABLE_NAME
            ))?;
            let rows = stmt.query_map(params![since], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;

            let mut entries = Entries::new();
            let mut newest: Option<i64> = None;
            for row in rows {
                let (key, tag, bytes, time) = row?;
                newest = Some(newest.map_or(time, |n| n.max(time)));

                match decode(tag as u32, &bytes) {
                    Ok(value) => {
                        entries.insert(key, value);
                    }
                    Err(e) => log::warn!("skipping row {:?} in {}: {}", key, self.path.display(), e),
                }
            }
            Ok((entries, newest))
        })?;

        *mark = newest.unwrap_or_else(now_nanos).max(since);
        Ok(entries)
    }
}

impl Persistence for TableBackend {
    fn describe(&self) -> String {
        format!("{}#{}", self.path.display(), TABLE_NAME)
    }

    fn load(&self) -> Result<Entries> {
        self.read_newer()
    }

    fn reload(&self) -> Result<Entries> {
        self.read_newer()
    }

    fn flush(&self, snapshot: &Snapshot) -> Result<u64> {
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);

        // Every commit counted in this version is already queued
        let version = snapshot.version();
        self.drain_to_db()?;

        let confirmed = self.confirmed.load(Ordering::SeqCst);
        let applied = self.applied.load(Ordering::SeqCst);
        if confirmed != applied {
            log::trace!(
                "{}: {} commits confirmed, {} written",
                self.path.display(),
                confirmed,
                applied
            );
            return Err(Error::Reschedule);
        }
        Ok(version)
    }

    fn commit_listener(self: Arc<Self>) -> Option<Arc<dyn CommitListener>> {
        Some(self as Arc<dyn CommitListener>)
    }
}

impl CommitListener for TableBackend {
    fn on_commit_start(&self, actions: &[Action]) {
        self.queue().push_back(Commit::from_actions(actions));
        self.stats.commits_created.fetch_add(1, Ordering::Relaxed);
    }

    fn on_commit_end(&self) {
        self.confirmed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Open the database, creating or rebuilding the schema when its version
/// does not match
fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version != SCHEMA_VERSION {
        if version != 0 {
            log::warn!(
                "{}: schema version {} replaced by {}, stored rows dropped",
                path.display(),
                version,
                SCHEMA_VERSION
            );
        }

        conn.execute_batch(&format!(
            "BEGIN;
             DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                 \"_id\" INTEGER PRIMARY KEY AUTOINCREMENT,
                 \"key\" TEXT NOT NULL UNIQUE,
                 \"value\" BLOB,
                 \"type\" INTEGER NOT NULL,
                 \"time\" INTEGER NOT NULL
             );
             CREATE UNIQUE INDEX {table}_key_idx ON {table} (\"key\");
             CREATE INDEX {table}_time_idx ON {table} (\"time\");
             COMMIT;",
            table = TABLE_NAME
        ))?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }

    Ok(conn)
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
