use std::sync::atomic::{AtomicU64, Ordering};

/// Write-back and commit counters shared by every store of an environment
#[derive(Debug, Default)]
pub(crate) struct Statistics {
    pub(crate) done_saves: AtomicU64,
    pub(crate) rescheduled_saves: AtomicU64,
    pub(crate) failed_saves: AtomicU64,
    pub(crate) skipped_saves: AtomicU64,
    pub(crate) queued_saves: AtomicU64,
    pub(crate) memory_commits: AtomicU64,
    pub(crate) applies: AtomicU64,
    pub(crate) commits: AtomicU64,
}

/// Point-in-time copy of [`Statistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    /// Flushes that reached durable storage
    pub done_saves: u64,
    /// Flushes abandoned because the snapshot moved on
    pub rescheduled_saves: u64,
    /// Flushes that hit an I/O or database failure
    pub failed_saves: u64,
    /// Flush requests dropped because one was already queued
    pub skipped_saves: u64,
    /// Flush requests accepted into the queue
    pub queued_saves: u64,
    /// In-memory transactions attempted
    pub memory_commits: u64,
    /// `apply()` calls
    pub applies: u64,
    /// `commit()` calls
    pub commits: u64,
}

impl Statistics {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Stat {
        Stat {
            done_saves: self.done_saves.load(Ordering::Relaxed),
            rescheduled_saves: self.rescheduled_saves.load(Ordering::Relaxed),
            failed_saves: self.failed_saves.load(Ordering::Relaxed),
            skipped_saves: self.skipped_saves.load(Ordering::Relaxed),
            queued_saves: self.queued_saves.load(Ordering::Relaxed),
            memory_commits: self.memory_commits.load(Ordering::Relaxed),
            applies: self.applies.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }
}

/// Table backend counters
#[derive(Debug, Default)]
pub(crate) struct DbStatistics {
    pub(crate) commits_created: AtomicU64,
    pub(crate) db_updates: AtomicU64,
    pub(crate) flushes: AtomicU64,
}

/// Point-in-time copy of [`DbStatistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbStat {
    pub commits_created: u64,
    pub db_updates: u64,
    pub flushes: u64,
}

impl DbStatistics {
    pub(crate) fn snapshot(&self) -> DbStat {
        DbStat {
            commits_created: self.commits_created.load(Ordering::Relaxed),
            db_updates: self.db_updates.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}
