use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::config::EnvConfig;
use crate::constants::WORKER_NAME_PREFIX;
use crate::error::{Error, Result};
use crate::queue::UniqueQueue;
use crate::stats::Statistics;

/// Unit of write-back work. Tasks with the same id are never queued twice.
pub(crate) trait SaveTask: Send + Sync {
    fn task_id(&self) -> u64;

    /// Perform one flush. `Err(Error::Reschedule)` asks for another run.
    fn save(&self) -> Result<()>;

    /// A save returned an error other than `Reschedule`. Runs before the
    /// retry backoff.
    fn failed(&self) {}

    /// The pool shut down before the task could run again
    fn abandon(&self) {}
}

/// Worker thread priority, picked from the backlog before each flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Priority {
    Min,
    Normal,
    Max,
}

impl Priority {
    /// Shallow queue favours foreground work; a backlog deeper than the pool
    /// gets the most CPU.
    pub(crate) fn suggest(depth: usize, workers: usize) -> Self {
        if depth > workers {
            Priority::Max
        } else if depth > workers / 2 {
            Priority::Normal
        } else {
            Priority::Min
        }
    }

    #[cfg(target_os = "linux")]
    fn apply(self) {
        let nice = match self {
            Priority::Min => 10,
            Priority::Normal => 0,
            Priority::Max => -5,
        };

        // Per-thread nice value; raising priority needs privileges, so failure is expected
        let rc = unsafe {
            let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
            libc::setpriority(libc::PRIO_PROCESS, tid, nice)
        };
        if rc != 0 {
            log::trace!(
                "cannot set {:?} priority: {}",
                self,
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn apply(self) {
        log::trace!("thread priority {:?} not supported on this platform", self);
    }
}

#[derive(Default)]
struct Workers {
    /// Live worker threads
    live: usize,
    /// Workers waiting for a task
    idle: usize,
    /// Index for the next thread name
    next_index: usize,
    handles: Vec<JoinHandle<()>>,
}

/// Bounded pool of save workers fed by a deduplicating queue.
///
/// Workers are spawned on demand up to `max_workers` and retire after
/// `idle_timeout` without work.
pub(crate) struct SavePool {
    queue: UniqueQueue,
    workers: Mutex<Workers>,
    max_workers: usize,
    idle_timeout: Duration,
    retry_backoff: Duration,
    shutdown: AtomicBool,
    /// Tasks currently executing
    running: AtomicUsize,
    stats: Arc<Statistics>,
}

impl SavePool {
    pub(crate) fn new(config: &EnvConfig, stats: Arc<Statistics>) -> Arc<Self> {
        Arc::new(Self {
            queue: UniqueQueue::new(),
            workers: Mutex::new(Workers::default()),
            max_workers: config.max_workers.max(1),
            idle_timeout: config.idle_timeout,
            retry_backoff: config.retry_backoff,
            shutdown: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            stats,
        })
    }

    fn workers(&self) -> MutexGuard<'_, Workers> {
        self.workers.lock()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a worker
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Tasks a worker is executing right now
    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Live worker threads
    pub(crate) fn live_workers(&self) -> usize {
        self.workers().live
    }

    /// Queue a flush. Returns false when an identical request was already
    /// waiting and this one was folded into it.
    pub(crate) fn submit(self: &Arc<Self>, task: Arc<dyn SaveTask>) -> Result<bool> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }

        if !self.queue.offer(task) {
            Statistics::bump(&self.stats.skipped_saves);
            return Ok(false);
        }
        Statistics::bump(&self.stats.queued_saves);

        self.ensure_worker();
        Ok(true)
    }

    fn ensure_worker(self: &Arc<Self>) {
        let mut workers = self.workers();
        if workers.idle > 0 || workers.live >= self.max_workers || self.is_shutdown() {
            return;
        }

        let index = workers.next_index;
        let pool = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}{}", WORKER_NAME_PREFIX, index))
            .spawn(move || pool.work());

        match spawned {
            Ok(handle) => {
                workers.next_index += 1;
                workers.live += 1;
                workers.idle += 1;
                workers.handles.retain(|h| !h.is_finished());
                workers.handles.push(handle);
                log::debug!("spawned save worker #{} ({} live)", index, workers.live);
            }
            Err(e) => log::error!("cannot spawn save worker: {}", e),
        }
    }

    fn work(self: Arc<Self>) {
        loop {
            if !self.is_shutdown() {
                if let Some(task) = self.queue.poll(self.idle_timeout) {
                    self.workers().idle -= 1;
                    self.running.fetch_add(1, Ordering::SeqCst);
                    self.execute(task);
                    self.running.fetch_sub(1, Ordering::SeqCst);
                    self.workers().idle += 1;
                    continue;
                }
            }

            // Retire under the lock, so a submit either sees us gone or we
            // see its task
            let mut workers = self.workers();
            if self.is_shutdown() || self.queue.is_empty() {
                workers.live -= 1;
                workers.idle -= 1;
                log::debug!("save worker retired ({} live)", workers.live);
                return;
            }
        }
    }

    fn execute(self: &Arc<Self>, task: Arc<dyn SaveTask>) {
        Priority::suggest(self.queue.len(), self.max_workers).apply();

        match task.save() {
            Ok(()) => Statistics::bump(&self.stats.done_saves),
            Err(e) if e.is_reschedule() => {
                Statistics::bump(&self.stats.rescheduled_saves);
                log::trace!("flush of task {} is stale, rescheduling", task.task_id());
                self.resubmit(task);
            }
            Err(e) => {
                Statistics::bump(&self.stats.failed_saves);
                log::error!("flush of task {} failed: {}", task.task_id(), e);
                task.failed();
                if !self.retry_backoff.is_zero() && !self.is_shutdown() {
                    thread::sleep(self.retry_backoff);
                }
                self.resubmit(task);
            }
        }
    }

    fn resubmit(self: &Arc<Self>, task: Arc<dyn SaveTask>) {
        if let Err(Error::Shutdown) = self.submit(task.clone()) {
            task.abandon();
        }
    }

    /// Stop accepting work, release blocked committers and join the workers.
    /// Tasks still queued are abandoned; callers flush what matters afterwards.
    pub(crate) fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        for task in self.queue.close() {
            task.abandon();
        }

        let handles: Vec<JoinHandle<()>> = self.workers().handles.drain(..).collect();
        let current: ThreadId = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("save worker panicked");
            }
        }
        log::debug!("save pool shut down");
    }
}
