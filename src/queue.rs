use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::scheduler::SaveTask;

#[derive(Default)]
struct QueueState {
    /// Tasks in arrival order
    items: VecDeque<Arc<dyn SaveTask>>,
    /// Ids of the queued tasks
    lookup: HashSet<u64>,
    /// No more waiting once closed
    closed: bool,
}

/// Work queue that holds at most one task per id.
///
/// A task leaves the lookup set when it is taken, so a request arriving while
/// the task runs is queued again and observes the newer state.
pub(crate) struct UniqueQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl UniqueQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    /// Queue the task unless one with the same id is already waiting.
    /// Returns false when the request was folded into the queued one.
    pub(crate) fn offer(&self, task: Arc<dyn SaveTask>) -> bool {
        let mut state = self.lock();
        if !state.lookup.insert(task.task_id()) {
            return false;
        }
        state.items.push_back(task);
        self.available.notify_one();
        true
    }

    /// Take the oldest task, waiting up to `timeout`
    pub(crate) fn poll(&self, timeout: Duration) -> Option<Arc<dyn SaveTask>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if let Some(task) = state.items.pop_front() {
                state.lookup.remove(&task.task_id());
                return Some(task);
            }
            if state.closed {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.available.wait_for(&mut state, deadline - now);
        }
    }

    /// Stop waiting pollers and hand back whatever was still queued
    pub(crate) fn close(&self) -> Vec<Arc<dyn SaveTask>> {
        let mut state = self.lock();
        state.closed = true;
        state.lookup.clear();
        let rest = state.items.drain(..).collect();
        self.available.notify_all();
        rest
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use std::thread;

    struct Task(u64);

    impl SaveTask for Task {
        fn task_id(&self) -> u64 {
            self.0
        }

        fn save(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_second_offer_for_same_id_is_dropped() {
        let queue = UniqueQueue::new();
        assert!(queue.offer(Arc::new(Task(1))));
        assert!(!queue.offer(Arc::new(Task(1))));
        assert!(queue.offer(Arc::new(Task(2))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_taken_task_can_be_queued_again() {
        let queue = UniqueQueue::new();
        queue.offer(Arc::new(Task(7)));

        let task = queue.poll(Duration::from_millis(10)).unwrap();
        assert_eq!(task.task_id(), 7);
        assert!(queue.is_empty());
        assert!(queue.offer(Arc::new(Task(7))));
    }

    #[test]
    fn test_poll_times_out() {
        let queue = UniqueQueue::new();
        let start = Instant::now();
        assert!(queue.poll(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_close_wakes_pollers() {
        let queue = Arc::new(UniqueQueue::new());
        let poller = {
            let queue = queue.clone();
            thread::spawn(move || queue.poll(Duration::from_secs(30)).is_none())
        };

        thread::sleep(Duration::from_millis(20));
        queue.offer(Arc::new(Task(3)));
        let rest = queue.close();
        // Either the poller took the task or close returned it
        let taken = !poller.join().unwrap();
        assert_eq!(rest.len() + usize::from(taken), 1);
    }
}
