use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::action::Action;
use crate::preferences::Preferences;

/// Observes per-key changes. Called after the store lock is released.
pub trait ChangeListener: Send + Sync {
    fn on_changed(&self, prefs: &Preferences, key: &str);
}

/// Observes in-memory transactions. Both callbacks run while the store lock
/// is held: keep them short and never touch the same store from inside.
pub trait CommitListener: Send + Sync {
    /// Actions about to be applied, in order
    fn on_commit_start(&self, actions: &[Action]);

    /// All actions of the transaction were applied
    fn on_commit_end(&self);
}

/// Weakly held listener registrations
pub(crate) struct Listeners<T: ?Sized> {
    items: RwLock<Vec<Weak<T>>>,
}

impl<T: ?Sized> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, listener: Weak<T>) {
        let mut items = self.items.write();
        if !items.iter().any(|w| same(w, &listener)) {
            items.push(listener);
        }
    }

    pub(crate) fn unregister(&self, listener: &Weak<T>) {
        let mut items = self.items.write();
        items.retain(|w| !same(w, listener));
    }

    /// Live listeners; dropped registrations are pruned on the way
    pub(crate) fn live(&self) -> Vec<Arc<T>> {
        let (live, dead) = {
            let items = self.items.read();
            let live: Vec<Arc<T>> = items.iter().filter_map(Weak::upgrade).collect();
            let dead = live.len() != items.len();
            (live, dead)
        };

        if dead {
            let mut items = self.items.write();
            items.retain(|w| w.strong_count() > 0);
        }

        live
    }

    pub(crate) fn len(&self) -> usize {
        let items = self.items.read();
        items.iter().filter(|w| w.strong_count() > 0).count()
    }
}

fn same<T: ?Sized>(a: &Weak<T>, b: &Weak<T>) -> bool {
    a.as_ptr() as *const () == b.as_ptr() as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl CommitListener for Counter {
        fn on_commit_start(&self, _actions: &[Action]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn on_commit_end(&self) {}
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let listeners: Listeners<dyn CommitListener> = Listeners::new();
        let kept = Arc::new(Counter(AtomicUsize::new(0)));
        let dropped = Arc::new(Counter(AtomicUsize::new(0)));

        let kept_weak: Weak<dyn CommitListener> = Arc::downgrade(&kept) as Weak<dyn CommitListener>;
        let dropped_weak: Weak<dyn CommitListener> = Arc::downgrade(&dropped) as Weak<dyn CommitListener>;
        listeners.register(kept_weak.clone());
        listeners.register(kept_weak.clone());
        listeners.register(dropped_weak);
        assert_eq!(listeners.len(), 2);

        drop(dropped);
        assert_eq!(listeners.live().len(), 1);

        listeners.unregister(&kept_weak);
        assert!(listeners.live().is_empty());
    }
}
