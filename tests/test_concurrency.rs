use lumoprefs::{
    Action, CommitListener, EnvConfig, Environment, Error, Entries, Persistence, Result, Snapshot,
};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Backend whose first flush blocks until the test opens the gate
#[derive(Default)]
struct Gated {
    flushes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gated {
    fn release(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    fn write(&self, snapshot: &Snapshot) -> Result<u64> {
        let version = snapshot.version();
        if self.flushes.fetch_add(1, Ordering::SeqCst) == 0 {
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
        }

        if snapshot.version() != version {
            return Err(Error::Reschedule);
        }
        Ok(version)
    }
}

impl Persistence for Gated {
    fn describe(&self) -> String {
        "gated".to_owned()
    }

    fn load(&self) -> Result<Entries> {
        Ok(Entries::new())
    }

    fn flush(&self, snapshot: &Snapshot) -> Result<u64> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let result = self.write(snapshot);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Backend that never manages to write
#[derive(Default)]
struct Broken {
    flushes: AtomicUsize,
}

impl Persistence for Broken {
    fn describe(&self) -> String {
        "broken".to_owned()
    }

    fn load(&self) -> Result<Entries> {
        Ok(Entries::new())
    }

    fn flush(&self, _snapshot: &Snapshot) -> Result<u64> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Err(Error::Io(io::Error::new(io::ErrorKind::Other, "device unplugged")))
    }
}

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    ended: AtomicUsize,
}

impl CommitListener for Counting {
    fn on_commit_start(&self, _actions: &[Action]) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_commit_end(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_burst_of_applies_flushes_at_most_twice() {
    let env = Environment::new(EnvConfig::default().max_workers(1));
    let gated = Arc::new(Gated::default());
    let backend = gated.clone();
    let prefs = env
        .open_with("gated:burst", move || Ok(backend as Arc<dyn Persistence>))
        .unwrap();

    prefs.edit().put_int("n", 0).apply();
    wait_until(|| gated.flushes.load(Ordering::SeqCst) == 1);

    let writers: Vec<_> = (1..=4)
        .map(|t| {
            let prefs = prefs.clone();
            thread::spawn(move || {
                for i in 0..5 {
                    prefs.edit().put_int("n", t * 10 + i).apply();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let latest = prefs.version();
    gated.release();
    wait_until(|| prefs.durable_version() >= latest);

    assert_eq!(prefs.durable_version(), latest);
    assert!(gated.flushes.load(Ordering::SeqCst) <= 2);
    assert!(env.stats().skipped_saves >= 19);
}

#[test]
fn test_version_counts_actions_across_threads() {
    let env = Environment::new(EnvConfig::default());
    let prefs = env.open_memory("counter").unwrap();
    let before = prefs.version();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let prefs = prefs.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    prefs
                        .edit()
                        .put_int(&format!("k{}", t), i)
                        .remove("absent")
                        .apply();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(prefs.version(), before + 200);
}

#[test]
fn test_commit_waits_for_durable_version() {
    let env = Environment::new(EnvConfig::default().max_workers(1));
    let gated = Arc::new(Gated::default());
    let backend = gated.clone();
    let prefs = env
        .open_with("gated:commit", move || Ok(backend as Arc<dyn Persistence>))
        .unwrap();

    let committer = {
        let prefs = prefs.clone();
        thread::spawn(move || prefs.edit().put_bool("done", true).commit())
    };

    wait_until(|| gated.flushes.load(Ordering::SeqCst) == 1);
    thread::sleep(Duration::from_millis(20));
    assert!(!committer.is_finished());
    assert!(prefs.has_unflushed_writes());

    gated.release();
    assert!(committer.join().unwrap());
    assert!(!prefs.has_unflushed_writes());
}

#[test]
fn test_commit_listeners_run_per_transaction() {
    let env = Environment::new(EnvConfig::default());
    let prefs = env.open_memory("hooks").unwrap();
    let counting = Arc::new(Counting::default());
    prefs.register_commit_listener(&counting);

    prefs.edit().put_int("a", 1).put_int("b", 2).apply();
    prefs.edit().commit();
    prefs.edit().remove("a").commit();

    assert_eq!(counting.started.load(Ordering::SeqCst), 2);
    assert_eq!(counting.ended.load(Ordering::SeqCst), 2);

    let stat = env.stats();
    assert_eq!(stat.applies, 1);
    assert_eq!(stat.commits, 2);
    assert_eq!(stat.memory_commits, 3);
}

#[test]
fn test_one_flush_per_store_with_many_workers() {
    let env = Environment::new(EnvConfig::default().max_workers(4));
    let gated = Arc::new(Gated::default());
    let backend = gated.clone();
    let prefs = env
        .open_with("gated:serial", move || Ok(backend as Arc<dyn Persistence>))
        .unwrap();

    prefs.edit().put_int("n", 1).apply();
    wait_until(|| gated.flushes.load(Ordering::SeqCst) == 1);

    // The first flush is still running; a second worker picks this one up
    prefs.edit().put_int("n", 2).apply();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(gated.flushes.load(Ordering::SeqCst), 1);

    let latest = prefs.version();
    gated.release();
    wait_until(|| prefs.durable_version() >= latest);

    assert_eq!(prefs.durable_version(), latest);
    assert_eq!(gated.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(!prefs.has_unflushed_writes());
}

#[test]
fn test_commit_returns_when_backend_keeps_failing() {
    let config = EnvConfig::default()
        .max_workers(2)
        .retry_backoff(Duration::from_millis(10));
    let env = Environment::new(config);
    let broken = Arc::new(Broken::default());
    let backend = broken.clone();
    let prefs = env
        .open_with("broken:commit", move || Ok(backend as Arc<dyn Persistence>))
        .unwrap();

    let committer = {
        let prefs = prefs.clone();
        thread::spawn(move || prefs.edit().put_int("lost", 1).commit())
    };
    wait_until(|| committer.is_finished());

    assert!(committer.is_finished());
    assert!(committer.join().unwrap());
    assert_eq!(prefs.get_int("lost", 0), 1);
    assert!(prefs.has_unflushed_writes());
    assert!(broken.flushes.load(Ordering::SeqCst) >= 1);
    assert!(env.stats().failed_saves >= 1);
}
