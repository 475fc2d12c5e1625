use std::sync::Arc;

use crate::error::{Error, Result};
use crate::listener::CommitListener;
use crate::snapshot::Snapshot;
use crate::value::Entries;

mod file;
mod memory;
mod table;

pub use file::FileBackend;
pub use memory::NullPersistence;
pub use table::TableBackend;

/// Durable home of a store.
///
/// `flush` runs on a save worker. It must prove that what it wrote matches the
/// snapshot's current version and return that version, or fail with
/// [`Error::Reschedule`](crate::Error::Reschedule) when the snapshot moved on
/// while it was working.
pub trait Persistence: Send + Sync {
    /// Human readable location, used in logs and dumps
    fn describe(&self) -> String;

    /// Read the whole store. Called once when the store is first opened.
    fn load(&self) -> Result<Entries>;

    /// Read what changed since the last read
    fn reload(&self) -> Result<Entries> {
        self.load()
    }

    /// Write the snapshot out and return the version made durable
    fn flush(&self, snapshot: &Snapshot) -> Result<u64>;

    /// Hook observing every in-memory transaction of the store
    fn commit_listener(self: Arc<Self>) -> Option<Arc<dyn CommitListener>> {
        None
    }
}

/// Store names map straight to file names inside the store directory
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');

    if bad {
        return Err(Error::InvalidName(name.to_owned()));
    }
    Ok(())
}
