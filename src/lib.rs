// src/lib.rs
mod action;
mod codec;
mod config;
mod constants;
mod env;
mod error;
mod listener;
mod persistence;
mod preferences;
mod queue;
mod scheduler;
mod snapshot;
mod stats;
mod store;
mod transaction;
mod value;

pub use action::{Action, ActionFactory, DefaultFactory};
pub use codec::{decode, encode, type_of, BinarySerializer, Serializer};
pub use config::EnvConfig;
pub use constants::ActionKind;
pub use env::Environment;
pub use error::{Error, Result};
pub use listener::{ChangeListener, CommitListener};
pub use persistence::{FileBackend, NullPersistence, Persistence, TableBackend};
pub use preferences::{copy, Preferences};
pub use snapshot::Snapshot;
pub use stats::{DbStat, Stat};
pub use transaction::Editor;
pub use value::{Entries, TypeTag, Value};

// Environment -> Store -> Snapshot, flushed by SavePool through a Persistence
