use bitflags::bitflags;
use lazy_static::lazy_static;
use std::time::Duration;

// Action kinds produced by an editor
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ActionKind: u32 {
        const PUT = 0x01;
        const REMOVE = 0x02;
        const CLEAR = 0x04;
    }
}

lazy_static! {
    /// Number of CPUs on board, upper bound for the save worker pool
    pub static ref CPU_COUNT: usize = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
}

/// Default write buffer size for persisted files
pub const DEFAULT_WRITE_BUFFER: usize = 32 * 1024;
/// Idle save workers retire after this long
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Pause before a failed flush is resubmitted
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);
/// Flush attempts per store during shutdown
pub const DEFAULT_FINAL_FLUSH_ATTEMPTS: usize = 3;
/// Default directory for persisted stores
pub const DEFAULT_DIR: &str = "./shared_prefs";

/// Prefix of the worker thread names
pub const WORKER_NAME_PREFIX: &str = "prefs-save-";

/// Marker written in place of a string that is stored as chunks
pub const CHUNKS_IN_USE: &str = "--several-chunks-of-the-string--";
/// Longest string (UTF-8 bytes) stored in a single length-prefixed slot
pub const CHUNK_MAX_SIZE: usize = 0xffff;
/// Chunk size (UTF-8 bytes) for oversized strings
pub const CHUNK_SLICE_SIZE: usize = 0x8000;

/// Magic prefix of files written by the binary serializer
pub const FILE_MAGIC: &[u8; 4] = b"UPRF";
/// Binary serializer format version
pub const FILE_FORMAT_VERSION: u8 = 1;

/// Suffix of the rotating backup file
pub const BACKUP_SUFFIX: &str = ".bak";
/// Suffix of in-flight temporary files
pub const TEMP_SUFFIX: &str = ".temp";
/// Suffix of table backend database files
pub const DATABASE_SUFFIX: &str = ".s3db";

/// Expected table schema version
pub const SCHEMA_VERSION: i32 = 1;
/// Table holding the rows of a store
pub const TABLE_NAME: &str = "preferences";
