use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::Mmap;

use crate::codec::{BinarySerializer, Serializer};
use crate::constants::{BACKUP_SUFFIX, DEFAULT_WRITE_BUFFER, TEMP_SUFFIX};
use crate::error::{Error, Result};
use crate::persistence::{validate_name, Persistence};
use crate::snapshot::Snapshot;
use crate::value::Entries;

/// One file per store, replaced atomically on every flush.
///
/// The previous generation is kept as `<name>.bak`. Writes go to a uniquely
/// named temporary file first, so a crash leaves either the old or the new
/// file in place, never a torn one.
pub struct FileBackend {
    /// Canonical persisted file
    file: PathBuf,
    /// Previous generation
    backup: PathBuf,
    serializer: Arc<dyn Serializer>,
    buffer_size: usize,
    /// Disambiguates temp files created within the same clock tick
    temp_counter: AtomicU64,
}

impl FileBackend {
    /// Backend storing `name` inside `dir` with the default serializer
    pub fn new(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        Self::with_serializer(dir, name, Arc::new(BinarySerializer))
    }

    pub fn with_serializer(
        dir: impl AsRef<Path>,
        name: &str,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self> {
        validate_name(name)?;

        let file = dir.as_ref().join(name);
        let backup = dir.as_ref().join(format!("{}{}", name, BACKUP_SUFFIX));

        Ok(Self {
            file,
            backup,
            serializer,
            buffer_size: DEFAULT_WRITE_BUFFER,
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Buffer size used when writing the temporary file
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Canonical persisted file
    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Backup file of the previous generation
    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    fn temp_path(&self) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let counter = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let name = self
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.file
            .with_file_name(format!("{}-{}-{}{}", nanos, counter, name, TEMP_SUFFIX))
    }

    fn write_temp(&self, temp: &Path, data: &[u8]) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp)?;

        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        writer.write_all(data)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    /// Rotate the generations. Zero bytes means there is nothing to persist:
    /// the current file still moves to the backup but no new file appears.
    fn persist(&self, temp: &Path, data: &[u8]) -> Result<()> {
        if !data.is_empty() {
            self.write_temp(temp, data)?;
        }

        remove_if_exists(&self.backup)?;

        if self.file.exists() {
            fs::rename(&self.file, &self.backup)?;
        }

        if !data.is_empty() {
            fs::rename(temp, &self.file)?;
        }

        Ok(())
    }
}

impl Persistence for FileBackend {
    fn describe(&self) -> String {
        self.file.display().to_string()
    }

    fn load(&self) -> Result<Entries> {
        let file = match File::open(&self.file) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e.into()),
        };

        if file.metadata()?.len() == 0 {
            return Ok(Entries::new());
        }

        // Files are only ever replaced by rename, never rewritten in place
        let map = unsafe { Mmap::map(&file)? };
        self.serializer.deserialize(&map)
    }

    fn flush(&self, snapshot: &Snapshot) -> Result<u64> {
        let (version, entries) = snapshot.capture();
        let data = self.serializer.serialize(&entries)?;
        drop(entries);

        if snapshot.version() != version {
            return Err(Error::Reschedule);
        }

        let temp = self.temp_path();
        let result = self.persist(&temp, &data);

        if let Err(e) = remove_if_exists(&temp) {
            log::warn!("cannot remove {}: {}", temp.display(), e);
        }

        result?;
        log::trace!(
            "flushed version {} to {} ({} bytes)",
            version,
            self.file.display(),
            data.len()
        );
        Ok(version)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tempfile::TempDir;

    /// Serializer that mutates the store while it runs
    struct Meddler {
        snapshot: Arc<Snapshot>,
    }

    impl Serializer for Meddler {
        fn serialize(&self, data: &Entries) -> Result<Vec<u8>> {
            let bytes = BinarySerializer.serialize(data)?;
            let mut inner = self.snapshot.lock();
            inner.objects.insert("late".into(), Value::Bool(true));
            self.snapshot.advance(&mut inner, 1);
            Ok(bytes)
        }

        fn deserialize(&self, data: &[u8]) -> Result<Entries> {
            BinarySerializer.deserialize(data)
        }
    }

    fn snapshot_with(key: &str, value: Value) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot::new());
        let mut inner = snapshot.lock();
        inner.objects.insert(key.into(), value);
        snapshot.advance(&mut inner, 1);
        drop(inner);
        snapshot
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = TempDir::new().unwrap();
        for name in ["", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(
                FileBackend::new(dir.path(), name),
                Err(Error::InvalidName(_))
            ));
        }
    }

    #[test]
    fn test_stale_flush_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let snapshot = snapshot_with("a", Value::Int(1));
        let backend = FileBackend::with_serializer(
            dir.path(),
            "stale",
            Arc::new(Meddler {
                snapshot: snapshot.clone(),
            }),
        )
        .unwrap();

        assert!(matches!(backend.flush(&snapshot), Err(Error::Reschedule)));
        assert!(!backend.path().exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_flush_then_load() {
        let dir = TempDir::new().unwrap();
        let snapshot = snapshot_with("name", Value::from("lumo"));
        let backend = FileBackend::new(dir.path(), "roundtrip").unwrap();

        assert_eq!(backend.flush(&snapshot).unwrap(), 1);
        let loaded = backend.load().unwrap();
        assert_eq!(loaded.get("name"), Some(&Value::from("lumo")));
    }

    #[test]
    fn test_missing_or_empty_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path(), "nothing").unwrap();
        assert!(backend.load().unwrap().is_empty());

        File::create(backend.path()).unwrap();
        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn test_empty_snapshot_leaves_only_backup() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path(), "cleared").unwrap();
        backend.flush(&snapshot_with("k", Value::Long(5))).unwrap();

        let empty = Snapshot::new();
        backend.flush(&empty).unwrap();

        assert!(!backend.path().exists());
        assert!(backend.backup_path().exists());
        assert!(backend.load().unwrap().is_empty());
    }
}
