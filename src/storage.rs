//! Storage layout for weave
//!
//! Manages persistent state in two locations:
//! - `.weave/` - Cold state, committed with the repository
//! - `<hot>/weave-<ns>/` - Hot state on a fast, possibly volatile volume
//!
//! # Directory Structure
//!
//! ```text
//! .weave/                       # Cold (tracked)
//!   state.sql                   # Replayable snapshot of the graph
//!   journal.jsonl               # Operation journal
//!   archive/                    # Evicted nodes
//!     <YYYY-MM-DD>.jsonl
//!
//! <hot base>/
//!   weave.db                    # Legacy global store (pre-namespacing)
//!   weave-<ns>/                 # Namespaced per repository
//!     weave.db                  # Live graph (SQLite, WAL)
//!     size.stamp                # Last eviction size check
//!     sync.lock                 # Held while reconciling with the tracker
//! ```

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::lock;

/// Name of the cold directory at the repository root
pub const COLD_DIR: &str = ".weave";

/// Database file name inside a hot directory
pub const DB_FILE: &str = "weave.db";

/// Prefix for namespaced hot directories
pub const HOT_DIR_PREFIX: &str = "weave-";

/// Storage layout for one repository
#[derive(Debug, Clone)]
pub struct Storage {
    /// Path to the repository root
    repo_root: PathBuf,
    /// Hot base directory (shared by all repositories on this machine)
    hot_base: PathBuf,
    /// Namespace hash for this repository
    namespace: String,
}

impl Storage {
    pub fn new(repo_root: PathBuf, hot_base: PathBuf, namespace: impl Into<String>) -> Self {
        Self {
            repo_root,
            hot_base,
            namespace: namespace.into(),
        }
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn hot_base(&self) -> &Path {
        &self.hot_base
    }

    /// Path to the cold `.weave/` directory
    pub fn cold_dir(&self) -> PathBuf {
        self.repo_root.join(COLD_DIR)
    }

    /// Path to the textual snapshot
    pub fn snapshot_file(&self) -> PathBuf {
        self.cold_dir().join("state.sql")
    }

    /// Path to the operation journal (JSONL)
    pub fn journal_file(&self) -> PathBuf {
        self.cold_dir().join("journal.jsonl")
    }

    /// Path to the eviction archive directory
    pub fn archive_dir(&self) -> PathBuf {
        self.cold_dir().join("archive")
    }

    /// Archive file for a given eviction date (`YYYY-MM-DD`)
    pub fn archive_file(&self, date: &str) -> PathBuf {
        self.archive_dir().join(format!("{date}.jsonl"))
    }

    /// Namespaced hot directory for this repository
    pub fn hot_dir(&self) -> PathBuf {
        self.hot_base
            .join(format!("{HOT_DIR_PREFIX}{}", self.namespace))
    }

    /// Path to the hot database
    pub fn hot_db(&self) -> PathBuf {
        self.hot_dir().join(DB_FILE)
    }

    /// Path to the pre-namespacing global database
    pub fn legacy_db(&self) -> PathBuf {
        self.hot_base.join(DB_FILE)
    }

    /// Stamp touched after each eviction size check
    pub fn size_stamp_file(&self) -> PathBuf {
        self.hot_dir().join("size.stamp")
    }

    /// Lock held while an external sync is in progress
    pub fn sync_lock_file(&self) -> PathBuf {
        self.hot_dir().join("sync.lock")
    }

    /// Total bytes of the hot database including its WAL side files
    pub fn hot_db_size(&self) -> Result<u64> {
        let db = self.hot_db();
        let mut total = 0;
        for suffix in ["", "-wal", "-shm"] {
            let path = PathBuf::from(format!("{}{suffix}", db.display()));
            match fs::metadata(&path) {
                Ok(meta) => total += meta.len(),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(Error::Io(err)),
            }
        }
        Ok(total)
    }

    // =========================================================================
    // Directory initialization
    // =========================================================================

    /// Create `.weave/` with a `.gitignore` that keeps lock files out of
    /// commits.
    pub fn init_cold(&self) -> Result<()> {
        fs::create_dir_all(self.cold_dir())?;
        let ignore = self.cold_dir().join(".gitignore");
        if !ignore.exists() {
            lock::write_atomic(&ignore, b"*.lock\n*.tmp.*\n")?;
        }
        Ok(())
    }

    pub fn init_hot(&self) -> Result<()> {
        fs::create_dir_all(self.hot_dir())?;
        Ok(())
    }

    // =========================================================================
    // File I/O helpers
    // =========================================================================

    /// Append a record to a JSONL file as a single line write
    pub fn append_jsonl<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)?;
        lock::append_line(path, &json)
    }

    /// Read all records from a JSONL file
    pub fn read_jsonl<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: T = serde_json::from_str(&line)?;
            records.push(record);
        }

        Ok(records)
    }

    /// Read records, skipping lines that do not parse (a torn final
    /// append after a crash). Returns the records and the skipped count.
    pub fn read_jsonl_lenient<T: DeserializeOwned>(&self, path: &Path) -> Result<(Vec<T>, usize)> {
        if !path.exists() {
            return Ok((Vec::new(), 0));
        }

        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        let mut skipped = 0;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(path = %path.display(), line = index + 1, error = %err, "skipping unreadable record");
                    skipped += 1;
                }
            }
        }
        Ok((records, skipped))
    }

    /// Rewrite a JSONL file atomically with the given records
    pub fn write_jsonl<T: Serialize>(&self, path: &Path, records: &[T]) -> Result<()> {
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        lock::write_atomic(path, out.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        n: u32,
    }

    fn storage(temp: &TempDir) -> Storage {
        Storage::new(
            temp.path().join("repo"),
            temp.path().join("hot"),
            "abc123def456",
        )
    }

    #[test]
    fn paths_are_namespaced() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        assert_eq!(
            storage.hot_db(),
            temp.path().join("hot").join("weave-abc123def456").join("weave.db")
        );
        assert_eq!(storage.legacy_db(), temp.path().join("hot").join("weave.db"));
        assert_eq!(
            storage.archive_file("2024-05-01"),
            temp.path()
                .join("repo")
                .join(".weave")
                .join("archive")
                .join("2024-05-01.jsonl")
        );
    }

    #[test]
    fn jsonl_append_and_rewrite() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let path = storage.journal_file();

        storage.append_jsonl(&path, &Row { n: 1 }).unwrap();
        storage.append_jsonl(&path, &Row { n: 2 }).unwrap();
        let rows: Vec<Row> = storage.read_jsonl(&path).unwrap();
        assert_eq!(rows, vec![Row { n: 1 }, Row { n: 2 }]);

        storage.write_jsonl(&path, &[Row { n: 3 }]).unwrap();
        let rows: Vec<Row> = storage.read_jsonl(&path).unwrap();
        assert_eq!(rows, vec![Row { n: 3 }]);
    }

    #[test]
    fn hot_size_sums_side_files() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        storage.init_hot().unwrap();
        assert_eq!(storage.hot_db_size().unwrap(), 0);

        fs::write(storage.hot_db(), vec![0u8; 10]).unwrap();
        fs::write(format!("{}-wal", storage.hot_db().display()), vec![0u8; 5]).unwrap();
        assert_eq!(storage.hot_db_size().unwrap(), 15);
    }
}
