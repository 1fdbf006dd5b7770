//! Tiered persistence: the hot SQLite store and the cold SQL snapshot.
//!
//! Startup reconciles the two:
//! - hot store present → use it (warn if it looks silently reset)
//! - hot absent, snapshot present → replay the snapshot
//! - hot absent, no snapshot, legacy global store present → copy it in
//! - nothing anywhere → fresh store
//!
//! Flushing is explicit. Nothing here writes the snapshot behind the
//! caller's back.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::config::Config;
use crate::context;
use crate::error::{Error, Result};
use crate::git;
use crate::graph::model::{Edge, Node};
use crate::graph::schema;
use crate::graph::store::{self, GraphStore};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_RETRY_ATTEMPTS};
use crate::snapshot;
use crate::storage::Storage;

/// What startup did to obtain a hot store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupAction {
    UsedExisting,
    Restored,
    Initialized,
    MigratedLegacy,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub action: StartupAction,
    pub hot_db: PathBuf,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlushReport {
    pub path: PathBuf,
    pub nodes: usize,
    pub edges: usize,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub path: PathBuf,
    pub nodes: usize,
    pub edges: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvictionReport {
    pub size_before: u64,
    pub size_after: u64,
    pub evicted: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    /// Why no eviction pass ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

/// One archived node, as written to `.weave/archive/<date>.jsonl`
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ArchivedNode {
    pub node: Node,
    pub edges: Vec<Edge>,
    pub evicted_at: DateTime<Utc>,
}

/// Open the hot store, reconciling it against cold state first.
pub fn open_hot(storage: &Storage, config: &Config) -> Result<(GraphStore, StartupReport)> {
    storage.init_hot()?;
    let hot_db = storage.hot_db();
    let _guard = FileLock::acquire(lock::lock_path_for(&hot_db), DEFAULT_LOCK_TIMEOUT_MS)?;

    let mut warnings = Vec::new();
    let present = fs::metadata(&hot_db).map(|m| m.len() > 0).unwrap_or(false);

    let action = if present {
        StartupAction::UsedExisting
    } else {
        remove_db_files(&hot_db)?;
        let snapshot_file = storage.snapshot_file();
        let legacy = storage.legacy_db();
        if snapshot_file.exists() {
            replay_snapshot(storage)?;
            StartupAction::Restored
        } else if legacy.exists() && legacy != hot_db {
            migrate_legacy(&legacy, &hot_db)?;
            warnings.push(format!(
                "copied legacy store {} into {}; the legacy file was left in place",
                legacy.display(),
                hot_db.display()
            ));
            StartupAction::MigratedLegacy
        } else {
            StartupAction::Initialized
        }
    };

    let store = GraphStore::open(&hot_db, config.graph.clone())?;

    match action {
        StartupAction::UsedExisting => {
            if let Some(warning) = silent_reset_warning(&store, storage)? {
                warnings.push(warning);
            }
        }
        StartupAction::MigratedLegacy => {
            context::clear_all(store.conn())?;
        }
        StartupAction::Restored | StartupAction::Initialized => {}
    }

    tracing::info!(action = ?action, hot_db = %hot_db.display(), "hot store ready");
    Ok((
        store,
        StartupReport {
            action,
            hot_db,
            warnings,
        },
    ))
}

/// Serialize the hot store to the cold snapshot, optionally committing it.
pub fn flush(store: &GraphStore, storage: &Storage, commit: bool) -> Result<FlushReport> {
    storage.init_cold()?;
    let sql = snapshot::dump(store.conn())?;
    let path = storage.snapshot_file();
    lock::with_retry(DEFAULT_RETRY_ATTEMPTS, || {
        lock::write_atomic_locked(&path, sql.as_bytes(), DEFAULT_LOCK_TIMEOUT_MS)
    })?;

    let nodes = store.node_count()?;
    let edges = store.edge_count()?;
    let commit = if commit {
        let repo = git::discover_repo(Some(storage.repo_root()))?;
        let workdir = git::workdir(&repo)?;
        let relative = path
            .strip_prefix(&workdir)
            .or_else(|_| path.strip_prefix(storage.repo_root()))
            .map_err(|_| {
                Error::OperationFailed(format!(
                    "snapshot {} is outside the repository",
                    path.display()
                ))
            })?
            .to_path_buf();
        let message = format!("weave: snapshot ({nodes} nodes, {edges} edges)");
        git::commit_paths(&repo, &[relative.as_path()], &message)?.map(|oid| oid.to_string())
    } else {
        None
    };

    tracing::info!(nodes, edges, bytes = sql.len(), "flushed graph to cold snapshot");
    Ok(FlushReport {
        path,
        nodes,
        edges,
        bytes: sql.len(),
        commit,
    })
}

/// Rebuild the hot database file from the cold snapshot.
///
/// The caller must have closed every connection to the hot database.
pub fn replay_snapshot(storage: &Storage) -> Result<RestoreReport> {
    let path = storage.snapshot_file();
    if !path.exists() {
        return Err(Error::NotFound(format!("cold snapshot {}", path.display())));
    }
    let sql = fs::read_to_string(&path)?;
    storage.init_hot()?;

    let staged = tempfile::Builder::new()
        .prefix(".restore-")
        .suffix(".db")
        .tempfile_in(storage.hot_dir())?;
    let (nodes, edges) = {
        let mut conn = Connection::open(staged.path())?;
        snapshot::load(&conn, &sql)?;
        schema::migrate(&mut conn)?;
        context::clear_all(&conn)?;
        let nodes: usize = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        let edges: usize = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
        (nodes, edges)
    };

    let hot_db = storage.hot_db();
    remove_db_files(&hot_db)?;
    staged.persist(&hot_db).map_err(|err| Error::Io(err.error))?;

    tracing::info!(nodes, edges, "restored hot store from snapshot");
    Ok(RestoreReport { path, nodes, edges })
}

/// Run eviction at most once per handle and once per check interval.
pub fn maybe_evict(
    store: &mut GraphStore,
    storage: &Storage,
    config: &Config,
    checked: &Cell<bool>,
) -> Result<Option<EvictionReport>> {
    if checked.replace(true) {
        return Ok(None);
    }
    let stamp = storage.size_stamp_file();
    let interval = Duration::from_secs(config.hot.check_interval_secs);
    if let Ok(modified) = fs::metadata(&stamp).and_then(|m| m.modified()) {
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age < interval {
            return Ok(None);
        }
    }
    let report = evict(store, storage, config, Utc::now())?;
    lock::write_atomic(&stamp, Utc::now().to_rfc3339().as_bytes())?;
    Ok(Some(report))
}

/// Evict `done` nodes past the grace window if the hot store is over its
/// size cap. Archives each node with its edges before deleting it.
pub fn evict(
    store: &mut GraphStore,
    storage: &Storage,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<EvictionReport> {
    let size_before = storage.hot_db_size()?;
    let mut report = EvictionReport {
        size_before,
        size_after: size_before,
        ..EvictionReport::default()
    };

    if size_before <= config.hot.size_max_bytes {
        report.skipped = Some("under size cap".to_string());
        return Ok(report);
    }
    if FileLock::is_held(storage.sync_lock_file())? {
        tracing::info!("external sync in progress; eviction deferred");
        report.skipped = Some("external sync in progress".to_string());
        return Ok(report);
    }

    let cutoff = now - chrono::Duration::days(i64::from(config.eviction.grace_days));
    let candidates = store.done_before(cutoff)?;
    tracing::info!(
        size = size_before,
        cap = config.hot.size_max_bytes,
        candidates = candidates.len(),
        "hot store over size cap; evicting"
    );

    if !candidates.is_empty() {
        storage.init_cold()?;
        let archive = storage.archive_file(&now.format("%Y-%m-%d").to_string());
        for node in &candidates {
            let record = ArchivedNode {
                edges: store::edges_touching(store.conn(), &node.id)?,
                node: node.clone(),
                evicted_at: now,
            };
            storage.append_jsonl(&archive, &record)?;
        }
        let ids: Vec<String> = candidates.iter().map(|node| node.id.clone()).collect();
        store.purge(&ids)?;
        report.evicted = ids;
        report.archive = Some(archive);
    }

    context::clear_all(store.conn())?;
    store
        .conn()
        .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
    store.conn().execute("VACUUM", [])?;

    report.size_after = storage.hot_db_size()?;
    if report.size_after > config.hot.size_max_bytes {
        tracing::warn!(
            size = report.size_after,
            cap = config.hot.size_max_bytes,
            "hot store still over size cap after eviction"
        );
    }
    Ok(report)
}

fn silent_reset_warning(store: &GraphStore, storage: &Storage) -> Result<Option<String>> {
    if store.node_count()? > 0 {
        return Ok(None);
    }
    let snapshot_file = storage.snapshot_file();
    if !snapshot_file.exists() {
        return Ok(None);
    }
    let sql = fs::read_to_string(&snapshot_file)?;
    if !snapshot::has_nodes(&sql) {
        return Ok(None);
    }
    let rows = snapshot::node_rows(&sql);
    tracing::warn!(snapshot_nodes = rows, "hot store is empty but the cold snapshot is not");
    Ok(Some(format!(
        "hot store is empty while {} holds {rows} node(s); run restore if this is unexpected",
        snapshot_file.display()
    )))
}

fn migrate_legacy(legacy: &Path, hot_db: &Path) -> Result<()> {
    let conn = Connection::open(legacy)?;
    let target = hot_db.to_string_lossy().into_owned();
    conn.execute("VACUUM INTO ?1", [target])?;
    tracing::info!(legacy = %legacy.display(), hot_db = %hot_db.display(), "migrated legacy hot store");
    Ok(())
}

fn remove_db_files(db: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let path = PathBuf::from(format!("{}{suffix}", db.display()));
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::Io(err)),
        }
    }
    Ok(())
}
