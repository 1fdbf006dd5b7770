//! The store handle: one per invocation, built from resolved config.
//!
//! `Weave` owns the hot store connection, the storage layout and the
//! journal for a single repository. Every operation goes through it; there
//! is no process-wide state.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::context::{self, ContextPack};
use crate::error::{Error, Result};
use crate::git;
use crate::graph::{
    DeleteOutcome, Edge, EdgeType, GraphStore, NewNode, Node, NodeFilter, NodeUpdate, Status,
    UpdateOutcome,
};
use crate::hotzone::{self, HotLocation};
use crate::journal::{CleanReport, Journal, OpContext, Recovery};
use crate::lock::FileLock;
use crate::persistence::{
    self, EvictionReport, FlushReport, RestoreReport, StartupAction, StartupReport,
};
use crate::storage::Storage;
use crate::sync::{self, GitHubTracker, IssueTracker, PublishReport, SyncOptions, SyncReport, Throttled};

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

/// Summary of store health for `wv status`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub repo_root: PathBuf,
    pub namespace: String,
    pub hot: HotLocation,
    pub hot_db: PathBuf,
    pub hot_size: u64,
    pub hot_size_max: u64,
    pub startup: StartupAction,
    pub nodes: usize,
    pub edges: usize,
    pub by_status: BTreeMap<String, usize>,
    pub cached_packs: usize,
    pub incomplete_ops: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotInfo>,
    pub advisories: Vec<String>,
}

pub struct Weave {
    config: Config,
    storage: Storage,
    hot: HotLocation,
    store: GraphStore,
    journal: Journal,
    startup: StartupReport,
    size_checked: Cell<bool>,
}

impl Weave {
    /// Open the graph for the repository rooted at `repo_root`.
    pub fn open(repo_root: &Path, config: Config) -> Result<Self> {
        let hot = hotzone::resolve(&config.hot);
        let namespace = hotzone::namespace_for(repo_root)?;
        let storage = Storage::new(repo_root.to_path_buf(), hot.base.clone(), namespace);
        let (store, startup) = persistence::open_hot(&storage, &config)?;
        for warning in &startup.warnings {
            tracing::warn!("{warning}");
        }

        let mut weave = Self {
            journal: Journal::new(storage.clone()),
            config,
            storage,
            hot,
            store,
            startup,
            size_checked: Cell::new(false),
        };
        weave.check_size();
        Ok(weave)
    }

    /// Discover the repository from `start` (or the current directory),
    /// load its config and open the graph.
    pub fn discover(start: Option<&Path>) -> Result<Self> {
        let root = git::repo_root(start)?;
        let config = Config::resolve(&root)?;
        Self::open(&root, config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn startup(&self) -> &StartupReport {
        &self.startup
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    // =========================================================================
    // Graph
    // =========================================================================

    pub fn create_node(&mut self, input: NewNode) -> Result<Node> {
        self.store.create_node(input)
    }

    pub fn update_node(&mut self, reference: &str, update: NodeUpdate) -> Result<UpdateOutcome> {
        self.store.update_node(reference, update)
    }

    pub fn link_nodes(
        &mut self,
        source: &str,
        target: &str,
        edge_type: EdgeType,
        weight: Option<f64>,
        context_value: Option<Value>,
    ) -> Result<Edge> {
        self.store
            .link(source, target, edge_type, weight, context_value)
    }

    pub fn unlink_nodes(&mut self, source: &str, target: &str, edge_type: EdgeType) -> Result<()> {
        self.store.unlink(source, target, edge_type)
    }

    pub fn delete_node(&mut self, reference: &str, force: bool) -> Result<DeleteOutcome> {
        self.store.delete_node(reference, force)
    }

    pub fn get_node(&self, reference: &str) -> Result<Node> {
        self.store.get(reference)
    }

    pub fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>> {
        self.store.list(filter)
    }

    pub fn ready_nodes(&self) -> Result<Vec<Node>> {
        self.store.ready()
    }

    pub fn edges(&self, reference: &str) -> Result<Vec<Edge>> {
        self.store.edges_of(reference)
    }

    pub fn get_context(&self, reference: &str) -> Result<ContextPack> {
        context::get_context(&self.store, reference)
    }

    // =========================================================================
    // Journal
    // =========================================================================

    pub fn begin_op(&self, op_type: &str, args: Value) -> Result<OpContext> {
        self.journal.begin(op_type, args)
    }

    /// Reattach to `op_id`, or to the latest incomplete operation.
    pub fn resume_op(&self, op_id: Option<&str>) -> Result<OpContext> {
        match op_id {
            Some(op_id) => self.journal.resume(op_id),
            None => self
                .journal
                .current()?
                .ok_or_else(|| Error::NotFound("no operation in progress".to_string())),
        }
    }

    pub fn recover_op(&self) -> Result<Recovery> {
        self.journal.recover()
    }

    pub fn clean_journal(&self) -> Result<CleanReport> {
        self.journal.clean()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    pub fn flush_to_cold(&self, commit: bool) -> Result<FlushReport> {
        persistence::flush(&self.store, &self.storage, commit)
    }

    /// Replace the hot store with the cold snapshot.
    pub fn restore_from_cold(&mut self) -> Result<RestoreReport> {
        if !self.storage.snapshot_file().exists() {
            return Err(Error::NotFound(format!(
                "cold snapshot {}",
                self.storage.snapshot_file().display()
            )));
        }
        // Close the live connection before its file is replaced.
        let placeholder = GraphStore::open_in_memory(self.config.graph.clone())?;
        drop(std::mem::replace(&mut self.store, placeholder));

        let report = persistence::replay_snapshot(&self.storage);
        self.store = GraphStore::open(&self.storage.hot_db(), self.config.graph.clone())?;
        report
    }

    /// Run an eviction pass now, regardless of the per-invocation check.
    pub fn evict(&mut self) -> Result<EvictionReport> {
        persistence::evict(&mut self.store, &self.storage, &self.config, Utc::now())
    }

    fn check_size(&mut self) {
        match persistence::maybe_evict(
            &mut self.store,
            &self.storage,
            &self.config,
            &self.size_checked,
        ) {
            Ok(Some(report)) if !report.evicted.is_empty() => {
                tracing::info!(evicted = report.evicted.len(), "evicted done nodes from hot store");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "size check failed; continuing");
                self.startup
                    .warnings
                    .push(format!("hot store size check failed: {err}"));
            }
        }
    }

    // =========================================================================
    // External sync
    // =========================================================================

    /// Reconcile with the configured GitHub repository.
    pub fn sync_external(&mut self, options: &SyncOptions) -> Result<SyncReport> {
        let mut tracker = self.github()?;
        self.sync_external_with(&mut tracker, options)
    }

    /// Reconcile with any tracker. Holds the sync lock for the duration,
    /// which also defers eviction.
    pub fn sync_external_with<T: IssueTracker>(
        &mut self,
        tracker: &mut T,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        let lock_path = self.storage.sync_lock_file();
        let _guard = FileLock::try_acquire(&lock_path)?
            .ok_or_else(|| Error::LockFailed(lock_path.clone()))?;
        sync::reconcile(&mut self.store, tracker, options)
    }

    pub fn publish(&mut self, reference: &str) -> Result<PublishReport> {
        let mut tracker = self.github()?;
        self.publish_with(&mut tracker, reference)
    }

    pub fn publish_with<T: IssueTracker>(
        &mut self,
        tracker: &mut T,
        reference: &str,
    ) -> Result<PublishReport> {
        let lock_path = self.storage.sync_lock_file();
        let _guard = FileLock::try_acquire(&lock_path)?
            .ok_or_else(|| Error::LockFailed(lock_path.clone()))?;
        sync::publish(&mut self.store, tracker, reference)
    }

    fn github(&self) -> Result<Throttled<GitHubTracker>> {
        if !self.config.sync.enabled {
            return Err(Error::SyncDisabled);
        }
        let tracker = GitHubTracker::from_env(&self.config.sync)?;
        Ok(Throttled::new(
            tracker,
            Duration::from_millis(self.config.sync.rate_limit_ms),
        ))
    }

    // =========================================================================
    // Health
    // =========================================================================

    pub fn health(&self) -> Result<HealthReport> {
        let mut by_status = BTreeMap::new();
        for status in Status::ALL {
            by_status.insert(status.to_string(), self.store.count_by_status(status)?);
        }

        let mut advisories = Vec::new();
        let active = by_status.get(Status::Active.as_str()).copied().unwrap_or(0);
        if active > self.config.graph.max_active {
            advisories.push(format!(
                "{active} nodes are active (limit {})",
                self.config.graph.max_active
            ));
        }
        let contradictions = self.store.count_edges(EdgeType::Contradicts)?;
        if contradictions > 0 {
            advisories.push(format!(
                "{contradictions} contradicts edge(s) need resolution"
            ));
        }
        let incomplete_ops = match self.journal.recover()? {
            Recovery::Clean => 0,
            Recovery::Incomplete(info) => {
                advisories.push(format!(
                    "operation {} ({}) did not finish; run `wv op recover`",
                    info.op_id, info.op_type
                ));
                info.others + 1
            }
        };
        let hot_size = self.storage.hot_db_size()?;
        if hot_size > self.config.hot.size_max_bytes {
            advisories.push(format!(
                "hot store is {hot_size} bytes, over its {} byte cap",
                self.config.hot.size_max_bytes
            ));
        }
        advisories.extend(self.startup.warnings.iter().cloned());

        let snapshot_path = self.storage.snapshot_file();
        let snapshot = std::fs::metadata(&snapshot_path).ok().map(|meta| SnapshotInfo {
            path: snapshot_path.clone(),
            bytes: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        });
        if snapshot.is_none() && self.store.node_count()? > 0 {
            advisories.push("graph has never been flushed; run `wv flush`".to_string());
        }

        Ok(HealthReport {
            repo_root: self.storage.repo_root().to_path_buf(),
            namespace: self.storage.namespace().to_string(),
            hot: self.hot.clone(),
            hot_db: self.storage.hot_db(),
            hot_size,
            hot_size_max: self.config.hot.size_max_bytes,
            startup: self.startup.action,
            nodes: self.store.node_count()?,
            edges: self.store.edge_count()?,
            by_status,
            cached_packs: context::cached_count(self.store.conn())?,
            incomplete_ops,
            snapshot,
            advisories,
        })
    }
}
