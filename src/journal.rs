//! Operation journal for crash-recoverable multi-step operations.
//!
//! Records are appended to `.weave/journal.jsonl`, one JSON object per
//! line, under the journal lock. Recovery folds the records by `op_id`
//! ([`reduce`]) and reports the oldest operation that began but never
//! ended. The journal only carries resumption hints; graph state lives in
//! the store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_RETRY_ATTEMPTS};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    Begin,
    Step,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Done,
}

/// One journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub event: JournalEvent,
    /// Operation type
    pub op: String,
    pub op_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    pub ts: DateTime<Utc>,
}

/// Folded state of one operation
#[derive(Debug, Clone, PartialEq)]
pub struct OpState {
    pub op_id: String,
    pub op_type: String,
    pub args: Value,
    pub started_at: Option<DateTime<Utc>>,
    /// Position of the `begin` record in the journal
    pub begin_index: Option<usize>,
    pub ended: bool,
    pub completed: BTreeSet<u32>,
    /// Step actions by number, from their pending records
    pub actions: BTreeMap<u32, String>,
    /// Last step recorded pending and never completed
    pub pending: Option<u32>,
}

impl OpState {
    fn new(op_id: &str, op_type: &str) -> Self {
        Self {
            op_id: op_id.to_string(),
            op_type: op_type.to_string(),
            args: Value::Null,
            started_at: None,
            begin_index: None,
            ended: false,
            completed: BTreeSet::new(),
            actions: BTreeMap::new(),
            pending: None,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        self.begin_index.is_some() && !self.ended
    }
}

/// Fold records into per-operation state.
///
/// Step identity comes from the explicit step number, never from record
/// position, so out-of-order steps are handled.
pub fn reduce(records: &[JournalRecord]) -> BTreeMap<String, OpState> {
    let mut ops: BTreeMap<String, OpState> = BTreeMap::new();
    let mut pending_order: BTreeMap<String, Vec<u32>> = BTreeMap::new();

    for (index, record) in records.iter().enumerate() {
        let state = ops
            .entry(record.op_id.clone())
            .or_insert_with(|| OpState::new(&record.op_id, &record.op));
        match record.event {
            JournalEvent::Begin => {
                state.op_type = record.op.clone();
                state.args = record.args.clone().unwrap_or(Value::Null);
                state.started_at = Some(record.ts);
                state.begin_index = Some(index);
            }
            JournalEvent::Step => {
                let Some(step) = record.step else {
                    tracing::warn!(op_id = %record.op_id, "step record without a step number");
                    continue;
                };
                match record.status.unwrap_or(StepStatus::Pending) {
                    StepStatus::Pending => {
                        if let Some(action) = &record.action {
                            state.actions.insert(step, action.clone());
                        }
                        pending_order
                            .entry(record.op_id.clone())
                            .or_default()
                            .push(step);
                    }
                    StepStatus::Done => {
                        state.completed.insert(step);
                    }
                }
            }
            JournalEvent::End => state.ended = true,
        }
    }

    for (op_id, order) in pending_order {
        if let Some(state) = ops.get_mut(&op_id) {
            state.pending = order
                .iter()
                .rev()
                .find(|step| !state.completed.contains(step))
                .copied();
        }
    }
    ops
}

/// What recovery found
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Recovery {
    Clean,
    Incomplete(RecoveryInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryInfo {
    pub op_id: String,
    pub op_type: String,
    pub args: Value,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_steps: BTreeSet<u32>,
    pub pending_step: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<String>,
    /// Other incomplete operations behind this one
    pub others: usize,
}

/// Pick the incomplete operation with the earliest begin.
pub fn recover_from(records: &[JournalRecord]) -> Recovery {
    let ops = reduce(records);
    let mut incomplete: Vec<&OpState> = ops.values().filter(|op| op.is_incomplete()).collect();
    incomplete.sort_by_key(|op| (op.started_at, op.begin_index));

    match incomplete.first() {
        None => Recovery::Clean,
        Some(op) => Recovery::Incomplete(RecoveryInfo {
            op_id: op.op_id.clone(),
            op_type: op.op_type.clone(),
            args: op.args.clone(),
            started_at: op.started_at,
            completed_steps: op.completed.clone(),
            pending_step: op.pending,
            pending_action: op.pending.and_then(|step| op.actions.get(&step).cloned()),
            others: incomplete.len() - 1,
        }),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanReport {
    pub kept_records: usize,
    pub removed_records: usize,
    pub removed_ops: usize,
}

/// Handle on the journal file
#[derive(Debug, Clone)]
pub struct Journal {
    storage: Storage,
}

impl Journal {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn path(&self) -> PathBuf {
        self.storage.journal_file()
    }

    /// Start an operation and return its context.
    pub fn begin(&self, op_type: &str, args: Value) -> Result<OpContext> {
        let op_type = op_type.trim();
        if op_type.is_empty() {
            return Err(Error::Validation("operation type cannot be empty".to_string()));
        }
        let op_id = uuid::Uuid::new_v4().to_string();
        self.append(&JournalRecord {
            event: JournalEvent::Begin,
            op: op_type.to_string(),
            op_id: op_id.clone(),
            step: None,
            action: None,
            status: None,
            args: Some(args),
            ts: Utc::now(),
        })?;
        tracing::debug!(op_id = %op_id, op = op_type, "operation begun");
        Ok(OpContext {
            journal: self.clone(),
            op_id,
            op_type: op_type.to_string(),
        })
    }

    /// Reattach to an incomplete operation by id.
    pub fn resume(&self, op_id: &str) -> Result<OpContext> {
        let ops = reduce(&self.read()?);
        let state = ops
            .get(op_id)
            .filter(|op| op.begin_index.is_some())
            .ok_or_else(|| Error::NotFound(format!("operation {op_id}")))?;
        if state.ended {
            return Err(Error::Validation(format!("operation {op_id} already ended")));
        }
        Ok(OpContext {
            journal: self.clone(),
            op_id: state.op_id.clone(),
            op_type: state.op_type.clone(),
        })
    }

    /// The most recently begun incomplete operation, if any.
    pub fn current(&self) -> Result<Option<OpContext>> {
        let ops = reduce(&self.read()?);
        Ok(ops
            .values()
            .filter(|op| op.is_incomplete())
            .max_by_key(|op| (op.started_at, op.begin_index))
            .map(|op| OpContext {
                journal: self.clone(),
                op_id: op.op_id.clone(),
                op_type: op.op_type.clone(),
            }))
    }

    pub fn recover(&self) -> Result<Recovery> {
        Ok(recover_from(&self.read()?))
    }

    /// Compact the journal to the records of incomplete operations.
    pub fn clean(&self) -> Result<CleanReport> {
        let path = self.path();
        let _lock = FileLock::acquire(lock::lock_path_for(&path), DEFAULT_LOCK_TIMEOUT_MS)?;
        let records = self.read()?;
        let ops = reduce(&records);
        let keep: BTreeSet<&str> = ops
            .values()
            .filter(|op| op.is_incomplete())
            .map(|op| op.op_id.as_str())
            .collect();

        let kept: Vec<&JournalRecord> = records
            .iter()
            .filter(|record| keep.contains(record.op_id.as_str()))
            .collect();
        let report = CleanReport {
            kept_records: kept.len(),
            removed_records: records.len() - kept.len(),
            removed_ops: ops.len() - keep.len(),
        };
        if report.removed_records > 0 || path.exists() {
            self.storage.write_jsonl(&path, &kept)?;
        }
        tracing::info!(
            kept = report.kept_records,
            removed = report.removed_records,
            "compacted journal"
        );
        Ok(report)
    }

    pub fn read(&self) -> Result<Vec<JournalRecord>> {
        let (records, skipped) = self.storage.read_jsonl_lenient(&self.path())?;
        if skipped > 0 {
            tracing::warn!(skipped, "journal contains unreadable lines");
        }
        Ok(records)
    }

    fn append(&self, record: &JournalRecord) -> Result<()> {
        let path = self.path();
        lock::with_retry(DEFAULT_RETRY_ATTEMPTS, || {
            let _lock = FileLock::acquire(lock::lock_path_for(&path), DEFAULT_LOCK_TIMEOUT_MS)?;
            self.storage.append_jsonl(&path, record)
        })
    }
}

/// An operation in progress
#[derive(Debug, Clone)]
pub struct OpContext {
    journal: Journal,
    op_id: String,
    op_type: String,
}

impl OpContext {
    pub fn op_id(&self) -> &str {
        &self.op_id
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Record that step `n` is about to run.
    pub fn step(&self, n: u32, action: &str, args: Option<Value>) -> Result<()> {
        self.record(JournalEvent::Step, Some(n), Some(action), Some(StepStatus::Pending), args)
    }

    /// Record that step `n` finished.
    pub fn complete(&self, n: u32) -> Result<()> {
        self.record(JournalEvent::Step, Some(n), None, Some(StepStatus::Done), None)
    }

    /// Close the operation.
    pub fn end(self) -> Result<()> {
        self.record(JournalEvent::End, None, None, None, None)?;
        tracing::debug!(op_id = %self.op_id, "operation ended");
        Ok(())
    }

    fn record(
        &self,
        event: JournalEvent,
        step: Option<u32>,
        action: Option<&str>,
        status: Option<StepStatus>,
        args: Option<Value>,
    ) -> Result<()> {
        self.journal.append(&JournalRecord {
            event,
            op: self.op_type.clone(),
            op_id: self.op_id.clone(),
            step,
            action: action.map(str::to_string),
            status,
            args,
            ts: Utc::now(),
        })
    }
}
