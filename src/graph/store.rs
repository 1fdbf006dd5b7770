//! SQLite-backed graph store.
//!
//! All mutations run in IMMEDIATE transactions so concurrent invocations
//! queue on the database lock (bounded by the busy timeout) instead of
//! failing mid-write. Alias uniqueness is checked inside that transaction
//! and enforced by the `UNIQUE` constraint as the final arbiter.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use crate::config::GraphConfig;
use crate::context;
use crate::error::{Error, Result};
use crate::graph::id::{self, NodeRef};
use crate::graph::model::{
    DeleteOutcome, Edge, EdgeType, Metadata, NewNode, Node, NodeFilter, NodeUpdate, Status,
    UpdateOutcome,
};
use crate::graph::schema;

const ID_ATTEMPTS: usize = 16;

/// Effective-status projection of the nodes table.
///
/// A stored `done` always reads as `done`; only unfinished nodes with an
/// open incoming `blocks` edge read as `blocked`.
pub(crate) const NODE_SELECT: &str = "SELECT n.id AS id, n.text AS text, \
     CASE WHEN n.status != 'done' AND EXISTS ( \
         SELECT 1 FROM edges e JOIN nodes s ON s.id = e.source \
         WHERE e.target = n.id AND e.type = 'blocks' AND s.status != 'done') \
     THEN 'blocked' ELSE n.status END AS status, \
     n.metadata AS metadata, n.alias AS alias, n.created_at AS created_at, \
     n.updated_at AS updated_at, n.priority AS priority, n.type AS type \
     FROM nodes n";

const NODE_COLUMNS: &str = "id, text, status, metadata, alias, created_at, updated_at";

const EDGE_COLUMNS: &str = "source, target, type, weight, context, created_at";

/// Graph store handle
#[derive(Debug)]
pub struct GraphStore {
    conn: Connection,
    path: Option<PathBuf>,
    policy: GraphConfig,
}

impl GraphStore {
    /// Open (or create) the store at `path` and bring its schema current.
    pub fn open(path: &Path, policy: GraphConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, Some(path.to_path_buf()), policy)
    }

    /// In-memory store, for tests and dry runs.
    pub fn open_in_memory(policy: GraphConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None, policy)
    }

    fn from_connection(
        mut conn: Connection,
        path: Option<PathBuf>,
        policy: GraphConfig,
    ) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(policy.busy_timeout_ms))?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
        schema::migrate(&mut conn)?;
        Ok(Self { conn, path, policy })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    pub fn create_node(&mut self, input: NewNode) -> Result<Node> {
        let text = input.text.trim().to_string();
        if text.is_empty() {
            return Err(Error::Validation("node text cannot be empty".to_string()));
        }
        let status = input.status.unwrap_or(Status::Todo);
        if !matches!(status, Status::Todo | Status::Active) {
            return Err(Error::Validation(format!(
                "new nodes start as todo or active, not {status}"
            )));
        }
        let alias = input.alias.map(|a| a.trim().to_string());
        if let Some(alias) = &alias {
            id::validate_alias(alias)?;
        }
        let metadata = input.metadata.unwrap_or_default().to_json()?;
        let now = timestamp(Utc::now());

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(alias) = &alias {
            if let Some(owner) = alias_owner(&tx, alias)? {
                return Err(Error::Conflict(format!(
                    "alias '{alias}' is already used by {owner}"
                )));
            }
        }

        let mut node_id = None;
        for _ in 0..ID_ATTEMPTS {
            let candidate = id::generate_id();
            if !node_exists(&tx, &candidate)? {
                node_id = Some(candidate);
                break;
            }
            tracing::debug!(candidate, "node id collision; regenerating");
        }
        let node_id = node_id.ok_or_else(|| {
            Error::OperationFailed("could not generate a unique node id".to_string())
        })?;

        tx.execute(
            "INSERT INTO nodes (id, text, status, metadata, alias, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![node_id, text, status.as_str(), metadata, alias, now],
        )
        .map_err(|err| map_constraint(err, || format!("alias '{}' is already in use", alias.as_deref().unwrap_or(""))))?;
        tx.commit()?;

        tracing::debug!(id = %node_id, "created node");
        self.load(&node_id)
    }

    pub fn update_node(&mut self, reference: &str, update: NodeUpdate) -> Result<UpdateOutcome> {
        if update.is_empty() {
            return Err(Error::Validation("nothing to update".to_string()));
        }

        let max_active = self.policy.max_active;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let node_id = resolve_in(&tx, reference)?;
        let (mut text, stored, metadata_json, mut alias): (String, String, String, Option<String>) = tx
            .query_row(
                "SELECT text, status, metadata, alias FROM nodes WHERE id = ?1",
                [&node_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
        let stored: Status = stored.parse()?;
        let mut status = stored;
        let mut metadata = Metadata::parse(&metadata_json)?;
        let mut advisories = Vec::new();

        if let Some(new_text) = update.text {
            let trimmed = new_text.trim();
            if trimmed.is_empty() {
                return Err(Error::Validation("node text cannot be empty".to_string()));
            }
            text = trimmed.to_string();
        }

        if let Some(next) = update.status {
            if !next.is_storable() {
                return Err(Error::Validation(
                    "blocked is derived from blocks edges; link a blocker instead".to_string(),
                ));
            }
            if stored == Status::Done && next != Status::Done && !update.reopen {
                return Err(Error::Validation(format!(
                    "{node_id} is done; reopen it explicitly to change status"
                )));
            }
            if next != stored && matches!(next, Status::Active | Status::Done) && !update.force {
                let others = contradicting(&tx, &node_id)?;
                if !others.is_empty() {
                    return Err(Error::Contradiction {
                        id: node_id,
                        others,
                    });
                }
            }
            if next == Status::Active && stored != Status::Active {
                let active: usize = tx.query_row(
                    "SELECT COUNT(*) FROM nodes WHERE status = 'active' AND id != ?1",
                    [&node_id],
                    |row| row.get(0),
                )?;
                if active >= max_active {
                    let message = format!(
                        "{} node(s) already active (limit {max_active}); finish or pause one first",
                        active
                    );
                    tracing::warn!(id = %node_id, active, max_active, "active limit exceeded");
                    advisories.push(message);
                }
            }
            status = next;
        }

        if let Some(next_alias) = update.alias {
            if let Some(candidate) = &next_alias {
                id::validate_alias(candidate)?;
                if let Some(owner) = alias_owner(&tx, candidate)? {
                    if owner != node_id {
                        return Err(Error::Conflict(format!(
                            "alias '{candidate}' is already used by {owner}"
                        )));
                    }
                }
            }
            alias = next_alias;
        }

        if let Some(patch) = update.metadata {
            metadata.merge(patch);
        }

        tx.execute(
            "UPDATE nodes SET text = ?1, status = ?2, metadata = ?3, alias = ?4, updated_at = ?5 \
             WHERE id = ?6",
            params![
                text,
                status.as_str(),
                metadata.to_json()?,
                alias,
                timestamp(Utc::now()),
                node_id
            ],
        )
        .map_err(|err| map_constraint(err, || format!("alias conflict on {node_id}")))?;
        context::invalidate_for(&tx, &[node_id.as_str()])?;
        tx.commit()?;

        let node = self.load(&node_id)?;
        Ok(UpdateOutcome { node, advisories })
    }

    pub fn delete_node(&mut self, reference: &str, force: bool) -> Result<DeleteOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let node_id = resolve_in(&tx, reference)?;
        let dependents = dependents_of(&tx, &node_id)?;

        if !dependents.is_empty() && !force {
            let warning = format!(
                "{node_id} has {} dependent node(s) ({}); pass force to delete",
                dependents.len(),
                dependents.join(", ")
            );
            tracing::warn!(id = %node_id, dependents = dependents.len(), "delete refused");
            return Ok(DeleteOutcome::Refused {
                id: node_id,
                dependents,
                warning,
            });
        }

        context::invalidate_for(&tx, &[node_id.as_str()])?;
        let edges_removed: usize = tx.query_row(
            "SELECT COUNT(*) FROM edges WHERE source = ?1 OR target = ?1",
            [&node_id],
            |row| row.get(0),
        )?;
        tx.execute("DELETE FROM nodes WHERE id = ?1", [&node_id])?;
        tx.commit()?;

        tracing::info!(id = %node_id, edges_removed, forced = force, "deleted node");
        Ok(DeleteOutcome::Deleted {
            id: node_id,
            edges_removed,
        })
    }

    /// Fetch a node by id or alias.
    pub fn get(&self, reference: &str) -> Result<Node> {
        let node_id = resolve_in(&self.conn, reference)?;
        self.load(&node_id)
    }

    /// Resolve an id or alias to a node id.
    pub fn resolve(&self, reference: &str) -> Result<String> {
        resolve_in(&self.conn, reference)
    }

    pub fn list(&self, filter: &NodeFilter) -> Result<Vec<Node>> {
        let mut sql = format!("SELECT {NODE_COLUMNS} FROM ({NODE_SELECT}) WHERE 1 = 1");
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            args.push(Box::new(status.as_str()));
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(kind) = &filter.kind {
            args.push(Box::new(kind.clone()));
            sql.push_str(&format!(" AND type = ?{}", args.len()));
        }
        if let Some(max_priority) = filter.max_priority {
            args.push(Box::new(max_priority));
            sql.push_str(&format!(" AND priority <= ?{}", args.len()));
        }
        if let Some(search) = &filter.search {
            let needle = format!("%{}%", search.to_lowercase());
            args.push(Box::new(needle));
            let n = args.len();
            sql.push_str(&format!(
                " AND (lower(text) LIKE ?{n} OR lower(coalesce(alias, '')) LIKE ?{n})"
            ));
        }
        sql.push_str(" ORDER BY priority IS NULL, priority, created_at, id");
        if let Some(limit) = filter.limit {
            args.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT ?{}", args.len()));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn ToSql> = args.iter().map(|arg| arg.as_ref()).collect();
        let rows = stmt.query_map(params.as_slice(), RawNode::from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.into_node()?);
        }
        Ok(out)
    }

    /// Unblocked `todo` nodes, highest priority first.
    pub fn ready(&self) -> Result<Vec<Node>> {
        self.list(&NodeFilter {
            status: Some(Status::Todo),
            ..NodeFilter::default()
        })
    }

    pub(crate) fn load(&self, node_id: &str) -> Result<Node> {
        load_node(&self.conn, node_id)?
            .ok_or_else(|| Error::NotFound(format!("node {node_id}")))
    }

    // =========================================================================
    // Edges
    // =========================================================================

    pub fn link(
        &mut self,
        source: &str,
        target: &str,
        edge_type: EdgeType,
        weight: Option<f64>,
        context_value: Option<Value>,
    ) -> Result<Edge> {
        let weight = weight.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&weight) {
            return Err(Error::Validation(format!(
                "edge weight {weight} must be within [0, 1]"
            )));
        }
        let context_json = context_value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let source_id = resolve_endpoint(&tx, source)?;
        let target_id = resolve_endpoint(&tx, target)?;
        if source_id == target_id {
            return Err(Error::Validation(format!(
                "cannot link {source_id} to itself"
            )));
        }
        if edge_type == EdgeType::Blocks && blocks_path_exists(&tx, &target_id, &source_id)? {
            return Err(Error::Validation(format!(
                "{source_id} blocks {target_id} would create a blocking cycle"
            )));
        }

        let now = Utc::now();
        tx.execute(
            "INSERT INTO edges (source, target, type, weight, context, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                source_id,
                target_id,
                edge_type.as_str(),
                weight,
                context_json,
                timestamp(now)
            ],
        )
        .map_err(|err| {
            map_constraint(err, || {
                format!("{source_id} already {edge_type} {target_id}")
            })
        })?;
        context::invalidate_for(&tx, &[source_id.as_str(), target_id.as_str()])?;
        tx.commit()?;

        tracing::debug!(source = %source_id, target = %target_id, kind = %edge_type, "linked");
        Ok(Edge {
            source: source_id,
            target: target_id,
            edge_type,
            weight,
            context: context_value,
            created_at: parse_timestamp(&timestamp(now))?,
        })
    }

    pub fn unlink(&mut self, source: &str, target: &str, edge_type: EdgeType) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let source_id = resolve_in(&tx, source)?;
        let target_id = resolve_in(&tx, target)?;
        let removed = tx.execute(
            "DELETE FROM edges WHERE source = ?1 AND target = ?2 AND type = ?3",
            params![source_id, target_id, edge_type.as_str()],
        )?;
        if removed == 0 {
            return Err(Error::NotFound(format!(
                "edge {source_id} {edge_type} {target_id}"
            )));
        }
        context::invalidate_for(&tx, &[source_id.as_str(), target_id.as_str()])?;
        tx.commit()?;
        Ok(())
    }

    /// Edges touching a node in either direction.
    pub fn edges_of(&self, reference: &str) -> Result<Vec<Edge>> {
        let node_id = resolve_in(&self.conn, reference)?;
        edges_touching(&self.conn, &node_id)
    }

    /// Nodes that implement `reference` (its children).
    pub fn children(&self, reference: &str) -> Result<Vec<Node>> {
        let node_id = resolve_in(&self.conn, reference)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM ({NODE_SELECT}) WHERE id IN \
             (SELECT source FROM edges WHERE target = ?1 AND type = 'implements') \
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([&node_id], RawNode::from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.into_node()?);
        }
        Ok(out)
    }

    // =========================================================================
    // Counts and maintenance
    // =========================================================================

    pub fn node_count(&self) -> Result<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?)
    }

    pub fn edge_count(&self) -> Result<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?)
    }

    pub fn count_by_status(&self, status: Status) -> Result<usize> {
        Ok(self.conn.query_row(
            &format!("SELECT COUNT(*) FROM ({NODE_SELECT}) WHERE status = ?1"),
            [status.as_str()],
            |row| row.get(0),
        )?)
    }

    pub fn count_edges(&self, edge_type: EdgeType) -> Result<usize> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE type = ?1",
            [edge_type.as_str()],
            |row| row.get(0),
        )?)
    }

    /// Done nodes whose last update is older than `cutoff`.
    pub(crate) fn done_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Node>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM ({NODE_SELECT}) \
             WHERE status = 'done' AND updated_at < ?1 ORDER BY updated_at, id"
        ))?;
        let rows = stmt.query_map([timestamp(cutoff)], RawNode::from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.into_node()?);
        }
        Ok(out)
    }

    /// Delete nodes (and, by cascade, their edges) in one transaction.
    pub(crate) fn purge(&mut self, ids: &[String]) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut removed = 0;
        for node_id in ids {
            removed += tx.execute("DELETE FROM nodes WHERE id = ?1", [node_id])?;
        }
        tx.commit()?;
        Ok(removed)
    }
}

// =============================================================================
// Row mapping
// =============================================================================

struct RawNode {
    id: String,
    text: String,
    status: String,
    metadata: String,
    alias: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawNode {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            text: row.get(1)?,
            status: row.get(2)?,
            metadata: row.get(3)?,
            alias: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_node(self) -> Result<Node> {
        Ok(Node {
            status: self.status.parse()?,
            metadata: Metadata::parse(&self.metadata)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            text: self.text,
            alias: self.alias,
        })
    }
}

pub(crate) fn load_node(conn: &Connection, node_id: &str) -> Result<Option<Node>> {
    let raw = conn
        .query_row(
            &format!("SELECT {NODE_COLUMNS} FROM ({NODE_SELECT}) WHERE id = ?1"),
            [node_id],
            RawNode::from_row,
        )
        .optional()?;
    raw.map(RawNode::into_node).transpose()
}

pub(crate) fn load_nodes(conn: &Connection, ids: &BTreeSet<String>) -> Result<Vec<Node>> {
    let mut out = Vec::with_capacity(ids.len());
    for node_id in ids {
        if let Some(node) = load_node(conn, node_id)? {
            out.push(node);
        }
    }
    Ok(out)
}

pub(crate) fn edges_touching(conn: &Connection, node_id: &str) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EDGE_COLUMNS} FROM edges WHERE source = ?1 OR target = ?1 \
         ORDER BY type, source, target"
    ))?;
    let rows = stmt.query_map([node_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (source, target, kind, weight, context_json, created_at) = row?;
        out.push(Edge {
            source,
            target,
            edge_type: kind.parse()?,
            weight,
            context: context_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_timestamp(&created_at)?,
        });
    }
    Ok(out)
}

// =============================================================================
// Helpers
// =============================================================================

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| Error::OperationFailed(format!("invalid timestamp '{value}': {err}")))
}

fn resolve_in(conn: &Connection, reference: &str) -> Result<String> {
    let found = match id::parse_ref(reference)? {
        NodeRef::Id(node_id) => node_exists(conn, node_id)?.then(|| node_id.to_string()),
        NodeRef::Alias(alias) => alias_owner(conn, alias)?,
    };
    found.ok_or_else(|| Error::NotFound(format!("node '{}'", reference.trim())))
}

fn resolve_endpoint(conn: &Connection, reference: &str) -> Result<String> {
    match resolve_in(conn, reference) {
        Err(Error::NotFound(what)) => Err(Error::ForeignKey(what)),
        other => other,
    }
}

fn node_exists(conn: &Connection, node_id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM nodes WHERE id = ?1", [node_id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn alias_owner(conn: &Connection, alias: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT id FROM nodes WHERE alias = ?1", [alias], |row| {
            row.get(0)
        })
        .optional()?)
}

fn contradicting(conn: &Connection, node_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT target FROM edges WHERE source = ?1 AND type = 'contradicts' \
         UNION SELECT source FROM edges WHERE target = ?1 AND type = 'contradicts' \
         ORDER BY 1",
    )?;
    let rows = stmt.query_map([node_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

/// Children (`implements` into this node) and nodes this node `blocks`.
fn dependents_of(conn: &Connection, node_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT source FROM edges WHERE target = ?1 AND type = 'implements' \
         UNION SELECT target FROM edges WHERE source = ?1 AND type = 'blocks' \
         ORDER BY 1",
    )?;
    let rows = stmt.query_map([node_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

fn blocks_path_exists(conn: &Connection, from: &str, to: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "WITH RECURSIVE reach(id) AS ( \
                 SELECT ?1 \
                 UNION SELECT e.target FROM edges e JOIN reach r ON e.source = r.id \
                 WHERE e.type = 'blocks') \
             SELECT 1 FROM reach WHERE id = ?2",
            params![from, to],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn map_constraint<F>(err: rusqlite::Error, conflict: F) -> Error
where
    F: FnOnce() -> String,
{
    if let rusqlite::Error::SqliteFailure(code, message) = &err {
        match code.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                return Error::ForeignKey(
                    message
                        .clone()
                        .unwrap_or_else(|| "edge endpoint missing".to_string()),
                );
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return Error::Conflict(conflict());
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_CHECK => {
                return Error::Validation(
                    message
                        .clone()
                        .unwrap_or_else(|| "check constraint failed".to_string()),
                );
            }
            _ => {}
        }
    }
    Error::Sql(err)
}
