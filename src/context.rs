//! Context packs: a cached, derived read view of one node.
//!
//! A pack is computed from the graph on a cache miss and stored in
//! `context_cache` together with the set of node ids it was derived from
//! (`context_deps`). Mutations delete every cached pack that depends on
//! the touched nodes; there is no expiry.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::model::{EdgeType, Node, Status};
use crate::graph::store::{self, GraphStore};

/// Metadata keys surfaced as learnings on ancestors
pub const LEARNING_KEYS: [&str; 3] = ["learning", "decision", "pattern"];

/// Metadata key marking a node as carrying a known pitfall
pub const PITFALL_KEY: &str = "pitfall";

/// Recursion bound for blocker and ancestor walks
const MAX_DEPTH: i64 = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: String,
    pub text: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            text: node.text.clone(),
            status: node.status,
            alias: node.alias.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    #[serde(flatten)]
    pub node: NodeSummary,
    /// 1 for direct blockers
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ancestor {
    #[serde(flatten)]
    pub node: NodeSummary,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub learnings: Vec<Learning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Related {
    #[serde(flatten)]
    pub node: NodeSummary,
    pub edge_type: EdgeType,
    pub direction: Direction,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitfall {
    /// Node carrying the pitfall
    pub node_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPack {
    pub node: Node,
    pub blockers: Vec<Blocker>,
    pub ancestors: Vec<Ancestor>,
    pub related: Vec<Related>,
    pub pitfalls: Vec<Pitfall>,
    pub contradictions: Vec<NodeSummary>,
    pub computed_at: DateTime<Utc>,
    #[serde(skip)]
    pub from_cache: bool,
}

/// Return the context pack for a node, computing it on a cache miss.
pub fn get_context(store: &GraphStore, reference: &str) -> Result<ContextPack> {
    let node_id = store.resolve(reference)?;
    let conn = store.conn();

    if let Some(mut pack) = read_cached(conn, &node_id)? {
        tracing::debug!(id = %node_id, "context cache hit");
        pack.from_cache = true;
        return Ok(pack);
    }

    let (pack, deps) = compute(conn, &node_id)?;
    write_cached(conn, &pack, &deps)?;
    tracing::debug!(id = %node_id, deps = deps.len(), "context computed");
    Ok(pack)
}

/// Compute a pack without touching the cache. Returns the pack and the
/// ids it was derived from.
pub fn compute(conn: &Connection, node_id: &str) -> Result<(ContextPack, BTreeSet<String>)> {
    let node = store::load_node(conn, node_id)?
        .ok_or_else(|| crate::error::Error::NotFound(format!("node {node_id}")))?;
    let mut deps = BTreeSet::from([node_id.to_string()]);

    let blockers = blockers_of(conn, node_id)?;
    deps.extend(blockers.iter().map(|b| b.node.id.clone()));

    let ancestors = ancestors_of(conn, node_id)?;
    deps.extend(ancestors.iter().map(|a| a.node.id.clone()));

    let related = related_to(conn, node_id)?;
    deps.extend(related.iter().map(|r| r.node.id.clone()));

    let mut scope: BTreeSet<String> = BTreeSet::from([node_id.to_string()]);
    scope.extend(ancestors.iter().map(|a| a.node.id.clone()));
    scope.extend(related.iter().map(|r| r.node.id.clone()));
    let (pitfalls, addressers) = pitfalls_in(conn, &scope)?;
    deps.extend(addressers);

    let contradictions = contradictions_of(conn, node_id)?;
    deps.extend(contradictions.iter().map(|c| c.id.clone()));

    let pack = ContextPack {
        node,
        blockers,
        ancestors,
        related,
        pitfalls,
        contradictions,
        computed_at: Utc::now(),
        from_cache: false,
    };
    Ok((pack, deps))
}

/// Drop cached packs for `ids`, their `blocks`/`implements` neighbors and
/// every pack derived from them.
pub(crate) fn invalidate_for(conn: &Connection, ids: &[&str]) -> Result<usize> {
    let mut removed = 0;
    for node_id in ids {
        removed += conn.execute(
            "DELETE FROM context_cache WHERE node_id IN ( \
                 SELECT ?1 \
                 UNION SELECT node_id FROM context_deps WHERE dep_id = ?1 \
                 UNION SELECT target FROM edges \
                     WHERE source = ?1 AND type IN ('blocks', 'implements') \
                 UNION SELECT source FROM edges \
                     WHERE target = ?1 AND type IN ('blocks', 'implements'))",
            [node_id],
        )?;
    }
    if removed > 0 {
        tracing::trace!(removed, "invalidated context packs");
    }
    Ok(removed)
}

/// Clear the whole cache (bulk maintenance).
pub fn clear_all(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM context_deps", [])?;
    let removed = conn.execute("DELETE FROM context_cache", [])?;
    tracing::debug!(removed, "cleared context cache");
    Ok(removed)
}

/// Number of cached packs.
pub fn cached_count(conn: &Connection) -> Result<usize> {
    Ok(conn.query_row("SELECT COUNT(*) FROM context_cache", [], |row| row.get(0))?)
}

fn read_cached(conn: &Connection, node_id: &str) -> Result<Option<ContextPack>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT pack FROM context_cache WHERE node_id = ?1",
            [node_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(pack) => Ok(Some(pack)),
            Err(err) => {
                tracing::warn!(id = %node_id, error = %err, "discarding unreadable context pack");
                conn.execute("DELETE FROM context_cache WHERE node_id = ?1", [node_id])?;
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

fn write_cached(conn: &Connection, pack: &ContextPack, deps: &BTreeSet<String>) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM context_cache WHERE node_id = ?1",
        [&pack.node.id],
    )?;
    tx.execute(
        "INSERT INTO context_cache (node_id, pack, computed_at) VALUES (?1, ?2, ?3)",
        params![
            pack.node.id,
            serde_json::to_string(pack)?,
            store::timestamp(pack.computed_at)
        ],
    )?;
    {
        let mut stmt =
            tx.prepare("INSERT OR IGNORE INTO context_deps (node_id, dep_id) VALUES (?1, ?2)")?;
        for dep in deps {
            stmt.execute(params![pack.node.id, dep])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn blockers_of(conn: &Connection, node_id: &str) -> Result<Vec<Blocker>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE chain(id, depth) AS ( \
             SELECT e.source, 1 FROM edges e JOIN nodes s ON s.id = e.source \
             WHERE e.target = ?1 AND e.type = 'blocks' AND s.status != 'done' \
             UNION \
             SELECT e.source, c.depth + 1 FROM edges e \
             JOIN chain c ON e.target = c.id \
             JOIN nodes s ON s.id = e.source \
             WHERE e.type = 'blocks' AND s.status != 'done' AND c.depth < ?2) \
         SELECT id, MIN(depth) FROM chain WHERE id != ?1 GROUP BY id ORDER BY MIN(depth), id",
    )?;
    let rows = stmt.query_map(params![node_id, MAX_DEPTH], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, depth) = row?;
        if let Some(node) = store::load_node(conn, &id)? {
            out.push(Blocker {
                node: NodeSummary::from(&node),
                depth,
            });
        }
    }
    Ok(out)
}

fn ancestors_of(conn: &Connection, node_id: &str) -> Result<Vec<Ancestor>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE chain(id, depth) AS ( \
             SELECT target, 1 FROM edges WHERE source = ?1 AND type = 'implements' \
             UNION \
             SELECT e.target, c.depth + 1 FROM edges e JOIN chain c ON e.source = c.id \
             WHERE e.type = 'implements' AND c.depth < ?2) \
         SELECT id, MIN(depth) FROM chain WHERE id != ?1 GROUP BY id ORDER BY MIN(depth), id",
    )?;
    let rows = stmt.query_map(params![node_id, MAX_DEPTH], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, depth) = row?;
        if let Some(node) = store::load_node(conn, &id)? {
            let learnings = LEARNING_KEYS
                .iter()
                .filter_map(|key| {
                    node.metadata.get_str(key).map(|value| Learning {
                        key: (*key).to_string(),
                        value: value.to_string(),
                    })
                })
                .collect();
            out.push(Ancestor {
                node: NodeSummary::from(&node),
                depth,
                learnings,
            });
        }
    }
    Ok(out)
}

fn related_to(conn: &Connection, node_id: &str) -> Result<Vec<Related>> {
    // Outgoing `implements` is the ancestor chain, reported separately.
    let mut stmt = conn.prepare(
        "SELECT target, type, weight, 'outgoing' FROM edges \
             WHERE source = ?1 AND type IN ('references', 'relates_to') \
         UNION ALL \
         SELECT source, type, weight, 'incoming' FROM edges \
             WHERE target = ?1 AND type IN ('implements', 'references', 'relates_to')",
    )?;
    let rows = stmt.query_map([node_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, kind, weight, direction) = row?;
        if let Some(node) = store::load_node(conn, &id)? {
            out.push(Related {
                node: NodeSummary::from(&node),
                edge_type: kind.parse()?,
                direction: if direction == "outgoing" {
                    Direction::Outgoing
                } else {
                    Direction::Incoming
                },
                weight,
            });
        }
    }
    out.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.node.id.cmp(&b.node.id))
    });
    Ok(out)
}

/// Pitfalls carried by nodes in scope that no `done` node addresses yet.
/// Also returns every node holding an `addresses` edge into scope, since
/// their status decides resolution.
fn pitfalls_in(
    conn: &Connection,
    scope: &BTreeSet<String>,
) -> Result<(Vec<Pitfall>, BTreeSet<String>)> {
    let mut addressers = BTreeSet::new();
    let mut resolved: BTreeMap<String, bool> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT e.source, s.status FROM edges e JOIN nodes s ON s.id = e.source \
             WHERE e.target = ?1 AND e.type = 'addresses'",
        )?;
        for node_id in scope {
            let rows = stmt.query_map([node_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (source, status) = row?;
                if status == Status::Done.as_str() {
                    resolved.insert(node_id.clone(), true);
                }
                addressers.insert(source);
            }
        }
    }

    let mut pitfalls = Vec::new();
    for node in store::load_nodes(conn, scope)? {
        if resolved.get(&node.id).copied().unwrap_or(false) {
            continue;
        }
        if let Some(text) = node.metadata.get_str(PITFALL_KEY) {
            pitfalls.push(Pitfall {
                node_id: node.id.clone(),
                text: text.to_string(),
            });
        }
    }
    Ok((pitfalls, addressers))
}

fn contradictions_of(conn: &Connection, node_id: &str) -> Result<Vec<NodeSummary>> {
    let mut stmt = conn.prepare(
        "SELECT target FROM edges WHERE source = ?1 AND type = 'contradicts' \
         UNION SELECT source FROM edges WHERE target = ?1 AND type = 'contradicts'",
    )?;
    let ids = stmt
        .query_map([node_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()?;
    Ok(store::load_nodes(conn, &ids)?
        .iter()
        .map(NodeSummary::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::model::{Metadata, NewNode, NodeUpdate};

    fn store() -> GraphStore {
        GraphStore::open_in_memory(GraphConfig::default()).unwrap()
    }

    fn meta(raw: &str) -> Metadata {
        Metadata::parse(raw).unwrap()
    }

    #[test]
    fn pack_collects_blockers_ancestors_and_related() {
        let mut store = store();
        let epic = store
            .create_node(NewNode::new("auth epic").metadata(meta(r#"{"learning":"tokens expire"}"#)))
            .unwrap();
        let task = store.create_node(NewNode::new("login form")).unwrap();
        let blocker = store.create_node(NewNode::new("api schema")).unwrap();
        let deep = store.create_node(NewNode::new("db migration")).unwrap();
        let doc = store.create_node(NewNode::new("rfc")).unwrap();

        store.link(&task.id, &epic.id, EdgeType::Implements, None, None).unwrap();
        store.link(&blocker.id, &task.id, EdgeType::Blocks, None, None).unwrap();
        store.link(&deep.id, &blocker.id, EdgeType::Blocks, None, None).unwrap();
        store.link(&task.id, &doc.id, EdgeType::References, Some(0.9), None).unwrap();

        let pack = get_context(&store, &task.id).unwrap();
        assert!(!pack.from_cache);
        assert_eq!(pack.node.status, Status::Blocked);

        let blockers: Vec<(&str, u32)> = pack
            .blockers
            .iter()
            .map(|b| (b.node.id.as_str(), b.depth))
            .collect();
        assert_eq!(blockers, vec![(blocker.id.as_str(), 1), (deep.id.as_str(), 2)]);

        assert_eq!(pack.ancestors.len(), 1);
        assert_eq!(pack.ancestors[0].learnings[0].value, "tokens expire");
        assert_eq!(pack.related.len(), 1);
        assert_eq!(pack.related[0].node.id, doc.id);
    }

    #[test]
    fn done_blockers_are_filtered() {
        let mut store = store();
        let a = store.create_node(NewNode::new("A")).unwrap();
        let b = store.create_node(NewNode::new("B")).unwrap();
        store.link(&a.id, &b.id, EdgeType::Blocks, None, None).unwrap();
        store.update_node(&a.id, NodeUpdate::status(Status::Done)).unwrap();

        let pack = get_context(&store, &b.id).unwrap();
        assert!(pack.blockers.is_empty());
    }

    #[test]
    fn cache_hit_then_invalidated_by_blocker_change() {
        let mut store = store();
        let a = store.create_node(NewNode::new("A")).unwrap();
        let b = store.create_node(NewNode::new("B")).unwrap();
        store.link(&a.id, &b.id, EdgeType::Blocks, None, None).unwrap();

        let first = get_context(&store, &b.id).unwrap();
        assert_eq!(first.blockers.len(), 1);
        let second = get_context(&store, &b.id).unwrap();
        assert!(second.from_cache);

        store.update_node(&a.id, NodeUpdate::status(Status::Done)).unwrap();
        let third = get_context(&store, &b.id).unwrap();
        assert!(!third.from_cache);
        assert!(third.blockers.is_empty());
        assert_eq!(third.node.status, Status::Todo);
    }

    #[test]
    fn related_mutation_invalidates_dependent_pack() {
        let mut store = store();
        let a = store.create_node(NewNode::new("A")).unwrap();
        let doc = store.create_node(NewNode::new("doc")).unwrap();
        store.link(&a.id, &doc.id, EdgeType::RelatesTo, None, None).unwrap();

        get_context(&store, &a.id).unwrap();
        assert_eq!(cached_count(store.conn()).unwrap(), 1);

        store
            .update_node(
                &doc.id,
                NodeUpdate {
                    text: Some("doc v2".to_string()),
                    ..NodeUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(cached_count(store.conn()).unwrap(), 0);
        let pack = get_context(&store, &a.id).unwrap();
        assert_eq!(pack.related[0].node.text, "doc v2");
    }

    #[test]
    fn pitfalls_resolve_when_addressed_by_done_node() {
        let mut store = store();
        let epic = store
            .create_node(NewNode::new("epic").metadata(meta(r#"{"pitfall":"cache is per process"}"#)))
            .unwrap();
        let task = store.create_node(NewNode::new("task")).unwrap();
        let fix = store.create_node(NewNode::new("fix")).unwrap();
        store.link(&task.id, &epic.id, EdgeType::Implements, None, None).unwrap();
        store.link(&fix.id, &epic.id, EdgeType::Addresses, None, None).unwrap();

        let pack = get_context(&store, &task.id).unwrap();
        assert_eq!(pack.pitfalls.len(), 1);
        assert_eq!(pack.pitfalls[0].node_id, epic.id);

        store.update_node(&fix.id, NodeUpdate::status(Status::Done)).unwrap();
        let pack = get_context(&store, &task.id).unwrap();
        assert!(!pack.from_cache);
        assert!(pack.pitfalls.is_empty());
    }

    #[test]
    fn contradictions_listed() {
        let mut store = store();
        let a = store.create_node(NewNode::new("A")).unwrap();
        let b = store.create_node(NewNode::new("B")).unwrap();
        store.link(&b.id, &a.id, EdgeType::Contradicts, None, None).unwrap();
        let pack = get_context(&store, &a.id).unwrap();
        assert_eq!(pack.contradictions.len(), 1);
        assert_eq!(pack.contradictions[0].id, b.id);
    }

    #[test]
    fn clear_all_empties_cache() {
        let mut store = store();
        let a = store.create_node(NewNode::new("A")).unwrap();
        get_context(&store, &a.id).unwrap();
        assert_eq!(clear_all(store.conn()).unwrap(), 1);
        assert_eq!(cached_count(store.conn()).unwrap(), 0);
    }
}
