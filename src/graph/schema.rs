//! Database schema and forward migrations.
//!
//! The schema version lives in `PRAGMA user_version`. Each migration runs
//! inside an IMMEDIATE transaction that re-reads the version, so two
//! processes racing through startup apply each step once.

use rusqlite::{Connection, TransactionBehavior};

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: i64 = 3;

const V1_CORE: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL CHECK (length(trim(text)) > 0),
    status TEXT NOT NULL DEFAULT 'todo'
        CHECK (status IN ('todo', 'active', 'done', 'blocked-external')),
    metadata TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(metadata)),
    alias TEXT UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS edges (
    source TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    type TEXT NOT NULL CHECK (type IN ('blocks', 'relates_to', 'implements', 'contradicts',
        'supersedes', 'references', 'obsoletes', 'addresses')),
    weight REAL NOT NULL DEFAULT 1.0 CHECK (weight >= 0.0 AND weight <= 1.0),
    context TEXT CHECK (context IS NULL OR json_valid(context)),
    created_at TEXT NOT NULL,
    PRIMARY KEY (source, target, type),
    CHECK (source != target)
);
CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target, type);
";

const V2_DERIVED_COLUMNS: &str = "
ALTER TABLE nodes ADD COLUMN priority INTEGER
    GENERATED ALWAYS AS (json_extract(metadata, '$.priority')) VIRTUAL;
ALTER TABLE nodes ADD COLUMN type TEXT
    GENERATED ALWAYS AS (json_extract(metadata, '$.type')) VIRTUAL;
CREATE INDEX IF NOT EXISTS idx_nodes_priority ON nodes(priority);
CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type);
";

const V3_CONTEXT_CACHE: &str = "
CREATE TABLE IF NOT EXISTS context_cache (
    node_id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
    pack TEXT NOT NULL,
    computed_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS context_deps (
    node_id TEXT NOT NULL REFERENCES context_cache(node_id) ON DELETE CASCADE,
    dep_id TEXT NOT NULL,
    PRIMARY KEY (node_id, dep_id)
);
CREATE INDEX IF NOT EXISTS idx_context_deps_dep ON context_deps(dep_id);
";

const MIGRATIONS: [(i64, &str); 3] = [
    (1, V1_CORE),
    (2, V2_DERIVED_COLUMNS),
    (3, V3_CONTEXT_CACHE),
];

/// Read the schema version of an open database.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Apply pending migrations. Returns the versions applied.
pub fn migrate(conn: &mut Connection) -> Result<Vec<i64>> {
    let mut applied = Vec::new();
    for (version, sql) in MIGRATIONS {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = schema_version(&tx)?;
        if current > SCHEMA_VERSION {
            return Err(Error::OperationFailed(format!(
                "database schema v{current} is newer than supported v{SCHEMA_VERSION}; upgrade weave"
            )));
        }
        if current >= version {
            continue;
        }
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::debug!(version, "applied schema migration");
        applied.push(version);
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        let applied = migrate(&mut conn).unwrap();
        assert_eq!(applied, vec![1, 2, 3]);
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let again = migrate(&mut conn).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn derived_columns_follow_metadata() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO nodes (id, text, metadata, created_at, updated_at) \
             VALUES ('wv-000001', 'x', '{\"priority\":2,\"type\":\"bug\"}', 't', 't')",
            [],
        )
        .unwrap();
        let (priority, kind): (i64, String) = conn
            .query_row("SELECT priority, type FROM nodes", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(priority, 2);
        assert_eq!(kind, "bug");
    }

    #[test]
    fn rejects_newer_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        assert!(matches!(migrate(&mut conn), Err(Error::OperationFailed(_))));
    }
}
