//! Textual SQL snapshot of the graph (the cold copy).
//!
//! The dump is deterministic: schema objects in creation order, then rows
//! sorted by key, one statement per line. Cached context packs are derived
//! data and are not written.

use std::fmt::Write as _;

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::graph::schema;

const HEADER: &str = "-- weave graph snapshot";

const NODE_INSERT: &str =
    "INSERT INTO nodes (id, text, status, metadata, alias, created_at, updated_at) VALUES";

const EDGE_INSERT: &str =
    "INSERT INTO edges (source, target, type, weight, context, created_at) VALUES";

/// Serialize schema and graph rows as replayable SQL.
pub fn dump(conn: &Connection) -> Result<String> {
    let version = schema::schema_version(conn)?;
    let mut out = String::new();
    writeln!(out, "{HEADER} (schema v{version})").map_err(fmt_err)?;
    out.push_str("PRAGMA foreign_keys = OFF;\nBEGIN TRANSACTION;\n");

    let objects = schema_objects(conn)?;
    for (_, sql) in objects.iter().filter(|(kind, _)| kind == "table") {
        writeln!(out, "{sql};").map_err(fmt_err)?;
    }

    let mut stmt = conn.prepare(
        "SELECT id, text, status, metadata, alias, created_at, updated_at \
         FROM nodes ORDER BY id",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let values = row_literals(row, 7)?;
        writeln!(out, "{NODE_INSERT} ({});", values.join(", ")).map_err(fmt_err)?;
    }

    let mut stmt = conn.prepare(
        "SELECT source, target, type, weight, context, created_at \
         FROM edges ORDER BY source, target, type",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let values = row_literals(row, 6)?;
        writeln!(out, "{EDGE_INSERT} ({});", values.join(", ")).map_err(fmt_err)?;
    }

    for (_, sql) in objects.iter().filter(|(kind, _)| kind == "index") {
        writeln!(out, "{sql};").map_err(fmt_err)?;
    }
    writeln!(out, "PRAGMA user_version = {version};").map_err(fmt_err)?;
    out.push_str("COMMIT;\n");
    Ok(out)
}

/// Replay a snapshot into an empty database.
pub fn load(conn: &Connection, sql: &str) -> Result<()> {
    if !sql.starts_with(HEADER) {
        return Err(Error::OperationFailed(
            "snapshot is missing its header; refusing to replay".to_string(),
        ));
    }
    conn.execute_batch(sql)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

/// Whether a snapshot carries at least one node row.
pub fn has_nodes(sql: &str) -> bool {
    sql.lines().any(|line| line.starts_with(NODE_INSERT))
}

/// Number of node rows in a snapshot.
pub fn node_rows(sql: &str) -> usize {
    sql.lines().filter(|line| line.starts_with(NODE_INSERT)).count()
}

fn schema_objects(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT type, sql FROM sqlite_master \
         WHERE type IN ('table', 'index') AND sql IS NOT NULL \
           AND name NOT LIKE 'sqlite_%' \
         ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn row_literals(row: &rusqlite::Row<'_>, columns: usize) -> Result<Vec<String>> {
    let mut values = Vec::with_capacity(columns);
    for idx in 0..columns {
        values.push(sql_literal(row.get_ref(idx)?)?);
    }
    Ok(values)
}

fn sql_literal(value: ValueRef<'_>) -> Result<String> {
    Ok(match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(n) => n.to_string(),
        ValueRef::Real(f) => format!("{f:?}"),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|err| Error::OperationFailed(format!("non-UTF-8 text in graph: {err}")))?;
            format!("'{}'", text.replace('\'', "''"))
        }
        ValueRef::Blob(bytes) => format!("X'{}'", hex::encode(bytes)),
    })
}

fn fmt_err(err: std::fmt::Error) -> Error {
    Error::OperationFailed(format!("snapshot formatting failed: {err}"))
}
