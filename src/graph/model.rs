//! Node, edge and metadata types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Lifecycle state of a node.
///
/// `Blocked` is never stored: it is derived from incoming `blocks` edges
/// whose source is not `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "todo")]
    Todo,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "blocked")]
    Blocked,
    #[serde(rename = "blocked-external")]
    BlockedExternal,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Todo,
        Status::Active,
        Status::Done,
        Status::Blocked,
        Status::BlockedExternal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::Active => "active",
            Status::Done => "done",
            Status::Blocked => "blocked",
            Status::BlockedExternal => "blocked-external",
        }
    }

    /// Whether this value may be written to the store.
    pub fn is_storable(&self) -> bool {
        !matches!(self, Status::Blocked)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "invalid status '{s}': must be todo, active, done, blocked, or blocked-external"
                ))
            })
    }
}

/// Closed set of relationship types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Blocks,
    RelatesTo,
    Implements,
    Contradicts,
    Supersedes,
    References,
    Obsoletes,
    Addresses,
}

impl EdgeType {
    pub const ALL: [EdgeType; 8] = [
        EdgeType::Blocks,
        EdgeType::RelatesTo,
        EdgeType::Implements,
        EdgeType::Contradicts,
        EdgeType::Supersedes,
        EdgeType::References,
        EdgeType::Obsoletes,
        EdgeType::Addresses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Blocks => "blocks",
            EdgeType::RelatesTo => "relates_to",
            EdgeType::Implements => "implements",
            EdgeType::Contradicts => "contradicts",
            EdgeType::Supersedes => "supersedes",
            EdgeType::References => "references",
            EdgeType::Obsoletes => "obsoletes",
            EdgeType::Addresses => "addresses",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        EdgeType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| Error::InvalidEdgeType(s.to_string()))
    }
}

/// Node metadata: two schema-significant keys plus opaque pass-through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    /// Parse metadata from JSON text, rejecting non-objects and
    /// ill-typed reserved keys.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| Error::Validation(format!("malformed metadata: {err}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Validation(
                "malformed metadata: expected a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|err| Error::Validation(format!("malformed metadata: {err}")))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Apply a patch: keys overwrite, `null` removes.
    pub fn merge(&mut self, patch: MetadataPatch) {
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        for (key, value) in patch.extra {
            if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }

    /// String value of an opaque key, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Metadata change for `update_node`.
///
/// `priority` and `type` distinguish an absent key (`None`) from an
/// explicit `null` (`Some(None)`), which clears the stored value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetadataPatch {
    #[serde(default, deserialize_with = "explicit_null")]
    pub priority: Option<Option<i64>>,
    #[serde(default, rename = "type", deserialize_with = "explicit_null")]
    pub kind: Option<Option<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn explicit_null<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl MetadataPatch {
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| Error::Validation(format!("malformed metadata: {err}")))?;
        if !value.is_object() {
            return Err(Error::Validation(
                "malformed metadata: expected a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|err| Error::Validation(format!("malformed metadata: {err}")))
    }

    /// Patch setting a single opaque key.
    pub fn with(key: &str, value: Value) -> Self {
        let mut patch = Self::default();
        patch.extra.insert(key.to_string(), value);
        patch
    }
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub text: String,
    /// Effective status (`blocked` derived at read time)
    pub status: Status,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A typed, directed relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Input for node creation
#[derive(Debug, Clone, Default)]
pub struct NewNode {
    pub text: String,
    pub status: Option<Status>,
    pub metadata: Option<Metadata>,
    pub alias: Option<String>,
}

impl NewNode {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Field changes for `update_node`
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub text: Option<String>,
    pub status: Option<Status>,
    /// Merged into existing metadata
    pub metadata: Option<MetadataPatch>,
    /// `Some(None)` clears the alias
    pub alias: Option<Option<String>>,
    /// Allow leaving `done` (explicit un-close)
    pub reopen: bool,
    /// Override the contradiction hard stop
    pub force: bool,
}

impl NodeUpdate {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.status.is_none()
            && self.metadata.is_none()
            && self.alias.is_none()
    }
}

/// Result of an update, with advisory signals for the caller
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub node: Node,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<String>,
}

/// Result of a delete request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted {
        id: String,
        edges_removed: usize,
    },
    /// Refused because other nodes depend on this one; not an error.
    Refused {
        id: String,
        dependents: Vec<String>,
        warning: String,
    },
}

/// Filter for `list_nodes`
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Effective status (may be `blocked`)
    pub status: Option<Status>,
    pub kind: Option<String>,
    /// Include nodes with priority <= this value
    pub max_priority: Option<i64>,
    /// Case-insensitive substring of text or alias
    pub search: Option<String>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_parses_and_rejects() {
        assert_eq!("todo".parse::<Status>().unwrap(), Status::Todo);
        assert_eq!(
            "blocked_external".parse::<Status>().unwrap(),
            Status::BlockedExternal
        );
        assert!(matches!(
            "finished".parse::<Status>(),
            Err(Error::Validation(_))
        ));
        assert!(!Status::Blocked.is_storable());
    }

    #[test]
    fn edge_type_is_closed_set() {
        assert_eq!("relates-to".parse::<EdgeType>().unwrap(), EdgeType::RelatesTo);
        assert!(matches!(
            "depends_on".parse::<EdgeType>(),
            Err(Error::InvalidEdgeType(_))
        ));
    }

    #[test]
    fn metadata_promotes_reserved_keys() {
        let meta = Metadata::parse(r#"{"priority":1,"type":"bug","owner":"ada"}"#).unwrap();
        assert_eq!(meta.priority, Some(1));
        assert_eq!(meta.kind.as_deref(), Some("bug"));
        assert_eq!(meta.get_str("owner"), Some("ada"));

        let round = serde_json::to_value(&meta).unwrap();
        assert_eq!(round, json!({"priority":1,"type":"bug","owner":"ada"}));
    }

    #[test]
    fn metadata_rejects_malformed() {
        assert!(matches!(Metadata::parse("[1,2]"), Err(Error::Validation(_))));
        assert!(matches!(Metadata::parse("{oops"), Err(Error::Validation(_))));
        assert!(matches!(
            Metadata::parse(r#"{"priority":"high"}"#),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn metadata_patch_null_clears_reserved_keys() {
        let mut meta = Metadata::parse(r#"{"priority":2,"type":"bug","owner":"ada"}"#).unwrap();
        let patch = MetadataPatch::parse(r#"{"priority":null,"type":null}"#).unwrap();
        assert_eq!(patch.priority, Some(None));
        meta.merge(patch);
        assert_eq!(meta.priority, None);
        assert_eq!(meta.kind, None);
        assert_eq!(meta.get_str("owner"), Some("ada"));

        let mut meta = Metadata::parse(r#"{"priority":2}"#).unwrap();
        meta.merge(MetadataPatch::parse(r#"{"owner":"bo"}"#).unwrap());
        assert_eq!(meta.priority, Some(2));
    }

    #[test]
    fn metadata_merge_overwrites_and_removes() {
        let mut meta = Metadata::parse(r#"{"priority":2,"owner":"ada","keep":true}"#).unwrap();
        let patch = MetadataPatch::parse(r#"{"priority":0,"owner":null,"learning":"x"}"#).unwrap();
        meta.merge(patch);
        assert_eq!(meta.priority, Some(0));
        assert!(meta.extra.get("owner").is_none());
        assert_eq!(meta.get_str("learning"), Some("x"));
        assert_eq!(meta.extra.get("keep"), Some(&json!(true)));
    }
}
