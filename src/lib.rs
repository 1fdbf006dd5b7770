//! weave - a work graph for coordinating coding agents
//!
//! This library provides the core functionality for the wv CLI tool:
//! a repository-scoped graph of work items that survives across sessions.
//!
//! # Core Concepts
//!
//! - **Nodes**: work items with a lifecycle status and open metadata
//! - **Edges**: typed, weighted relationships (`blocks`, `implements`, ...)
//! - **Context packs**: blockers, ancestors, related work and pitfalls for a node
//! - **Tiered persistence**: a fast hot store backed by a committed snapshot
//! - **Operation journal**: step records that make interrupted work recoverable
//! - **External sync**: idempotent reconciliation with an issue tracker
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.weave.toml` and `WV_*`
//! - `error`: Error types and result aliases
//! - `graph`: Node and edge model plus the SQLite-backed store
//! - `context`: Context pack computation and caching
//! - `persistence`: Startup reconciliation, flush, restore and eviction
//! - `journal`: Operation journal and recovery
//! - `sync`: Issue tracker client and reconciler
//! - `storage`: File layout and JSONL helpers
//! - `lock`: File locking and atomic writes for concurrency safety

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod git;
pub mod graph;
pub mod hotzone;
pub mod journal;
pub mod lock;
pub mod output;
pub mod persistence;
pub mod snapshot;
pub mod storage;
pub mod sync;
pub mod weave;

pub use error::{Error, Result};
pub use weave::Weave;
