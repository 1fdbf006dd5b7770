//! Command-line interface for wv
//!
//! This module defines the CLI structure using clap derive macros.
//! Commands are grouped by concern in submodules; each one is a thin
//! consumer of the [`Weave`] handle.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;
use crate::output::OutputOptions;
use crate::weave::Weave;

mod node;
mod op;
mod store;
mod sync;

/// wv - a work graph for coding agents
///
/// Tracks work items, their dependencies and learnings in a
/// repository-scoped graph that survives across sessions.
#[derive(Parser, Debug)]
#[command(name = "wv")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the repository (defaults to current directory)
    #[arg(long, global = true, env = "WV_REPO")]
    pub repo: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a node
    Add {
        /// Node text
        text: String,

        /// Initial status: todo or active
        #[arg(long)]
        status: Option<String>,

        /// Human-readable alias
        #[arg(long)]
        alias: Option<String>,

        /// Priority (lower is more urgent)
        #[arg(long)]
        priority: Option<i64>,

        /// Node type (task, bug, epic, ...)
        #[arg(long = "type")]
        kind: Option<String>,

        /// Metadata as a JSON object
        #[arg(long)]
        meta: Option<String>,
    },

    /// Change a node's text, status, alias or metadata
    Update {
        /// Node id or alias
        node: String,

        #[arg(long)]
        text: Option<String>,

        /// New status: todo, active, done, blocked-external
        #[arg(long)]
        status: Option<String>,

        #[arg(long, conflicts_with = "clear_alias")]
        alias: Option<String>,

        /// Remove the alias
        #[arg(long)]
        clear_alias: bool,

        #[arg(long)]
        priority: Option<i64>,

        #[arg(long = "type")]
        kind: Option<String>,

        /// Metadata patch as a JSON object (null values remove keys)
        #[arg(long)]
        meta: Option<String>,

        /// Allow moving a done node back to another status
        #[arg(long)]
        reopen: bool,

        /// Proceed despite unresolved contradicts edges
        #[arg(long)]
        force: bool,
    },

    /// Mark a node done
    Done {
        /// Node id or alias
        node: String,

        /// What was learned while doing it
        #[arg(long)]
        learning: Option<String>,
    },

    /// Delete a node and its edges
    Delete {
        /// Node id or alias
        node: String,

        /// Delete even when other nodes depend on it
        #[arg(long)]
        force: bool,
    },

    /// Show a node and its edges
    Show {
        /// Node id or alias
        node: String,
    },

    /// List nodes
    List {
        /// Effective status (including blocked)
        #[arg(long)]
        status: Option<String>,

        #[arg(long = "type")]
        kind: Option<String>,

        /// Only nodes with priority at or below this value
        #[arg(long)]
        priority: Option<i64>,

        /// Case-insensitive substring of text or alias
        #[arg(long)]
        search: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// List unblocked todo nodes
    Ready,

    /// Add a typed edge: SOURCE --TYPE--> TARGET
    Link {
        source: String,
        target: String,

        /// Edge type (blocks, implements, relates_to, ...)
        #[arg(value_name = "TYPE")]
        edge_type: String,

        /// Edge weight in [0, 1]
        #[arg(long)]
        weight: Option<f64>,

        /// Edge context as JSON
        #[arg(long)]
        context: Option<String>,
    },

    /// Remove a typed edge
    Unlink {
        source: String,
        target: String,

        #[arg(value_name = "TYPE")]
        edge_type: String,
    },

    /// Show the context pack for a node
    Context {
        /// Node id or alias
        node: String,
    },

    /// Operation journal
    #[command(subcommand)]
    Op(OpCommands),

    /// Write the graph to the committed snapshot
    Flush {
        /// Commit the snapshot
        #[arg(long)]
        commit: bool,
    },

    /// Rebuild the hot store from the committed snapshot
    Restore,

    /// Archive old done nodes if the hot store is over its cap
    Evict,

    /// Reconcile with the external issue tracker
    Sync {
        /// Plan only; make no tracker or local writes
        #[arg(long)]
        dry_run: bool,

        /// Restrict to these nodes
        #[arg(long = "node")]
        nodes: Vec<String>,
    },

    /// Create an external issue for a node
    Publish {
        /// Node id or alias
        node: String,
    },

    /// Show store health
    Status,
}

/// Journal subcommands
#[derive(Subcommand, Debug)]
pub enum OpCommands {
    /// Start a journaled operation and print its id
    Begin {
        /// Operation type
        op_type: String,

        /// Arguments as JSON
        #[arg(long)]
        args: Option<String>,
    },

    /// Record that a step is about to run
    Step {
        n: u32,
        action: String,

        #[arg(long)]
        args: Option<String>,

        /// Operation id (defaults to the operation in progress)
        #[arg(long)]
        op: Option<String>,
    },

    /// Record that a step finished
    Complete {
        n: u32,

        #[arg(long)]
        op: Option<String>,
    },

    /// Mark an operation finished
    End {
        #[arg(long)]
        op: Option<String>,
    },

    /// Show the earliest unfinished operation
    Recover,

    /// Drop finished operations from the journal
    Clean,
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let options = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        let mut weave = Weave::discover(self.repo.as_deref())?;

        match self.command {
            Commands::Add {
                text,
                status,
                alias,
                priority,
                kind,
                meta,
            } => node::run_add(
                &mut weave,
                node::AddOptions {
                    text,
                    status,
                    alias,
                    priority,
                    kind,
                    meta,
                },
                options,
            ),
            Commands::Update {
                node,
                text,
                status,
                alias,
                clear_alias,
                priority,
                kind,
                meta,
                reopen,
                force,
            } => node::run_update(
                &mut weave,
                node::UpdateOptions {
                    node,
                    text,
                    status,
                    alias,
                    clear_alias,
                    priority,
                    kind,
                    meta,
                    reopen,
                    force,
                },
                options,
            ),
            Commands::Done { node, learning } => {
                node::run_done(&mut weave, &node, learning, options)
            }
            Commands::Delete { node, force } => node::run_delete(&mut weave, &node, force, options),
            Commands::Show { node } => node::run_show(&weave, &node, options),
            Commands::List {
                status,
                kind,
                priority,
                search,
                limit,
            } => node::run_list(
                &weave,
                node::ListOptions {
                    status,
                    kind,
                    priority,
                    search,
                    limit,
                },
                options,
            ),
            Commands::Ready => node::run_ready(&weave, options),
            Commands::Link {
                source,
                target,
                edge_type,
                weight,
                context,
            } => node::run_link(
                &mut weave,
                node::LinkOptions {
                    source,
                    target,
                    edge_type,
                    weight,
                    context,
                },
                options,
            ),
            Commands::Unlink {
                source,
                target,
                edge_type,
            } => node::run_unlink(&mut weave, &source, &target, &edge_type, options),
            Commands::Context { node } => node::run_context(&weave, &node, options),
            Commands::Op(cmd) => match cmd {
                OpCommands::Begin { op_type, args } => {
                    op::run_begin(&weave, &op_type, args.as_deref(), options)
                }
                OpCommands::Step { n, action, args, op } => op::run_step(
                    &weave,
                    op.as_deref(),
                    n,
                    &action,
                    args.as_deref(),
                    options,
                ),
                OpCommands::Complete { n, op } => {
                    op::run_complete(&weave, op.as_deref(), n, options)
                }
                OpCommands::End { op } => op::run_end(&weave, op.as_deref(), options),
                OpCommands::Recover => op::run_recover(&weave, options),
                OpCommands::Clean => op::run_clean(&weave, options),
            },
            Commands::Flush { commit } => store::run_flush(&weave, commit, options),
            Commands::Restore => store::run_restore(&mut weave, options),
            Commands::Evict => store::run_evict(&mut weave, options),
            Commands::Status => store::run_status(&weave, options),
            Commands::Sync { dry_run, nodes } => {
                sync::run_sync(&mut weave, dry_run, nodes, options)
            }
            Commands::Publish { node } => sync::run_publish(&mut weave, &node, options),
        }
    }
}

/// Parse an optional JSON argument.
fn parse_json_arg(flag: &str, raw: Option<&str>) -> Result<Option<serde_json::Value>> {
    raw.map(|raw| {
        serde_json::from_str(raw).map_err(|err| {
            crate::error::Error::Validation(format!("--{flag} is not valid JSON: {err}"))
        })
    })
    .transpose()
}
