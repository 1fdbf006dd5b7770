//! Node and edge commands: add, update, done, delete, show, list, ready,
//! link, unlink, context.

use serde::Serialize;

use crate::context::ContextPack;
use crate::error::{Error, Result};
use crate::graph::{
    DeleteOutcome, Edge, EdgeType, Metadata, MetadataPatch, NewNode, Node, NodeFilter, NodeUpdate,
    Status,
};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::weave::Weave;

use super::parse_json_arg;

pub struct AddOptions {
    pub text: String,
    pub status: Option<String>,
    pub alias: Option<String>,
    pub priority: Option<i64>,
    pub kind: Option<String>,
    pub meta: Option<String>,
}

pub struct UpdateOptions {
    pub node: String,
    pub text: Option<String>,
    pub status: Option<String>,
    pub alias: Option<String>,
    pub clear_alias: bool,
    pub priority: Option<i64>,
    pub kind: Option<String>,
    pub meta: Option<String>,
    pub reopen: bool,
    pub force: bool,
}

pub struct ListOptions {
    pub status: Option<String>,
    pub kind: Option<String>,
    pub priority: Option<i64>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

pub struct LinkOptions {
    pub source: String,
    pub target: String,
    pub edge_type: String,
    pub weight: Option<f64>,
    pub context: Option<String>,
}

#[derive(Serialize)]
struct ShowReport<'a> {
    node: &'a Node,
    edges: &'a [Edge],
}

#[derive(Serialize)]
struct UnlinkReport<'a> {
    source: &'a str,
    target: &'a str,
    #[serde(rename = "type")]
    edge_type: EdgeType,
}

pub fn run_add(weave: &mut Weave, opts: AddOptions, options: OutputOptions) -> Result<()> {
    let mut input = NewNode::new(opts.text);
    if let Some(status) = opts.status.as_deref() {
        input = input.status(status.parse()?);
    }
    if let Some(alias) = opts.alias {
        input = input.alias(alias);
    }
    if let Some(metadata) = metadata_arg(opts.meta.as_deref(), opts.priority, opts.kind)? {
        input = input.metadata(metadata);
    }

    let node = weave.create_node(input)?;

    let mut human = HumanOutput::new(format!("wv add: created {}", node.id));
    push_node_summary(&mut human, &node);
    human.push_next_step(format!("wv link {} <target> blocks", node.id));
    emit_success(options, "add", &node, Some(&human))
}

pub fn run_update(weave: &mut Weave, opts: UpdateOptions, options: OutputOptions) -> Result<()> {
    let alias = if opts.clear_alias {
        Some(None)
    } else {
        opts.alias.map(Some)
    };
    let update = NodeUpdate {
        text: opts.text,
        status: opts.status.as_deref().map(str::parse).transpose()?,
        metadata: patch_arg(opts.meta.as_deref(), opts.priority, opts.kind)?,
        alias,
        reopen: opts.reopen,
        force: opts.force,
    };

    let outcome = weave.update_node(&opts.node, update)?;

    let mut human = HumanOutput::new(format!("wv update: {}", outcome.node.id));
    push_node_summary(&mut human, &outcome.node);
    for advisory in &outcome.advisories {
        human.push_warning(advisory.clone());
    }
    emit_success(options, "update", &outcome, Some(&human))
}

pub fn run_done(
    weave: &mut Weave,
    reference: &str,
    learning: Option<String>,
    options: OutputOptions,
) -> Result<()> {
    let mut update = NodeUpdate::status(Status::Done);
    if let Some(learning) = learning {
        update.metadata = Some(MetadataPatch::with(
            "learning",
            serde_json::Value::String(learning),
        ));
    }

    let outcome = weave.update_node(reference, update)?;

    let mut human = HumanOutput::new(format!("wv done: {}", outcome.node.id));
    push_node_summary(&mut human, &outcome.node);
    for advisory in &outcome.advisories {
        human.push_warning(advisory.clone());
    }
    human.push_next_step("wv ready");
    emit_success(options, "done", &outcome, Some(&human))
}

pub fn run_delete(
    weave: &mut Weave,
    reference: &str,
    force: bool,
    options: OutputOptions,
) -> Result<()> {
    let outcome = weave.delete_node(reference, force)?;
    match &outcome {
        DeleteOutcome::Refused {
            id,
            dependents,
            warning,
        } => {
            if !options.json && !options.quiet {
                eprintln!("warning: {warning}");
            }
            Err(Error::HasDependents {
                id: id.clone(),
                dependents: dependents.clone(),
            })
        }
        DeleteOutcome::Deleted { id, edges_removed } => {
            let mut human = HumanOutput::new("wv delete: deleted");
            human.push_summary("id", id.clone());
            human.push_summary("edges removed", edges_removed.to_string());
            emit_success(options, "delete", &outcome, Some(&human))
        }
    }
}

pub fn run_show(weave: &Weave, reference: &str, options: OutputOptions) -> Result<()> {
    let node = weave.get_node(reference)?;
    let edges = weave.edges(&node.id)?;

    let mut human = HumanOutput::new(format!("{}: {}", node.id, node.text));
    push_node_summary(&mut human, &node);
    human.push_summary("created", node.created_at.to_rfc3339());
    human.push_summary("updated", node.updated_at.to_rfc3339());
    for edge in &edges {
        human.push_detail(edge_line(edge));
    }
    emit_success(
        options,
        "show",
        &ShowReport {
            node: &node,
            edges: &edges,
        },
        Some(&human),
    )
}

pub fn run_list(weave: &Weave, opts: ListOptions, options: OutputOptions) -> Result<()> {
    let filter = NodeFilter {
        status: opts.status.as_deref().map(str::parse).transpose()?,
        kind: opts.kind,
        max_priority: opts.priority,
        search: opts.search,
        limit: opts.limit,
    };
    let nodes = weave.list_nodes(&filter)?;

    let mut human = HumanOutput::new(format!("wv list: {} node(s)", nodes.len()));
    for node in &nodes {
        human.push_detail(node_line(node));
    }
    if nodes.is_empty() {
        human.push_next_step("wv add \"...\"");
    }
    emit_success(options, "list", &nodes, Some(&human))
}

pub fn run_ready(weave: &Weave, options: OutputOptions) -> Result<()> {
    let nodes = weave.ready_nodes()?;

    let mut human = HumanOutput::new(format!("wv ready: {} node(s)", nodes.len()));
    for node in &nodes {
        human.push_detail(node_line(node));
    }
    if let Some(first) = nodes.first() {
        human.push_next_step(format!("wv update {} --status active", first.id));
    }
    emit_success(options, "ready", &nodes, Some(&human))
}

pub fn run_link(weave: &mut Weave, opts: LinkOptions, options: OutputOptions) -> Result<()> {
    let edge_type: EdgeType = opts.edge_type.parse()?;
    let context = parse_json_arg("context", opts.context.as_deref())?;

    let edge = weave.link_nodes(&opts.source, &opts.target, edge_type, opts.weight, context)?;

    let human = HumanOutput::new(format!("wv link: {}", edge_line(&edge)));
    emit_success(options, "link", &edge, Some(&human))
}

pub fn run_unlink(
    weave: &mut Weave,
    source: &str,
    target: &str,
    edge_type: &str,
    options: OutputOptions,
) -> Result<()> {
    let edge_type: EdgeType = edge_type.parse()?;
    weave.unlink_nodes(source, target, edge_type)?;

    let human = HumanOutput::new(format!("wv unlink: {source} --{edge_type}--> {target}"));
    emit_success(
        options,
        "unlink",
        &UnlinkReport {
            source,
            target,
            edge_type,
        },
        Some(&human),
    )
}

pub fn run_context(weave: &Weave, reference: &str, options: OutputOptions) -> Result<()> {
    let pack = weave.get_context(reference)?;
    let human = context_human(&pack);
    emit_success(options, "context", &pack, Some(&human))
}

fn context_human(pack: &ContextPack) -> HumanOutput {
    let mut human = HumanOutput::new(format!("{}: {}", pack.node.id, pack.node.text));
    human.push_summary("status", pack.node.status.to_string());
    human.push_summary("blockers", pack.blockers.len().to_string());
    human.push_summary("ancestors", pack.ancestors.len().to_string());
    human.push_summary("related", pack.related.len().to_string());

    for blocker in &pack.blockers {
        human.push_detail(format!(
            "blocked by {} [{}] {} (depth {})",
            blocker.node.id, blocker.node.status, blocker.node.text, blocker.depth
        ));
    }
    for ancestor in &pack.ancestors {
        human.push_detail(format!("part of {} {}", ancestor.node.id, ancestor.node.text));
        for learning in &ancestor.learnings {
            human.push_detail(format!("  {}: {}", learning.key, learning.value));
        }
    }
    for related in &pack.related {
        human.push_detail(format!(
            "{} {} ({:.2}) {}",
            related.edge_type, related.node.id, related.weight, related.node.text
        ));
    }
    for pitfall in &pack.pitfalls {
        human.push_warning(format!("pitfall from {}: {}", pitfall.node_id, pitfall.text));
    }
    for other in &pack.contradictions {
        human.push_warning(format!("contradicted by {} {}", other.id, other.text));
        human.push_next_step(format!(
            "wv unlink {} {} contradicts",
            other.id, pack.node.id
        ));
    }
    human
}

/// Build metadata from `--meta` JSON plus the `--priority`/`--type` shortcuts.
fn metadata_arg(
    raw: Option<&str>,
    priority: Option<i64>,
    kind: Option<String>,
) -> Result<Option<Metadata>> {
    if raw.is_none() && priority.is_none() && kind.is_none() {
        return Ok(None);
    }
    let mut metadata = match raw {
        Some(raw) => Metadata::parse(raw)?,
        None => Metadata::default(),
    };
    if priority.is_some() {
        metadata.priority = priority;
    }
    if kind.is_some() {
        metadata.kind = kind;
    }
    Ok(Some(metadata))
}

/// Like [`metadata_arg`], but a `null` in `--meta` clears the key.
fn patch_arg(
    raw: Option<&str>,
    priority: Option<i64>,
    kind: Option<String>,
) -> Result<Option<MetadataPatch>> {
    if raw.is_none() && priority.is_none() && kind.is_none() {
        return Ok(None);
    }
    let mut patch = match raw {
        Some(raw) => MetadataPatch::parse(raw)?,
        None => MetadataPatch::default(),
    };
    if priority.is_some() {
        patch.priority = Some(priority);
    }
    if kind.is_some() {
        patch.kind = Some(kind);
    }
    Ok(Some(patch))
}

fn push_node_summary(human: &mut HumanOutput, node: &Node) {
    human.push_summary("id", node.id.clone());
    human.push_summary("status", node.status.to_string());
    if let Some(alias) = &node.alias {
        human.push_summary("alias", alias.clone());
    }
    if let Some(priority) = node.metadata.priority {
        human.push_summary("priority", priority.to_string());
    }
    if let Some(kind) = &node.metadata.kind {
        human.push_summary("type", kind.clone());
    }
}

fn node_line(node: &Node) -> String {
    let mut line = format!("{} [{}] {}", node.id, node.status, node.text);
    if let Some(alias) = &node.alias {
        line.push_str(&format!(" ({alias})"));
    }
    line
}

fn edge_line(edge: &Edge) -> String {
    format!(
        "{} --{}--> {} (weight {})",
        edge.source, edge.edge_type, edge.target, edge.weight
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_shortcuts_override_json() {
        let metadata = metadata_arg(Some(r#"{"priority": 5, "owner": "ana"}"#), Some(1), None)
            .unwrap()
            .unwrap();
        assert_eq!(metadata.priority, Some(1));
        assert_eq!(metadata.get_str("owner"), Some("ana"));
        assert!(metadata_arg(None, None, None).unwrap().is_none());
    }

    #[test]
    fn metadata_rejects_non_objects() {
        assert!(matches!(
            metadata_arg(Some("[1, 2]"), None, None),
            Err(Error::Validation(_))
        ));
    }
}
