//! Three-phase reconciliation between the graph and an issue tracker.
//!
//! 1. Reopen guard: an issue we closed that now reads as open is checked
//!    for our close marker before it is treated as a human reopen.
//! 2. State and labels: local status, priority and type are pushed;
//!    only open/closed state is pulled back.
//! 3. Structure: parent issues get a managed body section listing their
//!    children, refreshed even when every child is already closed.
//!
//! Every write is skipped when the tracker already matches, so a second
//! run with no changes performs no writes. Tracker failures are counted
//! per item and reported at the end; local store failures propagate.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::graph::model::{MetadataPatch, Node, NodeUpdate, Status};
use crate::graph::store::GraphStore;
use crate::sync::tracker::{Issue, IssueState, IssueTracker};

/// Appended to the comment posted when weave closes an issue
pub const CLOSE_MARKER: &str = "<!-- weave:closed -->";

pub const SECTION_BEGIN: &str = "<!-- weave:begin -->";
pub const SECTION_END: &str = "<!-- weave:end -->";

/// Metadata key holding the [`SyncRecord`]
pub const EXTERNAL_KEY: &str = "external";

const MANAGED_LABEL_PREFIXES: [&str; 3] = ["wv:", "priority:", "type:"];

const TITLE_MAX_CHARS: usize = 200;

/// Mapping between a node and its issue, persisted in node metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub issue: u64,
    pub last_state: IssueState,
    #[serde(default)]
    pub closed_by_us: bool,
}

impl SyncRecord {
    pub fn from_node(node: &Node) -> Result<Option<Self>> {
        match node.metadata.extra.get(EXTERNAL_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|err| {
                Error::Validation(format!("node {} has a malformed sync record: {err}", node.id))
            }),
        }
    }

    fn to_patch(&self) -> Result<MetadataPatch> {
        Ok(MetadataPatch::with(EXTERNAL_KEY, serde_json::to_value(self)?))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Plan only: perform reads, no tracker or local writes
    pub dry_run: bool,
    /// Restrict to these node references (all mapped nodes when empty)
    pub nodes: Vec<String>,
}

/// Outcome of the reopen guard for one issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReopenVerdict {
    /// Issue state is not "open after we last saw it closed"
    NotApplicable,
    /// Our close marker is the latest comment: tracker lag, not a reopen
    StaleLag,
    /// Treated as a deliberate reopen
    HumanReopen,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncAction {
    pub node: String,
    pub issue: u64,
    pub action: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub examined: usize,
    /// Tracker write calls made (or planned, in a dry run)
    pub writes: usize,
    pub local_updates: usize,
    pub failures: usize,
    pub actions: Vec<SyncAction>,
    /// Nodes whose open-looking issue was judged tracker lag
    pub stale: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub node: String,
    pub issue: u64,
    pub state: IssueState,
}

/// Classify an issue that reads open for a node we last saw closed.
pub fn reopen_verdict<T: IssueTracker>(
    tracker: &mut T,
    record: &SyncRecord,
    issue: &Issue,
) -> ReopenVerdict {
    if issue.state != IssueState::Open || record.last_state != IssueState::Closed {
        return ReopenVerdict::NotApplicable;
    }
    if !record.closed_by_us {
        return ReopenVerdict::HumanReopen;
    }
    match tracker.latest_comment(issue) {
        Ok(Some(comment)) if comment.body.contains(CLOSE_MARKER) => ReopenVerdict::StaleLag,
        Ok(_) => ReopenVerdict::HumanReopen,
        Err(err) => {
            tracing::warn!(issue = issue.number, error = %err, "could not read latest comment; assuming reopen");
            ReopenVerdict::HumanReopen
        }
    }
}

/// Labels weave owns on an issue for this node.
pub fn managed_labels(node: &Node) -> Vec<String> {
    let mut labels = vec![format!("wv:{}", node.status)];
    if let Some(priority) = node.metadata.priority {
        labels.push(format!("priority:{priority}"));
    }
    if let Some(kind) = &node.metadata.kind {
        labels.push(format!("type:{kind}"));
    }
    labels
}

fn is_managed_label(label: &str) -> bool {
    MANAGED_LABEL_PREFIXES
        .iter()
        .any(|prefix| label.starts_with(prefix))
}

/// Unmanaged labels kept, managed labels replaced.
fn merge_labels(current: &[String], managed: &[String]) -> Vec<String> {
    let merged: BTreeSet<String> = current
        .iter()
        .filter(|label| !is_managed_label(label))
        .cloned()
        .chain(managed.iter().cloned())
        .collect();
    merged.into_iter().collect()
}

/// Render the managed body section for a parent node.
pub fn render_section(children: &[(Node, Option<u64>)], blocks: &[(String, String)]) -> String {
    let mut out = String::new();
    out.push_str(SECTION_BEGIN);
    out.push_str("\n### Work items\n\n");
    for (child, issue) in children {
        let mark = if child.status == Status::Done { "x" } else { " " };
        let reference = match issue {
            Some(number) => format!("#{number}"),
            None => format!("`{}`", child.id),
        };
        out.push_str(&format!("- [{mark}] {} ({reference})\n", first_line(&child.text)));
    }
    if !children.is_empty() {
        out.push_str("\n```mermaid\ngraph TD\n");
        for (child, _) in children {
            out.push_str(&format!(
                "  {}[\"{}\"]\n",
                mermaid_id(&child.id),
                first_line(&child.text).replace('"', "'")
            ));
        }
        for (source, target) in blocks {
            out.push_str(&format!("  {} --> {}\n", mermaid_id(source), mermaid_id(target)));
        }
        out.push_str("```\n");
    }
    out.push_str(SECTION_END);
    out
}

/// Replace (or append) the managed section in an issue body.
pub fn splice_section(body: &str, section: &str) -> String {
    if let (Some(start), Some(end)) = (body.find(SECTION_BEGIN), body.find(SECTION_END)) {
        if start < end {
            let tail = &body[end + SECTION_END.len()..];
            return format!("{}{section}{tail}", &body[..start]);
        }
    }
    let trimmed = body.trim_end();
    if trimmed.is_empty() {
        section.to_string()
    } else {
        format!("{trimmed}\n\n{section}")
    }
}

fn mermaid_id(id: &str) -> String {
    id.replace('-', "_")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

fn issue_title(node: &Node) -> String {
    let line = first_line(&node.text);
    if line.chars().count() <= TITLE_MAX_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(TITLE_MAX_CHARS - 3).collect();
        format!("{cut}...")
    }
}

fn close_comment(node: &Node) -> String {
    format!("Closed by weave: `{}` is done.\n\n{CLOSE_MARKER}", node.id)
}

/// One reconciliation run
struct Run<'t, T: IssueTracker> {
    tracker: &'t mut T,
    report: SyncReport,
}

impl<T: IssueTracker> Run<'_, T> {
    /// Perform (or plan) one tracker write. Returns whether it succeeded.
    fn write<F>(&mut self, node: &str, issue: u64, action: String, op: F) -> bool
    where
        F: FnOnce(&mut T) -> Result<()>,
    {
        if self.report.dry_run {
            self.report.writes += 1;
            self.report.actions.push(SyncAction {
                node: node.to_string(),
                issue,
                action,
            });
            return true;
        }
        match op(self.tracker) {
            Ok(()) => {
                self.report.writes += 1;
                self.report.actions.push(SyncAction {
                    node: node.to_string(),
                    issue,
                    action,
                });
                true
            }
            Err(err) => {
                self.fail(node, issue, &action, &err);
                false
            }
        }
    }

    fn fail(&mut self, node: &str, issue: u64, action: &str, err: &Error) {
        tracing::warn!(node, issue, action, error = %err, "tracker call failed; continuing");
        self.report.failures += 1;
        self.report
            .errors
            .push(format!("{node} (#{issue}) {action}: {err}"));
    }
}

/// Converge every mapped node (or `options.nodes`) with the tracker.
pub fn reconcile<T: IssueTracker>(
    store: &mut GraphStore,
    tracker: &mut T,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let targets = mapped_nodes(store, &options.nodes)?;
    let mut run = Run {
        tracker,
        report: SyncReport {
            dry_run: options.dry_run,
            examined: targets.len(),
            ..SyncReport::default()
        },
    };

    // Reads first; a node whose issue cannot be read is skipped.
    let mut live: Vec<(Node, SyncRecord, Issue)> = Vec::new();
    for (node, record) in targets {
        match run.tracker.get_issue(record.issue) {
            Ok(issue) => live.push((node, record, issue)),
            Err(err) => run.fail(&node.id, record.issue, "read", &err),
        }
    }

    // Phases 1 and 2, per node.
    let mut issues: BTreeMap<String, Issue> = BTreeMap::new();
    for (node, record, issue) in live {
        let verdict = reopen_verdict(run.tracker, &record, &issue);
        let node = converge_state(store, &mut run, node, record, &issue, verdict)?;
        push_labels(&mut run, &node, &issue);
        issues.insert(node.id.clone(), issue);
    }

    // Phase 3: parents, after local state settled.
    for (node_id, issue) in &issues {
        let children = store.children(node_id)?;
        if children.is_empty() {
            continue;
        }
        let section = parent_section(store, &children)?;
        let body = splice_section(&issue.body, &section);
        if body != issue.body {
            run.write(node_id, issue.number, "update body".to_string(), |tracker| {
                tracker.set_body(issue.number, &body)
            });
        }
    }

    let report = run.report;
    tracing::info!(
        examined = report.examined,
        writes = report.writes,
        failures = report.failures,
        dry_run = report.dry_run,
        "external sync finished"
    );
    Ok(report)
}

fn converge_state<T: IssueTracker>(
    store: &mut GraphStore,
    run: &mut Run<'_, T>,
    node: Node,
    record: SyncRecord,
    issue: &Issue,
    verdict: ReopenVerdict,
) -> Result<Node> {
    let mut next = record.clone();
    let mut local_status = None;
    let local_done = node.status == Status::Done;

    match (issue.state, record.last_state, local_done) {
        (IssueState::Open, IssueState::Closed, true) if verdict == ReopenVerdict::StaleLag => {
            tracing::info!(node = %node.id, issue = issue.number, "issue reads open after our close; treating as tracker lag");
            run.report.stale.push(node.id.clone());
        }
        (IssueState::Open, IssueState::Closed, true) => {
            // Reopened on the tracker: pull it.
            local_status = Some(Status::Todo);
            next.last_state = IssueState::Open;
            next.closed_by_us = false;
        }
        (IssueState::Open, _, true) => {
            let closed = run.write(&node.id, issue.number, "close".to_string(), |tracker| {
                // A previous run may have commented and then failed to close.
                let marked = matches!(
                    tracker.latest_comment(issue),
                    Ok(Some(comment)) if comment.body.contains(CLOSE_MARKER)
                );
                if !marked {
                    tracker.comment(issue.number, &close_comment(&node))?;
                }
                tracker.set_state(issue.number, IssueState::Closed)
            });
            if closed {
                next.last_state = IssueState::Closed;
                next.closed_by_us = true;
            }
        }
        (IssueState::Open, _, false) => {
            next.last_state = IssueState::Open;
            next.closed_by_us = false;
        }
        (IssueState::Closed, IssueState::Open, false) => {
            // Closed on the tracker since we last looked: pull it.
            local_status = Some(Status::Done);
            next.last_state = IssueState::Closed;
            next.closed_by_us = false;
        }
        (IssueState::Closed, IssueState::Closed, false) => {
            // Reopened locally: push it.
            let reopened = run.write(&node.id, issue.number, "reopen".to_string(), |tracker| {
                tracker.set_state(issue.number, IssueState::Open)
            });
            if reopened {
                next.last_state = IssueState::Open;
                next.closed_by_us = false;
            }
        }
        (IssueState::Closed, _, true) => {
            next.last_state = IssueState::Closed;
        }
    }

    if next == record && local_status.is_none() {
        return Ok(node);
    }
    if run.report.dry_run {
        let mut planned = node;
        if let Some(status) = local_status {
            run.report.actions.push(SyncAction {
                node: planned.id.clone(),
                issue: issue.number,
                action: format!("set local status {status}"),
            });
            planned.status = status;
        }
        return Ok(planned);
    }

    let update = NodeUpdate {
        status: local_status,
        metadata: Some(next.to_patch()?),
        reopen: local_status == Some(Status::Todo),
        force: local_status == Some(Status::Done),
        ..NodeUpdate::default()
    };
    let outcome = store.update_node(&node.id, update)?;
    run.report.local_updates += 1;
    if let Some(status) = local_status {
        tracing::info!(node = %node.id, issue = issue.number, status = %status, "pulled issue state");
        run.report.actions.push(SyncAction {
            node: node.id.clone(),
            issue: issue.number,
            action: format!("set local status {status}"),
        });
    }
    Ok(outcome.node)
}

fn push_labels<T: IssueTracker>(run: &mut Run<'_, T>, node: &Node, issue: &Issue) {
    let desired = merge_labels(&issue.labels, &managed_labels(node));
    let current: BTreeSet<&String> = issue.labels.iter().collect();
    let wanted: BTreeSet<&String> = desired.iter().collect();
    if current != wanted {
        run.write(&node.id, issue.number, "set labels".to_string(), |tracker| {
            tracker.set_labels(issue.number, &desired)
        });
    }
}

fn parent_section(store: &GraphStore, children: &[Node]) -> Result<String> {
    let ids: BTreeSet<&str> = children.iter().map(|child| child.id.as_str()).collect();
    let mut rows = Vec::with_capacity(children.len());
    let mut blocks = Vec::new();
    for child in children {
        let issue = SyncRecord::from_node(child)?.map(|record| record.issue);
        rows.push((child.clone(), issue));
        for edge in store.edges_of(&child.id)? {
            if edge.edge_type == crate::graph::EdgeType::Blocks
                && edge.source == child.id
                && ids.contains(edge.target.as_str())
            {
                blocks.push((edge.source, edge.target));
            }
        }
    }
    Ok(render_section(&rows, &blocks))
}

fn mapped_nodes(store: &GraphStore, refs: &[String]) -> Result<Vec<(Node, SyncRecord)>> {
    let nodes = if refs.is_empty() {
        store.list(&crate::graph::NodeFilter::default())?
    } else {
        refs.iter()
            .map(|reference| store.get(reference))
            .collect::<Result<Vec<_>>>()?
    };

    let mut out = Vec::new();
    for node in nodes {
        match SyncRecord::from_node(&node)? {
            Some(record) => out.push((node, record)),
            None if !refs.is_empty() => {
                return Err(Error::Validation(format!(
                    "{} is not linked to an issue; publish it first",
                    node.id
                )));
            }
            None => {}
        }
    }
    Ok(out)
}

/// Create an issue for a node and record the mapping.
pub fn publish<T: IssueTracker>(
    store: &mut GraphStore,
    tracker: &mut T,
    reference: &str,
) -> Result<PublishReport> {
    let node = store.get(reference)?;
    if let Some(record) = SyncRecord::from_node(&node)? {
        return Err(Error::Conflict(format!(
            "{} is already linked to issue #{}",
            node.id, record.issue
        )));
    }

    let mut body = format!("{}\n\nTracked by weave as `{}`.", node.text.trim(), node.id);
    let children = store.children(&node.id)?;
    if !children.is_empty() {
        body = splice_section(&body, &parent_section(store, &children)?);
    }
    let issue = tracker.create_issue(&issue_title(&node), &body, &managed_labels(&node))?;
    let mut record = SyncRecord {
        issue: issue.number,
        last_state: IssueState::Open,
        closed_by_us: false,
    };
    // Persist the mapping before any follow-up call so a failure below
    // cannot lead to a duplicate issue.
    store.update_node(
        &node.id,
        NodeUpdate {
            metadata: Some(record.to_patch()?),
            ..NodeUpdate::default()
        },
    )?;

    if node.status == Status::Done {
        tracker.comment(issue.number, &close_comment(&node))?;
        tracker.set_state(issue.number, IssueState::Closed)?;
        record.last_state = IssueState::Closed;
        record.closed_by_us = true;
        store.update_node(
            &node.id,
            NodeUpdate {
                metadata: Some(record.to_patch()?),
                ..NodeUpdate::default()
            },
        )?;
    }

    tracing::info!(node = %node.id, issue = issue.number, "published node");
    Ok(PublishReport {
        node: node.id,
        issue: issue.number,
        state: record.last_state,
    })
}
