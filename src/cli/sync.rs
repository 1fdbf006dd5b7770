//! External tracker commands: sync, publish

use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::sync::{IssueState, SyncOptions};
use crate::weave::Weave;

pub fn run_sync(
    weave: &mut Weave,
    dry_run: bool,
    nodes: Vec<String>,
    options: OutputOptions,
) -> Result<()> {
    let report = weave.sync_external(&SyncOptions { dry_run, nodes })?;

    let header = if report.dry_run {
        format!("wv sync: {} planned write(s)", report.writes)
    } else {
        format!("wv sync: {} write(s)", report.writes)
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("examined", report.examined.to_string());
    human.push_summary("local updates", report.local_updates.to_string());
    human.push_summary("failures", report.failures.to_string());
    for action in &report.actions {
        human.push_detail(format!("{} #{}: {}", action.node, action.issue, action.action));
    }
    for node in &report.stale {
        human.push_detail(format!("{node}: issue reopen looks like tracker lag; kept done"));
    }
    for error in &report.errors {
        human.push_warning(error.clone());
    }
    if report.failures > 0 {
        human.push_next_step("wv sync");
    }
    emit_success(options, "sync", &report, Some(&human))
}

pub fn run_publish(weave: &mut Weave, reference: &str, options: OutputOptions) -> Result<()> {
    let report = weave.publish(reference)?;

    let mut human = HumanOutput::new(format!(
        "wv publish: {} -> issue #{}",
        report.node, report.issue
    ));
    let state = match report.state {
        IssueState::Open => "open",
        IssueState::Closed => "closed",
    };
    human.push_summary("state", state);
    emit_success(options, "publish", &report, Some(&human))
}
