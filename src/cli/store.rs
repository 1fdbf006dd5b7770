//! Persistence commands: flush, restore, evict, status

use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::weave::Weave;

pub fn run_flush(weave: &Weave, commit: bool, options: OutputOptions) -> Result<()> {
    let report = weave.flush_to_cold(commit)?;

    let mut human = HumanOutput::new("wv flush: snapshot written");
    human.push_summary("path", report.path.display().to_string());
    human.push_summary("nodes", report.nodes.to_string());
    human.push_summary("edges", report.edges.to_string());
    human.push_summary("bytes", report.bytes.to_string());
    match &report.commit {
        Some(oid) => human.push_summary("commit", oid.clone()),
        None if commit => human.push_detail("snapshot unchanged; nothing to commit"),
        None => human.push_next_step("wv flush --commit"),
    }
    emit_success(options, "flush", &report, Some(&human))
}

pub fn run_restore(weave: &mut Weave, options: OutputOptions) -> Result<()> {
    let report = weave.restore_from_cold()?;

    let mut human = HumanOutput::new("wv restore: hot store rebuilt from snapshot");
    human.push_summary("snapshot", report.path.display().to_string());
    human.push_summary("nodes", report.nodes.to_string());
    human.push_summary("edges", report.edges.to_string());
    emit_success(options, "restore", &report, Some(&human))
}

pub fn run_evict(weave: &mut Weave, options: OutputOptions) -> Result<()> {
    let report = weave.evict()?;

    let header = match &report.skipped {
        Some(reason) => format!("wv evict: skipped ({reason})"),
        None => format!("wv evict: {} node(s) archived", report.evicted.len()),
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("size before", report.size_before.to_string());
    human.push_summary("size after", report.size_after.to_string());
    if let Some(archive) = &report.archive {
        human.push_summary("archive", archive.display().to_string());
    }
    for id in &report.evicted {
        human.push_detail(id.clone());
    }
    emit_success(options, "evict", &report, Some(&human))
}

pub fn run_status(weave: &Weave, options: OutputOptions) -> Result<()> {
    let health = weave.health()?;

    let mut human = HumanOutput::new(format!("wv status: {}", health.repo_root.display()));
    human.push_summary("hot store", health.hot_db.display().to_string());
    human.push_summary(
        "hot size",
        format!("{} / {} bytes", health.hot_size, health.hot_size_max),
    );
    human.push_summary("nodes", health.nodes.to_string());
    human.push_summary("edges", health.edges.to_string());
    for (status, count) in &health.by_status {
        if *count > 0 {
            human.push_detail(format!("{status}: {count}"));
        }
    }
    match &health.snapshot {
        Some(snapshot) => {
            human.push_summary("snapshot", snapshot.path.display().to_string());
        }
        None => human.push_summary("snapshot", "none"),
    }
    for advisory in &health.advisories {
        human.push_warning(advisory.clone());
    }
    if health.incomplete_ops > 0 {
        human.push_next_step("wv op recover");
    }
    emit_success(options, "status", &health, Some(&human))
}
