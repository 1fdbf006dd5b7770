//! wv op commands: journal bookkeeping for multi-step operations

use serde::Serialize;

use crate::error::Result;
use crate::journal::Recovery;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::weave::Weave;

use super::parse_json_arg;

#[derive(Serialize)]
struct OpReport<'a> {
    op_id: &'a str,
    op_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<u32>,
}

pub fn run_begin(
    weave: &Weave,
    op_type: &str,
    args: Option<&str>,
    options: OutputOptions,
) -> Result<()> {
    let args = parse_json_arg("args", args)?.unwrap_or(serde_json::Value::Null);
    let op = weave.begin_op(op_type, args)?;

    let mut human = HumanOutput::new(op.op_id().to_string());
    human.push_summary("type", op.op_type());
    human.push_next_step(format!("wv op step 1 <action> --op {}", op.op_id()));
    emit_success(
        options,
        "op begin",
        &OpReport {
            op_id: op.op_id(),
            op_type: op.op_type(),
            step: None,
        },
        Some(&human),
    )
}

pub fn run_step(
    weave: &Weave,
    op_id: Option<&str>,
    n: u32,
    action: &str,
    args: Option<&str>,
    options: OutputOptions,
) -> Result<()> {
    let args = parse_json_arg("args", args)?;
    let op = weave.resume_op(op_id)?;
    op.step(n, action, args)?;

    let human = HumanOutput::new(format!("wv op step: {} step {n} {action}", op.op_id()));
    emit_success(
        options,
        "op step",
        &OpReport {
            op_id: op.op_id(),
            op_type: op.op_type(),
            step: Some(n),
        },
        Some(&human),
    )
}

pub fn run_complete(
    weave: &Weave,
    op_id: Option<&str>,
    n: u32,
    options: OutputOptions,
) -> Result<()> {
    let op = weave.resume_op(op_id)?;
    op.complete(n)?;

    let human = HumanOutput::new(format!("wv op complete: {} step {n}", op.op_id()));
    emit_success(
        options,
        "op complete",
        &OpReport {
            op_id: op.op_id(),
            op_type: op.op_type(),
            step: Some(n),
        },
        Some(&human),
    )
}

pub fn run_end(weave: &Weave, op_id: Option<&str>, options: OutputOptions) -> Result<()> {
    let op = weave.resume_op(op_id)?;
    let id = op.op_id().to_string();
    let op_type = op.op_type().to_string();
    op.end()?;

    let human = HumanOutput::new(format!("wv op end: {id}"));
    emit_success(
        options,
        "op end",
        &OpReport {
            op_id: &id,
            op_type: &op_type,
            step: None,
        },
        Some(&human),
    )
}

pub fn run_recover(weave: &Weave, options: OutputOptions) -> Result<()> {
    let recovery = weave.recover_op()?;

    let human = match &recovery {
        Recovery::Clean => HumanOutput::new("wv op recover: nothing to recover"),
        Recovery::Incomplete(info) => {
            let mut human = HumanOutput::new(format!(
                "wv op recover: {} ({}) did not finish",
                info.op_id, info.op_type
            ));
            if let Some(started) = info.started_at {
                human.push_summary("started", started.to_rfc3339());
            }
            let completed: Vec<String> =
                info.completed_steps.iter().map(u32::to_string).collect();
            human.push_summary(
                "completed steps",
                if completed.is_empty() {
                    "none".to_string()
                } else {
                    completed.join(", ")
                },
            );
            match (info.pending_step, &info.pending_action) {
                (Some(step), Some(action)) => {
                    human.push_summary("pending", format!("step {step} {action}"));
                }
                (Some(step), None) => human.push_summary("pending", format!("step {step}")),
                _ => {}
            }
            if !info.args.is_null() {
                human.push_detail(format!("args: {}", info.args));
            }
            if info.others > 0 {
                human.push_warning(format!(
                    "{} more unfinished operation(s) behind this one",
                    info.others
                ));
            }
            human.push_next_step(format!("wv op end --op {}", info.op_id));
            human
        }
    };
    emit_success(options, "op recover", &recovery, Some(&human))
}

pub fn run_clean(weave: &Weave, options: OutputOptions) -> Result<()> {
    let report = weave.clean_journal()?;

    let mut human = HumanOutput::new("wv op clean: journal compacted");
    human.push_summary("kept records", report.kept_records.to_string());
    human.push_summary("removed records", report.removed_records.to_string());
    human.push_summary("removed operations", report.removed_ops.to_string());
    emit_success(options, "op clean", &report, Some(&human))
}
