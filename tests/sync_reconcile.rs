mod support;

use support::{FakeTracker, TestRepo};
use weave::graph::{EdgeType, NewNode, NodeUpdate, Status};
use weave::lock::FileLock;
use weave::sync::{IssueState, SyncOptions, SyncRecord, CLOSE_MARKER};
use weave::Error;

#[test]
fn repeated_sync_makes_no_writes() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let node = weave.create_node(NewNode::new("Add retries")).unwrap();

    let published = weave.publish_with(&mut tracker, &node.id).unwrap();
    assert_eq!(published.issue, 1);
    assert_eq!(tracker.writes, 1);
    assert_eq!(tracker.issue(1).labels, vec!["wv:todo"]);

    weave
        .update_node(&node.id, NodeUpdate::status(Status::Done))
        .unwrap();
    let first = weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();
    assert_eq!(first.failures, 0);
    assert_eq!(tracker.issue(1).state, IssueState::Closed);
    assert_eq!(tracker.issue(1).labels, vec!["wv:done"]);
    assert!(tracker.comments[&1].last().unwrap().contains(CLOSE_MARKER));

    let writes = tracker.writes;
    let second = weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();
    assert_eq!(second.writes, 0);
    assert_eq!(tracker.writes, writes);
}

#[test]
fn lagging_tracker_does_not_reopen_local_work() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let node = weave.create_node(NewNode::new("Fix flaky test")).unwrap();
    weave.publish_with(&mut tracker, &node.id).unwrap();
    weave
        .update_node(&node.id, NodeUpdate::status(Status::Done))
        .unwrap();
    weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();

    // Tracker still reports open; our close comment is the latest one.
    tracker.issues.get_mut(&1).unwrap().state = IssueState::Open;
    let report = weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();

    assert_eq!(report.stale, vec![node.id.clone()]);
    assert_eq!(weave.get_node(&node.id).unwrap().status, Status::Done);
}

#[test]
fn human_reopen_is_pulled_into_the_graph() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let node = weave.create_node(NewNode::new("Update docs")).unwrap();
    weave.publish_with(&mut tracker, &node.id).unwrap();
    weave
        .update_node(&node.id, NodeUpdate::status(Status::Done))
        .unwrap();
    weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();

    tracker.human_set_state(1, IssueState::Open, Some("Still broken on Windows"));
    let report = weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();

    assert!(report.stale.is_empty());
    let node = weave.get_node(&node.id).unwrap();
    assert_eq!(node.status, Status::Todo);
    let record = SyncRecord::from_node(&node).unwrap().unwrap();
    assert_eq!(record.last_state, IssueState::Open);
    assert_eq!(tracker.issue(1).labels, vec!["wv:todo"]);
}

#[test]
fn remote_close_marks_node_done() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let node = weave.create_node(NewNode::new("Triage backlog")).unwrap();
    weave.publish_with(&mut tracker, &node.id).unwrap();

    tracker.human_set_state(1, IssueState::Closed, None);
    let report = weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();

    assert_eq!(report.local_updates, 1);
    assert_eq!(weave.get_node(&node.id).unwrap().status, Status::Done);
}

#[test]
fn unreadable_issue_is_counted_and_skipped() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let kept = weave.create_node(NewNode::new("Kept issue")).unwrap();
    let lost = weave.create_node(NewNode::new("Deleted issue")).unwrap();
    weave.publish_with(&mut tracker, &kept.id).unwrap();
    let lost_issue = weave.publish_with(&mut tracker, &lost.id).unwrap().issue;
    tracker.issues.remove(&lost_issue);

    weave
        .update_node(&kept.id, NodeUpdate::status(Status::Done))
        .unwrap();
    let report = weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(tracker.issue(1).state, IssueState::Closed);
}

#[test]
fn parent_issue_body_lists_children() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let epic = weave.create_node(NewNode::new("Checkout epic")).unwrap();
    let child = weave.create_node(NewNode::new("Payment form")).unwrap();
    weave
        .link_nodes(&child.id, &epic.id, EdgeType::Implements, None, None)
        .unwrap();
    weave.publish_with(&mut tracker, &epic.id).unwrap();

    weave
        .update_node(&child.id, NodeUpdate::status(Status::Done))
        .unwrap();
    weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();

    let body = &tracker.issue(1).body;
    assert!(body.contains("Payment form"));
    assert!(body.contains("[x]"));
    assert!(body.contains("Checkout epic"));
}

#[test]
fn dry_run_leaves_tracker_untouched() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let node = weave.create_node(NewNode::new("Plan only")).unwrap();
    weave.publish_with(&mut tracker, &node.id).unwrap();
    weave
        .update_node(&node.id, NodeUpdate::status(Status::Done))
        .unwrap();

    let writes = tracker.writes;
    let report = weave
        .sync_external_with(
            &mut tracker,
            &SyncOptions {
                dry_run: true,
                nodes: vec![node.id.clone()],
            },
        )
        .unwrap();

    assert!(report.writes > 0);
    assert_eq!(tracker.writes, writes);
    assert_eq!(tracker.issue(1).state, IssueState::Open);
}

#[test]
fn publishing_twice_is_a_conflict() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let node = weave.create_node(NewNode::new("Once")).unwrap();
    weave.publish_with(&mut tracker, &node.id).unwrap();

    let err = weave.publish_with(&mut tracker, &node.id).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(tracker.issues.len(), 1);
}

#[test]
fn concurrent_sync_is_refused() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let _held = FileLock::try_acquire(weave.storage().sync_lock_file())
        .unwrap()
        .unwrap();

    let err = weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::LockFailed(_)));
}

#[test]
fn disabled_sync_is_a_policy_error() {
    let repo = TestRepo::init().unwrap();
    let mut config = repo.config();
    config.sync.enabled = false;
    let mut weave = repo.open_with(config);

    let err = weave.sync_external(&SyncOptions::default()).unwrap_err();
    assert!(matches!(err, Error::SyncDisabled));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn unreadable_comments_count_as_a_human_reopen() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let node = weave.create_node(NewNode::new("Rotate keys")).unwrap();
    weave.publish_with(&mut tracker, &node.id).unwrap();
    weave
        .update_node(&node.id, NodeUpdate::status(Status::Done))
        .unwrap();
    weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();

    tracker.issues.get_mut(&1).unwrap().state = IssueState::Open;
    tracker.fail_comment_reads = true;
    let report = weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();

    assert!(report.stale.is_empty());
    assert_eq!(weave.get_node(&node.id).unwrap().status, Status::Todo);
}

#[test]
fn failed_close_does_not_repeat_the_close_comment() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let node = weave.create_node(NewNode::new("Drop old API")).unwrap();
    weave.publish_with(&mut tracker, &node.id).unwrap();
    weave
        .update_node(&node.id, NodeUpdate::status(Status::Done))
        .unwrap();

    tracker.fail_set_state = true;
    let report = weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(tracker.issue(1).state, IssueState::Open);
    assert_eq!(tracker.comments[&1].len(), 1);

    tracker.fail_set_state = false;
    let report = weave
        .sync_external_with(&mut tracker, &SyncOptions::default())
        .unwrap();
    assert_eq!(report.failures, 0);
    assert_eq!(tracker.issue(1).state, IssueState::Closed);
    assert_eq!(tracker.comments[&1].len(), 1);
    assert!(tracker.comments[&1][0].contains(CLOSE_MARKER));
}

#[test]
fn dry_run_plans_labels_for_pulled_status() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    let mut tracker = FakeTracker::default();
    let node = weave.create_node(NewNode::new("Closed upstream")).unwrap();
    weave.publish_with(&mut tracker, &node.id).unwrap();
    tracker.human_set_state(1, IssueState::Closed, None);

    let report = weave
        .sync_external_with(
            &mut tracker,
            &SyncOptions {
                dry_run: true,
                nodes: Vec::new(),
            },
        )
        .unwrap();

    let actions: Vec<&str> = report
        .actions
        .iter()
        .map(|action| action.action.as_str())
        .collect();
    assert!(actions.contains(&"set local status done"));
    assert!(actions.contains(&"set labels"));
    assert_eq!(tracker.issue(1).labels, vec!["wv:todo"]);
    assert_eq!(weave.get_node(&node.id).unwrap().status, Status::Todo);
}
