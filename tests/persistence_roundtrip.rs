mod support;

use std::fs;

use support::TestRepo;
use weave::config::GraphConfig;
use weave::graph::{EdgeType, GraphStore, NewNode, NodeFilter};
use weave::persistence::StartupAction;
use weave::Error;

#[test]
fn fresh_repo_initializes_an_empty_store() {
    let repo = TestRepo::init().unwrap();
    let weave = repo.open();
    assert_eq!(weave.startup().action, StartupAction::Initialized);
    assert!(weave.list_nodes(&NodeFilter::default()).unwrap().is_empty());
}

#[test]
fn wiped_hot_store_is_restored_from_snapshot() {
    let repo = TestRepo::init().unwrap();
    let (a, b) = {
        let mut weave = repo.open();
        let a = weave
            .create_node(NewNode::new("Parse config").alias("parse"))
            .unwrap();
        let b = weave.create_node(NewNode::new("Load config")).unwrap();
        weave
            .link_nodes(&a.id, &b.id, EdgeType::Blocks, Some(0.5), None)
            .unwrap();
        let report = weave.flush_to_cold(false).unwrap();
        assert_eq!(report.nodes, 2);
        assert_eq!(report.edges, 1);
        (a, b)
    };
    assert!(repo.weave_dir().join("state.sql").exists());

    repo.wipe_hot().unwrap();

    let weave = repo.open();
    assert_eq!(weave.startup().action, StartupAction::Restored);
    let restored = weave.get_node("parse").unwrap();
    assert_eq!(restored, a);
    let edges = weave.edges(&b.id).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].weight, 0.5);
}

#[test]
fn existing_hot_store_wins_over_snapshot() {
    let repo = TestRepo::init().unwrap();
    {
        let mut weave = repo.open();
        weave.create_node(NewNode::new("Flushed")).unwrap();
        weave.flush_to_cold(false).unwrap();
        weave.create_node(NewNode::new("Not flushed yet")).unwrap();
    }

    let weave = repo.open();
    assert_eq!(weave.startup().action, StartupAction::UsedExisting);
    assert_eq!(weave.list_nodes(&NodeFilter::default()).unwrap().len(), 2);
}

#[test]
fn empty_hot_store_with_populated_snapshot_warns() {
    let repo = TestRepo::init().unwrap();
    {
        let mut weave = repo.open();
        let node = weave.create_node(NewNode::new("Only node")).unwrap();
        weave.flush_to_cold(false).unwrap();
        weave.delete_node(&node.id, false).unwrap();
    }

    let weave = repo.open();
    assert_eq!(weave.startup().action, StartupAction::UsedExisting);
    assert_eq!(weave.startup().warnings.len(), 1);
    assert!(weave.startup().warnings[0].contains("1 node(s)"));
}

#[test]
fn explicit_restore_discards_unflushed_changes() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    weave.create_node(NewNode::new("Kept")).unwrap();
    weave.flush_to_cold(false).unwrap();
    let extra = weave.create_node(NewNode::new("Dropped")).unwrap();

    let report = weave.restore_from_cold().unwrap();
    assert_eq!(report.nodes, 1);
    assert!(matches!(weave.get_node(&extra.id), Err(Error::NotFound(_))));

    // The handle keeps working against the rebuilt store.
    weave.create_node(NewNode::new("After restore")).unwrap();
    assert_eq!(weave.list_nodes(&NodeFilter::default()).unwrap().len(), 2);
}

#[test]
fn restore_without_snapshot_is_not_found() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    assert!(matches!(weave.restore_from_cold(), Err(Error::NotFound(_))));
}

#[test]
fn flush_commit_skips_unchanged_snapshots() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    weave.create_node(NewNode::new("Commit me")).unwrap();

    let first = weave.flush_to_cold(true).unwrap();
    assert!(first.commit.is_some());
    assert!(repo
        .head_message()
        .unwrap()
        .starts_with("weave: snapshot (1 nodes, 0 edges)"));

    let second = weave.flush_to_cold(true).unwrap();
    assert!(second.commit.is_none());
    assert_eq!(repo.commit_count(), 1);
}

#[test]
fn snapshot_is_stable_across_flushes() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    weave.create_node(NewNode::new("b node")).unwrap();
    weave.create_node(NewNode::new("a node")).unwrap();

    weave.flush_to_cold(false).unwrap();
    let first = fs::read_to_string(repo.weave_dir().join("state.sql")).unwrap();
    weave.flush_to_cold(false).unwrap();
    let second = fs::read_to_string(repo.weave_dir().join("state.sql")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn legacy_store_is_migrated_once() {
    let repo = TestRepo::init().unwrap();
    {
        let legacy = repo.hot_base().join("weave.db");
        let mut store = GraphStore::open(&legacy, GraphConfig::default()).unwrap();
        store.create_node(NewNode::new("From before")).unwrap();
    }

    {
        let weave = repo.open();
        assert_eq!(weave.startup().action, StartupAction::MigratedLegacy);
        let nodes = weave.list_nodes(&NodeFilter::default()).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text, "From before");
    }

    let weave = repo.open();
    assert_eq!(weave.startup().action, StartupAction::UsedExisting);
    assert!(repo.hot_base().join("weave.db").exists());
}

#[test]
fn eviction_is_skipped_under_the_cap() {
    let repo = TestRepo::init().unwrap();
    let mut weave = repo.open();
    weave.create_node(NewNode::new("Small graph")).unwrap();

    let report = weave.evict().unwrap();
    assert!(report.evicted.is_empty());
    assert_eq!(report.skipped.as_deref(), Some("under size cap"));
}
