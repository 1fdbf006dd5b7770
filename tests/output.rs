use weave::output::{format_human, HumanOutput};

#[test]
fn format_human_includes_sections() {
    let mut human = HumanOutput::new("wv flush: snapshot written");
    human.push_summary("path", "/tmp/repo/.weave/state.sql");
    human.push_summary("untracked", "");
    human.push_detail("snapshot unchanged; nothing to commit");
    human.push_warning("graph has never been committed");
    human.push_next_step("wv flush --commit");

    let rendered = format_human(&human);
    assert!(rendered.starts_with("wv flush: snapshot written"));
    assert!(rendered.contains("Summary:"));
    assert!(rendered.contains("- path: /tmp/repo/.weave/state.sql"));
    assert!(rendered.contains("- untracked\n"));
    assert!(rendered.contains("Details:"));
    assert!(rendered.contains("- snapshot unchanged; nothing to commit"));
    assert!(rendered.contains("Warnings:"));
    assert!(rendered.contains("- graph has never been committed"));
    assert!(rendered.contains("Next steps:"));
    assert!(rendered.ends_with("- wv flush --commit"));
}

#[test]
fn format_human_omits_empty_sections() {
    let human = HumanOutput::new("wv ready: 0 node(s)");
    let rendered = format_human(&human);
    assert_eq!(rendered, "wv ready: 0 node(s)");
}
