#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use git2::{Repository, Signature};
use tempfile::TempDir;
use weave::config::Config;
use weave::sync::{Comment, Issue, IssueState, IssueTracker};
use weave::{Error, Weave};

pub struct TestRepo {
    dir: TempDir,
    hot: TempDir,
    repo: Repository,
}

impl TestRepo {
    pub fn init() -> Result<Self, git2::Error> {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let hot = tempfile::tempdir().expect("failed to create hot tempdir");
        let repo = Repository::init(dir.path())?;
        set_identity(&repo)?;
        Ok(Self { dir, hot, repo })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Hot base directory used by every handle opened from this repo
    pub fn hot_base(&self) -> &Path {
        self.hot.path()
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.hot.location = Some(self.hot.path().to_path_buf());
        config
    }

    pub fn open(&self) -> Weave {
        self.open_with(self.config())
    }

    pub fn open_with(&self, config: Config) -> Weave {
        Weave::open(self.dir.path(), config).expect("open weave")
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn weave_dir(&self) -> PathBuf {
        self.dir.path().join(".weave")
    }

    /// Remove the hot store for this repo, as a reboot would.
    pub fn wipe_hot(&self) -> std::io::Result<()> {
        for entry in fs::read_dir(self.hot.path())? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    pub fn head_message(&self) -> Option<String> {
        let commit = self.repo.head().ok()?.peel_to_commit().ok()?;
        commit.message().map(str::to_string)
    }

    pub fn commit_count(&self) -> usize {
        let Ok(mut walk) = self.repo.revwalk() else {
            return 0;
        };
        if walk.push_head().is_err() {
            return 0;
        }
        walk.count()
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn signature(&self) -> Signature<'static> {
        Signature::now("wv-test", "wv-test@example.com").expect("signature")
    }
}

fn set_identity(repo: &Repository) -> Result<(), git2::Error> {
    let mut cfg = repo.config()?;
    cfg.set_str("user.name", "wv-test")?;
    cfg.set_str("user.email", "wv-test@example.com")?;
    Ok(())
}

/// In-memory issue tracker that counts write calls.
///
/// The `fail_*` switches make the matching call return an API error.
#[derive(Debug, Default)]
pub struct FakeTracker {
    pub issues: BTreeMap<u64, Issue>,
    pub comments: BTreeMap<u64, Vec<String>>,
    pub writes: usize,
    pub fail_comment_reads: bool,
    pub fail_set_state: bool,
}

impl FakeTracker {
    pub fn issue(&self, number: u64) -> &Issue {
        self.issues.get(&number).expect("issue exists")
    }

    /// Change an issue's state as a person on the tracker would.
    pub fn human_set_state(&mut self, number: u64, state: IssueState, comment: Option<&str>) {
        if let Some(body) = comment {
            self.comments
                .entry(number)
                .or_default()
                .push(body.to_string());
        }
        let issue = self.issues.get_mut(&number).expect("issue exists");
        issue.state = state;
        if comment.is_some() {
            issue.comments += 1;
        }
    }
}

impl IssueTracker for FakeTracker {
    fn get_issue(&mut self, number: u64) -> weave::Result<Issue> {
        self.issues
            .get(&number)
            .cloned()
            .ok_or_else(|| Error::ExternalApi(format!("HTTP 404 issue {number}")))
    }

    fn latest_comment(&mut self, issue: &Issue) -> weave::Result<Option<Comment>> {
        if self.fail_comment_reads {
            return Err(Error::ExternalApi("HTTP 502 reading comments".to_string()));
        }
        Ok(self
            .comments
            .get(&issue.number)
            .and_then(|list| list.last())
            .map(|body| Comment {
                body: body.clone(),
                author: Some("someone".to_string()),
            }))
    }

    fn create_issue(&mut self, title: &str, body: &str, labels: &[String]) -> weave::Result<Issue> {
        self.writes += 1;
        let number = self.issues.len() as u64 + 1;
        let issue = Issue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            state: IssueState::Open,
            labels: labels.to_vec(),
            comments: 0,
        };
        self.issues.insert(number, issue.clone());
        Ok(issue)
    }

    fn set_state(&mut self, number: u64, state: IssueState) -> weave::Result<()> {
        if self.fail_set_state {
            return Err(Error::ExternalApi(format!("HTTP 502 updating issue {number}")));
        }
        self.writes += 1;
        if let Some(issue) = self.issues.get_mut(&number) {
            issue.state = state;
        }
        Ok(())
    }

    fn set_labels(&mut self, number: u64, labels: &[String]) -> weave::Result<()> {
        self.writes += 1;
        if let Some(issue) = self.issues.get_mut(&number) {
            issue.labels = labels.to_vec();
        }
        Ok(())
    }

    fn set_body(&mut self, number: u64, body: &str) -> weave::Result<()> {
        self.writes += 1;
        if let Some(issue) = self.issues.get_mut(&number) {
            issue.body = body.to_string();
        }
        Ok(())
    }

    fn comment(&mut self, number: u64, body: &str) -> weave::Result<()> {
        self.writes += 1;
        self.comments
            .entry(number)
            .or_default()
            .push(body.to_string());
        if let Some(issue) = self.issues.get_mut(&number) {
            issue.comments += 1;
        }
        Ok(())
    }
}
