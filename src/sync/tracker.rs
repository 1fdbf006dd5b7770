//! Issue tracker seam driven by the reconciler.

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: IssueState,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Number of comments on the issue
    #[serde(default)]
    pub comments: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
}

/// Operations the reconciler needs from an issue tracker.
///
/// Reads are `get_issue` and `latest_comment`; every other method is a
/// write and is counted as such.
pub trait IssueTracker {
    fn get_issue(&mut self, number: u64) -> Result<Issue>;

    /// Most recent comment on `issue`, if it has any.
    fn latest_comment(&mut self, issue: &Issue) -> Result<Option<Comment>>;

    fn create_issue(&mut self, title: &str, body: &str, labels: &[String]) -> Result<Issue>;

    fn set_state(&mut self, number: u64, state: IssueState) -> Result<()>;

    /// Replace the issue's labels with `labels`.
    fn set_labels(&mut self, number: u64, labels: &[String]) -> Result<()>;

    fn set_body(&mut self, number: u64, body: &str) -> Result<()>;

    fn comment(&mut self, number: u64, body: &str) -> Result<()>;
}

impl<T: IssueTracker + ?Sized> IssueTracker for &mut T {
    fn get_issue(&mut self, number: u64) -> Result<Issue> {
        (**self).get_issue(number)
    }

    fn latest_comment(&mut self, issue: &Issue) -> Result<Option<Comment>> {
        (**self).latest_comment(issue)
    }

    fn create_issue(&mut self, title: &str, body: &str, labels: &[String]) -> Result<Issue> {
        (**self).create_issue(title, body, labels)
    }

    fn set_state(&mut self, number: u64, state: IssueState) -> Result<()> {
        (**self).set_state(number, state)
    }

    fn set_labels(&mut self, number: u64, labels: &[String]) -> Result<()> {
        (**self).set_labels(number, labels)
    }

    fn set_body(&mut self, number: u64, body: &str) -> Result<()> {
        (**self).set_body(number, body)
    }

    fn comment(&mut self, number: u64, body: &str) -> Result<()> {
        (**self).comment(number, body)
    }
}
