//! Minimum-interval throttling for tracker calls.

use std::time::{Duration, Instant};

use crate::error::Result;
use crate::sync::tracker::{Comment, Issue, IssueState, IssueTracker};

/// Enforces a fixed minimum interval between calls.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Sleep until the interval since the previous call has passed.
    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Wraps a tracker so every call passes through a [`Throttle`].
#[derive(Debug)]
pub struct Throttled<T> {
    inner: T,
    throttle: Throttle,
}

impl<T: IssueTracker> Throttled<T> {
    pub fn new(inner: T, interval: Duration) -> Self {
        Self {
            inner,
            throttle: Throttle::new(interval),
        }
    }
}

impl<T: IssueTracker> IssueTracker for Throttled<T> {
    fn get_issue(&mut self, number: u64) -> Result<Issue> {
        self.throttle.wait();
        self.inner.get_issue(number)
    }

    fn latest_comment(&mut self, issue: &Issue) -> Result<Option<Comment>> {
        self.throttle.wait();
        self.inner.latest_comment(issue)
    }

    fn create_issue(&mut self, title: &str, body: &str, labels: &[String]) -> Result<Issue> {
        self.throttle.wait();
        self.inner.create_issue(title, body, labels)
    }

    fn set_state(&mut self, number: u64, state: IssueState) -> Result<()> {
        self.throttle.wait();
        self.inner.set_state(number, state)
    }

    fn set_labels(&mut self, number: u64, labels: &[String]) -> Result<()> {
        self.throttle.wait();
        self.inner.set_labels(number, labels)
    }

    fn set_body(&mut self, number: u64, body: &str) -> Result<()> {
        self.throttle.wait();
        self.inner.set_body(number, body)
    }

    fn comment(&mut self, number: u64, body: &str) -> Result<()> {
        self.throttle.wait();
        self.inner.comment(number, body)
    }
}
