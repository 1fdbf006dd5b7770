//! External issue tracker synchronization.

pub mod github;
pub mod reconcile;
pub mod throttle;
pub mod tracker;

pub use github::GitHubTracker;
pub use reconcile::{
    publish, reconcile, PublishReport, ReopenVerdict, SyncOptions, SyncRecord, SyncReport,
    CLOSE_MARKER,
};
pub use throttle::{Throttle, Throttled};
pub use tracker::{Comment, Issue, IssueState, IssueTracker};
