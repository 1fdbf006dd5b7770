//! Git repository discovery and snapshot commits.
//!
//! This module wraps the libgit2 operations weave needs:
//! - Repository discovery (the namespace root for the hot store)
//! - Committing the cold snapshot after a flush

use std::path::{Path, PathBuf};

use git2::{ErrorCode, Oid, Repository};

use crate::error::{Error, Result};

/// Discover a git repository from a starting path.
pub fn discover_repo(start: Option<&Path>) -> Result<Repository> {
    let start_path = match start {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };

    Repository::discover(&start_path).map_err(|err| {
        if err.code() == ErrorCode::NotFound {
            Error::RepoNotFound(start_path)
        } else {
            Error::Git(err)
        }
    })
}

/// Return the repository workdir (root of the working tree).
pub fn workdir(repo: &Repository) -> Result<PathBuf> {
    repo.workdir()
        .map(|path| path.to_path_buf())
        .ok_or_else(|| Error::OperationFailed("repository has no working directory".to_string()))
}

/// Resolve the repository root for a starting path.
pub fn repo_root(start: Option<&Path>) -> Result<PathBuf> {
    let repo = discover_repo(start)?;
    workdir(&repo)
}

/// Stage `paths` (relative to the workdir) and commit them on HEAD.
///
/// Returns `None` when the staged tree is identical to HEAD's, so repeated
/// flushes of an unchanged graph do not produce empty commits.
pub fn commit_paths(repo: &Repository, paths: &[&Path], message: &str) -> Result<Option<Oid>> {
    let mut index = repo.index()?;
    for path in paths {
        index.add_path(path)?;
    }
    index.write()?;

    let tree_oid = index.write_tree()?;
    let tree = repo.find_tree(tree_oid)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => None,
        Err(e) => return Err(Error::Git(e)),
    };

    if let Some(parent) = &parent {
        if parent.tree_id() == tree_oid {
            return Ok(None);
        }
    }

    let signature = repo.signature()?;
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )?;
    tracing::info!(commit = %oid, "committed snapshot");
    Ok(Some(oid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "weave-test").unwrap();
        config.set_str("user.email", "weave-test@example.com").unwrap();
        repo
    }

    #[test]
    fn discover_reports_missing_repo() {
        let temp = TempDir::new().unwrap();
        let result = discover_repo(Some(temp.path()));
        assert!(matches!(result, Err(Error::RepoNotFound(_))));
    }

    #[test]
    fn commit_paths_skips_unchanged_tree() {
        let temp = TempDir::new().unwrap();
        let repo = init_repo(temp.path());
        fs::create_dir_all(temp.path().join(".weave")).unwrap();
        fs::write(temp.path().join(".weave/state.sql"), "-- v1\n").unwrap();

        let rel = Path::new(".weave/state.sql");
        let first = commit_paths(&repo, &[rel], "weave: snapshot").unwrap();
        assert!(first.is_some());

        let second = commit_paths(&repo, &[rel], "weave: snapshot").unwrap();
        assert!(second.is_none());

        fs::write(temp.path().join(".weave/state.sql"), "-- v2\n").unwrap();
        let third = commit_paths(&repo, &[rel], "weave: snapshot").unwrap();
        assert!(third.is_some());
    }
}
