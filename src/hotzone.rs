//! Hot store location selection.
//!
//! The hot store lives on the fastest writable volatile filesystem
//! available (`/dev/shm`), unless that volume is short on space or the
//! process runs inside a container, where tmpfs is typically small and
//! private to the container lifetime. The fallback is the user cache
//! directory, then the system temp dir.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::HotConfig;
use crate::error::Result;

/// Preferred volatile volume
pub const SHM_DIR: &str = "/dev/shm";

/// Hex characters of the repository hash used as namespace
const NAMESPACE_LEN: usize = 12;

/// Why a particular hot base was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HotReason {
    Override,
    Shm,
    Container,
    LowSpace,
    NoShm,
}

/// Resolved hot base directory
#[derive(Debug, Clone, serde::Serialize)]
pub struct HotLocation {
    pub base: PathBuf,
    pub reason: HotReason,
}

/// Facts about the host that drive location selection.
#[derive(Debug, Clone)]
pub struct HostProbe {
    pub shm: Option<PathBuf>,
    pub shm_free_bytes: Option<u64>,
    pub in_container: bool,
    pub fallback: PathBuf,
}

impl HostProbe {
    /// Probe the current host
    pub fn detect() -> Self {
        let shm_path = Path::new(SHM_DIR);
        let shm = is_writable_dir(shm_path).then(|| shm_path.to_path_buf());
        let shm_free_bytes = shm
            .as_deref()
            .and_then(|path| fs2::available_space(path).ok());
        Self {
            shm,
            shm_free_bytes,
            in_container: detect_container(),
            fallback: fallback_base(),
        }
    }
}

/// Select the hot base directory from config and host facts.
pub fn select_location(config: &HotConfig, probe: &HostProbe) -> HotLocation {
    if let Some(location) = &config.location {
        return HotLocation {
            base: location.clone(),
            reason: HotReason::Override,
        };
    }

    let Some(shm) = &probe.shm else {
        return HotLocation {
            base: probe.fallback.clone(),
            reason: HotReason::NoShm,
        };
    };

    if probe.in_container {
        return HotLocation {
            base: probe.fallback.clone(),
            reason: HotReason::Container,
        };
    }

    let min_free = config.min_free_mb.saturating_mul(1024 * 1024);
    if probe.shm_free_bytes.map_or(true, |free| free < min_free) {
        tracing::warn!(
            free = ?probe.shm_free_bytes,
            min_free,
            "shared memory volume low on space; using slower hot location"
        );
        return HotLocation {
            base: probe.fallback.clone(),
            reason: HotReason::LowSpace,
        };
    }

    HotLocation {
        base: shm.clone(),
        reason: HotReason::Shm,
    }
}

/// Resolve the hot location for this host.
pub fn resolve(config: &HotConfig) -> HotLocation {
    let location = select_location(config, &HostProbe::detect());
    tracing::debug!(base = %location.base.display(), reason = ?location.reason, "hot location");
    location
}

/// Stable namespace for a repository root.
///
/// The root is canonicalized first so `./repo` and `/abs/repo` agree.
pub fn namespace_for(repo_root: &Path) -> Result<String> {
    let canonical = repo_root.canonicalize()?;
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(NAMESPACE_LEN);
    Ok(encoded)
}

/// Whether the process runs in a container (docker, podman, kubernetes).
pub fn detect_container() -> bool {
    if Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists() {
        return true;
    }
    if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
        return true;
    }
    std::fs::read_to_string("/proc/1/cgroup")
        .map(|content| cgroup_indicates_container(&content))
        .unwrap_or(false)
}

fn cgroup_indicates_container(content: &str) -> bool {
    content.lines().any(|line| {
        ["docker", "kubepods", "containerd", "libpod", "lxc"]
            .iter()
            .any(|marker| line.contains(marker))
    })
}

fn fallback_base() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.cache_dir().join("weave"))
        .unwrap_or_else(|| std::env::temp_dir().join("weave"))
}

fn is_writable_dir(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    meta.is_dir() && !meta.permissions().readonly()
}
