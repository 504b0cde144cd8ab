//! Remote mount engines.
//!
//! Two interchangeable mechanisms expose the same remote WebDAV tree as a local
//! directory. The orchestrator drives them through [`RemoteMountEngine`] and
//! walks [`EngineKind::PRIORITY`] when falling back.

pub mod kernel_webdav;
pub mod sync_cache;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MountError;
use crate::host::Owner;
use crate::profiles::MountProfile;

pub use kernel_webdav::KernelWebDavEngine;
pub use sync_cache::SyncCacheEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EngineKind {
    /// rclone `mount` with a VFS cache.
    #[serde(rename = "rclone")]
    SyncCache,
    /// davfs2 through the kernel's `mount -t davfs`.
    #[serde(rename = "davfs2")]
    KernelWebDav,
}

impl EngineKind {
    /// Fallback order. Fallback only ever moves forward through this list.
    pub const PRIORITY: [EngineKind; 2] = [EngineKind::SyncCache, EngineKind::KernelWebDav];

    pub fn id(self) -> &'static str {
        match self {
            Self::SyncCache => "rclone",
            Self::KernelWebDav => "davfs2",
        }
    }

    /// Binary whose presence on PATH means the engine is usable.
    pub fn binary(self) -> &'static str {
        match self {
            Self::SyncCache => "rclone",
            Self::KernelWebDav => "mount.davfs",
        }
    }

    /// Distribution package providing the engine.
    pub fn package(self) -> &'static str {
        match self {
            Self::SyncCache => "rclone",
            Self::KernelWebDav => "davfs2",
        }
    }

    fn rank(self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|k| *k == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    /// Engines that may be tried after `self` when it fails.
    pub fn fallbacks(self) -> impl Iterator<Item = EngineKind> {
        let rank = self.rank();
        Self::PRIORITY.into_iter().filter(move |k| k.rank() > rank)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for EngineKind {
    type Err = MountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rclone" | "sync-cache" => Ok(Self::SyncCache),
            "davfs2" | "davfs" | "webdav" => Ok(Self::KernelWebDav),
            other => Err(MountError::Config(format!(
                "Unknown engine '{other}' (expected rclone or davfs2)"
            ))),
        }
    }
}

/// Credentials for one user on the remote service.
#[derive(Clone)]
pub struct RemoteCredential {
    /// Per-user WebDAV URL, e.g. `https://cloud.example.com/remote.php/dav/files/alice/`.
    pub endpoint: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RemoteCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredential")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything an engine needs to mount one user's remote tree.
#[derive(Debug, Clone, Copy)]
pub struct MountRequest<'a> {
    pub username: &'a str,
    /// Per-user WebDAV URL; davfs2 mounts it directly.
    pub endpoint: &'a str,
    pub mount_point: &'a Path,
    pub profile: &'static MountProfile,
    pub owner: Option<Owner>,
    pub timeout: Duration,
}

/// How a supervisor unit should run an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitExec {
    /// systemd `Type=`.
    pub service_type: &'static str,
    pub remain_after_exit: bool,
    /// Absolute program path followed by its arguments.
    pub exec_start: Vec<String>,
    pub exec_stop: Vec<String>,
}

pub trait RemoteMountEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// True when the engine's binary resolves on PATH.
    fn is_available(&self) -> bool;

    /// Install the engine through the host's package manager.
    fn install(&self) -> Result<(), MountError>;

    /// Write engine-wide configuration. Safe to call repeatedly.
    fn configure(&self) -> Result<(), MountError>;

    /// Store `cred` in the engine's credential store, replacing any previous entry.
    fn register_credential(&self, cred: &RemoteCredential) -> Result<(), MountError>;

    /// Exact argv (without the program) `mount` runs for `req`.
    fn mount_args(&self, req: &MountRequest<'_>) -> Vec<String>;

    fn mount(&self, req: &MountRequest<'_>) -> Result<(), MountError>;

    fn unmount(&self, mount_point: &Path) -> Result<(), MountError>;

    /// Detach a hung or stale mount without waiting on the remote.
    fn force_unmount(&self, mount_point: &Path) -> Result<(), MountError>;

    /// Commands a supervisor unit runs to keep `req` mounted.
    fn supervised_exec(&self, req: &MountRequest<'_>) -> UnitExec;
}

/// Run a mount command and clean up after a timeout.
///
/// A killed mount helper can leave a half-attached mount behind, so a forced
/// unmount always follows a timeout before the error is handed back.
pub(crate) fn mount_with_cleanup(
    engine: &dyn RemoteMountEngine,
    mount_point: &Path,
    run: impl FnOnce() -> Result<(), MountError>,
) -> Result<(), MountError> {
    match run() {
        Err(err @ MountError::Timeout { .. }) => {
            tracing::warn!(engine = %engine.kind(), mount_point = %mount_point.display(), "mount timed out, detaching");
            if let Err(e) = engine.force_unmount(mount_point) {
                tracing::debug!(error = %e, "forced unmount after timeout failed");
            }
            Err(err)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_ids_round_trip_through_from_str() {
        for kind in EngineKind::PRIORITY {
            assert_eq!(kind.id().parse::<EngineKind>().unwrap(), kind);
        }
    }

    #[test]
    fn engine_aliases_are_accepted() {
        assert_eq!("davfs".parse::<EngineKind>().unwrap(), EngineKind::KernelWebDav);
        assert_eq!("RCLONE".parse::<EngineKind>().unwrap(), EngineKind::SyncCache);
    }

    #[test]
    fn unknown_engine_is_configuration_error() {
        let err = "sshfs".parse::<EngineKind>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn fallback_is_one_way() {
        let after_rclone: Vec<_> = EngineKind::SyncCache.fallbacks().collect();
        assert_eq!(after_rclone, vec![EngineKind::KernelWebDav]);
        assert_eq!(EngineKind::KernelWebDav.fallbacks().count(), 0);
    }

    #[test]
    fn engine_kind_serializes_as_id() {
        let json = serde_json::to_string(&EngineKind::KernelWebDav).unwrap();
        assert_eq!(json, "\"davfs2\"");
    }

    #[test]
    fn credential_debug_hides_password() {
        let cred = RemoteCredential {
            endpoint: "https://cloud.example.com/remote.php/dav/files/alice/".to_string(),
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{cred:?}").contains("hunter2"));
    }
}
