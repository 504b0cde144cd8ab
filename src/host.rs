use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MountError;
use crate::mount_table::MountEntry;
use crate::platform;

/// Numeric owner of a local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// The parts of the local machine the orchestrator observes or changes
/// besides running engine commands.
pub trait Host: Send + Sync {
    fn mount_table(&self) -> Result<Vec<MountEntry>, MountError>;

    /// `None` when no such account exists.
    fn lookup_user(&self, name: &str) -> Result<Option<Owner>, MountError>;

    /// Change ownership of `path`, and of everything below it when `recursive`.
    /// Symlinks are re-owned, never followed.
    fn chown(&self, path: &Path, owner: Owner, recursive: bool) -> Result<(), MountError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn mount_table(&self) -> Result<Vec<MountEntry>, MountError> {
        platform::read_mount_table()
    }

    fn lookup_user(&self, name: &str) -> Result<Option<Owner>, MountError> {
        let user = nix::unistd::User::from_name(name)
            .map_err(|e| MountError::Config(format!("Failed to look up user {name}: {e}")))?;
        Ok(user.map(|u| Owner {
            uid: u.uid.as_raw(),
            gid: u.gid.as_raw(),
        }))
    }

    fn chown(&self, path: &Path, owner: Owner, recursive: bool) -> Result<(), MountError> {
        chown_tree(path, owner, recursive)
    }
}

/// `lchown` `path`, then walk into directories without following links.
pub fn chown_tree(path: &Path, owner: Owner, recursive: bool) -> Result<(), MountError> {
    std::os::unix::fs::lchown(path, Some(owner.uid), Some(owner.gid))
        .map_err(|e| MountError::io(format!("Failed to chown {}", path.display()), e))?;
    if !recursive {
        return Ok(());
    }
    let meta = std::fs::symlink_metadata(path)
        .map_err(|e| MountError::io(format!("Failed to stat {}", path.display()), e))?;
    if !meta.is_dir() {
        return Ok(());
    }
    let entries = std::fs::read_dir(path)
        .map_err(|e| MountError::io(format!("Failed to list {}", path.display()), e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| MountError::io(format!("Failed to list {}", path.display()), e))?;
        chown_tree(&entry.path(), owner, true)?;
    }
    Ok(())
}
