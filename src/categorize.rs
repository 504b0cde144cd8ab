use std::path::Path;

use crate::mount_table::{self, MountEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountHealth {
    /// Listed in the mount table and the mount point answers a stat.
    Active,
    /// Listed but inaccessible (FUSE daemon died, endpoint gone, etc.).
    Stale,
    /// Not listed; at most a plain directory.
    Unmounted,
}

impl MountHealth {
    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "mounted",
            Self::Stale => "stale mount",
            Self::Unmounted => "not mounted",
        }
    }
}

/// Categorize a mount point from observed state.
///
/// - `is_listed`: the target appears in the mount table
/// - `is_accessible`: stat of the mount point succeeds
pub fn categorize(is_listed: bool, is_accessible: bool) -> MountHealth {
    match (is_listed, is_accessible) {
        (false, _) => MountHealth::Unmounted,
        (true, false) => MountHealth::Stale,
        (true, true) => MountHealth::Active,
    }
}

/// Look `mount_point` up in `entries` and probe it.
pub fn inspect<'a>(entries: &'a [MountEntry], mount_point: &Path) -> (MountHealth, Option<&'a MountEntry>) {
    let entry = mount_table::find_mount(entries, mount_point);
    let health = categorize(entry.is_some(), mount_point.metadata().is_ok());
    (health, entry)
}
