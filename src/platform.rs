use std::path::{Component, Path, PathBuf};

use crate::error::MountError;
use crate::mount_table::{self, MountEntry};

pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Program and arguments for a regular unmount of a FUSE mount.
pub fn fuse_unmount(mount_point: &Path) -> (&'static str, Vec<String>) {
    ("fusermount", vec!["-u".to_string(), path_arg(mount_point)])
}

/// Lazy detach of a FUSE mount whose daemon is gone.
pub fn fuse_force_unmount(mount_point: &Path) -> (&'static str, Vec<String>) {
    ("fusermount", vec!["-uz".to_string(), path_arg(mount_point)])
}

/// Lazy detach through the kernel. Works for any filesystem type.
pub fn lazy_unmount(mount_point: &Path) -> (&'static str, Vec<String>) {
    ("umount", vec!["-l".to_string(), path_arg(mount_point)])
}

pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Absolute, lexically normalized form of a mount point: `.` dropped, `..`
/// applied, doubled and trailing separators gone. Symlinks are left alone.
pub fn normalize_mount_point(path: &Path) -> Result<PathBuf, MountError> {
    let abs = std::path::absolute(path)
        .map_err(|e| MountError::Config(format!("Invalid mount point '{}': {e}", path.display())))?;
    let mut out = PathBuf::new();
    for comp in abs.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// Read the system mount table.
pub fn read_mount_table() -> Result<Vec<MountEntry>, MountError> {
    let text = std::fs::read_to_string(PROC_MOUNTS)
        .map_err(|e| MountError::io(format!("Failed to read {PROC_MOUNTS}"), e))?;
    Ok(mount_table::parse_proc_mounts(&text))
}
