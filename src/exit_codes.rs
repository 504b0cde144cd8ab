use crate::error::{ErrorKind, MountError};

/// Exit code: success.
pub const SUCCESS: i32 = 0;

/// Exit code: runtime error (mount failed, systemctl failed, remote unreachable, etc.).
pub const RUNTIME_ERROR: i32 = 1;

/// Exit code: usage or configuration error (unknown profile, missing base_url,
/// rejected credentials, etc.).
pub const USAGE_ERROR: i32 = 2;

/// Exit code: prerequisite command not found (`rclone`, `mount.davfs`, etc.).
pub const PREREQ_NOT_FOUND: i32 = 127;

/// Exit code: interrupted by Ctrl+C after the current operation finished.
pub const INTERRUPTED: i32 = 130;

/// Exit code for a failure class reported in an outcome.
pub fn for_kind(kind: Option<ErrorKind>) -> i32 {
    match kind {
        Some(ErrorKind::Configuration) => USAGE_ERROR,
        _ => RUNTIME_ERROR,
    }
}

pub fn for_error(err: &MountError) -> i32 {
    match err {
        MountError::ProgramMissing { .. } => PREREQ_NOT_FOUND,
        other => for_kind(Some(other.kind())),
    }
}
