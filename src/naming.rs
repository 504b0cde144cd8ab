use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::engine::EngineKind;

/// Prefix shared by every supervisor unit this tool writes.
pub const UNIT_PREFIX: &str = "davhome-";

/// Sanitize a name component: replace non-alphanumeric chars with `-`, max 30 chars.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(30)
        .collect()
}

/// Compute SHA256 of `input` and return the first 8 hex characters.
pub fn compute_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    let hex: String = result.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..8].to_string()
}

/// Name of the rclone remote holding a user's credentials: `nc-<user>`.
pub fn remote_name(username: &str) -> String {
    format!("nc-{username}")
}

/// Supervisor unit name for `(username, engine)`, without the `.service` suffix.
///
/// The hash suffix keeps two users whose names sanitize alike apart.
pub fn unit_name(username: &str, engine: EngineKind) -> String {
    format!(
        "{UNIT_PREFIX}{}-{}-{}",
        engine.id(),
        sanitize_name(username),
        compute_hash(username)
    )
}

/// Lock file name guarding mutations of `mount_point`: `mnt-<name>-<hash>.lock`.
pub fn lock_name(mount_point: &Path) -> String {
    let name = mount_point
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let hash = compute_hash(&mount_point.to_string_lossy());
    format!("mnt-{}-{hash}.lock", sanitize_name(&name))
}

/// Sibling path a home directory is moved to before mounting over it:
/// `<path>.backup.<unix-seconds>`.
pub fn backup_path(path: &Path, unix_seconds: i64) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(format!(".backup.{unix_seconds}"));
    PathBuf::from(os)
}
