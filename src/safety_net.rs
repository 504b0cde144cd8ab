//! Moves a pre-existing home directory out of the way before a mount and
//! brings a short allowlist of files back afterwards.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MountError;
use crate::host::{Host, Owner};
use crate::mount_table::{self, MountEntry};
use crate::naming;

/// Files copied from the backup into the freshly mounted home.
pub const RESTORE_ALLOWLIST: [&str; 5] = [".bashrc", ".profile", ".bash_profile", ".vimrc", ".gitconfig"];

/// Subtrees that must never land in the synced tree. They are moved into the
/// quarantine directory instead.
pub const SENSITIVE_SUBTREES: [&str; 4] = [".ssh", ".gnupg", ".pki", ".config/systemd"];

/// Quarantine directory under the home; excluded from rclone transfers.
pub const QUARANTINE_DIR: &str = ".local-backup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub original: PathBuf,
    pub location: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub quarantined: Vec<String>,
}

impl RestoreReport {
    pub fn count(&self) -> usize {
        self.restored.len() + self.quarantined.len()
    }
}

/// Whether `path` holds anything. Unreadable directories count as non-empty.
fn has_content(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_some(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot list directory, assuming it has content");
            true
        }
    }
}

fn free_backup_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let base = naming::backup_path(path, now.timestamp());
    if std::fs::symlink_metadata(&base).is_err() {
        return base;
    }
    (1..)
        .map(|n| {
            let mut os = base.clone().into_os_string();
            os.push(format!("-{n}"));
            PathBuf::from(os)
        })
        .find(|p| std::fs::symlink_metadata(p).is_err())
        .unwrap_or(base)
}

/// Move `path` aside when it exists, has content and is not a mount point.
///
/// Returns `None` when nothing needed saving.
pub fn backup_if_needed(
    path: &Path,
    username: &str,
    mounts: &[MountEntry],
    now: DateTime<Utc>,
) -> Result<Option<BackupSnapshot>, MountError> {
    if std::fs::symlink_metadata(path).is_err() {
        return Ok(None);
    }
    if mount_table::find_mount(mounts, path).is_some() {
        tracing::info!(path = %path.display(), "already a mount point, no backup");
        return Ok(None);
    }
    if !has_content(path) {
        tracing::debug!(path = %path.display(), "empty, no backup");
        return Ok(None);
    }

    let location = free_backup_path(path, now);
    move_tree(path, &location).map_err(|e| MountError::Backup {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    tracing::info!(from = %path.display(), to = %location.display(), "home directory moved aside");
    Ok(Some(BackupSnapshot {
        username: username.to_string(),
        created_at: now,
        original: path.to_path_buf(),
        location,
    }))
}

/// Copy the allowlisted files into `home` and quarantine sensitive subtrees
/// under `home/.local-backup`, owned by `owner`.
///
/// Individual failures are logged and skipped; the rest still runs.
pub fn restore_selected(
    snapshot: &BackupSnapshot,
    home: &Path,
    owner: Option<Owner>,
    host: &dyn Host,
) -> RestoreReport {
    let mut report = RestoreReport::default();
    let backup = &snapshot.location;

    for name in RESTORE_ALLOWLIST {
        let src = backup.join(name);
        let is_file = std::fs::symlink_metadata(&src).is_ok_and(|m| m.is_file());
        if !is_file {
            continue;
        }
        match std::fs::copy(&src, home.join(name)) {
            Ok(_) => report.restored.push(name.to_string()),
            Err(e) => tracing::warn!(file = name, error = %e, "restore failed"),
        }
    }

    let quarantine = home.join(QUARANTINE_DIR);
    for name in SENSITIVE_SUBTREES {
        let src = backup.join(name);
        if std::fs::symlink_metadata(&src).is_err() {
            continue;
        }
        let dst = quarantine.join(name);
        let moved = dst
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| move_tree(&src, &dst));
        match moved {
            Ok(()) => report.quarantined.push(name.to_string()),
            Err(e) => tracing::warn!(subtree = name, error = %e, "quarantine failed"),
        }
    }

    let Some(owner) = owner else {
        return report;
    };
    if report.quarantined.is_empty() {
        return report;
    }
    if let Err(e) = host.chown(&quarantine, owner, true) {
        tracing::warn!(path = %quarantine.display(), error = %e, "chown of quarantine failed");
    }
    report
}

/// Rename `src` to `dst`, copying and deleting when they sit on different
/// filesystems.
pub fn move_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32) => {
            copy_tree(src, dst)?;
            let meta = std::fs::symlink_metadata(src)?;
            if meta.is_dir() {
                std::fs::remove_dir_all(src)
            } else {
                std::fs::remove_file(src)
            }
        }
        Err(e) => Err(e),
    }
}

/// Recursive copy that recreates symlinks instead of following them.
pub fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(src)?;
    let ft = meta.file_type();
    if ft.is_symlink() {
        let target = std::fs::read_link(src)?;
        std::os::unix::fs::symlink(target, dst)
    } else if ft.is_dir() {
        std::fs::create_dir_all(dst)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
        // last, so a read-only source directory still gets its children
        std::fs::set_permissions(dst, meta.permissions())
    } else {
        std::fs::copy(src, dst).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SystemHost;
    use assert_fs::prelude::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    // --- backup_if_needed ---

    #[test]
    fn missing_path_needs_no_backup() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let home = tmp.child("alice");
        assert_eq!(backup_if_needed(home.path(), "alice", &[], now()).unwrap(), None);
    }

    #[test]
    fn empty_dir_needs_no_backup() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let home = tmp.child("alice");
        home.create_dir_all().unwrap();
        assert_eq!(backup_if_needed(home.path(), "alice", &[], now()).unwrap(), None);
        home.assert(predicates::path::is_dir());
    }

    #[test]
    fn mounted_path_is_left_alone() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let home = tmp.child("alice");
        home.child("file").write_str("x").unwrap();
        let mounts = vec![MountEntry {
            source: "nc-alice:".to_string(),
            target: home.path().to_string_lossy().into_owned(),
            fstype: "fuse.rclone".to_string(),
        }];
        assert_eq!(backup_if_needed(home.path(), "alice", &mounts, now()).unwrap(), None);
        home.child("file").assert("x");
    }

    #[test]
    fn non_empty_dir_is_moved_aside() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let home = tmp.child("alice");
        home.child(".bashrc").write_str("alias ll='ls -l'\n").unwrap();

        let snap = backup_if_needed(home.path(), "alice", &[], now()).unwrap().unwrap();
        assert_eq!(snap.location, tmp.path().join("alice.backup.1700000000"));
        assert_eq!(snap.username, "alice");
        home.assert(predicates::path::missing());
        tmp.child("alice.backup.1700000000/.bashrc").assert("alias ll='ls -l'\n");
    }

    #[test]
    fn backup_name_collision_gets_suffix() {
        let tmp = assert_fs::TempDir::new().unwrap();
        tmp.child("alice.backup.1700000000").create_dir_all().unwrap();
        tmp.child("alice/f").write_str("x").unwrap();
        let snap = backup_if_needed(&tmp.path().join("alice"), "alice", &[], now())
            .unwrap()
            .unwrap();
        assert_eq!(snap.location, tmp.path().join("alice.backup.1700000000-1"));
    }

    // --- restore_selected ---

    fn snapshot(tmp: &assert_fs::TempDir) -> BackupSnapshot {
        BackupSnapshot {
            username: "alice".to_string(),
            created_at: now(),
            original: tmp.path().join("alice"),
            location: tmp.path().join("alice.backup.1700000000"),
        }
    }

    #[test]
    fn restores_allowlist_and_quarantines_secrets() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let backup = tmp.child("alice.backup.1700000000");
        backup.child(".bashrc").write_str("bashrc").unwrap();
        backup.child(".gitconfig").write_str("gitconfig").unwrap();
        backup.child(".ssh/id_ed25519").write_str("KEY").unwrap();
        backup.child(".config/systemd/user/x.service").write_str("unit").unwrap();
        backup.child("notes.txt").write_str("not restored").unwrap();
        let home = tmp.child("alice");
        home.create_dir_all().unwrap();

        let report = restore_selected(&snapshot(&tmp), home.path(), None, &SystemHost);

        assert_eq!(report.restored, vec![".bashrc", ".gitconfig"]);
        assert_eq!(report.quarantined, vec![".ssh", ".config/systemd"]);
        assert_eq!(report.count(), 4);
        home.child(".bashrc").assert("bashrc");
        home.child(".ssh").assert(predicates::path::missing());
        home.child("notes.txt").assert(predicates::path::missing());
        home.child(".local-backup/.ssh/id_ed25519").assert("KEY");
        home.child(".local-backup/.config/systemd/user/x.service").assert("unit");
        backup.child(".ssh").assert(predicates::path::missing());
    }

    #[test]
    fn restore_from_empty_backup_is_noop() {
        let tmp = assert_fs::TempDir::new().unwrap();
        tmp.child("alice.backup.1700000000").create_dir_all().unwrap();
        let home = tmp.child("alice");
        home.create_dir_all().unwrap();
        let report = restore_selected(&snapshot(&tmp), home.path(), None, &SystemHost);
        assert_eq!(report, RestoreReport::default());
        home.child(QUARANTINE_DIR).assert(predicates::path::missing());
    }

    // --- copy_tree ---

    #[test]
    fn copy_tree_keeps_symlinks() {
        let tmp = assert_fs::TempDir::new().unwrap();
        tmp.child("src/a").write_str("a").unwrap();
        std::os::unix::fs::symlink("a", tmp.path().join("src/link")).unwrap();
        copy_tree(&tmp.path().join("src"), &tmp.path().join("dst")).unwrap();
        tmp.child("dst/a").assert("a");
        let link = std::fs::read_link(tmp.path().join("dst/link")).unwrap();
        assert_eq!(link, PathBuf::from("a"));
    }

    #[test]
    fn copy_tree_fills_read_only_directory() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = assert_fs::TempDir::new().unwrap();
        tmp.child("src/.ssh/id_ed25519").write_str("PRIVATE").unwrap();
        let ssh = tmp.path().join("src/.ssh");
        std::fs::set_permissions(&ssh, std::fs::Permissions::from_mode(0o500)).unwrap();

        let result = copy_tree(&tmp.path().join("src"), &tmp.path().join("dst"));

        let copied = tmp.path().join("dst/.ssh");
        let mode = std::fs::metadata(&copied).map(|m| m.permissions().mode() & 0o777);
        for dir in [&ssh, &copied] {
            let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
        }
        result.unwrap();
        assert_eq!(mode.unwrap(), 0o500);
        tmp.child("dst/.ssh/id_ed25519").assert("PRIVATE");
    }
}
