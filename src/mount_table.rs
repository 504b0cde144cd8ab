#![allow(dead_code)]

use std::path::Path;

use crate::engine::EngineKind;

#[derive(Debug, Clone, PartialEq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fstype: String,
}

impl MountEntry {
    /// The engine this entry belongs to, judged by filesystem type alone.
    pub fn engine(&self) -> Option<EngineKind> {
        engine_for_fstype(&self.fstype)
    }
}

/// Undo the octal escapes `/proc/mounts` uses for space, tab, newline and backslash.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let code = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(code) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse `/proc/mounts` text.
///
/// Format per line: `<source> <target> <fstype> <options> <dump> <pass>`
pub fn parse_proc_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let source = parts.next()?;
            let target = parts.next()?;
            let fstype = parts.next()?;
            Some(MountEntry {
                source: unescape(source),
                target: unescape(target),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Map a filesystem type to the engine that produces it.
///
/// rclone mounts show up as `fuse.rclone`; davfs2 as `davfs` (or `fuse.davfs`
/// on some builds).
pub fn engine_for_fstype(fstype: &str) -> Option<EngineKind> {
    match fstype {
        "fuse.rclone" | "rclone" => Some(EngineKind::SyncCache),
        "davfs" | "fuse.davfs" | "fuse.davfs2" => Some(EngineKind::KernelWebDav),
        _ => None,
    }
}

/// Entries created by either engine.
pub fn remote_mounts(entries: &[MountEntry]) -> Vec<&MountEntry> {
    entries.iter().filter(|e| e.engine().is_some()).collect()
}

/// Return the entry mounted at `target`, or `None` if not found.
///
/// When several mounts are stacked on the same target the last one wins,
/// matching what the kernel exposes at that path.
pub fn find_mount<'a>(entries: &'a [MountEntry], target: &Path) -> Option<&'a MountEntry> {
    entries.iter().rev().find(|e| Path::new(&e.target) == target)
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- parse_proc_mounts ---

    #[test]
    fn proc_mounts_empty_input() {
        assert_eq!(parse_proc_mounts(""), vec![]);
    }

    #[test]
    fn proc_mounts_parses_rclone_entry() {
        let text = "nc-alice: /home/alice fuse.rclone rw,nosuid,nodev,relatime,user_id=0 0 0";
        let entries = parse_proc_mounts(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "nc-alice:");
        assert_eq!(entries[0].target, "/home/alice");
        assert_eq!(entries[0].engine(), Some(EngineKind::SyncCache));
    }

    #[test]
    fn proc_mounts_parses_davfs_entry() {
        let text = "https://cloud.example.com/remote.php/dav/files/bob/ /home/bob davfs rw,nosuid,nodev 0 0";
        let entries = parse_proc_mounts(text);
        assert_eq!(entries[0].engine(), Some(EngineKind::KernelWebDav));
        assert_eq!(entries[0].target, "/home/bob");
    }

    #[test]
    fn proc_mounts_unescapes_spaces_in_target() {
        let text = "nc-carol: /srv/home\\040dir fuse.rclone rw 0 0";
        let entries = parse_proc_mounts(text);
        assert_eq!(entries[0].target, "/srv/home dir");
    }

    #[test]
    fn remote_mounts_ignores_system_filesystems() {
        let text = "sysfs /sys sysfs rw 0 0\n\
                    proc /proc proc rw 0 0\n\
                    nc-alice: /home/alice fuse.rclone rw 0 0\n\
                    tmpfs /tmp tmpfs rw 0 0";
        let entries = parse_proc_mounts(text);
        let remote = remote_mounts(&entries);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].target, "/home/alice");
    }

    // --- engine_for_fstype ---

    #[test]
    fn unknown_fstype_has_no_engine() {
        assert_eq!(engine_for_fstype("ext4"), None);
        assert_eq!(engine_for_fstype("fuse.sshfs"), None);
    }

    // --- find_mount ---

    #[test]
    fn find_mount_returns_entry_when_found() {
        let entries = parse_proc_mounts("nc-alice: /home/alice fuse.rclone rw 0 0");
        let found = find_mount(&entries, Path::new("/home/alice")).unwrap();
        assert_eq!(found.source, "nc-alice:");
    }

    #[test]
    fn find_mount_ignores_trailing_slash() {
        let entries = parse_proc_mounts("nc-alice: /home/alice fuse.rclone rw 0 0");
        assert!(find_mount(&entries, Path::new("/home/alice/")).is_some());
    }

    #[test]
    fn find_mount_ignores_doubled_separators() {
        let entries = parse_proc_mounts("nc-alice: /home/alice fuse.rclone rw 0 0");
        assert!(find_mount(&entries, Path::new("/home//alice")).is_some());
    }

    #[test]
    fn find_mount_returns_none_for_wrong_target() {
        let entries = parse_proc_mounts("nc-alice: /home/alice fuse.rclone rw 0 0");
        assert_eq!(find_mount(&entries, Path::new("/home/bob")), None);
    }

    #[test]
    fn find_mount_prefers_topmost_stacked_mount() {
        let text = "/dev/sda1 /home/alice ext4 rw 0 0\n\
                    nc-alice: /home/alice fuse.rclone rw 0 0";
        let entries = parse_proc_mounts(text);
        let found = find_mount(&entries, Path::new("/home/alice")).unwrap();
        assert_eq!(found.fstype, "fuse.rclone");
    }
}
