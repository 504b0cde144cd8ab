//! Small text resources shared between concurrent invocations.
//!
//! Every mutation takes an exclusive lock on a sibling `.lock` file, reads the
//! whole resource, rewrites it and renames a temp file over the original.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MountError;
use crate::lock::PathLock;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct LockedFile {
    path: PathBuf,
    lock_path: PathBuf,
    mode: u32,
    timeout: Duration,
}

impl LockedFile {
    pub fn new(path: impl Into<PathBuf>, mode: u32) -> Self {
        let path = path.into();
        let mut lock = path.clone().into_os_string();
        lock.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock),
            mode,
            timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_unlocked(&self) -> Result<String, MountError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(MountError::io(format!("Failed to read {}", self.path.display()), e)),
        }
    }

    /// Current contents; empty when the file does not exist yet.
    pub fn read(&self) -> Result<String, MountError> {
        let _guard = PathLock::acquire(&self.lock_path, self.timeout)?;
        self.read_unlocked()
    }

    /// Read-modify-write under the lock. `f` returns the new contents, or
    /// `None` to leave the file untouched.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&str) -> Result<(Option<String>, R), MountError>,
    ) -> Result<R, MountError> {
        let _guard = PathLock::acquire(&self.lock_path, self.timeout)?;
        let current = self.read_unlocked()?;
        let (next, result) = f(&current)?;
        if let Some(next) = next {
            self.write_atomic(&next)?;
        }
        Ok(result)
    }

    fn write_atomic(&self, contents: &str) -> Result<(), MountError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)
            .map_err(|e| MountError::io(format!("Failed to create {}", parent.display()), e))?;

        let ctx = || format!("Failed to write {}", self.path.display());
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| MountError::io(ctx(), e))?;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(self.mode))
            .map_err(|e| MountError::io(ctx(), e))?;
        tmp.write_all(contents.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| MountError::io(ctx(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| MountError::io(ctx(), e.error))?;
        Ok(())
    }
}

fn store_error(path: &Path, err: MountError) -> MountError {
    match err {
        MountError::CredentialStore { .. } => err,
        other => MountError::CredentialStore {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

// --- davfs2 secrets ---

/// Quote a secrets-file field when davfs2 would otherwise split or misread it.
pub fn quote_secret_field(value: &str) -> String {
    if !value.is_empty() && !value.chars().any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '#')) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Split a secrets-file line into fields, honoring quotes and backslash escapes.
/// Returns an empty vec for blank and comment lines.
pub fn split_secret_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.peek() {
            None | Some('#') => break,
            Some('"') => {
                chars.next();
                let mut field = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => field.extend(chars.next()),
                        '"' => break,
                        c => field.push(c),
                    }
                }
                fields.push(field);
            }
            Some(_) => {
                let mut field = String::new();
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    if c == '\\' {
                        field.extend(chars.next());
                    } else {
                        field.push(c);
                    }
                }
                fields.push(field);
            }
        }
    }
    fields
}

/// Replace the line whose first field is `url`, or append one. Other lines,
/// comments included, are kept as they are.
pub fn upsert_secret_line(text: &str, url: &str, user: &str, password: &str) -> String {
    let new_line = format!(
        "{} {} {}",
        quote_secret_field(url),
        quote_secret_field(user),
        quote_secret_field(password)
    );
    let mut replaced = false;
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        if split_secret_line(line).first().map(String::as_str) == Some(url) {
            if !replaced {
                lines.push(new_line.clone());
                replaced = true;
            }
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(new_line);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn remove_secret_line(text: &str, url: &str) -> Option<String> {
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| split_secret_line(line).first().map(String::as_str) != Some(url))
        .collect();
    if kept.len() == text.lines().count() {
        return None;
    }
    let mut out = kept.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Some(out)
}

/// davfs2's `secrets` file: one `url user password` line per mount, mode 0600.
#[derive(Debug, Clone)]
pub struct SecretsFile {
    file: LockedFile,
}

impl SecretsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: LockedFile::new(path, 0o600),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn upsert(&self, url: &str, user: &str, password: &str) -> Result<(), MountError> {
        self.file
            .update(|text| Ok((Some(upsert_secret_line(text, url, user, password)), ())))
            .map_err(|e| store_error(self.path(), e))
    }

    /// Drop the entry for `url`. Returns whether one existed.
    pub fn remove(&self, url: &str) -> Result<bool, MountError> {
        self.file
            .update(|text| {
                let next = remove_secret_line(text, url);
                let found = next.is_some();
                Ok((next, found))
            })
            .map_err(|e| store_error(self.path(), e))
    }

    /// `(user, password)` registered for `url`.
    pub fn get(&self, url: &str) -> Result<Option<(String, String)>, MountError> {
        let text = self.file.read().map_err(|e| store_error(self.path(), e))?;
        Ok(text.lines().find_map(|line| {
            let mut fields = split_secret_line(line).into_iter();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(u), Some(user), Some(pw)) if u == url => Some((user, pw)),
                _ => None,
            }
        }))
    }
}

// --- rclone remotes ---

fn section_name(line: &str) -> Option<&str> {
    let line = line.trim();
    line.strip_prefix('[')?.strip_suffix(']').map(str::trim)
}

/// Replace (or append) the `[name]` section with `entries`.
pub fn upsert_ini_section(text: &str, name: &str, entries: &[(&str, &str)]) -> String {
    let mut section = format!("[{name}]\n");
    for (key, value) in entries {
        section.push_str(&format!("{key} = {value}\n"));
    }

    let mut out = String::new();
    let mut in_target = false;
    let mut written = false;
    for line in text.lines() {
        if let Some(current) = section_name(line) {
            in_target = current == name;
            if in_target {
                if !written {
                    out.push_str(&section);
                    written = true;
                }
                continue;
            }
        }
        if !in_target {
            out.push_str(line);
            out.push('\n');
        }
    }
    if !written {
        if !out.is_empty() && !out.ends_with("\n\n") {
            out.push('\n');
        }
        out.push_str(&section);
    }
    out
}

fn remove_ini_section(text: &str, name: &str) -> Option<String> {
    if !text.lines().any(|l| section_name(l) == Some(name)) {
        return None;
    }
    let mut out = String::new();
    let mut in_target = false;
    for line in text.lines() {
        if let Some(current) = section_name(line) {
            in_target = current == name;
        }
        if !in_target {
            out.push_str(line);
            out.push('\n');
        }
    }
    Some(out)
}

/// Key/value pairs of the `[name]` section.
pub fn read_ini_section(text: &str, name: &str) -> Option<Vec<(String, String)>> {
    let mut found = false;
    let mut in_target = false;
    let mut entries = Vec::new();
    for line in text.lines() {
        if let Some(current) = section_name(line) {
            in_target = current == name;
            found |= in_target;
            continue;
        }
        if !in_target {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            entries.push((k.trim().to_string(), v.trim().to_string()));
        }
    }
    found.then_some(entries)
}

/// rclone's INI config holding one `[nc-<user>]` remote per user, mode 0600.
#[derive(Debug, Clone)]
pub struct RemoteDefinitions {
    file: LockedFile,
}

impl RemoteDefinitions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: LockedFile::new(path, 0o600),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn upsert(&self, name: &str, entries: &[(&str, &str)]) -> Result<(), MountError> {
        self.file
            .update(|text| Ok((Some(upsert_ini_section(text, name, entries)), ())))
            .map_err(|e| store_error(self.path(), e))
    }

    pub fn remove(&self, name: &str) -> Result<bool, MountError> {
        self.file
            .update(|text| {
                let next = remove_ini_section(text, name);
                let found = next.is_some();
                Ok((next, found))
            })
            .map_err(|e| store_error(self.path(), e))
    }

    pub fn get(&self, name: &str) -> Result<Option<Vec<(String, String)>>, MountError> {
        let text = self.file.read().map_err(|e| store_error(self.path(), e))?;
        Ok(read_ini_section(&text, name))
    }

    pub fn names(&self) -> Result<Vec<String>, MountError> {
        let text = self.file.read().map_err(|e| store_error(self.path(), e))?;
        Ok(text
            .lines()
            .filter_map(section_name)
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const URL_A: &str = "https://cloud.example.com/remote.php/dav/files/alice/";
    const URL_B: &str = "https://cloud.example.com/remote.php/dav/files/bob/";

    // --- secrets lines ---

    #[test]
    fn upsert_appends_to_empty_file() {
        assert_eq!(
            upsert_secret_line("", URL_A, "alice", "pw"),
            format!("{URL_A} alice pw\n")
        );
    }

    #[test]
    fn upsert_replaces_existing_url_and_keeps_others() {
        let text = format!("# davfs2 secrets\n{URL_A} alice old\n{URL_B} bob pw\n");
        let out = upsert_secret_line(&text, URL_A, "alice", "new");
        assert_eq!(out, format!("# davfs2 secrets\n{URL_A} alice new\n{URL_B} bob pw\n"));
    }

    #[test]
    fn passwords_with_spaces_are_quoted_and_read_back() {
        let out = upsert_secret_line("", URL_A, "alice", "correct horse \"battery\"");
        let fields = split_secret_line(out.lines().next().unwrap());
        assert_eq!(fields, vec![URL_A, "alice", "correct horse \"battery\""]);
    }

    #[test]
    fn comment_lines_have_no_fields() {
        assert!(split_secret_line("  # comment").is_empty());
        assert!(split_secret_line("").is_empty());
    }

    #[test]
    fn secrets_file_is_private() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = SecretsFile::new(dir.path().join("secrets"));
        secrets.upsert(URL_A, "alice", "pw").unwrap();
        let mode = std::fs::metadata(secrets.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(
            secrets.get(URL_A).unwrap(),
            Some(("alice".to_string(), "pw".to_string()))
        );
    }

    #[test]
    fn secrets_remove_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = SecretsFile::new(dir.path().join("secrets"));
        secrets.upsert(URL_A, "alice", "pw").unwrap();
        assert!(secrets.remove(URL_A).unwrap());
        assert!(!secrets.remove(URL_A).unwrap());
        assert_eq!(secrets.get(URL_A).unwrap(), None);
    }

    #[test]
    fn concurrent_upserts_lose_no_updates() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = Arc::new(SecretsFile::new(dir.path().join("secrets")));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let secrets = Arc::clone(&secrets);
                thread::spawn(move || {
                    let url = format!("https://cloud.example.com/remote.php/dav/files/u{i}/");
                    secrets.upsert(&url, &format!("u{i}"), "pw").unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let text = std::fs::read_to_string(secrets.path()).unwrap();
        assert_eq!(text.lines().count(), 8, "got:\n{text}");
    }

    // --- ini sections ---

    #[test]
    fn ini_upsert_appends_new_section() {
        let out = upsert_ini_section("", "nc-alice", &[("type", "webdav"), ("user", "alice")]);
        assert_eq!(out, "[nc-alice]\ntype = webdav\nuser = alice\n");
    }

    #[test]
    fn ini_upsert_replaces_only_target_section() {
        let text = "[nc-alice]\ntype = webdav\npass = old\n\n[nc-bob]\ntype = webdav\n";
        let out = upsert_ini_section(text, "nc-alice", &[("pass", "new")]);
        assert_eq!(read_ini_section(&out, "nc-alice").unwrap(), vec![("pass".to_string(), "new".to_string())]);
        assert_eq!(
            read_ini_section(&out, "nc-bob").unwrap(),
            vec![("type".to_string(), "webdav".to_string())]
        );
    }

    #[test]
    fn remote_definitions_list_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let remotes = RemoteDefinitions::new(dir.path().join("rclone.conf"));
        remotes.upsert("nc-alice", &[("type", "webdav")]).unwrap();
        remotes.upsert("nc-bob", &[("type", "webdav")]).unwrap();
        assert_eq!(remotes.names().unwrap(), vec!["nc-alice", "nc-bob"]);
        assert!(remotes.remove("nc-alice").unwrap());
        assert_eq!(remotes.names().unwrap(), vec!["nc-bob"]);
        assert!(remotes.get("nc-alice").unwrap().is_none());
    }

    #[test]
    fn update_returning_none_leaves_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let file = LockedFile::new(dir.path().join("state"), 0o644);
        file.update(|_| Ok((None, ()))).unwrap();
        assert!(!file.path().exists());
    }
}
