use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::MountError;
use crate::naming;
use crate::platform;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive advisory lock on a lock file. Released on drop.
#[derive(Debug)]
pub struct PathLock {
    file: File,
    path: PathBuf,
}

impl PathLock {
    /// Poll for an exclusive lock on `path`, creating the file (and its parent)
    /// if needed. Gives up with `LockTimeout` after `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, MountError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MountError::io(format!("Failed to create {}", parent.display()), e)
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| MountError::io(format!("Failed to open lock file {}", path.display()), e))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(MountError::LockTimeout(path.to_path_buf()));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(MountError::io(format!("Failed to lock {}", path.display()), e));
                }
            }
        }
        tracing::debug!(lock = %path.display(), "acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Lock serializing every mutation of `mount_point`. Spellings of the same
/// directory share one file under `locks_dir`; distinct mount points don't.
pub fn mount_point_lock(
    locks_dir: &Path,
    mount_point: &Path,
    timeout: Duration,
) -> Result<PathLock, MountError> {
    let mount_point = platform::normalize_mount_point(mount_point)?;
    PathLock::acquire(&locks_dir.join(naming::lock_name(&mount_point)), timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.lock");
        let _held = PathLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let err = PathLock::acquire(&path, Duration::from_millis(150)).unwrap_err();
        assert!(matches!(err, MountError::LockTimeout(_)));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.lock");
        drop(PathLock::acquire(&path, Duration::from_secs(1)).unwrap());
        assert!(PathLock::acquire(&path, Duration::from_millis(150)).is_ok());
    }

    #[test]
    fn distinct_mount_points_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let timeout = Duration::from_millis(150);
        let _a = mount_point_lock(dir.path(), Path::new("/home/alice"), timeout).unwrap();
        assert!(mount_point_lock(dir.path(), Path::new("/home/bob"), timeout).is_ok());
        assert!(mount_point_lock(dir.path(), Path::new("/home/alice"), timeout).is_err());
    }

    #[test]
    fn spellings_of_one_mount_point_share_a_lock() {
        let dir = tempfile::tempdir().unwrap();
        let timeout = Duration::from_millis(150);
        let _held = mount_point_lock(dir.path(), Path::new("/home/alice"), timeout).unwrap();
        for alias in ["/home/alice/", "/home//alice", "/home/bob/../alice"] {
            let err = mount_point_lock(dir.path(), Path::new(alias), timeout).unwrap_err();
            assert!(matches!(err, MountError::LockTimeout(_)), "{alias} got its own lock");
        }
    }

    #[test]
    fn creates_missing_lock_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks/nested/a.lock");
        let lock = PathLock::acquire(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(lock.path(), path);
        assert!(path.exists());
    }
}
