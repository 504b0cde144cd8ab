//! Record of what this tool mounted where, kept in `<state_dir>/mounts.json`.
//!
//! Status reporting trusts this file over anything it can infer from the
//! mount table or unit definitions.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::EngineKind;
use crate::error::MountError;
use crate::store::LockedFile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountStateEntry {
    pub mount_point: PathBuf,
    pub username: String,
    pub engine: EngineKind,
    pub profile: String,
    #[serde(default)]
    pub fallback_used: bool,
    pub mounted_at: DateTime<Utc>,
}

/// The complete state stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MountState {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    mounts: Vec<MountStateEntry>,
}

fn default_version() -> u32 {
    1
}

impl Default for MountState {
    fn default() -> Self {
        Self {
            version: default_version(),
            mounts: Vec::new(),
        }
    }
}

fn parse(path: &Path, text: &str) -> Result<MountState, MountError> {
    if text.trim().is_empty() {
        return Ok(MountState::default());
    }
    serde_json::from_str(text)
        .map_err(|e| MountError::Config(format!("Failed to parse {}: {e}", path.display())))
}

fn render(state: &MountState) -> Result<String, MountError> {
    serde_json::to_string_pretty(state)
        .map(|mut s| {
            s.push('\n');
            s
        })
        .map_err(|e| MountError::Config(format!("Failed to serialize mount state: {e}")))
}

#[derive(Debug, Clone)]
pub struct MountStateStore {
    file: LockedFile,
}

impl MountStateStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            file: LockedFile::new(state_dir.join("mounts.json"), 0o644),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn load(&self) -> Result<Vec<MountStateEntry>, MountError> {
        let text = self.file.read()?;
        Ok(parse(self.path(), &text)?.mounts)
    }

    pub fn find(&self, mount_point: &Path) -> Result<Option<MountStateEntry>, MountError> {
        Ok(self
            .load()?
            .into_iter()
            .find(|e| e.mount_point == mount_point))
    }

    /// Insert `entry`, replacing any record for the same mount point.
    pub fn record(&self, entry: MountStateEntry) -> Result<(), MountError> {
        let path = self.path().to_path_buf();
        self.file.update(|text| {
            let mut state = parse(&path, text)?;
            state.mounts.retain(|e| e.mount_point != entry.mount_point);
            state.mounts.push(entry);
            Ok((Some(render(&state)?), ()))
        })
    }

    /// Drop the record for `mount_point`. Returns the removed entry.
    pub fn remove(&self, mount_point: &Path) -> Result<Option<MountStateEntry>, MountError> {
        let path = self.path().to_path_buf();
        self.file.update(|text| {
            let mut state = parse(&path, text)?;
            let Some(pos) = state.mounts.iter().position(|e| e.mount_point == mount_point) else {
                return Ok((None, None));
            };
            let removed = state.mounts.remove(pos);
            Ok((Some(render(&state)?), Some(removed)))
        })
    }
}
