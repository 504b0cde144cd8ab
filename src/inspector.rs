//! Read-only view of what is mounted where, with which engine and profile.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::categorize::{self, MountHealth};
use crate::engine::EngineKind;
use crate::error::MountError;
use crate::host::Host;
use crate::mount_table;
use crate::naming::UNIT_PREFIX;
use crate::profiles::ProfileCatalog;
use crate::state::MountStateStore;
use crate::units::{ServiceUnitManager, UnitDefinition};

/// Where a reported profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    /// Written by this tool when it mounted.
    Recorded,
    /// Reconstructed from a unit definition. Approximate.
    Inferred,
}

impl ProfileSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::Inferred => "inferred",
        }
    }
}

/// One rclone or davfs2 mount found on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountRecord {
    pub username: Option<String>,
    pub mount_point: PathBuf,
    pub source: String,
    pub engine: EngineKind,
    pub profile: Option<String>,
    pub profile_source: Option<ProfileSource>,
    #[serde(serialize_with = "health_label")]
    pub state: MountHealth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountStatus {
    pub mount_point: PathBuf,
    pub username: Option<String>,
    pub mounted: bool,
    #[serde(serialize_with = "health_label")]
    pub health: MountHealth,
    pub engine: Option<EngineKind>,
    pub profile: Option<String>,
    pub profile_source: Option<ProfileSource>,
    pub unit: Option<String>,
}

fn health_label<S: serde::Serializer>(h: &MountHealth, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(h.label())
}

/// Who and what is behind one mount, as far as can be told.
#[derive(Debug, Default)]
struct Attribution {
    username: Option<String>,
    profile: Option<String>,
    profile_source: Option<ProfileSource>,
}

/// User named by a mount source: `nc-<user>:` for rclone, the
/// `.../dav/files/<user>/` URL for davfs2.
pub fn source_user(source: &str) -> Option<String> {
    let user = if let Some(rest) = source.strip_prefix("nc-") {
        rest.split(':').next()
    } else {
        source
            .split_once("/remote.php/dav/files/")
            .and_then(|(_, tail)| tail.split('/').next())
    };
    user.filter(|u| !u.is_empty()).map(str::to_string)
}

/// Engine encoded in a unit name, `davhome-<engine>-...`.
pub fn unit_engine(unit: &str) -> Option<EngineKind> {
    unit.strip_prefix(UNIT_PREFIX)?
        .split('-')
        .next()?
        .parse()
        .ok()
}

/// Best guess at a unit's profile: its `DAVHOME_PROFILE`, else its rclone flags.
fn infer_profile(def: &UnitDefinition, engine: EngineKind) -> Option<String> {
    if let Some(name) = &def.profile {
        if ProfileCatalog::lookup_for(engine, name).is_ok() {
            return Some(name.clone());
        }
    }
    match engine {
        EngineKind::SyncCache => {
            ProfileCatalog::infer_from_args(&def.exec_start).map(|p| p.name.to_string())
        }
        EngineKind::KernelWebDav => Some(ProfileCatalog::default_for(engine).name.to_string()),
    }
}

pub struct StatusInspector {
    host: Arc<dyn Host>,
    state: MountStateStore,
    units: Option<Arc<ServiceUnitManager>>,
}

impl StatusInspector {
    pub fn new(host: Arc<dyn Host>, state: MountStateStore) -> Self {
        Self {
            host,
            state,
            units: None,
        }
    }

    /// Consult unit definitions when no mount record exists.
    pub fn with_units(mut self, units: Arc<ServiceUnitManager>) -> Self {
        self.units = Some(units);
        self
    }

    /// Engine whose filesystem type backs `mount_point`, if any.
    pub fn detect_engine(&self, mount_point: &Path) -> Result<Option<EngineKind>, MountError> {
        let table = self.host.mount_table()?;
        Ok(mount_table::find_mount(&table, mount_point).and_then(|e| e.engine()))
    }

    /// Every rclone or davfs2 mount on the host, with its user and profile.
    pub fn list_mounts(&self) -> Result<Vec<MountRecord>, MountError> {
        let table = self.host.mount_table()?;
        Ok(mount_table::remote_mounts(&table)
            .into_iter()
            .filter_map(|e| {
                let engine = e.engine()?;
                let mount_point = PathBuf::from(&e.target);
                let (state, _) = categorize::inspect(&table, &mount_point);
                let unit = self.unit_for(&mount_point);
                let found = self.attribute(&mount_point, engine, &e.source, unit.as_ref());
                Some(MountRecord {
                    username: found.username,
                    mount_point,
                    source: e.source.clone(),
                    engine,
                    profile: found.profile,
                    profile_source: found.profile_source,
                    state,
                })
            })
            .collect())
    }

    pub fn get_status(&self, mount_point: &Path) -> Result<MountStatus, MountError> {
        let table = self.host.mount_table()?;
        let (health, entry) = categorize::inspect(&table, mount_point);
        let engine = entry.and_then(|e| e.engine());
        let unit = self.unit_for(mount_point);
        let mut status = MountStatus {
            mount_point: mount_point.to_path_buf(),
            username: None,
            mounted: health == MountHealth::Active,
            health,
            engine,
            profile: None,
            profile_source: None,
            unit: unit.as_ref().map(|u| u.name.clone()),
        };

        if let (Some(engine), Some(entry)) = (engine, entry) {
            let found = self.attribute(mount_point, engine, &entry.source, unit.as_ref());
            status.username = found.username;
            status.profile = found.profile;
            status.profile_source = found.profile_source;
        }
        Ok(status)
    }

    fn unit_for(&self, mount_point: &Path) -> Option<UnitDefinition> {
        let units = self.units.as_ref()?;
        units.find_for_mount_point(mount_point).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cannot read unit definitions");
            None
        })
    }

    /// Profile from the mount record when it matches `engine`, otherwise
    /// inferred from the unit. The user comes from the record or the source.
    fn attribute(
        &self,
        mount_point: &Path,
        engine: EngineKind,
        source: &str,
        unit: Option<&UnitDefinition>,
    ) -> Attribution {
        let record = self
            .state
            .find(mount_point)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cannot read mount state");
                None
            })
            .filter(|r| r.engine == engine);
        if let Some(record) = record {
            return Attribution {
                username: Some(record.username),
                profile: Some(record.profile),
                profile_source: Some(ProfileSource::Recorded),
            };
        }

        let profile = unit
            .filter(|u| unit_engine(&u.name) == Some(engine))
            .and_then(|u| infer_profile(u, engine));
        Attribution {
            username: source_user(source),
            profile_source: profile.as_ref().map(|_| ProfileSource::Inferred),
            profile,
        }
    }
}
