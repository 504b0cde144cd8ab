//! Mount lifecycle: idempotency, home-directory safety, credential setup,
//! fallback between engines and post-mount verification.

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::categorize::{self, MountHealth};
use crate::engine::{EngineKind, MountRequest, RemoteCredential, RemoteMountEngine};
use crate::error::{ErrorKind, MountError};
use crate::host::{Host, Owner};
use crate::lock;
use crate::mount_table::MountEntry;
use crate::platform;
use crate::profiles::{MountProfile, ProfileCatalog};
use crate::remote::{CredentialCheck, RemoteEndpoint};
use crate::safety_net::{self, BackupSnapshot};
use crate::state::{MountStateEntry, MountStateStore};

const PROBE_CONTENT: &[u8] = b"davhome probe\n";

/// One mount request.
#[derive(Clone, Copy)]
pub struct MountSpec<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub mount_point: &'a Path,
    pub engine: EngineKind,
    /// `None` selects the engine's default profile.
    pub profile: Option<&'a str>,
    pub auto_fallback: bool,
    pub force_remount: bool,
}

impl fmt::Debug for MountSpec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountSpec")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("mount_point", &self.mount_point)
            .field("engine", &self.engine)
            .field("profile", &self.profile)
            .field("auto_fallback", &self.auto_fallback)
            .field("force_remount", &self.force_remount)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOutcome {
    pub success: bool,
    pub engine_used: Option<EngineKind>,
    pub profile: Option<String>,
    pub fallback_used: bool,
    pub message: String,
    /// Engines whose mount was attempted, in order.
    pub attempted: Vec<EngineKind>,
    pub error_kind: Option<ErrorKind>,
    pub backup: Option<BackupSnapshot>,
    pub restored: usize,
}

impl MountOutcome {
    fn fail(mut self, err: &MountError) -> Self {
        self.success = false;
        self.error_kind = Some(err.kind());
        self.message = err.to_string();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmountOutcome {
    pub success: bool,
    pub engine: Option<EngineKind>,
    pub message: String,
    pub error_kind: Option<ErrorKind>,
}

pub struct MountOrchestrator {
    /// In `EngineKind::PRIORITY` order.
    engines: Vec<Arc<dyn RemoteMountEngine>>,
    host: Arc<dyn Host>,
    state: MountStateStore,
    endpoint: Option<RemoteEndpoint>,
    verifier: Option<Arc<dyn CredentialCheck>>,
    locks_dir: PathBuf,
    mount_timeout: Duration,
    lock_timeout: Duration,
}

impl MountOrchestrator {
    pub fn new(
        mut engines: Vec<Arc<dyn RemoteMountEngine>>,
        host: Arc<dyn Host>,
        state: MountStateStore,
        locks_dir: PathBuf,
        mount_timeout: Duration,
    ) -> Self {
        engines.sort_by_key(|e| e.kind());
        engines.dedup_by_key(|e| e.kind());
        Self {
            engines,
            host,
            state,
            endpoint: None,
            verifier: None,
            locks_dir,
            mount_timeout,
            lock_timeout: mount_timeout * 2,
        }
    }

    /// Remote the mounts point at. Unmounting works without one.
    pub fn with_endpoint(mut self, endpoint: RemoteEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Check credentials against the remote before touching the home directory.
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialCheck>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn engine(&self, kind: EngineKind) -> Option<&Arc<dyn RemoteMountEngine>> {
        self.engines.iter().find(|e| e.kind() == kind)
    }

    pub fn state(&self) -> &MountStateStore {
        &self.state
    }

    /// Mount `spec.username`'s remote home at `spec.mount_point`.
    ///
    /// Never returns an error: every modelled failure is reported in the outcome.
    pub fn mount(&self, spec: &MountSpec<'_>) -> MountOutcome {
        let outcome = MountOutcome::default();
        let mount_point = match platform::normalize_mount_point(spec.mount_point) {
            Ok(mp) => mp,
            Err(e) => return outcome.fail(&e),
        };
        let spec = &MountSpec {
            mount_point: &mount_point,
            ..*spec
        };
        let profile = match spec.profile {
            Some(name) => ProfileCatalog::lookup_for(spec.engine, name),
            None => Ok(ProfileCatalog::default_for(spec.engine)),
        };
        let profile = match profile {
            Ok(p) => p,
            Err(e) => return outcome.fail(&e),
        };
        if self.endpoint.is_none() {
            return outcome.fail(&missing_endpoint());
        }
        if self.engine(spec.engine).is_none() {
            let err = MountError::Config(format!("Engine {} is not configured", spec.engine));
            return outcome.fail(&err);
        }

        let _lock =
            match lock::mount_point_lock(&self.locks_dir, spec.mount_point, self.lock_timeout) {
                Ok(l) => l,
                Err(e) => return outcome.fail(&e),
            };
        let mut outcome = outcome;
        match self.mount_locked(spec, profile, &mut outcome) {
            Ok(()) => outcome,
            Err(e) => {
                tracing::warn!(mount_point = %spec.mount_point.display(), error = %e, "mount failed");
                outcome.fail(&e)
            }
        }
    }

    fn mount_locked(
        &self,
        spec: &MountSpec<'_>,
        profile: &'static MountProfile,
        outcome: &mut MountOutcome,
    ) -> Result<(), MountError> {
        let mp = spec.mount_point;
        let table = self.host.mount_table()?;
        let (health, entry) = categorize::inspect(&table, mp);
        let backing = self.backing_engine(mp, entry);

        match (health, spec.force_remount) {
            (MountHealth::Active, false) => {
                let record = self.state.find(mp).ok().flatten();
                outcome.success = true;
                outcome.engine_used = backing;
                outcome.profile = record.map(|r| r.profile);
                outcome.message = format!("{} is already mounted", mp.display());
                tracing::info!(mount_point = %mp.display(), "already mounted");
                return Ok(());
            }
            (MountHealth::Active, true) => {
                tracing::info!(mount_point = %mp.display(), engine = ?backing, "unmounting for remount");
                self.detach(mp, backing, false)?;
            }
            (MountHealth::Stale, _) => {
                tracing::warn!(mount_point = %mp.display(), "stale mount, detaching");
                self.detach(mp, backing, true)?;
            }
            (MountHealth::Unmounted, _) => {}
        }

        let owner = self
            .host
            .lookup_user(spec.username)?
            .ok_or_else(|| MountError::UnknownUser(spec.username.to_string()))?;

        if let Some(verifier) = &self.verifier {
            verifier.verify(spec.username, spec.password)?;
        }

        let mut candidates = vec![(spec.engine, profile)];
        if spec.auto_fallback {
            candidates.extend(
                spec.engine
                    .fallbacks()
                    .filter(|k| self.engine(*k).is_some())
                    .map(|k| (k, ProfileCatalog::default_for(k))),
            );
        }

        let mut failures: Vec<(EngineKind, MountError)> = Vec::new();
        let mut backup_done = false;
        for (kind, profile) in candidates {
            let Some(engine) = self.engine(kind) else {
                continue;
            };
            outcome.attempted.push(kind);
            match self.attempt(engine.as_ref(), spec, profile, owner, &mut backup_done, outcome) {
                Ok(()) => {
                    outcome.success = true;
                    outcome.engine_used = Some(kind);
                    outcome.profile = Some(profile.name.to_string());
                    outcome.fallback_used = kind != spec.engine;
                    outcome.message = success_message(mp, kind, profile, &failures);
                    return Ok(());
                }
                Err(e) if e.is_fallback_eligible() => {
                    tracing::warn!(engine = %kind, error = %e, "mount attempt failed");
                    failures.push((kind, e));
                }
                Err(e) => {
                    self.roll_back_backup(outcome.backup.as_ref(), mp);
                    return Err(e);
                }
            }
        }

        self.roll_back_backup(outcome.backup.as_ref(), mp);
        if failures.len() == 1 {
            if let Some((_, only)) = failures.pop() {
                return Err(only);
            }
        }
        let summary = failures
            .iter()
            .map(|(kind, err)| format!("{kind}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(MountError::AllEnginesFailed(summary))
    }

    /// Steps run once per candidate engine: back up, register, mount, verify.
    fn attempt(
        &self,
        engine: &dyn RemoteMountEngine,
        spec: &MountSpec<'_>,
        profile: &'static MountProfile,
        owner: Owner,
        backup_done: &mut bool,
        outcome: &mut MountOutcome,
    ) -> Result<(), MountError> {
        let mp = spec.mount_point;
        let kind = engine.kind();

        if !engine.is_available() {
            return Err(MountError::ProgramMissing {
                program: kind.binary().to_string(),
                reason: format!("install it with `davhome engine install {kind}`"),
            });
        }

        if !*backup_done {
            *backup_done = true;
            let table = self.host.mount_table()?;
            outcome.backup = safety_net::backup_if_needed(mp, spec.username, &table, Utc::now())?;
        }

        std::fs::create_dir_all(mp)
            .map_err(|e| MountError::io(format!("Failed to create {}", mp.display()), e))?;

        let endpoint = self
            .endpoint
            .as_ref()
            .map(|e| e.user_url(spec.username))
            .ok_or_else(missing_endpoint)?;
        engine.configure()?;
        engine
            .register_credential(&RemoteCredential {
                endpoint: endpoint.clone(),
                username: spec.username.to_string(),
                password: spec.password.to_string(),
            })
            .map_err(|e| match e.kind() {
                ErrorKind::Configuration => e,
                _ => MountError::CredentialRegistration {
                    engine: kind,
                    reason: e.to_string(),
                },
            })?;

        let request = MountRequest {
            username: spec.username,
            endpoint: &endpoint,
            mount_point: mp,
            profile,
            owner: Some(owner),
            timeout: self.mount_timeout,
        };
        tracing::info!(engine = %kind, profile = profile.name, mount_point = %mp.display(), "mounting");
        engine.mount(&request)?;

        let table = self.host.mount_table()?;
        if crate::mount_table::find_mount(&table, mp).is_none() {
            self.tear_down(engine, mp);
            return Err(MountError::NotMounted {
                engine: kind,
                path: mp.to_path_buf(),
            });
        }

        if let Some(snapshot) = &outcome.backup {
            let report = safety_net::restore_selected(snapshot, mp, Some(owner), self.host.as_ref());
            outcome.restored = report.count();
        }

        if let Err(e) = io_probe(mp, profile.read_only) {
            self.tear_down(engine, mp);
            return Err(e);
        }

        if let Err(e) = self.host.chown(mp, owner, false) {
            tracing::warn!(mount_point = %mp.display(), error = %e, "chown failed");
        }

        let record = MountStateEntry {
            mount_point: mp.to_path_buf(),
            username: spec.username.to_string(),
            engine: kind,
            profile: profile.name.to_string(),
            fallback_used: kind != spec.engine,
            mounted_at: Utc::now(),
        };
        if let Err(e) = self.state.record(record) {
            tracing::warn!(error = %e, "failed to record mount state");
        }
        Ok(())
    }

    /// Unmount whatever this tool mounted at `mount_point`. Succeeds when
    /// nothing is mounted there.
    pub fn unmount(&self, mount_point: &Path) -> UnmountOutcome {
        let mut outcome = UnmountOutcome::default();
        let result = platform::normalize_mount_point(mount_point).and_then(|mp| {
            let _lock = lock::mount_point_lock(&self.locks_dir, &mp, self.lock_timeout)?;
            self.unmount_locked(&mp, &mut outcome)
        });
        match result {
            Ok(()) => {
                outcome.success = true;
                outcome
            }
            Err(e) => {
                outcome.error_kind = Some(e.kind());
                outcome.message = e.to_string();
                outcome
            }
        }
    }

    fn unmount_locked(&self, mp: &Path, outcome: &mut UnmountOutcome) -> Result<(), MountError> {
        let table = self.host.mount_table()?;
        let (health, entry) = categorize::inspect(&table, mp);
        let backing = self.backing_engine(mp, entry);
        outcome.engine = backing;

        if health == MountHealth::Unmounted {
            self.forget(mp);
            outcome.message = format!("{} is not mounted", mp.display());
            return Ok(());
        }
        let Some(kind) = backing else {
            return Err(MountError::Config(format!(
                "{} is mounted by something other than davhome",
                mp.display()
            )));
        };
        self.detach(mp, Some(kind), health == MountHealth::Stale)?;
        outcome.message = format!("Unmounted {} ({kind})", mp.display());
        Ok(())
    }

    /// Engine behind `mp`: the recorded one when the record agrees with the
    /// mount table, otherwise whatever the filesystem type says.
    fn backing_engine(&self, mp: &Path, entry: Option<&MountEntry>) -> Option<EngineKind> {
        let listed = entry.and_then(MountEntry::engine);
        let recorded = self.state.find(mp).ok().flatten().map(|r| r.engine);
        match (recorded, listed) {
            (Some(r), Some(l)) if r == l => Some(r),
            (_, Some(l)) => Some(l),
            (r, None) if entry.is_some() => r,
            _ => None,
        }
    }

    /// Unmount `mp` through `kind`'s engine, forcing when asked or when the
    /// regular unmount fails, and drop the state record.
    fn detach(&self, mp: &Path, kind: Option<EngineKind>, force: bool) -> Result<(), MountError> {
        let engine = kind
            .and_then(|k| self.engine(k))
            .or_else(|| self.engines.first())
            .ok_or_else(|| MountError::Config("No engines configured".to_string()))?;
        let result = if force {
            engine.force_unmount(mp)
        } else {
            engine.unmount(mp).or_else(|e| {
                tracing::warn!(mount_point = %mp.display(), error = %e, "unmount failed, forcing");
                engine.force_unmount(mp)
            })
        };
        result?;
        self.forget(mp);
        Ok(())
    }

    fn tear_down(&self, engine: &dyn RemoteMountEngine, mp: &Path) {
        if let Err(e) = engine.unmount(mp) {
            tracing::warn!(mount_point = %mp.display(), error = %e, "teardown unmount failed, forcing");
            if let Err(e) = engine.force_unmount(mp) {
                tracing::warn!(mount_point = %mp.display(), error = %e, "forced teardown failed");
            }
        }
    }

    fn forget(&self, mp: &Path) {
        if let Err(e) = self.state.remove(mp) {
            tracing::warn!(mount_point = %mp.display(), error = %e, "failed to drop mount state");
        }
    }

    /// Put the original home back when no mount ended up in its place.
    fn roll_back_backup(&self, backup: Option<&BackupSnapshot>, mp: &Path) {
        let Some(snapshot) = backup else {
            return;
        };
        let listed = self
            .host
            .mount_table()
            .map(|t| crate::mount_table::find_mount(&t, mp).is_some())
            .unwrap_or(true);
        if listed {
            return;
        }
        // remove_dir only succeeds on an empty directory
        let cleared = match std::fs::remove_dir(mp) {
            Ok(()) => true,
            Err(e) => e.kind() == std::io::ErrorKind::NotFound,
        };
        if !cleared {
            tracing::warn!(backup = %snapshot.location.display(), "mount point not empty, backup left in place");
            return;
        }
        match safety_net::move_tree(&snapshot.location, mp) {
            Ok(()) => tracing::info!(mount_point = %mp.display(), "original home directory restored"),
            Err(e) => tracing::warn!(backup = %snapshot.location.display(), error = %e, "failed to put backup back"),
        }
    }
}

fn missing_endpoint() -> MountError {
    MountError::Config("base_url is not set (config file or NC_BASE_URL)".to_string())
}

fn success_message(
    mp: &Path,
    kind: EngineKind,
    profile: &MountProfile,
    failures: &[(EngineKind, MountError)],
) -> String {
    let mut msg = format!("Mounted {} with {kind} ({})", mp.display(), profile.name);
    for (failed, err) in failures {
        let _ = write!(msg, "; {failed} failed first: {err}");
    }
    msg
}

/// Write, read back and delete a file on the new mount. Read-only mounts
/// are only listed.
pub fn io_probe(mp: &Path, read_only: bool) -> Result<(), MountError> {
    let fail = |reason: String| MountError::Probe {
        path: mp.to_path_buf(),
        reason,
    };
    if read_only {
        return std::fs::read_dir(mp)
            .map(|_| ())
            .map_err(|e| fail(format!("listing failed: {e}")));
    }
    let file = mp.join(format!(".davhome-probe-{}", std::process::id()));
    std::fs::write(&file, PROBE_CONTENT).map_err(|e| fail(format!("write failed: {e}")))?;
    let read = std::fs::read(&file);
    let _ = std::fs::remove_file(&file);
    match read {
        Ok(data) if data == PROBE_CONTENT => Ok(()),
        Ok(_) => Err(fail("read back different content".to_string())),
        Err(e) => Err(fail(format!("read failed: {e}"))),
    }
}
