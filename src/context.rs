use std::sync::Arc;

use crate::cmd::{CommandRunner, SystemRunner};
use crate::config::Settings;
use crate::engine::kernel_webdav::KernelWebDavEngine;
use crate::engine::sync_cache::SyncCacheEngine;
use crate::engine::{EngineKind, RemoteMountEngine};
use crate::error::MountError;
use crate::host::{Host, SystemHost};
use crate::inspector::StatusInspector;
use crate::orchestrator::MountOrchestrator;
use crate::remote::{RemoteEndpoint, WebDavProbe};
use crate::state::MountStateStore;
use crate::units::ServiceUnitManager;

/// Everything a command needs, built once from settings.
pub struct Context {
    pub settings: Settings,
    pub runner: Arc<dyn CommandRunner>,
    pub host: Arc<dyn Host>,
    pub sync_cache: Arc<SyncCacheEngine>,
    pub kernel_webdav: Arc<KernelWebDavEngine>,
    pub units: Arc<ServiceUnitManager>,
}

impl Context {
    pub fn new(settings: Settings, runner: Arc<dyn CommandRunner>, host: Arc<dyn Host>) -> Self {
        let timeout = settings.command_timeout;
        let sync_cache = Arc::new(SyncCacheEngine::new(
            Arc::clone(&runner),
            settings.sync_cache.clone(),
            timeout,
        ));
        let kernel_webdav = Arc::new(KernelWebDavEngine::new(
            Arc::clone(&runner),
            settings.kernel_webdav.clone(),
            timeout,
        ));
        let units = Arc::new(ServiceUnitManager::new(
            Arc::clone(&runner),
            settings.unit_dir.clone(),
            timeout,
        ));
        Self {
            settings,
            runner,
            host,
            sync_cache,
            kernel_webdav,
            units,
        }
    }

    pub fn system(settings: Settings) -> Self {
        Self::new(settings, Arc::new(SystemRunner), Arc::new(SystemHost))
    }

    pub fn engine(&self, kind: EngineKind) -> Arc<dyn RemoteMountEngine> {
        match kind {
            EngineKind::SyncCache => Arc::clone(&self.sync_cache) as Arc<dyn RemoteMountEngine>,
            EngineKind::KernelWebDav => Arc::clone(&self.kernel_webdav) as Arc<dyn RemoteMountEngine>,
        }
    }

    pub fn engines(&self) -> Vec<Arc<dyn RemoteMountEngine>> {
        EngineKind::PRIORITY.iter().map(|k| self.engine(*k)).collect()
    }

    pub fn endpoint(&self) -> Result<RemoteEndpoint, MountError> {
        RemoteEndpoint::new(self.settings.base_url()?)
    }

    pub fn state(&self) -> MountStateStore {
        MountStateStore::new(&self.settings.state_dir)
    }

    pub fn probe(&self) -> Result<WebDavProbe, MountError> {
        Ok(WebDavProbe::new(
            self.endpoint()?,
            self.settings.retry.into(),
            self.settings.command_timeout,
        ))
    }

    /// Orchestrator without a remote; enough for unmounting.
    pub fn unmounter(&self) -> MountOrchestrator {
        MountOrchestrator::new(
            self.engines(),
            Arc::clone(&self.host),
            self.state(),
            self.settings.locks_dir(),
            self.settings.mount_timeout,
        )
    }

    /// Orchestrator able to mount: needs `base_url`, and checks credentials
    /// first unless `preflight_check` is off.
    pub fn orchestrator(&self) -> Result<MountOrchestrator, MountError> {
        let orch = self.unmounter().with_endpoint(self.endpoint()?);
        if !self.settings.preflight_check {
            return Ok(orch);
        }
        Ok(orch.with_verifier(Arc::new(self.probe()?)))
    }

    pub fn inspector(&self) -> StatusInspector {
        StatusInspector::new(Arc::clone(&self.host), self.state()).with_units(Arc::clone(&self.units))
    }
}
