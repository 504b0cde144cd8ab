use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cmd::{self, CommandRunner};
use crate::config::SyncCacheSettings;
use crate::engine::{
    EngineKind, MountRequest, RemoteCredential, RemoteMountEngine, UnitExec, mount_with_cleanup,
};
use crate::error::MountError;
use crate::naming;
use crate::packages;
use crate::platform;
use crate::safety_net::QUARANTINE_DIR;
use crate::store::RemoteDefinitions;

const RCLONE: &str = "rclone";
const RCLONE_ABS: &str = "/usr/bin/rclone";
const FUSERMOUNT_ABS: &str = "/usr/bin/fusermount";

/// rclone `mount` backed by a VFS cache.
pub struct SyncCacheEngine {
    runner: Arc<dyn CommandRunner>,
    settings: SyncCacheSettings,
    remotes: RemoteDefinitions,
    command_timeout: Duration,
}

impl SyncCacheEngine {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        settings: SyncCacheSettings,
        command_timeout: Duration,
    ) -> Self {
        let remotes = RemoteDefinitions::new(&settings.config_path);
        Self {
            runner,
            settings,
            remotes,
            command_timeout,
        }
    }

    pub fn remotes(&self) -> &RemoteDefinitions {
        &self.remotes
    }

    /// Arguments shared by the interactive mount and the supervised one.
    /// `--daemon` is left to the caller.
    fn base_args(&self, req: &MountRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "mount".to_string(),
            format!("{}:/", naming::remote_name(req.username)),
            platform::path_arg(req.mount_point),
            "--config".to_string(),
            platform::path_arg(&self.settings.config_path),
        ];
        args.extend(req.profile.sync_cache_flags());
        args.extend([
            "--dir-cache-time".to_string(),
            "10m".to_string(),
            "--allow-other".to_string(),
            "--exclude".to_string(),
            format!("/{QUARANTINE_DIR}/**"),
            "--cache-dir".to_string(),
            platform::path_arg(&self.settings.cache_dir),
        ]);
        if let Some(owner) = req.owner {
            args.extend([
                "--uid".to_string(),
                owner.uid.to_string(),
                "--gid".to_string(),
                owner.gid.to_string(),
            ]);
        }
        args
    }

    /// Run `rclone obscure` so the config never holds the clear-text password.
    /// The password goes in on stdin, never in argv.
    fn obscure(&self, password: &str) -> Result<String, MountError> {
        let out = self
            .runner
            .run_with_input(
                RCLONE,
                &["obscure".to_string(), "-".to_string()],
                &format!("{password}\n"),
                self.command_timeout,
            )
            .and_then(|out| cmd::check_status(RCLONE, out))
            .map_err(|e| match e {
                // stderr could echo the password back
                MountError::CommandFailed { program, status, .. } => MountError::CommandFailed {
                    program,
                    status,
                    stderr: "rclone obscure failed".to_string(),
                },
                other => other,
            })?;
        let obscured = out.stdout.trim().to_string();
        if obscured.is_empty() {
            return Err(MountError::CommandFailed {
                program: RCLONE.to_string(),
                status: 0,
                stderr: "rclone obscure printed nothing".to_string(),
            });
        }
        Ok(obscured)
    }
}

impl RemoteMountEngine for SyncCacheEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::SyncCache
    }

    fn is_available(&self) -> bool {
        cmd::which(self.runner.as_ref(), EngineKind::SyncCache.binary())
    }

    fn install(&self) -> Result<(), MountError> {
        let kind = self.kind();
        packages::install(
            self.runner.as_ref(),
            kind.package(),
            kind.binary(),
            self.command_timeout * 10,
        )
    }

    fn configure(&self) -> Result<(), MountError> {
        for dir in [
            self.settings.config_path.parent(),
            Some(self.settings.cache_dir.as_path()),
        ]
        .into_iter()
        .flatten()
        {
            std::fs::create_dir_all(dir)
                .map_err(|e| MountError::io(format!("Failed to create {}", dir.display()), e))?;
        }
        Ok(())
    }

    fn register_credential(&self, cred: &RemoteCredential) -> Result<(), MountError> {
        let pass = self.obscure(&cred.password)?;
        let name = naming::remote_name(&cred.username);
        self.remotes.upsert(
            &name,
            &[
                ("type", "webdav"),
                ("url", cred.endpoint.as_str()),
                ("vendor", "nextcloud"),
                ("user", cred.username.as_str()),
                ("pass", pass.as_str()),
            ],
        )?;
        tracing::info!(remote = %name, config = %self.remotes.path().display(), "remote registered");
        Ok(())
    }

    fn mount_args(&self, req: &MountRequest<'_>) -> Vec<String> {
        let mut args = self.base_args(req);
        args.push("--daemon".to_string());
        args
    }

    fn mount(&self, req: &MountRequest<'_>) -> Result<(), MountError> {
        let args = self.mount_args(req);
        mount_with_cleanup(self, req.mount_point, || {
            cmd::run_checked(self.runner.as_ref(), RCLONE, &args, req.timeout).map(|_| ())
        })
    }

    fn unmount(&self, mount_point: &Path) -> Result<(), MountError> {
        let (prog, args) = platform::fuse_unmount(mount_point);
        cmd::run_checked(self.runner.as_ref(), prog, &args, self.command_timeout)?;
        Ok(())
    }

    fn force_unmount(&self, mount_point: &Path) -> Result<(), MountError> {
        let (prog, args) = platform::fuse_force_unmount(mount_point);
        match cmd::run_checked(self.runner.as_ref(), prog, &args, self.command_timeout) {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "fusermount -uz failed, trying umount -l");
                let (prog, args) = platform::lazy_unmount(mount_point);
                cmd::run_checked(self.runner.as_ref(), prog, &args, self.command_timeout)
                    .map(|_| ())
            }
        }
    }

    fn supervised_exec(&self, req: &MountRequest<'_>) -> UnitExec {
        let mut exec_start = vec![RCLONE_ABS.to_string()];
        exec_start.extend(self.base_args(req));
        UnitExec {
            service_type: "notify",
            remain_after_exit: false,
            exec_start,
            exec_stop: vec![
                FUSERMOUNT_ABS.to_string(),
                "-u".to_string(),
                platform::path_arg(req.mount_point),
            ],
        }
    }
}
