use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cmd::{self, CommandRunner};
use crate::config::KernelWebDavSettings;
use crate::engine::{
    EngineKind, MountRequest, RemoteCredential, RemoteMountEngine, UnitExec, mount_with_cleanup,
};
use crate::error::MountError;
use crate::packages;
use crate::platform;
use crate::store::{LockedFile, SecretsFile};

const SYSTEM_CONFIG_DIR: &str = "/etc/davfs2";
const MOUNT_ABS: &str = "/usr/bin/mount";
const UMOUNT_ABS: &str = "/usr/bin/umount";

/// Render `davfs2.conf` from settings.
pub fn render_config(settings: &KernelWebDavSettings) -> String {
    let k = settings;
    format!(
        "# Managed by davhome. Local edits are overwritten by `davhome engine configure davfs2`.\n\
         \n\
         cache_dir {cache_dir}\n\
         cache_size {cache_size}\n\
         table_size 4096\n\
         delay_upload 0\n\
         \n\
         connect_timeout {connect}\n\
         read_timeout {read}\n\
         retry {retry}\n\
         max_retry 10\n\
         \n\
         use_locks {locks}\n\
         lock_timeout 300\n\
         \n\
         umask {umask}\n\
         file_mode {file_mode}\n\
         dir_mode {dir_mode}\n\
         \n\
         use_expect100 0\n\
         n_cookies 0\n",
        cache_dir = k.cache_dir.display(),
        cache_size = k.cache_size,
        connect = k.connect_timeout,
        read = k.read_timeout,
        retry = k.retry_count,
        locks = u8::from(k.use_locks),
        umask = k.umask,
        file_mode = k.file_mode,
        dir_mode = k.dir_mode,
    )
}

/// davfs2 mounted through the kernel.
pub struct KernelWebDavEngine {
    runner: Arc<dyn CommandRunner>,
    settings: KernelWebDavSettings,
    secrets: SecretsFile,
    command_timeout: Duration,
}

impl KernelWebDavEngine {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        settings: KernelWebDavSettings,
        command_timeout: Duration,
    ) -> Self {
        let secrets = SecretsFile::new(settings.config_dir.join("secrets"));
        Self {
            runner,
            settings,
            secrets,
            command_timeout,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.settings.config_dir.join("davfs2.conf")
    }

    pub fn secrets(&self) -> &SecretsFile {
        &self.secrets
    }

    fn mount_options(&self, req: &MountRequest<'_>) -> String {
        let mut opts = Vec::new();
        if let Some(owner) = req.owner {
            opts.push(format!("uid={}", owner.uid));
            opts.push(format!("gid={}", owner.gid));
        }
        if self.settings.config_dir != Path::new(SYSTEM_CONFIG_DIR) {
            opts.push(format!("conf={}", self.config_path().display()));
        }
        opts.push(if req.profile.read_only { "ro" } else { "rw" }.to_string());
        opts.join(",")
    }
}

impl RemoteMountEngine for KernelWebDavEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::KernelWebDav
    }

    fn is_available(&self) -> bool {
        cmd::which(self.runner.as_ref(), EngineKind::KernelWebDav.binary())
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
        let conf = LockedFile::new(self.config_path(), 0o644);
        let rendered = render_config(&self.settings);
        conf.update(|current| {
            let next = (current != rendered).then(|| rendered.clone());
            Ok((next, ()))
        })?;

        let cache = &self.settings.cache_dir;
        std::fs::create_dir_all(cache)
            .and_then(|()| std::fs::set_permissions(cache, std::fs::Permissions::from_mode(0o755)))
            .map_err(|e| MountError::io(format!("Failed to prepare {}", cache.display()), e))?;
        tracing::info!(config = %conf.path().display(), "davfs2 configured");
        Ok(())
    }

    fn register_credential(&self, cred: &RemoteCredential) -> Result<(), MountError> {
        self.secrets
            .upsert(&cred.endpoint, &cred.username, &cred.password)?;
        tracing::info!(user = %cred.username, secrets = %self.secrets.path().display(), "credentials stored");
        Ok(())
    }

    fn mount_args(&self, req: &MountRequest<'_>) -> Vec<String> {
        vec![
            "-t".to_string(),
            "davfs".to_string(),
            req.endpoint.to_string(),
            platform::path_arg(req.mount_point),
            "-o".to_string(),
            self.mount_options(req),
        ]
    }

    fn mount(&self, req: &MountRequest<'_>) -> Result<(), MountError> {
        let args = self.mount_args(req);
        mount_with_cleanup(self, req.mount_point, || {
            cmd::run_checked(self.runner.as_ref(), "mount", &args, req.timeout).map(|_| ())
        })
    }

    fn unmount(&self, mount_point: &Path) -> Result<(), MountError> {
        cmd::run_checked(
            self.runner.as_ref(),
            "umount",
            &[platform::path_arg(mount_point)],
            self.command_timeout,
        )?;
        Ok(())
    }

    fn force_unmount(&self, mount_point: &Path) -> Result<(), MountError> {
        let (prog, args) = platform::lazy_unmount(mount_point);
        cmd::run_checked(self.runner.as_ref(), prog, &args, self.command_timeout)?;
        Ok(())
    }

    fn supervised_exec(&self, req: &MountRequest<'_>) -> UnitExec {
        let mut exec_start = vec![MOUNT_ABS.to_string()];
        exec_start.extend(self.mount_args(req));
        UnitExec {
            service_type: "oneshot",
            remain_after_exit: true,
            exec_start,
            exec_stop: vec![UMOUNT_ABS.to_string(), platform::path_arg(req.mount_point)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::fake::{Reply, ScriptedRunner};
    use crate::config::Settings;
    use crate::host::Owner;
    use crate::profiles::ProfileCatalog;

    const T: Duration = Duration::from_secs(5);
    const URL: &str = "https://cloud.example.com/remote.php/dav/files/alice/";

    fn settings(dir: &Path) -> KernelWebDavSettings {
        KernelWebDavSettings {
            config_dir: dir.join("davfs2"),
            cache_dir: dir.join("cache"),
            ..Settings::default().kernel_webdav
        }
    }

    fn request(mp: &Path) -> MountRequest<'_> {
        MountRequest {
            username: "alice",
            endpoint: URL,
            mount_point: mp,
            profile: ProfileCatalog::lookup("default").unwrap(),
            owner: Some(Owner { uid: 1001, gid: 100 }),
            timeout: T,
        }
    }

    // --- render_config ---

    #[test]
    fn config_carries_every_directive() {
        let dir = tempfile::tempdir().unwrap();
        let text = render_config(&settings(dir.path()));
        for line in [
            "cache_size 256",
            "connect_timeout 30",
            "read_timeout 60",
            "retry 3",
            "use_locks 1",
            "file_mode 644",
            "dir_mode 755",
            "umask 022",
        ] {
            assert!(text.lines().any(|l| l == line), "missing {line}:\n{text}");
        }
        assert!(text.contains(&format!("cache_dir {}", dir.path().join("cache").display())));
    }

    #[test]
    fn configure_writes_config_and_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let e = KernelWebDavEngine::new(Arc::new(ScriptedRunner::new()), settings(dir.path()), T);
        e.configure().unwrap();
        e.configure().unwrap();
        assert!(e.config_path().is_file());
        let mode = std::fs::metadata(dir.path().join("cache")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    // --- register_credential ---

    #[test]
    fn register_upserts_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let e = KernelWebDavEngine::new(Arc::new(ScriptedRunner::new()), settings(dir.path()), T);
        for pw in ["first", "second"] {
            e.register_credential(&RemoteCredential {
                endpoint: URL.to_string(),
                username: "alice".to_string(),
                password: pw.to_string(),
            })
            .unwrap();
        }
        let text = std::fs::read_to_string(e.secrets().path()).unwrap();
        assert_eq!(text, format!("{URL} alice second\n"));
    }

    // --- mount ---

    #[test]
    fn mount_runs_mount_t_davfs_with_owner() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mut s = settings(dir.path());
        s.config_dir = PathBuf::from(SYSTEM_CONFIG_DIR);
        let e = KernelWebDavEngine::new(runner.clone(), s, T);
        e.mount(&request(Path::new("/home/alice"))).unwrap();
        assert_eq!(
            runner.calls_for("mount"),
            vec![vec![
                "-t".to_string(),
                "davfs".into(),
                URL.into(),
                "/home/alice".into(),
                "-o".into(),
                "uid=1001,gid=100,rw".into(),
            ]]
        );
    }

    #[test]
    fn custom_config_dir_is_passed_as_conf_option() {
        let dir = tempfile::tempdir().unwrap();
        let e = KernelWebDavEngine::new(Arc::new(ScriptedRunner::new()), settings(dir.path()), T);
        let opts = e.mount_args(&request(Path::new("/home/alice")))[5].clone();
        assert!(opts.contains(&format!("conf={}", e.config_path().display())), "got: {opts}");
    }

    #[test]
    fn failed_mount_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("mount", Reply::fail(32, "mount.davfs: connection refused"));
        let e = KernelWebDavEngine::new(runner, settings(dir.path()), T);
        let err = e.mount(&request(Path::new("/home/alice"))).unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_fallback_eligible());
    }

    // --- supervised_exec ---

    #[test]
    fn supervised_exec_is_oneshot() {
        let dir = tempfile::tempdir().unwrap();
        let e = KernelWebDavEngine::new(Arc::new(ScriptedRunner::new()), settings(dir.path()), T);
        let exec = e.supervised_exec(&request(Path::new("/home/alice")));
        assert_eq!(exec.service_type, "oneshot");
        assert!(exec.remain_after_exit);
        assert_eq!(&exec.exec_start[..3], &["/usr/bin/mount", "-t", "davfs"]);
        assert_eq!(exec.exec_stop, vec!["/usr/bin/umount", "/home/alice"]);
    }
}
