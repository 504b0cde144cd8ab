//! systemd units that keep a home mount alive across reboots and crashes.

use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cmd::{self, CommandRunner};
use crate::engine::{MountRequest, RemoteMountEngine, UnitExec};
use crate::error::MountError;
use crate::host::Owner;
use crate::naming::{self, UNIT_PREFIX};
use crate::platform;
use crate::profiles::{MountProfile, ProfileCatalog};

const UNIT_SUFFIX: &str = ".service";
const MKDIR_ABS: &str = "/usr/bin/mkdir";
const PROFILE_ENV: &str = "DAVHOME_PROFILE";

/// Subset of `systemctl show` for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub name: String,
    /// `ActiveState`, e.g. `active`, `failed`, `inactive`.
    pub active: String,
    /// `SubState`, e.g. `running`, `exited`, `dead`.
    pub sub: String,
    /// `UnitFileState`, e.g. `enabled`, `disabled`.
    pub enabled: String,
    pub description: String,
}

impl StatusRecord {
    pub fn is_active(&self) -> bool {
        self.active == "active"
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled == "enabled"
    }
}

/// What a unit file says, read back from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitDefinition {
    pub name: String,
    pub description: String,
    /// Value of `DAVHOME_PROFILE` in `Environment=`.
    pub profile: Option<String>,
    pub mount_point: Option<PathBuf>,
    pub exec_start: Vec<String>,
}

/// Quote one argument for an `Exec*=` line.
pub fn systemd_quote(arg: &str) -> String {
    let escaped = arg.replace('%', "%%");
    let needs_quotes = escaped.is_empty()
        || escaped
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '\\' || c == ';');
    if !needs_quotes {
        return escaped;
    }
    let inner = escaped.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{inner}\"")
}

fn exec_line(argv: &[String]) -> String {
    argv.iter()
        .map(|a| systemd_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split an `Exec*=` value back into arguments.
pub fn split_exec(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut started = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                started = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if started {
                    args.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        args.push(current);
    }
    args.into_iter().map(|a| a.replace("%%", "%")).collect()
}

/// Render a complete unit file.
pub fn render_unit(
    username: &str,
    mount_point: &Path,
    profile: &MountProfile,
    exec: &UnitExec,
) -> String {
    let mp = platform::path_arg(mount_point);
    let mut service = format!("Type={}\n", exec.service_type);
    if exec.remain_after_exit {
        service.push_str("RemainAfterExit=yes\n");
    }
    service.push_str(&format!(
        "Environment={PROFILE_ENV}={}\n\
         ExecStartPre={MKDIR_ABS} -p {}\n\
         ExecStart={}\n\
         ExecStop={}\n\
         Restart=on-failure\n\
         RestartSec=10\n",
        profile.name,
        systemd_quote(&mp),
        exec_line(&exec.exec_start),
        exec_line(&exec.exec_stop),
    ));
    format!(
        "# Managed by davhome. Regenerated by `davhome service create`.\n\
         [Unit]\n\
         Description=davhome mount of {username} at {mp} ({} profile)\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         StartLimitIntervalSec=300\n\
         StartLimitBurst=5\n\
         \n\
         [Service]\n\
         {service}\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        profile.name
    )
}

/// Read the fields this tool cares about out of a unit file.
pub fn parse_unit(name: &str, text: &str) -> UnitDefinition {
    let mut def = UnitDefinition {
        name: name.to_string(),
        ..UnitDefinition::default()
    };
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "Description" => def.description = value.trim().to_string(),
            "Environment" => {
                let prefix = format!("{PROFILE_ENV}=");
                def.profile = value
                    .split_whitespace()
                    .find_map(|kv| kv.strip_prefix(prefix.as_str()))
                    .map(str::to_string);
            }
            "ExecStartPre" => {
                let argv = split_exec(value.trim());
                if argv.first().map(String::as_str) == Some(MKDIR_ABS) {
                    def.mount_point = argv.last().map(PathBuf::from);
                }
            }
            "ExecStart" => def.exec_start = split_exec(value.trim()),
            _ => {}
        }
    }
    def
}

/// Parse `systemctl show --property=...` output.
pub fn parse_show(name: &str, output: &str) -> StatusRecord {
    let mut record = StatusRecord {
        name: name.to_string(),
        active: "unknown".to_string(),
        sub: "unknown".to_string(),
        enabled: "unknown".to_string(),
        description: String::new(),
    };
    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key {
            "ActiveState" => record.active = value,
            "SubState" => record.sub = value,
            "UnitFileState" => record.enabled = value,
            "Description" => record.description = value,
            _ => {}
        }
    }
    record
}

fn unit_file_name(unit: &str) -> String {
    if unit.ends_with(UNIT_SUFFIX) {
        unit.to_string()
    } else {
        format!("{unit}{UNIT_SUFFIX}")
    }
}

/// Creates and drives supervisor units through `systemctl`.
pub struct ServiceUnitManager {
    runner: Arc<dyn CommandRunner>,
    unit_dir: PathBuf,
    timeout: Duration,
}

impl ServiceUnitManager {
    pub fn new(runner: Arc<dyn CommandRunner>, unit_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            runner,
            unit_dir,
            timeout,
        }
    }

    pub fn unit_path(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(unit_file_name(unit))
    }

    fn systemctl(&self, args: &[&str]) -> Result<cmd::CaptureOutput, MountError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        cmd::run_checked(self.runner.as_ref(), "systemctl", &args, self.timeout)
    }

    fn daemon_reload(&self) -> Result<(), MountError> {
        self.systemctl(&["daemon-reload"]).map(|_| ())
    }

    /// Write (or overwrite) the unit for `(username, engine)` and reload systemd.
    /// Returns the unit name without suffix.
    pub fn create(
        &self,
        engine: &dyn RemoteMountEngine,
        username: &str,
        endpoint: &str,
        mount_point: &Path,
        profile: &str,
        owner: Option<Owner>,
    ) -> Result<String, MountError> {
        let kind = engine.kind();
        let profile = ProfileCatalog::lookup_for(kind, profile)?;
        let request = MountRequest {
            username,
            endpoint,
            mount_point,
            profile,
            owner,
            timeout: self.timeout,
        };
        let exec = engine.supervised_exec(&request);
        let name = naming::unit_name(username, kind);
        let content = render_unit(username, mount_point, profile, &exec);
        self.write_unit(&name, &content)?;
        self.daemon_reload()?;
        tracing::info!(unit = %name, profile = profile.name, "unit written");
        Ok(name)
    }

    fn write_unit(&self, name: &str, content: &str) -> Result<(), MountError> {
        let path = self.unit_path(name);
        let ctx = |what: &str| format!("Failed to {what} {}", path.display());
        std::fs::create_dir_all(&self.unit_dir)
            .map_err(|e| MountError::io(ctx("create directory for"), e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.unit_dir)
            .map_err(|e| MountError::io(ctx("stage"), e))?;
        tmp.write_all(content.as_bytes())
            .and_then(|()| {
                tmp.as_file()
                    .set_permissions(std::fs::Permissions::from_mode(0o644))
            })
            .map_err(|e| MountError::io(ctx("write"), e))?;
        tmp.persist(&path)
            .map_err(|e| MountError::io(ctx("replace"), e.error))?;
        Ok(())
    }

    pub fn enable(&self, unit: &str) -> Result<(), MountError> {
        self.systemctl(&["enable", &unit_file_name(unit)]).map(|_| ())
    }

    pub fn disable(&self, unit: &str) -> Result<(), MountError> {
        self.systemctl(&["disable", &unit_file_name(unit)]).map(|_| ())
    }

    pub fn start(&self, unit: &str) -> Result<(), MountError> {
        self.systemctl(&["start", &unit_file_name(unit)]).map(|_| ())
    }

    pub fn stop(&self, unit: &str) -> Result<(), MountError> {
        self.systemctl(&["stop", &unit_file_name(unit)]).map(|_| ())
    }

    pub fn status(&self, unit: &str) -> Result<StatusRecord, MountError> {
        let file = unit_file_name(unit);
        let out = self.systemctl(&[
            "show",
            "--property=ActiveState,SubState,UnitFileState,Description",
            &file,
        ])?;
        Ok(parse_show(unit.trim_end_matches(UNIT_SUFFIX), &out.stdout))
    }

    /// Stop, disable and delete the unit. Returns false when no unit file existed.
    pub fn remove(&self, unit: &str) -> Result<bool, MountError> {
        let path = self.unit_path(unit);
        if !path.exists() {
            return Ok(false);
        }
        if let Err(e) = self.systemctl(&["disable", "--now", &unit_file_name(unit)]) {
            tracing::warn!(unit, error = %e, "disable --now failed, removing anyway");
        }
        std::fs::remove_file(&path)
            .map_err(|e| MountError::io(format!("Failed to remove {}", path.display()), e))?;
        self.daemon_reload()?;
        tracing::info!(unit, "unit removed");
        Ok(true)
    }

    /// Names (without suffix) of every unit this tool wrote, sorted.
    pub fn list(&self) -> Result<Vec<String>, MountError> {
        let entries = match std::fs::read_dir(&self.unit_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MountError::io(
                    format!("Failed to list {}", self.unit_dir.display()),
                    e,
                ));
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|n| n.starts_with(UNIT_PREFIX))
            .filter_map(|n| n.strip_suffix(UNIT_SUFFIX).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn definition(&self, unit: &str) -> Result<Option<UnitDefinition>, MountError> {
        let path = self.unit_path(unit);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(parse_unit(unit.trim_end_matches(UNIT_SUFFIX), &text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MountError::io(format!("Failed to read {}", path.display()), e)),
        }
    }

    /// The managed unit whose mount point is `mount_point`, if any.
    pub fn find_for_mount_point(&self, mount_point: &Path) -> Result<Option<UnitDefinition>, MountError> {
        for name in self.list()? {
            let Some(def) = self.definition(&name)? else {
                continue;
            };
            if def.mount_point.as_deref() == Some(mount_point) {
                return Ok(Some(def));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::fake::{Reply, ScriptedRunner};
    use crate::config::Settings;
    use crate::engine::kernel_webdav::KernelWebDavEngine;
    use crate::engine::sync_cache::SyncCacheEngine;

    const T: Duration = Duration::from_secs(5);
    const URL: &str = "https://cloud.example.com/remote.php/dav/files/alice/";

    fn fixture() -> (tempfile::TempDir, Arc<ScriptedRunner>, ServiceUnitManager) {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mgr = ServiceUnitManager::new(runner.clone(), dir.path().join("units"), T);
        (dir, runner, mgr)
    }

    fn rclone(runner: Arc<ScriptedRunner>, dir: &Path) -> SyncCacheEngine {
        let mut s = Settings::default().sync_cache;
        s.config_path = dir.join("rclone.conf");
        s.cache_dir = dir.join("cache");
        SyncCacheEngine::new(runner, s, T)
    }

    fn davfs(runner: Arc<ScriptedRunner>, dir: &Path) -> KernelWebDavEngine {
        let mut s = Settings::default().kernel_webdav;
        s.config_dir = dir.join("davfs2");
        KernelWebDavEngine::new(runner, s, T)
    }

    // --- systemd_quote / split_exec ---

    #[test]
    fn plain_args_are_unquoted() {
        assert_eq!(systemd_quote("/home/alice"), "/home/alice");
    }

    #[test]
    fn args_with_spaces_and_percent_survive() {
        let argv = vec!["/usr/bin/rclone".to_string(), "/home/a b".into(), "50%".into()];
        let line = exec_line(&argv);
        assert_eq!(line, "/usr/bin/rclone \"/home/a b\" 50%%");
        assert_eq!(split_exec(&line), argv);
    }

    // --- create ---

    #[test]
    fn rclone_unit_is_notify_with_profile() {
        let (dir, runner, mgr) = fixture();
        let engine = rclone(runner.clone(), dir.path());
        let name = mgr
            .create(&engine, "alice", URL, Path::new("/home/alice"), "writes", None)
            .unwrap();

        assert!(name.starts_with("davhome-rclone-alice-"));
        let text = std::fs::read_to_string(mgr.unit_path(&name)).unwrap();
        for line in [
            "Type=notify",
            "Environment=DAVHOME_PROFILE=writes",
            "ExecStartPre=/usr/bin/mkdir -p /home/alice",
            "ExecStop=/usr/bin/fusermount -u /home/alice",
            "Restart=on-failure",
            "RestartSec=10",
            "After=network-online.target",
            "Wants=network-online.target",
            "StartLimitBurst=5",
            "WantedBy=multi-user.target",
        ] {
            assert!(text.lines().any(|l| l == line), "missing {line}:\n{text}");
        }
        assert!(text.contains("--vfs-cache-mode writes"), "{text}");
        assert!(!text.contains("--daemon"));
        assert_eq!(runner.calls_for("systemctl"), vec![vec!["daemon-reload".to_string()]]);
    }

    #[test]
    fn davfs_unit_is_oneshot_remain_after_exit() {
        let (dir, runner, mgr) = fixture();
        let engine = davfs(runner, dir.path());
        let name = mgr
            .create(&engine, "alice", URL, Path::new("/home/alice"), "default", None)
            .unwrap();
        let text = std::fs::read_to_string(mgr.unit_path(&name)).unwrap();
        assert!(text.contains("Type=oneshot\nRemainAfterExit=yes\n"), "{text}");
        assert!(text.contains("ExecStop=/usr/bin/umount /home/alice"));
    }

    #[test]
    fn profile_must_match_engine() {
        let (dir, runner, mgr) = fixture();
        let engine = davfs(runner.clone(), dir.path());
        let err = mgr
            .create(&engine, "alice", URL, Path::new("/home/alice"), "writes", None)
            .unwrap_err();
        assert!(matches!(err, MountError::InvalidProfile { .. }));
        assert!(mgr.list().unwrap().is_empty());
        assert!(runner.calls_for("systemctl").is_empty());
    }

    #[test]
    fn recreate_with_new_profile_overwrites() {
        let (dir, runner, mgr) = fixture();
        let engine = rclone(runner, dir.path());
        let mp = Path::new("/home/alice");
        let first = mgr.create(&engine, "alice", URL, mp, "writes", None).unwrap();
        let second = mgr.create(&engine, "alice", URL, mp, "full", None).unwrap();

        assert_eq!(first, second);
        assert_eq!(mgr.list().unwrap(), vec![first.clone()]);
        let def = mgr.definition(&first).unwrap().unwrap();
        assert_eq!(def.profile.as_deref(), Some("full"));
        assert!(def.description.contains("full profile"));
    }

    // --- definition / find_for_mount_point ---

    #[test]
    fn definition_reads_back_exec_start() {
        let (dir, runner, mgr) = fixture();
        let engine = rclone(runner, dir.path());
        let name = mgr
            .create(&engine, "alice", URL, Path::new("/home/alice"), "minimal", None)
            .unwrap();
        let def = mgr.definition(&name).unwrap().unwrap();
        assert_eq!(def.exec_start[0], "/usr/bin/rclone");
        assert_eq!(def.mount_point, Some(PathBuf::from("/home/alice")));
        assert_eq!(
            ProfileCatalog::infer_from_args(&def.exec_start).map(|p| p.name),
            Some("minimal")
        );
    }

    #[test]
    fn find_for_mount_point_matches_exact_path() {
        let (dir, runner, mgr) = fixture();
        let engine = rclone(runner, dir.path());
        mgr.create(&engine, "alice", URL, Path::new("/home/alice"), "full", None)
            .unwrap();
        assert!(mgr.find_for_mount_point(Path::new("/home/alice")).unwrap().is_some());
        assert!(mgr.find_for_mount_point(Path::new("/home/bob")).unwrap().is_none());
    }

    #[test]
    fn missing_unit_dir_lists_nothing() {
        let (_dir, _runner, mgr) = fixture();
        assert!(mgr.list().unwrap().is_empty());
        assert!(mgr.definition("davhome-rclone-x").unwrap().is_none());
    }

    // --- status ---

    #[test]
    fn status_parses_systemctl_show() {
        let (_dir, runner, mgr) = fixture();
        runner.on(
            "systemctl",
            Reply::ok("ActiveState=active\nSubState=running\nUnitFileState=enabled\nDescription=davhome mount\n"),
        );
        let st = mgr.status("davhome-rclone-alice").unwrap();
        assert!(st.is_active());
        assert!(st.is_enabled());
        assert_eq!(st.sub, "running");
        assert_eq!(
            runner.calls_for("systemctl")[0],
            vec![
                "show".to_string(),
                "--property=ActiveState,SubState,UnitFileState,Description".into(),
                "davhome-rclone-alice.service".into(),
            ]
        );
    }

    // --- lifecycle ---

    #[test]
    fn enable_start_stop_disable_call_systemctl() {
        let (_dir, runner, mgr) = fixture();
        mgr.enable("davhome-davfs2-alice").unwrap();
        mgr.start("davhome-davfs2-alice").unwrap();
        mgr.stop("davhome-davfs2-alice").unwrap();
        mgr.disable("davhome-davfs2-alice.service").unwrap();
        let verbs: Vec<String> = runner
            .calls_for("systemctl")
            .into_iter()
            .map(|a| a[0].clone())
            .collect();
        assert_eq!(verbs, vec!["enable", "start", "stop", "disable"]);
    }

    #[test]
    fn failed_start_is_reported() {
        let (_dir, runner, mgr) = fixture();
        runner.on("systemctl", Reply::fail(1, "Job failed"));
        assert!(mgr.start("davhome-rclone-alice").is_err());
    }

    #[test]
    fn remove_disables_deletes_and_reloads() {
        let (dir, runner, mgr) = fixture();
        let engine = davfs(runner.clone(), dir.path());
        let name = mgr
            .create(&engine, "alice", URL, Path::new("/home/alice"), "default", None)
            .unwrap();

        assert!(mgr.remove(&name).unwrap());
        assert!(!mgr.unit_path(&name).exists());
        let calls = runner.calls_for("systemctl");
        assert_eq!(calls[1][..2], ["disable".to_string(), "--now".to_string()]);
        assert_eq!(calls[2], vec!["daemon-reload".to_string()]);
        assert!(!mgr.remove(&name).unwrap());
    }
}
