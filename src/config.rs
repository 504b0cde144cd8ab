//! Settings from `/etc/davhome/config.yaml` (or `--config` / `$DAVHOME_CONFIG`)
//! with `NC_*` environment overrides applied on top.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MountError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/davhome/config.yaml";
pub const CONFIG_ENV: &str = "DAVHOME_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCacheSettings {
    /// rclone config file holding the `nc-<user>` remotes.
    pub config_path: PathBuf,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelWebDavSettings {
    /// Directory holding `davfs2.conf` and `secrets`.
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// MiB.
    pub cache_size: u64,
    pub connect_timeout: u32,
    pub read_timeout: u32,
    pub retry_count: u32,
    pub use_locks: bool,
    pub file_mode: String,
    pub dir_mode: String,
    pub umask: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Remote service root, e.g. `https://cloud.example.com`.
    pub base_url: Option<String>,
    pub state_dir: PathBuf,
    pub unit_dir: PathBuf,
    pub mount_timeout: Duration,
    pub command_timeout: Duration,
    /// Verify credentials against the remote before touching the home directory.
    pub preflight_check: bool,
    pub sync_cache: SyncCacheSettings,
    pub kernel_webdav: KernelWebDavSettings,
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: None,
            state_dir: PathBuf::from("/var/lib/davhome"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            mount_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(30),
            preflight_check: true,
            sync_cache: SyncCacheSettings {
                config_path: PathBuf::from("/etc/davhome/rclone.conf"),
                cache_dir: PathBuf::from("/var/cache/davhome/rclone"),
            },
            kernel_webdav: KernelWebDavSettings {
                config_dir: PathBuf::from("/etc/davfs2"),
                cache_dir: PathBuf::from("/var/cache/davfs2"),
                cache_size: 256,
                connect_timeout: 30,
                read_timeout: 60,
                retry_count: 3,
                use_locks: true,
                file_mode: "644".to_string(),
                dir_mode: "755".to_string(),
                umask: "022".to_string(),
            },
            retry: RetrySettings {
                max_retries: 3,
                base_delay: Duration::from_secs(1),
            },
        }
    }
}

impl Settings {
    pub fn base_url(&self) -> Result<&str, MountError> {
        self.base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                MountError::Config("base_url is not set (config file or NC_BASE_URL)".to_string())
            })
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }
}

/// Private serde type for deserialization only.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    base_url: Option<String>,
    state_dir: Option<PathBuf>,
    unit_dir: Option<PathBuf>,
    mount_timeout_secs: Option<u64>,
    command_timeout_secs: Option<u64>,
    preflight_check: Option<bool>,
    #[serde(default)]
    sync_cache: RawSyncCache,
    #[serde(default)]
    kernel_webdav: RawKernelWebDav,
    #[serde(default)]
    retry: RawRetry,
}

/// Private serde type for deserialization only.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawSyncCache {
    config_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
}

/// Private serde type for deserialization only.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawKernelWebDav {
    config_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    cache_size: Option<u64>,
    connect_timeout: Option<u32>,
    read_timeout: Option<u32>,
    retry_count: Option<u32>,
    use_locks: Option<bool>,
    file_mode: Option<String>,
    dir_mode: Option<String>,
    umask: Option<String>,
}

/// Private serde type for deserialization only.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
}

/// Parse YAML text over the defaults. An empty document yields the defaults.
pub fn parse_settings(yaml: &str) -> Result<Settings, MountError> {
    let raw: RawSettings = if yaml.trim().is_empty() {
        RawSettings::default()
    } else {
        serde_yaml::from_str(yaml).map_err(|e| MountError::Config(e.to_string()))?
    };
    let mut s = Settings::default();
    if raw.base_url.is_some() {
        s.base_url = raw.base_url;
    }
    s.state_dir = raw.state_dir.unwrap_or(s.state_dir);
    s.unit_dir = raw.unit_dir.unwrap_or(s.unit_dir);
    if let Some(secs) = raw.mount_timeout_secs {
        s.mount_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = raw.command_timeout_secs {
        s.command_timeout = Duration::from_secs(secs);
    }
    s.preflight_check = raw.preflight_check.unwrap_or(s.preflight_check);

    let sc = raw.sync_cache;
    s.sync_cache.config_path = sc.config_path.unwrap_or(s.sync_cache.config_path);
    s.sync_cache.cache_dir = sc.cache_dir.unwrap_or(s.sync_cache.cache_dir);

    let kw = raw.kernel_webdav;
    let k = &mut s.kernel_webdav;
    k.config_dir = kw.config_dir.unwrap_or(k.config_dir.clone());
    k.cache_dir = kw.cache_dir.unwrap_or(k.cache_dir.clone());
    k.cache_size = kw.cache_size.unwrap_or(k.cache_size);
    k.connect_timeout = kw.connect_timeout.unwrap_or(k.connect_timeout);
    k.read_timeout = kw.read_timeout.unwrap_or(k.read_timeout);
    k.retry_count = kw.retry_count.unwrap_or(k.retry_count);
    k.use_locks = kw.use_locks.unwrap_or(k.use_locks);
    if let Some(m) = kw.file_mode {
        k.file_mode = octal("file_mode", &m)?;
    }
    if let Some(m) = kw.dir_mode {
        k.dir_mode = octal("dir_mode", &m)?;
    }
    if let Some(m) = kw.umask {
        k.umask = octal("umask", &m)?;
    }

    if let Some(n) = raw.retry.max_retries {
        s.retry.max_retries = n;
    }
    if let Some(ms) = raw.retry.base_delay_ms {
        s.retry.base_delay = Duration::from_millis(ms);
    }
    Ok(s)
}

fn octal(key: &str, value: &str) -> Result<String, MountError> {
    let value = value.trim();
    if value.is_empty() || value.len() > 4 || !value.chars().all(|c| ('0'..='7').contains(&c)) {
        return Err(MountError::Config(format!(
            "{key} must be an octal mode, got '{value}'"
        )));
    }
    Ok(value.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, MountError> {
    value
        .trim()
        .parse()
        .map_err(|_| MountError::Config(format!("{key}: invalid value '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, MountError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MountError::Config(format!("{key}: invalid value '{value}'"))),
    }
}

/// Apply `NC_BASE_URL` and the `NC_WEBDAV_*` overrides. `lookup` is
/// `std::env::var(..).ok()` outside tests.
pub fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), MountError> {
    if let Some(url) = lookup("NC_BASE_URL") {
        settings.base_url = Some(url);
    }
    let k = &mut settings.kernel_webdav;
    if let Some(v) = lookup("NC_WEBDAV_CACHE_SIZE") {
        k.cache_size = parse_env("NC_WEBDAV_CACHE_SIZE", &v)?;
    }
    if let Some(v) = lookup("NC_WEBDAV_CONNECT_TIMEOUT") {
        k.connect_timeout = parse_env("NC_WEBDAV_CONNECT_TIMEOUT", &v)?;
    }
    if let Some(v) = lookup("NC_WEBDAV_READ_TIMEOUT") {
        k.read_timeout = parse_env("NC_WEBDAV_READ_TIMEOUT", &v)?;
    }
    if let Some(v) = lookup("NC_WEBDAV_RETRY_COUNT") {
        k.retry_count = parse_env("NC_WEBDAV_RETRY_COUNT", &v)?;
    }
    if let Some(v) = lookup("NC_WEBDAV_USE_LOCKS") {
        k.use_locks = parse_bool("NC_WEBDAV_USE_LOCKS", &v)?;
    }
    if let Some(v) = lookup("NC_WEBDAV_FILE_MODE") {
        k.file_mode = octal("NC_WEBDAV_FILE_MODE", &v)?;
    }
    if let Some(v) = lookup("NC_WEBDAV_DIR_MODE") {
        k.dir_mode = octal("NC_WEBDAV_DIR_MODE", &v)?;
    }
    if let Some(v) = lookup("NC_WEBDAV_UMASK") {
        k.umask = octal("NC_WEBDAV_UMASK", &v)?;
    }
    Ok(())
}

/// Pick the config file: `--config`, then `$DAVHOME_CONFIG`, then the default.
/// The bool is true when the file was named explicitly and must exist.
pub fn resolve_path(explicit: Option<&Path>, env_value: Option<String>) -> (PathBuf, bool) {
    match (explicit, env_value) {
        (Some(p), _) => (p.to_path_buf(), true),
        (None, Some(v)) if !v.is_empty() => (PathBuf::from(v), true),
        _ => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    }
}

/// Load settings from disk and the process environment.
pub fn load(explicit: Option<&Path>) -> Result<Settings, MountError> {
    let (path, required) = resolve_path(explicit, std::env::var(CONFIG_ENV).ok());
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            String::new()
        }
        Err(e) => {
            return Err(MountError::Config(format!(
                "Failed to read {}: {e}",
                path.display()
            )));
        }
    };
    let mut settings = parse_settings(&text).map_err(|e| match e {
        MountError::Config(msg) => MountError::Config(format!("{}: {msg}", path.display())),
        other => other,
    })?;
    apply_env(&mut settings, |k| std::env::var(k).ok())?;
    Ok(settings)
}
