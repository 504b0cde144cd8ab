use std::time::Duration;

use crate::engine::EngineKind;
use crate::error::MountError;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// rclone `--vfs-cache-mode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Off,
    Minimal,
    Writes,
    Full,
}

impl CacheMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Writes => "writes",
            Self::Full => "full",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Self::Off),
            "minimal" => Some(Self::Minimal),
            "writes" => Some(Self::Writes),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    None,
    MaxAge(Duration),
    Lru,
}

/// Human-facing description shown by `davhome profiles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileMetadata {
    pub description: &'static str,
    pub use_case: &'static str,
    pub storage: &'static str,
    pub performance: &'static str,
    pub sync: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountProfile {
    pub name: &'static str,
    pub engine: EngineKind,
    /// `None` for kernel WebDAV, whose cache is configured globally in davfs2.conf.
    pub cache_mode: Option<CacheMode>,
    pub max_cache_size: u64,
    pub buffer_size: u64,
    pub read_only: bool,
    pub eviction: Eviction,
    pub bidirectional: bool,
    pub metadata: ProfileMetadata,
}

impl MountProfile {
    /// rclone flags for this profile, in the fixed order
    /// `--vfs-cache-mode --vfs-cache-max-size --buffer-size [--vfs-cache-max-age] [--read-only]`.
    ///
    /// Empty for profiles that carry no cache mode.
    pub fn sync_cache_flags(&self) -> Vec<String> {
        let Some(mode) = self.cache_mode else {
            return Vec::new();
        };
        let mut flags = vec![
            "--vfs-cache-mode".to_string(),
            mode.as_str().to_string(),
            "--vfs-cache-max-size".to_string(),
            render_size(self.max_cache_size),
            "--buffer-size".to_string(),
            render_size(self.buffer_size),
        ];
        if let Eviction::MaxAge(age) = self.eviction {
            flags.push("--vfs-cache-max-age".to_string());
            flags.push(render_duration(age));
        }
        if self.read_only {
            flags.push("--read-only".to_string());
        }
        flags
    }
}

/// Render a byte count the way rclone size flags expect: `0`, `<n>M` or `<n>G`.
pub fn render_size(bytes: u64) -> String {
    if bytes == 0 {
        "0".to_string()
    } else if bytes % GIB == 0 {
        format!("{}G", bytes / GIB)
    } else {
        format!("{}M", bytes.div_ceil(MIB))
    }
}

/// Inverse of `render_size` for the units it emits (plus `K` and bare bytes).
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, mult) = match s.chars().last()? {
        'G' | 'g' => (&s[..s.len() - 1], GIB),
        'M' | 'm' => (&s[..s.len() - 1], MIB),
        'K' | 'k' => (&s[..s.len() - 1], 1024),
        _ => (s, 1),
    };
    digits.parse::<u64>().ok().map(|n| n * mult)
}

fn render_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

const HOUR: Duration = Duration::from_secs(3600);

static PROFILES: [MountProfile; 5] = [
    MountProfile {
        name: "hosting",
        engine: EngineKind::SyncCache,
        cache_mode: Some(CacheMode::Off),
        max_cache_size: 0,
        buffer_size: 0,
        read_only: true,
        eviction: Eviction::None,
        bidirectional: false,
        metadata: ProfileMetadata {
            description: "Pure streaming, no local cache",
            use_case: "Web servers serving files straight from the remote",
            storage: "None",
            performance: "Network bound",
            sync: "Read-only",
        },
    },
    MountProfile {
        name: "minimal",
        engine: EngineKind::SyncCache,
        cache_mode: Some(CacheMode::Minimal),
        max_cache_size: GIB,
        buffer_size: 32 * MIB,
        read_only: true,
        eviction: Eviction::MaxAge(HOUR),
        bidirectional: false,
        metadata: ProfileMetadata {
            description: "Small read cache, evicted after an hour",
            use_case: "Light hosting and browsing",
            storage: "Up to 1G",
            performance: "Good for repeated reads",
            sync: "Read-only",
        },
    },
    MountProfile {
        name: "writes",
        engine: EngineKind::SyncCache,
        cache_mode: Some(CacheMode::Writes),
        max_cache_size: 2 * GIB,
        buffer_size: 64 * MIB,
        read_only: false,
        eviction: Eviction::Lru,
        bidirectional: true,
        metadata: ProfileMetadata {
            description: "Write-back cache with LRU eviction",
            use_case: "Interactive home directories",
            storage: "Up to 2G",
            performance: "Good for editing",
            sync: "Bidirectional",
        },
    },
    MountProfile {
        name: "full",
        engine: EngineKind::SyncCache,
        cache_mode: Some(CacheMode::Full),
        max_cache_size: 5 * GIB,
        buffer_size: 128 * MIB,
        read_only: false,
        eviction: Eviction::Lru,
        bidirectional: true,
        metadata: ProfileMetadata {
            description: "Full read/write cache with a larger buffer",
            use_case: "Heavy workloads, large files",
            storage: "Up to 5G",
            performance: "Best",
            sync: "Bidirectional",
        },
    },
    MountProfile {
        name: "default",
        engine: EngineKind::KernelWebDav,
        cache_mode: None,
        max_cache_size: 0,
        buffer_size: 0,
        read_only: false,
        eviction: Eviction::Lru,
        bidirectional: true,
        metadata: ProfileMetadata {
            description: "davfs2 with a local disk cache and WebDAV locks",
            use_case: "Direct WebDAV with a local cache",
            storage: "Sized by davfs2.conf cache_size",
            performance: "Good with cache",
            sync: "Bidirectional",
        },
    },
];

/// Static registry of named profiles.
pub struct ProfileCatalog;

impl ProfileCatalog {
    pub fn list() -> &'static [MountProfile] {
        &PROFILES
    }

    pub fn list_for(engine: EngineKind) -> impl Iterator<Item = &'static MountProfile> {
        PROFILES.iter().filter(move |p| p.engine == engine)
    }

    pub fn lookup(name: &str) -> Option<&'static MountProfile> {
        PROFILES.iter().find(|p| p.name == name)
    }

    /// Look up `name` and check it belongs to `engine`.
    pub fn lookup_for(engine: EngineKind, name: &str) -> Result<&'static MountProfile, MountError> {
        Self::list_for(engine)
            .find(|p| p.name == name)
            .ok_or_else(|| MountError::InvalidProfile {
                engine,
                profile: name.to_string(),
            })
    }

    pub fn default_for(engine: EngineKind) -> &'static MountProfile {
        let name = match engine {
            EngineKind::SyncCache => "full",
            EngineKind::KernelWebDav => "default",
        };
        // Both names are in the static table.
        Self::list_for(engine)
            .find(|p| p.name == name)
            .unwrap_or(&PROFILES[0])
    }

    /// Match an rclone argv back to the profile that produced it.
    ///
    /// Only the cache mode, read-only flag and sizes are compared; anything
    /// else on the command line is ignored.
    pub fn infer_from_args<S: AsRef<str>>(args: &[S]) -> Option<&'static MountProfile> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let value_of = |flag: &str| {
            args.iter()
                .position(|a| *a == flag)
                .and_then(|i| args.get(i + 1).copied())
        };
        let mode = CacheMode::parse(value_of("--vfs-cache-mode")?)?;
        let read_only = args.contains(&"--read-only");
        let max_size = value_of("--vfs-cache-max-size").and_then(parse_size);
        let buffer = value_of("--buffer-size").and_then(parse_size);

        Self::list_for(EngineKind::SyncCache).find(|p| {
            p.cache_mode == Some(mode)
                && p.read_only == read_only
                && max_size.is_none_or(|s| s == p.max_cache_size)
                && buffer.is_none_or(|b| b == p.buffer_size)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(name: &str) -> String {
        ProfileCatalog::lookup(name).unwrap().sync_cache_flags().join(" ")
    }

    // --- sync_cache_flags ---

    #[test]
    fn hosting_flags() {
        assert_eq!(
            flags("hosting"),
            "--vfs-cache-mode off --vfs-cache-max-size 0 --buffer-size 0 --read-only"
        );
    }

    #[test]
    fn minimal_flags_include_max_age_before_read_only() {
        assert_eq!(
            flags("minimal"),
            "--vfs-cache-mode minimal --vfs-cache-max-size 1G --buffer-size 32M \
             --vfs-cache-max-age 1h --read-only"
        );
    }

    #[test]
    fn writes_flags() {
        assert_eq!(
            flags("writes"),
            "--vfs-cache-mode writes --vfs-cache-max-size 2G --buffer-size 64M"
        );
    }

    #[test]
    fn full_flags() {
        assert_eq!(
            flags("full"),
            "--vfs-cache-mode full --vfs-cache-max-size 5G --buffer-size 128M"
        );
    }

    #[test]
    fn davfs_default_has_no_rclone_flags() {
        assert!(flags("default").is_empty());
    }

    // --- lookup ---

    #[test]
    fn catalog_has_five_profiles() {
        let names: Vec<_> = ProfileCatalog::list().iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["hosting", "minimal", "writes", "full", "default"]);
    }

    #[test]
    fn lookup_unknown_is_none() {
        assert!(ProfileCatalog::lookup("turbo").is_none());
    }

    #[test]
    fn lookup_for_rejects_profile_of_other_engine() {
        let err = ProfileCatalog::lookup_for(EngineKind::KernelWebDav, "writes").unwrap_err();
        assert!(matches!(err, MountError::InvalidProfile { .. }));
        assert!(ProfileCatalog::lookup_for(EngineKind::SyncCache, "default").is_err());
    }

    #[test]
    fn defaults_per_engine() {
        assert_eq!(ProfileCatalog::default_for(EngineKind::SyncCache).name, "full");
        assert_eq!(ProfileCatalog::default_for(EngineKind::KernelWebDav).name, "default");
    }

    #[test]
    fn read_only_profiles_are_not_bidirectional() {
        for p in ProfileCatalog::list() {
            if p.read_only {
                assert!(!p.bidirectional, "{} is read-only but bidirectional", p.name);
            }
        }
    }

    // --- infer_from_args ---

    #[test]
    fn infer_recovers_every_rclone_profile() {
        for p in ProfileCatalog::list_for(EngineKind::SyncCache) {
            let mut argv = vec!["mount".to_string(), "nc-alice:/".to_string()];
            argv.extend(p.sync_cache_flags());
            argv.push("--allow-other".to_string());
            assert_eq!(ProfileCatalog::infer_from_args(&argv).map(|f| f.name), Some(p.name));
        }
    }

    #[test]
    fn infer_without_cache_mode_is_none() {
        assert!(ProfileCatalog::infer_from_args(&["mount", "--read-only"]).is_none());
    }

    // --- render_size / parse_size ---

    #[test]
    fn sizes_render_in_largest_whole_unit() {
        assert_eq!(render_size(0), "0");
        assert_eq!(render_size(512 * MIB), "512M");
        assert_eq!(render_size(3 * GIB), "3G");
    }

    #[test]
    fn parse_size_accepts_suffixes() {
        assert_eq!(parse_size("2G"), Some(2 * GIB));
        assert_eq!(parse_size("64M"), Some(64 * MIB));
        assert_eq!(parse_size("0"), Some(0));
        assert_eq!(parse_size("lots"), None);
    }
}
