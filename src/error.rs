use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineKind;

/// Failure classes the orchestrator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad profile, bad credentials, missing settings. Never retried, never falls back.
    Configuration,
    /// Timeouts, resets, rate limiting. Retried only by the credential check.
    TransientNetwork,
    /// Engine binary missing, non-zero exit, hung mount. Eligible for fallback.
    MountExecution,
    /// Backup or post-mount probe failure. Terminal for the call.
    Safety,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Configuration => "configuration error",
            Self::TransientNetwork => "transient network error",
            Self::MountExecution => "mount execution error",
            Self::Safety => "safety check failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("Unknown profile '{profile}' for engine {engine}")]
    InvalidProfile { engine: EngineKind, profile: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Credentials rejected for {user} (HTTP {status})")]
    InvalidCredentials { user: String, status: u16 },

    #[error("No local account named '{0}'")]
    UnknownUser(String),

    #[error("Credential store {}: {reason}", path.display())]
    CredentialStore { path: PathBuf, reason: String },

    #[error("Failed to register credentials with {engine}: {reason}")]
    CredentialRegistration { engine: EngineKind, reason: String },

    #[error("{0}")]
    Transient(String),

    #[error("{program} not found: {reason}")]
    ProgramMissing { program: String, reason: String },

    #[error("{program} failed (exit {status}): {stderr}")]
    CommandFailed {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("{program} timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("All engines failed: {0}")]
    AllEnginesFailed(String),

    #[error("{engine} reported success but {} is not in the mount table", path.display())]
    NotMounted { engine: EngineKind, path: PathBuf },

    #[error("Timed out waiting for lock {}", .0.display())]
    LockTimeout(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {} aside: {reason}", path.display())]
    Backup { path: PathBuf, reason: String },

    #[error("I/O probe on {} failed: {reason}", path.display())]
    Probe { path: PathBuf, reason: String },
}

impl MountError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidProfile { .. }
            | Self::Config(_)
            | Self::InvalidCredentials { .. }
            | Self::UnknownUser(_)
            | Self::CredentialStore { .. }
            | Self::CredentialRegistration { .. } => ErrorKind::Configuration,
            Self::Transient(_) => ErrorKind::TransientNetwork,
            Self::ProgramMissing { .. }
            | Self::CommandFailed { .. }
            | Self::Timeout { .. }
            | Self::NotMounted { .. }
            | Self::AllEnginesFailed(_)
            | Self::LockTimeout(_)
            | Self::Io { .. } => ErrorKind::MountExecution,
            Self::Backup { .. } | Self::Probe { .. } => ErrorKind::Safety,
        }
    }

    /// Whether the orchestrator may try the next engine after this error.
    pub fn is_fallback_eligible(&self) -> bool {
        self.kind() == ErrorKind::MountExecution
    }
}
