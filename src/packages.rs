use std::time::Duration;

use crate::cmd::{self, CommandRunner};
use crate::error::MountError;

/// A package manager the installer knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageManager {
    pub program: &'static str,
    install: &'static [&'static str],
    refresh: Option<&'static [&'static str]>,
}

/// Probed in order; the first one on PATH wins.
pub const PACKAGE_MANAGERS: [PackageManager; 5] = [
    PackageManager {
        program: "dnf",
        install: &["install", "-y"],
        refresh: None,
    },
    PackageManager {
        program: "apt",
        install: &["install", "-y"],
        refresh: Some(&["update"]),
    },
    PackageManager {
        program: "yum",
        install: &["install", "-y"],
        refresh: None,
    },
    PackageManager {
        program: "zypper",
        install: &["install", "-y"],
        refresh: None,
    },
    PackageManager {
        program: "pacman",
        install: &["-S", "--noconfirm"],
        refresh: None,
    },
];

impl PackageManager {
    pub fn install_args(&self, package: &str) -> Vec<String> {
        self.install
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(package.to_string()))
            .collect()
    }
}

pub fn detect(runner: &dyn CommandRunner) -> Option<PackageManager> {
    PACKAGE_MANAGERS
        .into_iter()
        .find(|pm| cmd::which(runner, pm.program))
}

/// Install `package` with the first available manager, then confirm that
/// `binary` resolves.
pub fn install(
    runner: &dyn CommandRunner,
    package: &str,
    binary: &str,
    timeout: Duration,
) -> Result<(), MountError> {
    if cmd::which(runner, binary) {
        tracing::info!(package, "already installed");
        return Ok(());
    }
    let pm = detect(runner).ok_or_else(|| MountError::ProgramMissing {
        program: "package manager".to_string(),
        reason: "none of dnf, apt, yum, zypper, pacman found".to_string(),
    })?;
    if let Some(refresh) = pm.refresh {
        let args: Vec<String> = refresh.iter().map(|s| s.to_string()).collect();
        if let Err(e) = cmd::run_checked(runner, pm.program, &args, timeout) {
            tracing::warn!(error = %e, "package index refresh failed, installing anyway");
        }
    }
    tracing::info!(package, manager = pm.program, "installing");
    cmd::run_checked(runner, pm.program, &pm.install_args(package), timeout)?;
    if !cmd::which(runner, binary) {
        return Err(MountError::ProgramMissing {
            program: binary.to_string(),
            reason: format!("still missing after installing {package}"),
        });
    }
    Ok(())
}
