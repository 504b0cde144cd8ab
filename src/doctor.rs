use std::path::Path;
use std::time::Duration;

use crate::cmd::{self, CommandRunner};
use crate::config::Settings;
use crate::context::Context;
use crate::engine::EngineKind;
use crate::exit_codes;
use crate::format::DoctorCheck;
use crate::progress;
use crate::remote::RemoteEndpoint;

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Extract the first version-like token (`MAJOR.MINOR[.PATCH...]`) from `output`.
///
/// Strips a leading `v` and trailing punctuation before matching. Returns `None`
/// if no token with at least two dot-separated numeric parts is found.
pub fn parse_version_str(output: &str) -> Option<String> {
    for word in output.split_whitespace() {
        let w = word
            .trim_start_matches('v')
            .trim_end_matches([',', ';', '.'].as_slice());
        let parts: Vec<&str> = w.split('.').collect();
        if parts.len() >= 2
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        {
            return Some(w.to_string());
        }
    }
    None
}

pub fn check_engine(runner: &dyn CommandRunner, kind: EngineKind) -> DoctorCheck {
    let name = format!("{kind} installed");
    let binary = kind.binary();
    if !cmd::which(runner, binary) {
        return DoctorCheck {
            name,
            passed: false,
            detail: Some(format!("Run: davhome engine install {kind}")),
        };
    }
    let version = runner
        .run(binary, &["--version".to_string()], VERSION_TIMEOUT)
        .ok()
        .and_then(|out| parse_version_str(&out.stdout).or_else(|| parse_version_str(&out.stderr)));
    DoctorCheck {
        name,
        passed: true,
        detail: version,
    }
}

pub fn check_tool(runner: &dyn CommandRunner, prog: &str, purpose: &str, hint: &str) -> DoctorCheck {
    let passed = cmd::which(runner, prog);
    DoctorCheck {
        name: format!("{prog} available ({purpose})"),
        passed,
        detail: (!passed).then(|| hint.to_string()),
    }
}

pub fn check_base_url(settings: &Settings) -> DoctorCheck {
    let name = "base_url configured".to_string();
    match settings.base_url().and_then(RemoteEndpoint::new) {
        Ok(ep) => DoctorCheck {
            name,
            passed: true,
            detail: Some(ep.base_url().to_string()),
        },
        Err(e) => DoctorCheck {
            name,
            passed: false,
            detail: Some(format!("{e}. Set base_url in the config file or NC_BASE_URL")),
        },
    }
}

/// The state directory exists (or can be created) and accepts writes.
pub fn check_state_dir(state_dir: &Path) -> DoctorCheck {
    let probe = state_dir.join(".davhome-doctor");
    let passed = std::fs::create_dir_all(state_dir)
        .and_then(|()| std::fs::write(&probe, b"ok"))
        .and_then(|()| std::fs::remove_file(&probe))
        .is_ok();
    DoctorCheck {
        name: format!("{} writable", state_dir.display()),
        passed,
        detail: (!passed).then(|| "Run davhome as root or change state_dir".to_string()),
    }
}

/// Run all prerequisite checks, print the report, and return an exit code.
///
/// Returns `exit_codes::SUCCESS` (0) if all checks pass, `exit_codes::RUNTIME_ERROR` (1)
/// if any check fails.
pub fn run_doctor(ctx: &Context) -> i32 {
    progress::step("Running prerequisite checks...");
    let runner = ctx.runner.as_ref();
    let checks = vec![
        check_engine(runner, EngineKind::SyncCache),
        check_engine(runner, EngineKind::KernelWebDav),
        check_tool(runner, "fusermount", "rclone unmount", "Install the fuse package"),
        check_tool(runner, "umount", "davfs2 unmount", "Install util-linux"),
        check_tool(runner, "systemctl", "supervisor units", "davhome units need systemd"),
        check_base_url(&ctx.settings),
        check_state_dir(&ctx.settings.state_dir),
    ];
    let all_passed = checks.iter().all(|c| c.passed);
    let report = crate::format::format_doctor_report(&checks);
    println!("{report}");
    if all_passed {
        exit_codes::SUCCESS
    } else {
        exit_codes::RUNTIME_ERROR
    }
}
