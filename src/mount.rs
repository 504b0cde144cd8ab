use std::path::{Path, PathBuf};

use crate::context::Context;
use crate::engine::EngineKind;
use crate::error::MountError;
use crate::exit_codes;
use crate::format::format_mount_outcome;
use crate::orchestrator::{MountOutcome, MountSpec};
use crate::platform;
use crate::progress;
use crate::prompt;

/// Home directory used when no mount point is given.
pub fn default_mount_point(username: &str) -> PathBuf {
    Path::new("/home").join(username)
}

/// Options for `davhome mount`, borrowed from the parsed command line.
pub struct MountOptions<'a> {
    pub username: &'a str,
    pub mount_point: Option<&'a Path>,
    pub engine: EngineKind,
    pub profile: Option<&'a str>,
    pub auto_fallback: bool,
    pub force_remount: bool,
    pub service: bool,
}

/// Mount one user's home and optionally persist it as a systemd unit.
pub fn run_mount(ctx: &Context, opts: &MountOptions<'_>) -> i32 {
    let mount_point = opts
        .mount_point
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_mount_point(opts.username));
    let mount_point = match platform::normalize_mount_point(&mount_point) {
        Ok(mp) => mp,
        Err(e) => {
            eprintln!("Error: {e}");
            return exit_codes::for_error(&e);
        }
    };

    let orchestrator = match ctx.orchestrator() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {e}");
            return exit_codes::for_error(&e);
        }
    };
    let password = match prompt::read_password(opts.username) {
        Ok(pw) => pw,
        Err(e) => {
            eprintln!("Error: {e}");
            return exit_codes::for_error(&e);
        }
    };

    progress::step(&format!(
        "Mounting {} for {} ({})",
        mount_point.display(),
        opts.username,
        opts.engine
    ));
    let spec = MountSpec {
        username: opts.username,
        password: &password,
        mount_point: &mount_point,
        engine: opts.engine,
        profile: opts.profile,
        auto_fallback: opts.auto_fallback,
        force_remount: opts.force_remount,
    };
    let outcome = orchestrator.mount(&spec);
    if !outcome.success {
        eprintln!("Error: {}", outcome.message);
        return exit_codes::for_kind(outcome.error_kind);
    }
    println!("{}", format_mount_outcome(&outcome));

    if !opts.service {
        return exit_codes::SUCCESS;
    }
    match persist_unit(ctx, opts.username, &mount_point, &outcome) {
        Ok(unit) => {
            println!("Unit {unit} enabled");
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: mounted, but the unit could not be written: {e}");
            exit_codes::for_error(&e)
        }
    }
}

/// Write and enable a unit matching what the mount ended up using.
fn persist_unit(
    ctx: &Context,
    username: &str,
    mount_point: &Path,
    outcome: &MountOutcome,
) -> Result<String, MountError> {
    let (Some(kind), Some(profile)) = (outcome.engine_used, outcome.profile.as_deref()) else {
        return Err(MountError::Config(
            "the mount's engine and profile are unknown".to_string(),
        ));
    };
    progress::step(&format!("Writing {kind} unit ({profile} profile)..."));
    let endpoint = ctx.endpoint()?.user_url(username);
    let owner = ctx.host.lookup_user(username)?;
    let engine = ctx.engine(kind);
    let unit = ctx
        .units
        .create(engine.as_ref(), username, &endpoint, mount_point, profile, owner)?;
    ctx.units.enable(&unit)?;
    Ok(unit)
}
