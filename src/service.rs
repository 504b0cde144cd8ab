use std::path::Path;

use crate::cli::ServiceAction;
use crate::context::Context;
use crate::error::MountError;
use crate::exit_codes;
use crate::format::format_unit_table;
use crate::mount::default_mount_point;
use crate::platform;
use crate::profiles::ProfileCatalog;
use crate::progress;

fn report(result: Result<(), MountError>, done: &str) -> i32 {
    match result {
        Ok(()) => {
            println!("{done}");
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            exit_codes::for_error(&e)
        }
    }
}

/// `davhome service <action>`.
pub fn run_service(ctx: &Context, action: &ServiceAction) -> i32 {
    let units = &ctx.units;
    match action {
        ServiceAction::Create {
            username,
            mount_point,
            engine,
            profile,
            now,
        } => {
            let mp = mount_point
                .clone()
                .unwrap_or_else(|| default_mount_point(username));
            let profile = profile
                .as_deref()
                .unwrap_or(ProfileCatalog::default_for(*engine).name);
            match create(ctx, username, &mp, *engine, profile, *now) {
                Ok(unit) => {
                    println!("{unit}");
                    exit_codes::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    exit_codes::for_error(&e)
                }
            }
        }
        ServiceAction::Enable { unit } => report(units.enable(unit), &format!("Enabled {unit}")),
        ServiceAction::Disable { unit } => report(units.disable(unit), &format!("Disabled {unit}")),
        ServiceAction::Start { unit } => report(units.start(unit), &format!("Started {unit}")),
        ServiceAction::Stop { unit } => report(units.stop(unit), &format!("Stopped {unit}")),
        ServiceAction::Status { unit } => match units.status(unit) {
            Ok(record) => {
                println!("{}", format_unit_table(std::slice::from_ref(&record)));
                if !record.description.is_empty() {
                    println!("\n{}", record.description);
                }
                exit_codes::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                exit_codes::for_error(&e)
            }
        },
        ServiceAction::Remove { unit } => match units.remove(unit) {
            Ok(true) => {
                println!("Removed {unit}");
                exit_codes::SUCCESS
            }
            Ok(false) => {
                println!("{unit} does not exist");
                exit_codes::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                exit_codes::for_error(&e)
            }
        },
        ServiceAction::List => run_list(ctx),
    }
}

fn create(
    ctx: &Context,
    username: &str,
    mount_point: &Path,
    kind: crate::engine::EngineKind,
    profile: &str,
    now: bool,
) -> Result<String, MountError> {
    progress::step(&format!("Writing {kind} unit for {username} ({profile} profile)..."));
    let endpoint = ctx.endpoint()?.user_url(username);
    let owner = ctx.host.lookup_user(username)?;
    if owner.is_none() {
        return Err(MountError::UnknownUser(username.to_string()));
    }
    let mount_point = platform::normalize_mount_point(mount_point)?;
    let engine = ctx.engine(kind);
    let unit = ctx
        .units
        .create(engine.as_ref(), username, &endpoint, &mount_point, profile, owner)?;
    if now {
        ctx.units.enable(&unit)?;
        ctx.units.start(&unit)?;
    }
    Ok(unit)
}

fn run_list(ctx: &Context) -> i32 {
    let names = match ctx.units.list() {
        Ok(names) => names,
        Err(e) => {
            eprintln!("Error: {e}");
            return exit_codes::for_error(&e);
        }
    };
    let mut records = Vec::with_capacity(names.len());
    for name in &names {
        match ctx.units.status(name) {
            Ok(r) => records.push(r),
            Err(e) => {
                tracing::warn!(unit = %name, error = %e, "systemctl show failed");
            }
        }
    }
    println!("{}", format_unit_table(&records));
    exit_codes::SUCCESS
}
