use std::path::{Path, PathBuf};

use crate::context::Context;
use crate::engine::EngineKind;
use crate::exit_codes;
use crate::format::{StatusRow, format_profiles_table, format_status_table};
use crate::inspector::{MountStatus, ProfileSource};
use crate::profiles::{MountProfile, ProfileCatalog};
use crate::progress;

/// Table row for one inspected mount point.
pub fn status_row(status: &MountStatus) -> StatusRow {
    let profile = status.profile.as_ref().map(|p| match status.profile_source {
        Some(ProfileSource::Inferred) => format!("{p}*"),
        _ => p.clone(),
    });
    StatusRow {
        mount_point: status.mount_point.display().to_string(),
        user: status.username.clone(),
        engine: status.engine.map(|e| e.id().to_string()),
        profile,
        unit: status.unit.clone(),
        state: status.health.label().to_string(),
    }
}

/// Print the state of one mount point, or of every rclone/davfs2 mount.
pub fn run_status(ctx: &Context, mount_point: Option<&Path>, json: bool) -> i32 {
    let inspector = ctx.inspector();
    let targets: Vec<PathBuf> = match mount_point {
        Some(mp) => vec![mp.to_path_buf()],
        None => {
            progress::step("Scanning mounts...");
            match inspector.list_mounts() {
                Ok(mounts) => mounts.into_iter().map(|m| m.mount_point).collect(),
                Err(e) => {
                    eprintln!("Error: {e}");
                    return exit_codes::for_error(&e);
                }
            }
        }
    };

    let mut statuses = Vec::with_capacity(targets.len());
    for target in &targets {
        match inspector.get_status(target) {
            Ok(st) => statuses.push(st),
            Err(e) => {
                eprintln!("Error: {e}");
                return exit_codes::for_error(&e);
            }
        }
    }

    if json {
        match serde_json::to_string_pretty(&statuses) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: failed to serialize status: {e}");
                return exit_codes::RUNTIME_ERROR;
            }
        }
    } else {
        let rows: Vec<StatusRow> = statuses.iter().map(status_row).collect();
        println!("{}", format_status_table(&rows));
    }
    exit_codes::SUCCESS
}

/// Print the profile catalog, optionally for one engine.
pub fn run_profiles(engine: Option<EngineKind>) -> i32 {
    let profiles: Vec<&MountProfile> = match engine {
        Some(kind) => ProfileCatalog::list_for(kind).collect(),
        None => ProfileCatalog::list().iter().collect(),
    };
    println!("{}", format_profiles_table(&profiles));
    exit_codes::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::MountHealth;

    fn status(profile_source: Option<ProfileSource>) -> MountStatus {
        MountStatus {
            mount_point: PathBuf::from("/home/alice"),
            username: Some("alice".to_string()),
            mounted: true,
            health: MountHealth::Active,
            engine: Some(EngineKind::SyncCache),
            profile: Some("writes".to_string()),
            profile_source,
            unit: None,
        }
    }

    #[test]
    fn recorded_profile_shown_plain() {
        let row = status_row(&status(Some(ProfileSource::Recorded)));
        assert_eq!(row.profile.as_deref(), Some("writes"));
        assert_eq!(row.engine.as_deref(), Some("rclone"));
        assert_eq!(row.state, "mounted");
        assert_eq!(row.user.as_deref(), Some("alice"));
    }

    #[test]
    fn inferred_profile_is_starred() {
        let row = status_row(&status(Some(ProfileSource::Inferred)));
        assert_eq!(row.profile.as_deref(), Some("writes*"));
    }
}
