use crate::orchestrator::MountOutcome;
use crate::profiles::{MountProfile, render_size};
use crate::units::StatusRecord;

/// A row in the `davhome status` table.
pub struct StatusRow {
    pub mount_point: String,
    pub user: Option<String>,
    pub engine: Option<String>,
    /// Profile name, suffixed with `*` when inferred rather than recorded.
    pub profile: Option<String>,
    pub unit: Option<String>,
    /// e.g. `mounted`, `stale mount`.
    pub state: String,
}

/// Format the `davhome status` output table.
///
/// Returns `"No managed mounts."` when `rows` is empty.
pub fn format_status_table(rows: &[StatusRow]) -> String {
    if rows.is_empty() {
        return "No managed mounts.".to_string();
    }
    let header = format!(
        "{:<28} {:<12} {:<8} {:<10} {:<12} {}",
        "MOUNT POINT", "USER", "ENGINE", "PROFILE", "STATE", "UNIT"
    );
    let mut lines = vec![header];
    let mut any_inferred = false;
    for row in rows {
        let engine = row.engine.as_deref().unwrap_or("-");
        let profile = row.profile.as_deref().unwrap_or("(unknown)");
        any_inferred |= profile.ends_with('*');
        let unit = row.unit.as_deref().unwrap_or("(none)");
        let user = row.user.as_deref().unwrap_or("-");
        lines.push(format!(
            "{:<28} {:<12} {:<8} {:<10} {:<12} {}",
            row.mount_point, user, engine, profile, row.state, unit
        ));
    }
    if any_inferred {
        lines.push(String::new());
        lines.push("* inferred from the unit definition; may be approximate".to_string());
    }
    lines.join("\n")
}

/// Format the `davhome profiles` table.
pub fn format_profiles_table(profiles: &[&MountProfile]) -> String {
    let header = format!(
        "{:<9} {:<7} {:<8} {:<7} {:<7} {}",
        "PROFILE", "ENGINE", "CACHE", "MAX", "BUFFER", "USE CASE"
    );
    let mut lines = vec![header];
    for p in profiles {
        let cache = p.cache_mode.map_or("-", |m| m.as_str());
        let (max, buffer) = if p.cache_mode.is_some() {
            (render_size(p.max_cache_size), render_size(p.buffer_size))
        } else {
            ("-".to_string(), "-".to_string())
        };
        lines.push(format!(
            "{:<9} {:<7} {:<8} {:<7} {:<7} {}",
            p.name,
            p.engine.id(),
            cache,
            max,
            buffer,
            p.metadata.use_case
        ));
    }
    lines.join("\n")
}

/// Format `davhome service list` / `service status` output.
pub fn format_unit_table(records: &[StatusRecord]) -> String {
    if records.is_empty() {
        return "No davhome units.".to_string();
    }
    let header = format!("{:<40} {:<10} {:<10} {}", "UNIT", "ACTIVE", "SUB", "ENABLED");
    let mut lines = vec![header];
    for r in records {
        lines.push(format!(
            "{:<40} {:<10} {:<10} {}",
            r.name, r.active, r.sub, r.enabled
        ));
    }
    lines.join("\n")
}

/// Human summary of a mount call.
pub fn format_mount_outcome(outcome: &MountOutcome) -> String {
    let mut lines = vec![outcome.message.clone()];
    if let Some(backup) = &outcome.backup {
        lines.push(format!(
            "  previous home directory kept at {}",
            backup.location.display()
        ));
        if outcome.restored > 0 {
            lines.push(format!(
                "  {} item(s) restored or quarantined",
                outcome.restored
            ));
        }
    }
    if outcome.fallback_used {
        lines.push("  fallback engine in use".to_string());
    }
    lines.join("\n")
}

/// A single prerequisite check result for `davhome doctor`.
pub struct DoctorCheck {
    /// Short description of the check (e.g. `rclone installed`).
    pub name: String,
    pub passed: bool,
    /// On pass: optional version string. On fail: optional fix hint.
    pub detail: Option<String>,
}

/// Format the full `davhome doctor` report.
pub fn format_doctor_report(checks: &[DoctorCheck]) -> String {
    let mut lines = vec!["Checking prerequisites...".to_string()];
    let all_passed = checks.iter().all(|c| c.passed);

    for check in checks {
        if check.passed {
            let detail = check
                .detail
                .as_deref()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default();
            lines.push(format!("  \u{2713} {}{}", check.name, detail));
        } else {
            lines.push(format!("  \u{2717} {}", check.name));
            if let Some(fix) = &check.detail {
                lines.push(format!("    Fix: {fix}"));
            }
        }
    }

    lines.push(String::new());
    if all_passed {
        lines.push("All checks passed.".to_string());
    } else {
        lines.push("Some checks failed.".to_string());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;
    use crate::profiles::ProfileCatalog;

    fn row(profile: Option<&str>) -> StatusRow {
        StatusRow {
            mount_point: "/home/alice".to_string(),
            user: Some("alice".to_string()),
            engine: Some("rclone".to_string()),
            profile: profile.map(str::to_string),
            unit: Some("davhome-rclone-alice-2bd806c9".to_string()),
            state: "mounted".to_string(),
        }
    }

    // --- format_status_table ---

    #[test]
    fn status_table_empty_rows() {
        assert_eq!(format_status_table(&[]), "No managed mounts.");
    }

    #[test]
    fn status_table_has_header_and_data() {
        let out = format_status_table(&[row(Some("writes"))]);
        for needle in ["MOUNT POINT", "USER", "alice", "ENGINE", "PROFILE", "STATE", "UNIT", "/home/alice", "writes", "mounted"] {
            assert!(out.contains(needle), "missing {needle}: {out}");
        }
        assert!(!out.contains("inferred"));
    }

    #[test]
    fn status_table_flags_inferred_profiles() {
        let out = format_status_table(&[row(Some("full*"))]);
        assert!(out.contains("full*"));
        assert!(out.contains("inferred from the unit definition"), "got: {out}");
    }

    #[test]
    fn status_table_unknown_profile_shown() {
        let mut r = row(None);
        r.unit = None;
        let out = format_status_table(&[r]);
        assert!(out.contains("(unknown)"));
        assert!(out.contains("(none)"));
    }

    // --- format_profiles_table ---

    #[test]
    fn profiles_table_lists_every_profile() {
        let all: Vec<&MountProfile> = ProfileCatalog::list().iter().collect();
        let out = format_profiles_table(&all);
        for name in ["hosting", "minimal", "writes", "full", "default"] {
            assert!(out.contains(name), "missing {name}: {out}");
        }
    }

    #[test]
    fn davfs_profile_has_no_cache_columns() {
        let davfs: Vec<&MountProfile> = ProfileCatalog::list_for(EngineKind::KernelWebDav).collect();
        let out = format_profiles_table(&davfs);
        let line = out.lines().nth(1).unwrap();
        assert!(line.starts_with("default"), "got: {line}");
        assert!(line.contains(" - "), "got: {line}");
    }

    // --- format_unit_table ---

    #[test]
    fn unit_table_rows() {
        let out = format_unit_table(&[StatusRecord {
            name: "davhome-rclone-alice-2bd806c9".to_string(),
            active: "active".to_string(),
            sub: "running".to_string(),
            enabled: "enabled".to_string(),
            description: String::new(),
        }]);
        assert!(out.contains("davhome-rclone-alice-2bd806c9"));
        assert!(out.contains("running"));
        assert_eq!(format_unit_table(&[]), "No davhome units.");
    }

    // --- format_mount_outcome ---

    #[test]
    fn outcome_mentions_fallback() {
        let outcome = MountOutcome {
            success: true,
            message: "Mounted /home/alice with davfs2 (default)".to_string(),
            fallback_used: true,
            ..MountOutcome::default()
        };
        let out = format_mount_outcome(&outcome);
        assert!(out.starts_with("Mounted /home/alice"));
        assert!(out.contains("fallback engine in use"));
    }

    // --- format_doctor_report ---

    #[test]
    fn doctor_report_all_passed_message() {
        let checks = vec![DoctorCheck {
            name: "rclone installed".to_string(),
            passed: true,
            detail: Some("1.68.2".to_string()),
        }];
        let out = format_doctor_report(&checks);
        assert!(out.starts_with("Checking prerequisites..."));
        assert!(out.contains("All checks passed."), "got: {out}");
        assert!(out.contains("✓ rclone installed (1.68.2)"), "got: {out}");
    }

    #[test]
    fn doctor_report_failed_check_shows_cross_and_fix() {
        let checks = vec![DoctorCheck {
            name: "davfs2 installed".to_string(),
            passed: false,
            detail: Some("davhome engine install davfs2".to_string()),
        }];
        let out = format_doctor_report(&checks);
        assert!(out.contains("Some checks failed."), "got: {out}");
        assert!(out.contains("✗ davfs2 installed"), "got: {out}");
        assert!(out.contains("Fix: davhome engine install davfs2"), "got: {out}");
    }
}
