use std::path::Path;

use crate::context::Context;
use crate::exit_codes;
use crate::progress;

/// Unmount `mount_point`. Succeeds when nothing is mounted there.
pub fn run_unmount(ctx: &Context, mount_point: &Path) -> i32 {
    let orchestrator = ctx.unmounter();
    progress::step(&format!("Unmounting {}...", mount_point.display()));
    let outcome = orchestrator.unmount(mount_point);
    if outcome.success {
        println!("{}", outcome.message);
        exit_codes::SUCCESS
    } else {
        eprintln!("Error: {}", outcome.message);
        exit_codes::for_kind(outcome.error_kind)
    }
}
