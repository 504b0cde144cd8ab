use crate::cli::EngineAction;
use crate::context::Context;
use crate::exit_codes;
use crate::progress;

/// `davhome engine install|configure <engine>`.
pub fn run_engine(ctx: &Context, action: &EngineAction) -> i32 {
    let (kind, result) = match action {
        EngineAction::Install { engine } => {
            progress::step(&format!("Installing {}...", engine.package()));
            (*engine, ctx.engine(*engine).install())
        }
        EngineAction::Configure { engine } => {
            progress::step(&format!("Configuring {engine}..."));
            (*engine, ctx.engine(*engine).configure())
        }
    };
    match result {
        Ok(()) => {
            println!("{kind} ready");
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            exit_codes::for_error(&e)
        }
    }
}
