mod categorize;
mod check;
mod cli;
mod cmd;
mod completions;
mod config;
mod context;
mod doctor;
mod engine;
mod engines;
mod error;
mod exit_codes;
mod format;
mod host;
mod inspector;
mod lock;
mod mount;
mod mount_table;
mod naming;
mod orchestrator;
mod packages;
mod platform;
mod profiles;
mod progress;
mod prompt;
mod remote;
mod safety_net;
mod service;
mod signals;
mod state;
mod status;
mod store;
mod units;
mod unmount;

use std::sync::atomic::Ordering;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = cli::Cli::parse();
    init_logging(cli.verbose);
    let interrupted = signals::interrupted_flag();

    // Commands that need no configuration.
    match &cli.command {
        cli::Commands::Completions { shell } => {
            std::process::exit(completions::run_completions(*shell));
        }
        cli::Commands::Profiles { engine } => {
            std::process::exit(status::run_profiles(*engine));
        }
        _ => {}
    }

    let settings = match config::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(exit_codes::for_error(&e));
        }
    };
    let ctx = context::Context::system(settings);

    let code = match &cli.command {
        cli::Commands::Mount(args) => mount::run_mount(
            &ctx,
            &mount::MountOptions {
                username: &args.username,
                mount_point: args.mount_point.as_deref(),
                engine: args.engine,
                profile: args.profile.as_deref(),
                auto_fallback: !args.no_fallback,
                force_remount: args.remount,
                service: args.service,
            },
        ),
        cli::Commands::Unmount { mount_point } => unmount::run_unmount(&ctx, mount_point),
        cli::Commands::Status { mount_point, json } => {
            status::run_status(&ctx, mount_point.as_deref(), *json)
        }
        cli::Commands::Service { action } => service::run_service(&ctx, action),
        cli::Commands::Engine { action } => engines::run_engine(&ctx, action),
        cli::Commands::Check { username } => check::run_check(&ctx, username),
        cli::Commands::Doctor => doctor::run_doctor(&ctx),
        cli::Commands::Completions { .. } | cli::Commands::Profiles { .. } => exit_codes::SUCCESS,
    };

    if interrupted.load(Ordering::SeqCst) {
        eprintln!("Interrupted.");
        std::process::exit(exit_codes::INTERRUPTED);
    }
    std::process::exit(code);
}
