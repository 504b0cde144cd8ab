use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::EngineKind;

#[derive(Parser)]
#[command(
    name = "davhome",
    version,
    about = "Mount remote WebDAV home directories with rclone or davfs2",
    long_about = "davhome mounts a user's Nextcloud-style WebDAV files over their local home directory.\n\n\
                  It picks rclone (with a cache profile) or davfs2, falls back from rclone to davfs2 when \
                  a mount fails, moves an existing home aside before mounting, and writes systemd units \
                  that keep the mount alive."
)]
pub struct Cli {
    /// Configuration file (default: $DAVHOME_CONFIG or /etc/davhome/config.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mount a user's remote home directory
    #[command(
        long_about = "Mount a user's remote home directory.\n\n\
                      The password is read from $DAVHOME_PASSWORD, or prompted for (or read from stdin \
                      when it is not a terminal). Mounting an already mounted path succeeds without \
                      doing anything unless --remount is given."
    )]
    Mount(MountArgs),

    /// Unmount a home directory mounted by davhome
    Unmount {
        /// Mount point to release
        #[arg(value_name = "PATH")]
        mount_point: PathBuf,
    },

    /// Show mount state, engine and profile
    Status {
        /// Only this mount point (default: every rclone/davfs2 mount)
        #[arg(value_name = "PATH")]
        mount_point: Option<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List mount profiles
    Profiles {
        /// Only profiles for this engine
        #[arg(long, value_name = "ENGINE")]
        engine: Option<EngineKind>,
    },

    /// Manage systemd units that keep mounts alive
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },

    /// Install or configure a mount engine
    Engine {
        #[command(subcommand)]
        action: EngineAction,
    },

    /// Verify a user's credentials against the remote
    Check {
        username: String,
    },

    /// Validate prerequisites (engines, unmount tools, systemd, remote)
    Doctor,

    #[command(
        about = "Generate shell completion script (bash, zsh, fish, powershell, elvish)",
        long_about = "Generates a completion script for your shell to enable tab-completion of davhome commands.\n\n\
                      EXAMPLES:\n\
                      \n\
                      # Generate bash completions and install system-wide\n\
                      davhome completions bash | sudo tee /etc/bash_completion.d/davhome\n\
                      \n\
                      # Generate zsh completions and install system-wide\n\
                      davhome completions zsh | sudo tee /usr/share/zsh/site-functions/_davhome\n\
                      \n\
                      After installation, restart your shell or source the file to enable completions."
    )]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
pub struct MountArgs {
    /// Local account (also the remote user name)
    pub username: String,

    /// Where to mount (default: /home/<username>)
    #[arg(long, value_name = "PATH")]
    pub mount_point: Option<PathBuf>,

    /// Preferred engine: rclone or davfs2
    #[arg(long, default_value = "rclone", value_name = "ENGINE")]
    pub engine: EngineKind,

    /// Profile name (default: full for rclone, default for davfs2)
    #[arg(long, value_name = "NAME")]
    pub profile: Option<String>,

    /// Fail instead of falling back from rclone to davfs2
    #[arg(long)]
    pub no_fallback: bool,

    /// Unmount and mount again even if already mounted
    #[arg(long)]
    pub remount: bool,

    /// Also write and enable a systemd unit for the engine that succeeded
    #[arg(long)]
    pub service: bool,
}

#[derive(Subcommand)]
pub enum ServiceAction {
    /// Write (or rewrite) the unit for a user and engine
    Create {
        username: String,

        /// Where to mount (default: /home/<username>)
        #[arg(long, value_name = "PATH")]
        mount_point: Option<PathBuf>,

        #[arg(long, default_value = "rclone", value_name = "ENGINE")]
        engine: EngineKind,

        /// Profile name (default: the engine's default profile)
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,

        /// Enable and start the unit right away
        #[arg(long)]
        now: bool,
    },
    /// Enable a unit at boot
    Enable { unit: String },
    /// Disable a unit at boot
    Disable { unit: String },
    Start { unit: String },
    Stop { unit: String },
    /// Show a unit's state
    Status { unit: String },
    /// Stop, disable and delete a unit
    Remove { unit: String },
    /// List davhome units and their state
    List,
}

#[derive(Subcommand)]
pub enum EngineAction {
    /// Install the engine with the system package manager
    Install {
        #[arg(value_name = "ENGINE")]
        engine: EngineKind,
    },
    /// Write the engine's global configuration
    Configure {
        #[arg(value_name = "ENGINE")]
        engine: EngineKind,
    },
}
