//! hellofs CLI - mount the single-file demonstration filesystem.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::mount::MountArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "hellofs", version, about = "A read-only filesystem holding one file", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Mount the filesystem and serve it until Ctrl+C or external unmount
    Mount {
        /// Directory to mount on (must exist)
        mountpoint: PathBuf,

        /// Let other users access the mount (needs user_allow_other in /etc/fuse.conf)
        #[arg(long)]
        allow_other: bool,

        /// Restrict the mount to its owner even if the config file allows others
        #[arg(long, conflicts_with = "allow_other")]
        no_allow_other: bool,

        /// Source name shown in the mount table
        #[arg(long)]
        fs_name: Option<String>,

        /// Extra mount option, may be repeated (e.g. -o noatime)
        #[arg(short = 'o', long = "option", value_name = "OPTION")]
        options: Vec<String>,

        /// Configuration file to use instead of ~/.hellofs/config.ini
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Log at debug level unless RUST_LOG is set
        #[arg(short, long)]
        debug: bool,
    },

    /// Write the configuration file with default settings
    Init,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = dispatch(cli.command) {
        e.exit();
    }
}

fn dispatch(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Mount {
            mountpoint,
            allow_other,
            no_allow_other,
            fs_name,
            options,
            config,
            debug,
        } => commands::mount::run(MountArgs {
            mountpoint,
            allow_other,
            no_allow_other,
            fs_name,
            options,
            config,
            debug,
        }),
        Commands::Init => commands::init::run(),
        Commands::Config { command } => commands::config::run(command),
    }
}
