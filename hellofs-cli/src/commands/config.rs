//! Configuration CLI commands.

use clap::Subcommand;
use hellofs::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Show the effective configuration settings
    Show,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => run_path(),
        ConfigCommands::Show => run_show(),
    }
}

fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}

fn run_show() -> Result<(), CliError> {
    let config = ConfigFile::load()?;

    println!("Configuration Settings");
    println!("======================");
    println!();
    for (i, (section, entries)) in settings(&config).into_iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("[{}]", section);
        for (key, value) in entries {
            if value.is_empty() {
                println!("  {} = (not set)", key);
            } else {
                println!("  {} = {}", key, value);
            }
        }
    }
    Ok(())
}

type Section = (&'static str, Vec<(&'static str, String)>);

fn settings(config: &ConfigFile) -> Vec<Section> {
    let mount = &config.mount;
    let session = &config.session;
    let logging = &config.logging;
    vec![
        (
            "mount",
            vec![
                ("fs_name", mount.fs_name.clone()),
                ("allow_other", mount.allow_other.to_string()),
                ("fusermount_fallback", mount.fusermount_fallback.to_string()),
                ("options", mount.options.join(",")),
            ],
        ),
        (
            "session",
            vec![
                ("max_write", session.max_write.to_string()),
                ("max_readahead", session.max_readahead.to_string()),
                ("max_background", session.max_background.to_string()),
                ("congestion_threshold", session.congestion_threshold.to_string()),
                ("entry_ttl_ms", session.entry_ttl_ms.to_string()),
                ("attr_ttl_ms", session.attr_ttl_ms.to_string()),
                ("shutdown_grace_secs", session.shutdown_grace_secs.to_string()),
            ],
        ),
        (
            "logging",
            vec![
                ("level", logging.level.clone()),
                (
                    "file",
                    logging
                        .file
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                ),
            ],
        ),
    ]
}
