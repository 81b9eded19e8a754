//! Init command - write a default configuration file.

use hellofs::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Run the init command.
///
/// An existing file is loaded and rewritten, so unknown keys are dropped but
/// current values are kept.
pub fn run() -> Result<(), CliError> {
    let path = config_file_path();
    let existed = path.exists();

    let config = ConfigFile::load()?;
    config.save()?;

    if existed {
        println!("Configuration file updated: {}", path.display());
    } else {
        println!("Configuration file created: {}", path.display());
    }
    println!();
    println!("Edit this file to customize hellofs settings.");
    println!("CLI arguments override config file values when specified.");
    Ok(())
}
