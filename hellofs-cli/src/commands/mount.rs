//! Mount command - serve the hello filesystem until unmounted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hellofs::config::{ConfigFile, SessionConfig};
use hellofs::hello::{HelloFs, HELLO_NAME};
use hellofs::mount::MountOptions;
use hellofs::session::Session;
use tracing::info;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the mount command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountArgs {
    pub mountpoint: PathBuf,
    pub allow_other: bool,
    pub no_allow_other: bool,
    pub fs_name: Option<String>,
    pub options: Vec<String>,
    pub config: Option<PathBuf>,
    pub debug: bool,
}

/// Run the mount command.
pub fn run(args: MountArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.config.as_deref(), args.debug)?;
    runner.log_startup("mount");
    let config = runner.config();

    let mountpoint = expand_home(&args.mountpoint);
    let options = resolve_mount_options(&args, config);
    let session_config = config.session_config();

    println!("hellofs v{}", hellofs::VERSION);
    println!("===========");
    println!();
    println!("Mountpoint:  {}", mountpoint.display());
    println!("FS name:     {}", options.fs_name);
    println!(
        "Access:      {}",
        if options.allow_other {
            "all users"
        } else {
            "owner only"
        }
    );
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("hellofs-worker")
        .build()?;
    runtime.block_on(serve(mountpoint, options, session_config))
}

async fn serve(
    mountpoint: PathBuf,
    options: MountOptions,
    config: SessionConfig,
) -> Result<(), CliError> {
    println!("Mounting filesystem...");
    let mut session = Session::mount(Arc::new(HelloFs::new()), &mountpoint, options, config).await?;

    let (major, minor) = session.protocol();
    println!("  Protocol:  {}.{}", major, minor);
    println!("  File:      {}", session.mountpoint().join(HELLO_NAME).display());
    println!();

    let unmounter = session.unmounter();
    ctrlc::set_handler(move || {
        println!();
        println!("Received shutdown signal, unmounting...");
        unmounter.request_unmount();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    println!("Press Ctrl+C to unmount and exit");
    println!();

    let result = session.run().await;
    let snapshot = session.metrics().snapshot();
    info!(
        received = snapshot.received,
        replied = snapshot.replied,
        errors = snapshot.errors,
        "Session finished"
    );

    println!();
    println!("Session Summary");
    println!("───────────────");
    println!("{}", snapshot);

    result?;
    println!();
    println!("Filesystem unmounted.");
    Ok(())
}

/// Mount options: CLI > config file > defaults.
pub fn resolve_mount_options(args: &MountArgs, config: &ConfigFile) -> MountOptions {
    let mut options = config.mount_options();
    if args.allow_other {
        options = options.with_allow_other(true);
    } else if args.no_allow_other {
        options = options.with_allow_other(false);
    }
    if let Some(name) = &args.fs_name {
        options = options.with_fs_name(name.as_str());
    }
    for option in &args.options {
        options = options.with_option(option.as_str());
    }
    options
}

/// Replace a leading `~` with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
