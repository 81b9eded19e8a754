//! The setuid `fusermount` helper: lookup, mount fallback and unmount.

use std::ffi::OsString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::{debug, warn};

use super::commfd::{comm_socketpair, receive_fd, COMMFD_ENV};
use super::error::{MountError, MountResult};
use super::options::MountOptions;

/// Helper binary name.
pub const FUSERMOUNT: &str = "fusermount";

/// Directory searched when the helper is not on `PATH`.
pub const FALLBACK_DIR: &str = "/bin";

/// Locate `name` on `PATH`, then in `fallback_dir`.
pub fn find_helper(name: &str, fallback_dir: &Path) -> MountResult<PathBuf> {
    find_helper_in(name, std::env::var_os("PATH"), fallback_dir)
}

/// Like [`find_helper`] with an explicit search path.
pub fn find_helper_in(
    name: &str,
    path: Option<OsString>,
    fallback_dir: &Path,
) -> MountResult<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    if let Some(path) = path.filter(|p| !p.is_empty()) {
        if let Ok(found) = which::which_in(name, Some(path), &cwd) {
            return Ok(found);
        }
    }
    which::which_in(name, Some(fallback_dir), &cwd).map_err(|_| MountError::HelperNotFound {
        name: name.to_string(),
        fallback: fallback_dir.to_path_buf(),
    })
}

/// Detaches a mounted filesystem.
pub trait Unmount: Send + Sync {
    fn unmount(&self, mountpoint: &Path) -> MountResult<()>;
}

/// Unmounts with `fusermount -u`.
///
/// The helper is looked up on every call, on `PATH` unless a search path
/// was given.
#[derive(Debug, Clone)]
pub struct FusermountUnmount {
    fallback_dir: PathBuf,
    search_path: Option<OsString>,
}

impl Default for FusermountUnmount {
    fn default() -> Self {
        Self {
            fallback_dir: PathBuf::from(FALLBACK_DIR),
            search_path: None,
        }
    }
}

impl FusermountUnmount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = dir.into();
        self
    }

    /// Search `path` instead of the `PATH` environment variable.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }
}

impl Unmount for FusermountUnmount {
    fn unmount(&self, mountpoint: &Path) -> MountResult<()> {
        let helper = match &self.search_path {
            Some(path) => find_helper_in(FUSERMOUNT, Some(path.clone()), &self.fallback_dir)?,
            None => find_helper(FUSERMOUNT, &self.fallback_dir)?,
        };
        run_unmount(&helper, mountpoint)
    }
}

/// Run `<helper> -u <mountpoint>`.
///
/// A failing exit with stderr output is reported as one combined
/// `"<stderr> (code <status>)"` error.
pub fn run_unmount(helper: &Path, mountpoint: &Path) -> MountResult<()> {
    debug!(helper = %helper.display(), mountpoint = %mountpoint.display(), "Running unmount helper");
    let output = Command::new(helper)
        .arg("-u")
        .arg(mountpoint)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .output()
        .map_err(|source| MountError::HelperSpawn {
            helper: helper.to_path_buf(),
            source,
        })?;
    check_output(helper, &output)
}

fn check_output(helper: &Path, output: &Output) -> MountResult<()> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim_end();
    if output.status.success() {
        if !stderr.is_empty() {
            warn!(helper = %helper.display(), stderr = %stderr, "Helper succeeded with diagnostics");
        }
        return Ok(());
    }
    let code = match output.status.code() {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    };
    if stderr.is_empty() {
        Err(MountError::HelperFailed(format!(
            "{} exited (code {})",
            helper.display(),
            code
        )))
    } else {
        Err(MountError::HelperFailed(format!("{} (code {})", stderr, code)))
    }
}

/// Mount through the helper and receive the kernel descriptor from it.
pub fn mount_with_helper(
    helper: &Path,
    mountpoint: &Path,
    options: &MountOptions,
) -> MountResult<OwnedFd> {
    let (local, remote) = comm_socketpair()?;
    debug!(
        helper = %helper.display(),
        mountpoint = %mountpoint.display(),
        options = %options.helper_options(),
        "Mounting through helper"
    );
    let child = Command::new(helper)
        .arg("-o")
        .arg(options.helper_options())
        .arg("--")
        .arg(mountpoint)
        .env(COMMFD_ENV, remote.as_raw_fd().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| MountError::HelperSpawn {
            helper: helper.to_path_buf(),
            source,
        })?;
    // The child holds its own copy; ours must go so a dead helper reads as EOF.
    drop(remote);

    let received = receive_fd(&local);
    let output = child.wait_with_output()?;
    match received {
        Ok(fd) => {
            check_output(helper, &output)?;
            Ok(fd)
        }
        Err(err) => {
            check_output(helper, &output)?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_find_on_path_first() {
        let on_path = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        let expected = script(on_path.path(), "fusermount", "exit 0");
        script(fallback.path(), "fusermount", "exit 0");

        let found = find_helper_in(
            "fusermount",
            Some(on_path.path().as_os_str().to_owned()),
            fallback.path(),
        )
        .unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_find_falls_back() {
        let empty = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        let expected = script(fallback.path(), "fusermount", "exit 0");

        let found = find_helper_in(
            "fusermount",
            Some(empty.path().as_os_str().to_owned()),
            fallback.path(),
        )
        .unwrap();
        assert_eq!(found, expected);

        let found = find_helper_in("fusermount", None, fallback.path()).unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_not_found() {
        let empty = tempfile::tempdir().unwrap();
        let err = find_helper_in(
            "fusermount",
            Some(empty.path().as_os_str().to_owned()),
            empty.path(),
        )
        .unwrap_err();
        assert!(matches!(err, MountError::HelperNotFound { .. }));
    }

    #[test]
    fn test_unmount_combines_stderr_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script(dir.path(), "fusermount", "echo 'entry for /mnt/x not found' >&2\nexit 1");
        let err = run_unmount(&helper, Path::new("/mnt/x")).unwrap_err();
        assert_eq!(err.to_string(), "entry for /mnt/x not found (code 1)");
    }

    #[test]
    fn test_unmount_passes_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("args");
        let helper = script(
            dir.path(),
            "fusermount",
            &format!("echo \"$@\" > {}", log.display()),
        );
        run_unmount(&helper, Path::new("/mnt/x")).unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap().trim(), "-u /mnt/x");
    }

    #[test]
    fn test_silent_failure_still_reports_code() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script(dir.path(), "fusermount", "exit 3");
        let err = run_unmount(&helper, Path::new("/mnt/x")).unwrap_err();
        assert!(err.to_string().contains("(code 3)"));
    }

    #[test]
    fn test_helper_mount_failure_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script(dir.path(), "fusermount", "echo 'mount failed: Permission denied' >&2\nexit 1");
        let err = mount_with_helper(&helper, Path::new("/mnt/x"), &MountOptions::new()).unwrap_err();
        assert_eq!(err.to_string(), "mount failed: Permission denied (code 1)");
    }

    #[test]
    fn test_helper_exiting_cleanly_without_fd_is_handoff_error() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script(dir.path(), "fusermount", "exit 0");
        let err = mount_with_helper(&helper, Path::new("/mnt/x"), &MountOptions::new()).unwrap_err();
        assert!(matches!(err, MountError::Handoff(_)));
    }

    #[test]
    fn test_fusermount_unmount_uses_fallback_dir() {
        let empty = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        let log = fallback.path().join("args");
        script(
            fallback.path(),
            FUSERMOUNT,
            &format!("echo \"$@\" > {}", log.display()),
        );

        let unmounter = FusermountUnmount::new()
            .with_fallback_dir(fallback.path())
            .with_search_path(empty.path().as_os_str());
        unmounter.unmount(Path::new("/mnt/x")).unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap().trim(), "-u /mnt/x");
    }

    #[test]
    fn test_fusermount_unmount_without_helper() {
        let empty = tempfile::tempdir().unwrap();
        let unmounter = FusermountUnmount::new()
            .with_fallback_dir(empty.path())
            .with_search_path(empty.path().as_os_str());
        let err = unmounter.unmount(Path::new("/mnt/x")).unwrap_err();
        assert!(matches!(err, MountError::HelperNotFound { .. }));
    }
}
