//! Attaching a filesystem to the kernel.
//!
//! # Handshake
//!
//! ```text
//! open /dev/fuse ──► mount(2) "fuse.<name>" ──► descriptor
//!                        │
//!                        └─ EPERM ──► fusermount -o ... -- <path>
//!                                        │  (_FUSE_COMMFD socket pair)
//!                                        └──► SCM_RIGHTS ──► descriptor
//! ```
//!
//! The direct path needs `CAP_SYS_ADMIN`; unprivileged users go through the
//! setuid helper. Unmounting always goes through `fusermount -u`.

mod commfd;
mod error;
mod helper;
mod options;

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno as NixErrno;
use nix::unistd::{getgid, getuid};
use tracing::{debug, info, warn};

pub use commfd::{parse_rights, receive_fd, COMMFD_ENV};
pub use error::{MountError, MountResult};
pub use helper::{
    find_helper, find_helper_in, mount_with_helper, run_unmount, FusermountUnmount, Unmount,
    FALLBACK_DIR, FUSERMOUNT,
};
pub use options::{split_flags, MountOptions};

/// The FUSE character device.
pub const FUSE_DEVICE: &str = "/dev/fuse";

/// A successfully attached filesystem.
#[derive(Debug)]
pub struct Mounted {
    /// Kernel descriptor for the connection.
    pub fd: OwnedFd,
    /// Absolute mountpoint.
    pub mountpoint: PathBuf,
}

/// Check that `path` is an existing directory and make it absolute.
pub fn resolve_mountpoint(path: &Path) -> MountResult<PathBuf> {
    let invalid = |reason: String| MountError::InvalidMountpoint {
        path: path.to_path_buf(),
        reason,
    };
    let resolved = path.canonicalize().map_err(|e| invalid(e.to_string()))?;
    let metadata = std::fs::metadata(&resolved).map_err(|e| invalid(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }
    Ok(resolved)
}

/// Attach a new FUSE filesystem at `mountpoint`.
///
/// # Errors
///
/// Fails if the mountpoint is invalid, the device cannot be opened, or both
/// mount(2) and (when enabled) the helper fallback fail.
pub fn mount(mountpoint: &Path, options: &MountOptions) -> MountResult<Mounted> {
    let mountpoint = resolve_mountpoint(mountpoint)?;
    let device = open_device()?;

    match mount_direct(&device, &mountpoint, options) {
        Ok(()) => {
            info!(mountpoint = %mountpoint.display(), fs_type = %options.fs_type(), "Mounted");
            Ok(Mounted {
                fd: device,
                mountpoint,
            })
        }
        Err(err) if is_eperm(&err) && options.fusermount_fallback => {
            drop(device);
            warn!(
                mountpoint = %mountpoint.display(),
                "mount(2) not permitted, retrying through {}", FUSERMOUNT
            );
            let helper = find_helper(FUSERMOUNT, Path::new(FALLBACK_DIR))?;
            let fd = mount_with_helper(&helper, &mountpoint, options)?;
            info!(mountpoint = %mountpoint.display(), helper = %helper.display(), "Mounted");
            Ok(Mounted { fd, mountpoint })
        }
        Err(err) => Err(err),
    }
}

fn open_device() -> MountResult<OwnedFd> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(FUSE_DEVICE)
        .map_err(|source| MountError::DeviceOpen {
            path: PathBuf::from(FUSE_DEVICE),
            source,
        })?;
    Ok(OwnedFd::from(file))
}

fn mount_direct(device: &OwnedFd, mountpoint: &Path, options: &MountOptions) -> MountResult<()> {
    let list = options.option_list(device.as_raw_fd(), getuid().as_raw(), getgid().as_raw());
    let (flags, data) = split_flags(&list);
    debug!(
        mountpoint = %mountpoint.display(),
        source = %options.fs_name,
        flags = ?flags,
        data = %data,
        "mount(2)"
    );
    nix::mount::mount(
        Some(options.fs_name.as_str()),
        mountpoint,
        Some(options.fs_type().as_str()),
        flags,
        Some(data.as_str()),
    )
    .map_err(|errno| MountError::MountSyscall {
        mountpoint: mountpoint.to_path_buf(),
        source: io::Error::from(errno),
    })
}

fn is_eperm(err: &MountError) -> bool {
    matches!(
        err,
        MountError::MountSyscall { source, .. } if source.raw_os_error() == Some(NixErrno::EPERM as i32)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_mountpoint() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_mountpoint(dir.path()).unwrap();
        assert!(resolved.is_absolute());

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            resolve_mountpoint(&file),
            Err(MountError::InvalidMountpoint { .. })
        ));
        assert!(matches!(
            resolve_mountpoint(&dir.path().join("missing")),
            Err(MountError::InvalidMountpoint { .. })
        ));
    }

    #[test]
    fn test_eperm_detection() {
        let err = MountError::MountSyscall {
            mountpoint: PathBuf::from("/mnt/x"),
            source: io::Error::from_raw_os_error(libc::EPERM),
        };
        assert!(is_eperm(&err));

        let err = MountError::MountSyscall {
            mountpoint: PathBuf::from("/mnt/x"),
            source: io::Error::from_raw_os_error(libc::EINVAL),
        };
        assert!(!is_eperm(&err));
    }
}
