//! Descriptor hand-off from `fusermount` over a socket pair.
//!
//! The helper opens `/dev/fuse`, performs the privileged mount and sends the
//! descriptor back over the socket named by `_FUSE_COMMFD` as an
//! `SCM_RIGHTS` control message. Anything that is not exactly one rights
//! message carrying one valid descriptor is rejected, and any descriptors it
//! did carry are closed.

use std::io::IoSliceMut;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::socket::{
    recvmsg, socketpair, AddressFamily, ControlMessageOwned, MsgFlags, SockFlag, SockType,
};
use nix::unistd;

use super::error::{MountError, MountResult};

/// Environment variable naming the helper's end of the socket pair.
pub const COMMFD_ENV: &str = "_FUSE_COMMFD";

/// Create the socket pair. The first end stays with us (close-on-exec), the
/// second is inherited by the helper.
pub fn comm_socketpair() -> MountResult<(OwnedFd, OwnedFd)> {
    let (local, remote) = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::SOCK_CLOEXEC,
    )
    .map_err(std::io::Error::from)?;
    fcntl(remote.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty())).map_err(std::io::Error::from)?;
    Ok((local, remote))
}

/// Block until the helper sends a descriptor over `sock`.
///
/// The received descriptor is close-on-exec.
pub fn receive_fd(sock: &OwnedFd) -> MountResult<OwnedFd> {
    let mut data = [0u8; 4];
    let mut iov = [IoSliceMut::new(&mut data)];
    let mut space = nix::cmsg_space!([RawFd; 1]);

    let (bytes, messages) = loop {
        match recvmsg::<()>(
            sock.as_raw_fd(),
            &mut iov,
            Some(&mut space),
            MsgFlags::MSG_CMSG_CLOEXEC,
        ) {
            Ok(msg) => {
                let messages: Vec<ControlMessageOwned> = match msg.cmsgs() {
                    Ok(cmsgs) => cmsgs.collect(),
                    Err(Errno::ENOBUFS) => {
                        return Err(MountError::Handoff("control message truncated".to_string()))
                    }
                    Err(e) => {
                        return Err(MountError::Handoff(format!("bad control data: {}", e)))
                    }
                };
                break (msg.bytes, messages);
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(MountError::Handoff(format!("recvmsg failed: {}", e))),
        }
    };

    if bytes == 0 && messages.is_empty() {
        return Err(MountError::Handoff(
            "helper closed the socket without sending a descriptor".to_string(),
        ));
    }

    match parse_rights(&messages) {
        // SAFETY: the kernel installed this descriptor in our table for us and
        // nothing else owns it.
        Ok(fd) => Ok(unsafe { OwnedFd::from_raw_fd(fd) }),
        Err(e) => {
            for fd in carried_fds(&messages) {
                let _ = unistd::close(fd);
            }
            Err(e)
        }
    }
}

/// Check that `messages` is a single `SCM_RIGHTS` message with one
/// non-negative descriptor, and return it.
pub fn parse_rights(messages: &[ControlMessageOwned]) -> MountResult<RawFd> {
    let message = match messages {
        [] => return Err(MountError::Handoff("no control message received".to_string())),
        [message] => message,
        many => {
            return Err(MountError::Handoff(format!(
                "expected one control message, got {}",
                many.len()
            )))
        }
    };
    let fds = match message {
        ControlMessageOwned::ScmRights(fds) => fds,
        other => {
            return Err(MountError::Handoff(format!(
                "wrong control message type: {:?}",
                other
            )))
        }
    };
    match fds.as_slice() {
        [fd] if *fd >= 0 => Ok(*fd),
        [fd] => Err(MountError::Handoff(format!("negative descriptor: {}", fd))),
        [] => Err(MountError::Handoff(
            "rights message carries no descriptor".to_string(),
        )),
        many => Err(MountError::Handoff(format!(
            "expected one descriptor, got {}",
            many.len()
        ))),
    }
}

fn carried_fds(messages: &[ControlMessageOwned]) -> Vec<RawFd> {
    messages
        .iter()
        .filter_map(|m| match m {
            ControlMessageOwned::ScmRights(fds) => Some(fds),
            _ => None,
        })
        .flatten()
        .copied()
        .filter(|fd| *fd >= 0)
        .collect()
}
