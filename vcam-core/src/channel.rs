//! Daemon channel — descriptor handoff over a Unix-domain socket.
//!
//! The daemon's handshake is a single message: one control byte with
//! the shared-memory file descriptor attached as ancillary data
//! (`SCM_RIGHTS`). The descriptor is only valid if it arrives in the
//! same receive as the byte, so both are read with one `recvmsg` call.
//!
//! The socket exists only for the handoff. Once the descriptor is
//! owned, the connection is closed; frame delivery happens entirely
//! through the mapped region.

use std::io::IoSliceMut;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rustix::net::{RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags, recvmsg};
use tracing::{debug, info};

use crate::error::ConnectError;

/// Well-known daemon socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/dev/socket/vcam_ipc";

/// Fallback path the daemon binds when the primary is unavailable.
pub const FALLBACK_SOCKET_PATH: &str = "/data/local/tmp/vcam_ipc";

/// Default handshake deadline.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to the daemon and receive the shared-memory descriptor.
///
/// Paths are tried in order; the first that accepts a connection is
/// used for the handshake. Blocks the calling thread for at most
/// `timeout` once connected — use [`receive_shared_fd`] from async
/// contexts.
pub fn receive_shared_fd_blocking(
    paths: &[PathBuf],
    timeout: Duration,
) -> Result<OwnedFd, ConnectError> {
    let stream = connect_any(paths)?;
    stream.set_read_timeout(Some(timeout))?;
    handshake(&stream, timeout)
}

/// Async wrapper around [`receive_shared_fd_blocking`].
///
/// The handshake runs on the blocking pool; its duration is bounded by
/// the socket read timeout, so a cancelled caller never leaks an
/// unbounded worker.
pub async fn receive_shared_fd(
    paths: Vec<PathBuf>,
    timeout: Duration,
) -> Result<OwnedFd, ConnectError> {
    tokio::task::spawn_blocking(move || receive_shared_fd_blocking(&paths, timeout))
        .await
        .map_err(|e| ConnectError::Io(std::io::Error::other(e)))?
}

fn connect_any(paths: &[PathBuf]) -> Result<UnixStream, ConnectError> {
    let mut last_err = std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no daemon socket path configured",
    );

    for path in paths {
        match UnixStream::connect(path) {
            Ok(stream) => {
                info!("connected to daemon at {}", path.display());
                return Ok(stream);
            }
            Err(e) => {
                debug!("daemon socket {} unavailable: {e}", path.display());
                last_err = e;
            }
        }
    }

    Err(ConnectError::AddressUnavailable(last_err))
}

/// Receive exactly one control byte plus one ancillary descriptor.
fn handshake(stream: &UnixStream, timeout: Duration) -> Result<OwnedFd, ConnectError> {
    let mut control_byte = [0u8; 1];
    let mut cmsg_space = [0u8; rustix::cmsg_space!(ScmRights(1))];
    let mut cmsg_buffer = RecvAncillaryBuffer::new(&mut cmsg_space);

    let msg = recvmsg(
        stream,
        &mut [IoSliceMut::new(&mut control_byte)],
        &mut cmsg_buffer,
        RecvFlags::empty(),
    )
    .map_err(|errno| {
        if errno == rustix::io::Errno::AGAIN || errno == rustix::io::Errno::WOULDBLOCK {
            ConnectError::Timeout(timeout)
        } else {
            ConnectError::Io(errno.into())
        }
    })?;

    if msg.bytes == 0 {
        return Err(ConnectError::PeerClosed);
    }

    let mut received = None;
    for message in cmsg_buffer.drain() {
        if let RecvAncillaryMessage::ScmRights(fds) = message {
            for fd in fds {
                // Only the first descriptor is meaningful; extras are
                // dropped (closed) here.
                if received.is_none() {
                    received = Some(fd);
                }
            }
        }
    }

    match received {
        Some(fd) => {
            debug!("received shared-memory descriptor (control byte {:#04x})", control_byte[0]);
            Ok(fd)
        }
        None => Err(ConnectError::NoDescriptorReceived),
    }
}

/// The default path list: primary socket, then the daemon's fallback.
pub fn default_socket_paths() -> Vec<PathBuf> {
    vec![
        Path::new(DEFAULT_SOCKET_PATH).to_path_buf(),
        Path::new(FALLBACK_SOCKET_PATH).to_path_buf(),
    ]
}

// ── Tests ────────────────────────────────────────────────────────
