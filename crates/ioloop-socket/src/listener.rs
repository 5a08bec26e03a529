//! `UnixSocketListener`: bound, listening Unix-domain stream socket.
//!
//! Supports filesystem paths and the Linux abstract namespace (a leading
//! NUL in `sun_path`, no file created). Dropping the listener closes the
//! fd; a filesystem path is left in place for the owner to remove.

use crate::config::SocketConfig;
use crate::connection::UnixSocketConnection;

use ioloop_core::error::{LoopError, Result};
use ioloop_core::{kdebug, kerror};

use nix::errno::Errno;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;

/// Build a `sockaddr_un` for `path`, returning it with its exact length.
pub(crate) fn unix_addr(path: &str, is_abstract: bool) -> Result<(libc::sockaddr_un, libc::socklen_t)> {
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = path.as_bytes();
    // Filesystem names need a trailing NUL; abstract names a leading one.
    if bytes.len() + 1 > addr.sun_path.len() {
        return Err(LoopError::PathTooLong(bytes.len()));
    }
    let start = usize::from(is_abstract);
    for (dst, &src) in addr.sun_path[start..].iter_mut().zip(bytes) {
        *dst = src as libc::c_char;
    }

    let path_offset = std::mem::size_of::<libc::sa_family_t>();
    let len = if is_abstract {
        path_offset + 1 + bytes.len()
    } else {
        path_offset + bytes.len() + 1
    };
    Ok((addr, len as libc::socklen_t))
}

/// New `AF_UNIX` stream socket, close-on-exec.
pub(crate) fn unix_stream_socket() -> Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(LoopError::last_os_error());
    }
    // SAFETY: fresh descriptor from socket().
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub struct UnixSocketListener {
    fd: OwnedFd,
    path: String,
    is_abstract: bool,
    config: SocketConfig,
}

impl UnixSocketListener {
    /// Bind `path` and listen, using the environment's `SocketConfig`.
    pub fn create(path: &str, is_abstract: bool) -> Result<Self> {
        Self::with_config(path, is_abstract, SocketConfig::from_env())
    }

    /// Bind `path` and listen. Accepted connections inherit `config`.
    pub fn with_config(path: &str, is_abstract: bool, config: SocketConfig) -> Result<Self> {
        let (addr, len) = unix_addr(path, is_abstract)?;
        let fd = unix_stream_socket()?;

        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                len,
            )
        };
        if ret != 0 {
            let err = LoopError::last_os_error();
            kerror!("bind({}) failed: {}", path, err);
            return Err(err);
        }
        if unsafe { libc::listen(fd.as_raw_fd(), config.listen_backlog) } != 0 {
            let err = LoopError::last_os_error();
            kerror!("listen({}) failed: {}", path, err);
            return Err(err);
        }

        kdebug!(
            "listening on {}{} (fd {})",
            if is_abstract { "@" } else { "" },
            path,
            fd.as_raw_fd()
        );
        Ok(Self {
            fd,
            path: path.to_owned(),
            is_abstract,
            config,
        })
    }

    /// Accept one pending connection.
    ///
    /// Blocks unless the fd was registered with a reactor, which makes it
    /// non-blocking; then `Err(LoopError::Os(EAGAIN))` means nothing is
    /// pending.
    pub fn accept_connection(&self) -> Result<UnixSocketConnection> {
        loop {
            let fd = unsafe {
                libc::accept4(
                    self.fd.as_raw_fd(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    libc::SOCK_CLOEXEC,
                )
            };
            if fd >= 0 {
                kdebug!("accepted fd {} on {}", fd, self.path);
                // SAFETY: fresh descriptor from accept4().
                let fd = unsafe { OwnedFd::from_raw_fd(fd) };
                return Ok(UnixSocketConnection::from_fd(fd, &self.config));
            }
            match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(LoopError::Os(errno)),
            }
        }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }
}

impl std::fmt::Debug for UnixSocketListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixSocketListener")
            .field("fd", &self.fd.as_raw_fd())
            .field("path", &self.path)
            .field("is_abstract", &self.is_abstract)
            .finish()
    }
}
