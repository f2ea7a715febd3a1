use crate::internal_prelude::*;

use crate::uio::{as_raw_iovecs, IoVec};

/// One end of a connected AF_UNIX stream socket pair.
///
/// Each instance's worker holds one end; the other end is handed to the client as the inotify
/// file descriptor. Event records flow worker -> client; on platforms without a kqueue user
/// event filter, a one-byte command doorbell flows client -> worker.
#[derive(Debug)]
pub(crate) struct Socket(FileDesc);

impl Socket {
    /// Create an unbound pair of connected stream sockets.
    ///
    /// See `socketpair(2)` for more information.
    pub fn pair() -> Result<(Self, Self)> {
        unsafe {
            let mut fds = [0; 2];
            Error::unpack_nz(libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_STREAM,
                0,
                fds.as_mut_ptr(),
            ))?;

            Ok((Self(FileDesc::new(fds[0])), Self(FileDesc::new(fds[1]))))
        }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.0.fd()
    }

    #[inline]
    pub fn fdesc(&self) -> &FileDesc {
        &self.0
    }

    #[inline]
    pub fn into_fdesc(self) -> FileDesc {
        self.0
    }

    /// Suppress SIGPIPE on writes to this socket, where the platform supports doing so at the
    /// socket level. Elsewhere `MSG_NOSIGNAL` is passed per send instead.
    pub fn set_nosigpipe(&self) -> Result<()> {
        #[cfg(any(apple, freebsdlike, target_os = "netbsd"))]
        {
            let on: libc::c_int = 1;
            Error::unpack_nz(unsafe {
                libc::setsockopt(
                    self.fd(),
                    libc::SOL_SOCKET,
                    libc::SO_NOSIGPIPE,
                    &on as *const _ as *const _,
                    std::mem::size_of::<libc::c_int>() as _,
                )
            })?;
        }

        Ok(())
    }

    /// Set the size of this socket's send buffer (`SO_SNDBUF`).
    pub fn set_send_buffer_size(&self, size: usize) -> Result<()> {
        let size = size as libc::c_int;
        Error::unpack_nz(unsafe {
            libc::setsockopt(
                self.fd(),
                libc::SOL_SOCKET,
                libc::SO_SNDBUF,
                &size as *const _ as *const _,
                std::mem::size_of::<libc::c_int>() as _,
            )
        })
    }

    /// Send the given buffers with one `sendmsg(2)` call.
    ///
    /// The number of bytes sent is returned; SIGPIPE is suppressed.
    pub fn send_vectored(&self, iovs: &[IoVec]) -> Result<usize> {
        let raw = as_raw_iovecs(iovs);

        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = raw.as_ptr() as *mut _;
        msg.msg_iovlen = raw.len() as _;

        #[cfg(not(apple))]
        let flags = libc::MSG_NOSIGNAL;
        #[cfg(apple)]
        let flags = 0;

        Error::unpack_size(unsafe { libc::sendmsg(self.fd(), &msg, flags) })
    }
}

/// How many bytes are buffered for reading on the given socket descriptor.
///
/// The event queue peeks at the *client* end of an instance's socket pair with this to decide
/// whether the previously sent record is still unread (and a duplicate can be dropped).
pub(crate) fn pending_input(fd: RawFd) -> Result<usize> {
    let mut buffered: libc::c_int = 0;
    Error::unpack_nz(unsafe { libc::ioctl(fd, libc::FIONREAD, &mut buffered) })?;
    Ok(buffered as usize)
}
