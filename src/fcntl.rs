use crate::internal_prelude::*;

bitflags::bitflags! {
    /// Flags to `open()`/`openat()`.
    pub struct OFlag: libc::c_int {
        const O_RDONLY = libc::O_RDONLY;
        const O_NONBLOCK = libc::O_NONBLOCK;
        const O_CLOEXEC = libc::O_CLOEXEC;
        const O_NOFOLLOW = libc::O_NOFOLLOW;
        const O_DIRECTORY = libc::O_DIRECTORY;
        /// Open for event notifications only; does not block unmounts (macOS/iOS).
        #[cfg(apple)]
        const O_EVTONLY = libc::O_EVTONLY;
        /// Open the symlink itself instead of the file it points to (macOS/iOS).
        #[cfg(apple)]
        const O_SYMLINK = libc::O_SYMLINK;
    }
}

/// Open the file at `path`, relative to `dirfd` if `path` is not absolute.
#[inline]
pub fn openat<P: AsPath>(dirfd: RawFd, path: P, flags: OFlag) -> Result<FileDesc> {
    path.with_cstr(|path| unsafe {
        Error::unpack_fdesc(libc::openat(dirfd, path.as_ptr(), flags.bits()))
    })
}

#[inline]
pub fn fcntl_getfd(fd: RawFd) -> Result<libc::c_int> {
    Error::unpack(unsafe { libc::fcntl(fd, libc::F_GETFD) })
}

#[inline]
pub fn fcntl_setfd(fd: RawFd, flags: libc::c_int) -> Result<()> {
    Error::unpack(unsafe { libc::fcntl(fd, libc::F_SETFD, flags) }).map(|_| ())
}

#[inline]
pub fn fcntl_getfl(fd: RawFd) -> Result<libc::c_int> {
    Error::unpack(unsafe { libc::fcntl(fd, libc::F_GETFL) })
}

#[inline]
pub fn fcntl_setfl(fd: RawFd, flags: libc::c_int) -> Result<()> {
    Error::unpack(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) }).map(|_| ())
}

/// Check whether the given file descriptor number currently refers to an open file.
///
/// This is the probe the dispatch layer uses to distinguish `EBADF` (stale descriptor) from
/// `EINVAL` (open descriptor that is not an inotify instance).
#[inline]
pub(crate) fn is_fd_valid(fd: RawFd) -> bool {
    fcntl_getfl(fd).is_ok()
}
