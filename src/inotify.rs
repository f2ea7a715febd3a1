use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};

use crate::internal_prelude::*;

use crate::consts::{InotifyFlags, InotifyMask};
use crate::event::InotifyEventIter;
use crate::instance;
use crate::worker::Command;

/// Create a new inotify instance.
///
/// This starts a dedicated worker (thread plus kqueue) behind the returned file descriptor.
/// To destroy the instance, just close the descriptor; the worker notices and drains itself.
#[inline]
pub fn inotify_init() -> Result<FileDesc> {
    inotify_init1(InotifyFlags::empty())
}

/// Create a new inotify instance, specifying flags on the returned file descriptor.
#[inline]
pub fn inotify_init1(flags: InotifyFlags) -> Result<FileDesc> {
    instance::create(flags)
}

/// Add a watch for the file specified by `path`, according to the flags in `mask`, to the
/// inotify instance specified by `fd`.
///
/// On success, a watch descriptor is returned. Adding a watch for a path that resolves to an
/// already-watched file (a hardlink, or a symlink to it) returns the existing descriptor with
/// its mask updated (merged if `mask` contains [`InotifyMask::MASK_ADD`], replaced otherwise).
pub fn inotify_add_watch<P: AsPath>(fd: RawFd, path: P, mask: InotifyMask) -> Result<i32> {
    if !crate::fcntl::is_fd_valid(fd) {
        return Err(Error::from_code(libc::EBADF));
    }

    path.with_cstr(|path| {
        // Probe the path up front: reports ENOENT/EACCES without a round-trip to the worker,
        // and keeps obviously bad paths out of it entirely
        crate::stat::lstat(path)?;

        if mask.is_empty() {
            return Err(Error::from_code(libc::EINVAL));
        }

        instance::execute(
            fd,
            Command::Add {
                path: path.to_owned(),
                mask,
            },
        )
    })
}

/// Remove the watch specified by the given watch descriptor.
///
/// Exactly one [`InotifyMask::IGNORED`] record is queued for the watch, after which no further
/// records carry its descriptor.
pub fn inotify_rm_watch(fd: RawFd, wd: i32) -> Result<()> {
    if wd < 0 {
        return Err(Error::from_code(libc::EINVAL));
    }

    if !crate::fcntl::is_fd_valid(fd) {
        return Err(Error::from_code(libc::EBADF));
    }

    instance::execute(fd, Command::Remove { wd }).map(|_| ())
}

/// Tune a per-instance parameter: [`IN_SOCKBUFSIZE`](crate::IN_SOCKBUFSIZE) or
/// [`IN_MAX_QUEUED_EVENTS`](crate::IN_MAX_QUEUED_EVENTS).
pub fn inotify_set_param(fd: RawFd, param: i32, value: isize) -> Result<()> {
    if !crate::fcntl::is_fd_valid(fd) {
        return Err(Error::from_code(libc::EBADF));
    }

    instance::execute(fd, Command::SetParam { param, value }).map(|_| ())
}

/// A wrapper around an inotify instance descriptor.
///
/// Dropping it closes the descriptor, which tears the instance down.
#[derive(Debug)]
pub struct Inotify(FileDesc);

impl Inotify {
    /// Create a new inotify instance with the specified flags.
    #[inline]
    pub fn new(flags: InotifyFlags) -> Result<Self> {
        inotify_init1(flags).map(Self)
    }

    /// See [`inotify_add_watch()`].
    #[inline]
    pub fn add_watch<P: AsPath>(&self, path: P, mask: InotifyMask) -> Result<i32> {
        inotify_add_watch(self.fd(), path, mask)
    }

    /// See [`inotify_rm_watch()`].
    #[inline]
    pub fn rm_watch(&self, wd: i32) -> Result<()> {
        inotify_rm_watch(self.fd(), wd)
    }

    /// See [`inotify_set_param()`].
    #[inline]
    pub fn set_param(&self, param: i32, value: isize) -> Result<()> {
        inotify_set_param(self.fd(), param, value)
    }

    /// Read one or more events from this inotify instance into the given buffer, and return an
    /// iterator over the events.
    ///
    /// `buf` should be at least [`INOTIFY_MIN_BUFSIZE`](crate::INOTIFY_MIN_BUFSIZE) bytes long
    /// to ensure that at least one event can be read.
    #[inline]
    pub fn read_events<'a>(&self, buf: &'a mut [u8]) -> Result<InotifyEventIter<'a>> {
        unsafe { InotifyEventIter::read_from(self.fd(), buf) }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.0.fd()
    }

    #[inline]
    pub fn into_fd(self) -> RawFd {
        self.0.into_fd()
    }

    /// Create a new `Inotify` wrapper around the given instance file descriptor.
    ///
    /// # Safety
    ///
    /// The given file descriptor must refer to an instance created by [`inotify_init1()`], and
    /// it must not be in use by other code.
    #[inline]
    pub unsafe fn from_fd(fd: RawFd) -> Self {
        Self(FileDesc::new(fd))
    }
}

impl AsRawFd for Inotify {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

impl IntoRawFd for Inotify {
    #[inline]
    fn into_raw_fd(self) -> RawFd {
        self.into_fd()
    }
}

impl FromRawFd for Inotify {
    #[inline]
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self::from_fd(fd)
    }
}
