use std::io::prelude::*;
use std::os::unix::prelude::*;

use crate::internal_prelude::*;

/// A helper struct that wraps a file descriptor and provides useful methods.
///
/// The file descriptor is automatically closed when the `FileDesc` struct is dropped.
#[derive(Debug)]
pub struct FileDesc(RawFd);

impl FileDesc {
    /// Create a new `FileDesc` wrapper around a raw file descriptor.
    ///
    /// # Safety
    ///
    /// The given file descriptor must be valid and not in use elsewhere.
    #[inline]
    pub const unsafe fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    /// Access the inner file descriptor.
    ///
    /// The file descriptor is only valid as long as this object is in scope. It should NOT be
    /// closed or "consumed" by other interfaces; use [`into_fd()`](#method.into_fd) if it is
    /// going to be used for those purposes.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.0
    }

    /// Take ownership of the inner file descriptor.
    ///
    /// After this method is called, the caller is responsible for closing the file descriptor.
    /// Failing to do so may result in resource leaks.
    #[inline]
    pub fn into_fd(self) -> RawFd {
        let fd = self.0;
        std::mem::forget(self);
        fd
    }

    /// Read data from the file descriptor into a buffer.
    #[inline]
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        crate::unistd::read(self.0, buf)
    }

    /// Write data into the file descriptor from a buffer.
    ///
    /// The number of bytes successfully written is returned.
    #[inline]
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        crate::unistd::write(self.0, buf)
    }

    /// Get the close-on-exec status of the given file descriptor.
    #[inline]
    pub fn get_cloexec(&self) -> Result<bool> {
        Ok(crate::fcntl::fcntl_getfd(self.0)? & libc::FD_CLOEXEC != 0)
    }

    /// Set the close-on-exec status of the given file descriptor.
    pub fn set_cloexec(&self, cloexec: bool) -> Result<()> {
        let mut flags = crate::fcntl::fcntl_getfd(self.0)?;

        if cloexec == (flags & libc::FD_CLOEXEC != 0) {
            return Ok(());
        }

        if cloexec {
            flags |= libc::FD_CLOEXEC;
        } else {
            flags &= !libc::FD_CLOEXEC;
        }

        crate::fcntl::fcntl_setfd(self.0, flags)
    }

    /// Get the non-blocking status of the given file descriptor.
    #[inline]
    pub fn get_nonblocking(&self) -> Result<bool> {
        Ok(crate::fcntl::fcntl_getfl(self.0)? & libc::O_NONBLOCK != 0)
    }

    /// Set the non-blocking status of the given file descriptor.
    pub fn set_nonblocking(&self, nonblock: bool) -> Result<()> {
        let mut flags = crate::fcntl::fcntl_getfl(self.0)?;

        if nonblock == (flags & libc::O_NONBLOCK != 0) {
            return Ok(());
        }

        if nonblock {
            flags |= libc::O_NONBLOCK;
        } else {
            flags &= !libc::O_NONBLOCK;
        }

        crate::fcntl::fcntl_setfl(self.0, flags)
    }
}

impl Drop for FileDesc {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

impl Read for FileDesc {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(crate::unistd::read(self.0, buf)?)
    }
}

impl Write for FileDesc {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(crate::unistd::write(self.0, buf)?)
    }

    #[inline]
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl FromRawFd for FileDesc {
    #[inline]
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self(fd)
    }
}

impl AsRawFd for FileDesc {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl IntoRawFd for FileDesc {
    #[inline]
    fn into_raw_fd(self) -> RawFd {
        self.into_fd()
    }
}
