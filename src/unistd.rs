use crate::internal_prelude::*;

/// Read data from the given file descriptor into the given buffer.
#[inline]
pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    Error::unpack_size(unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) })
}

/// Write data to the given file descriptor from the given buffer.
#[inline]
pub fn write(fd: RawFd, buf: &[u8]) -> Result<usize> {
    Error::unpack_size(unsafe { libc::write(fd, buf.as_ptr() as *const _, buf.len()) })
}
