use std::fmt;

use crate::internal_prelude::*;

pub type Result<T> = std::result::Result<T, Error>;

/// Represents an OS error encountered when performing an operation.
///
/// The contained code is an `errno` value; the error kinds surfaced by this
/// crate's public operations (`EBADF`, `EINVAL`, `ENOENT`, `ENOTDIR`,
/// `EACCES`, `ENOMEM`, `EMFILE`) match what a Linux inotify client expects.
#[derive(Clone, Eq, PartialEq)]
pub struct Error(i32);

impl Error {
    /// If `res` is -1, return the last OS error. Otherwise return `Ok(res)`.
    #[inline]
    pub(crate) fn unpack(res: i32) -> Result<i32> {
        if res == -1 {
            Err(Self::last())
        } else {
            Ok(res)
        }
    }

    /// If `res` is -1, return the last OS error. Otherwise return `Ok(res)`.
    #[inline]
    pub(crate) fn unpack_size(res: isize) -> Result<usize> {
        if res == -1 {
            Err(Self::last())
        } else {
            Ok(res as usize)
        }
    }

    /// If `res` is non-zero, return the last OS error. Otherwise return `Ok(())`.
    #[inline]
    pub(crate) fn unpack_nz(res: i32) -> Result<()> {
        if res != 0 {
            Err(Self::last())
        } else {
            Ok(())
        }
    }

    /// If `res` is -1, return the last OS error. Otherwise wrap it in a `FileDesc`.
    ///
    /// # Safety
    ///
    /// If `res` is not -1, it must be a valid file descriptor that is not in use elsewhere.
    #[inline]
    pub(crate) unsafe fn unpack_fdesc(res: i32) -> Result<FileDesc> {
        if res == -1 {
            Err(Self::last())
        } else {
            Ok(FileDesc::new(res))
        }
    }

    #[inline]
    pub(crate) const fn mid_nul() -> Self {
        Self(libc::EINVAL)
    }

    /// Get the last OS error that occured (i.e. the current `errno` value).
    #[inline]
    pub fn last() -> Self {
        Self(errno_get())
    }

    /// Construct an `Error` from an `errno` code.
    #[inline]
    pub fn from_code(eno: i32) -> Self {
        Self(eno)
    }

    /// Get the `errno` code represented by this `Error` object.
    #[inline]
    pub fn code(&self) -> i32 {
        self.0
    }

    pub(crate) fn strerror(&self) -> &'static str {
        // For invalid error numbers (negative, 0, or out of range) most libcs format an
        // "Unknown error %d" message into allocated storage, which can't be 'static.

        static UNKNOWN_ERROR: &str = "Unknown error";

        use std::cmp::Ordering;
        match self.0.cmp(&0) {
            Ordering::Less => return UNKNOWN_ERROR,
            Ordering::Equal => return "Success",
            _ => (),
        }

        let ptr = unsafe { libc::strerror(self.0) };
        debug_assert!(!ptr.is_null());

        let msg = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap();

        if msg.starts_with(UNKNOWN_ERROR) {
            return UNKNOWN_ERROR;
        }

        msg
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.strerror())?;
        write!(f, " (code {})", self.0)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Error")
            .field("code", &self.0)
            .field("message", &self.strerror())
            .finish()
    }
}

impl std::error::Error for Error {}

impl From<Error> for std::io::Error {
    #[inline]
    fn from(e: Error) -> Self {
        Self::from_raw_os_error(e.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno::errno_set;

    #[test]
    fn test_code() {
        assert_eq!(Error::from_code(libc::EPERM).code(), libc::EPERM);
        assert_eq!(Error::from_code(libc::ENOENT).code(), libc::ENOENT);
    }

    #[test]
    fn test_last() {
        errno_set(libc::EPERM);
        assert_eq!(Error::last().code(), libc::EPERM);

        errno_set(libc::ENOENT);
        assert_eq!(Error::last().code(), libc::ENOENT);
    }

    #[test]
    fn test_unpack() {
        errno_set(libc::ENOENT);

        assert_eq!(Error::unpack(0), Ok(0));
        assert_eq!(Error::unpack_size(0), Ok(0));
        assert_eq!(Error::unpack_nz(0), Ok(()));
        assert_eq!(Error::unpack(-1), Err(Error::from_code(libc::ENOENT)));
        assert_eq!(Error::unpack_size(-1), Err(Error::from_code(libc::ENOENT)));
        assert_eq!(Error::unpack_nz(-1), Err(Error::from_code(libc::ENOENT)));
    }

    #[test]
    fn test_strerror() {
        assert_eq!(Error::from_code(libc::EISDIR).strerror(), "Is a directory");

        assert_eq!(Error::from_code(-1).strerror(), "Unknown error");
        assert_eq!(Error::from_code(0).strerror(), "Success");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::from_code(libc::EISDIR).to_string(),
            format!("Is a directory (code {})", libc::EISDIR)
        );
    }

    #[test]
    fn test_from_error() {
        assert_eq!(
            std::io::Error::from(Error::from_code(libc::ENOENT)).raw_os_error(),
            Some(libc::ENOENT)
        );
    }
}
