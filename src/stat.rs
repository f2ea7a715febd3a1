use std::fmt;

use crate::internal_prelude::*;

/// Represents the file type mask from a `Stat` structure (or a `dirent`'s `d_type`).
///
/// A zero mask means the file type is not known; `readdir()` is allowed to report `DT_UNKNOWN`,
/// and the watch layer carries that state until an `fstat()` resolves it.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct FileKind {
    pub mask: u32,
}

impl FileKind {
    pub const UNKNOWN: Self = Self { mask: 0 };

    #[inline]
    pub fn from_mode(mode: u32) -> Self {
        Self {
            mask: mode & libc::S_IFMT as u32,
        }
    }

    #[inline]
    pub fn is_unknown(&self) -> bool {
        self.mask == 0
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.mask == libc::S_IFDIR as u32
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.mask == libc::S_IFREG as u32
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.mask == libc::S_IFLNK as u32
    }
}

impl fmt::Debug for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = if self.is_dir() {
            "Directory"
        } else if self.is_file() {
            "File"
        } else if self.is_symlink() {
            "Symlink"
        } else if self.is_unknown() {
            "Unknown"
        } else {
            "Other"
        };

        f.write_str(s)
    }
}

bitflags::bitflags! {
    /// Flags to `fstatat()`.
    pub struct AtFlag: libc::c_int {
        const AT_SYMLINK_NOFOLLOW = libc::AT_SYMLINK_NOFOLLOW;
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Stat(libc::stat);

impl Stat {
    /// Get the device ID of the device containing this file.
    #[inline]
    pub fn dev(&self) -> u64 {
        self.0.st_dev as u64
    }

    /// Get this file's inode number.
    #[inline]
    pub fn ino(&self) -> u64 {
        self.0.st_ino as u64
    }

    /// Get this file's mode (file type and access bits).
    #[inline]
    pub fn mode(&self) -> u32 {
        self.0.st_mode as u32
    }

    /// Get the number of hardlinks to this file.
    #[inline]
    pub fn nlink(&self) -> u64 {
        self.0.st_nlink as u64
    }

    /// Get the file type information associated with this `Stat` structure.
    #[inline]
    pub fn file_kind(&self) -> FileKind {
        FileKind::from_mode(self.mode())
    }
}

/// Retrieve information about the file referred to by the given file descriptor.
#[inline]
pub fn fstat(fd: RawFd) -> Result<Stat> {
    let mut buf = std::mem::MaybeUninit::uninit();
    Error::unpack_nz(unsafe { libc::fstat(fd, buf.as_mut_ptr()) })?;
    Ok(Stat(unsafe { buf.assume_init() }))
}

/// Retrieve information about the file at `path`, relative to `dirfd` if it is not absolute.
#[inline]
pub fn fstatat<P: AsPath>(dirfd: RawFd, path: P, flags: AtFlag) -> Result<Stat> {
    path.with_cstr(|path| {
        let mut buf = std::mem::MaybeUninit::uninit();
        Error::unpack_nz(unsafe {
            libc::fstatat(dirfd, path.as_ptr(), buf.as_mut_ptr(), flags.bits())
        })?;
        Ok(Stat(unsafe { buf.assume_init() }))
    })
}

/// Retrieve information about the file at `path` without following a trailing symlink.
#[inline]
pub fn lstat<P: AsPath>(path: P) -> Result<Stat> {
    fstatat(libc::AT_FDCWD, path, AtFlag::AT_SYMLINK_NOFOLLOW)
}
