use crate::internal_prelude::*;

use std::ptr::NonNull;

use crate::fcntl::OFlag;
use crate::stat::FileKind;

/// A directory stream open for iterating over the entries in a directory.
///
/// Note that this iterator will yield entries for `.` and `..` if they are returned by the OS.
/// This behavior is intentional and will not be changed.
#[derive(Debug)]
pub(crate) struct Dir(NonNull<libc::DIR>);

impl Dir {
    /// Create a new directory stream for the directory referred to by the open file descriptor
    /// `fd`.
    ///
    /// # Safety
    ///
    /// `fd` must refer to a directory, and it will be consumed by the new directory stream.
    #[inline]
    pub unsafe fn fdopen(fd: RawFd) -> Result<Self> {
        match NonNull::new(libc::fdopendir(fd)) {
            Some(dir) => Ok(Self(dir)),
            None => Err(Error::last()),
        }
    }

    /// Open a fresh directory stream for the directory referred to by `dirfd`, without consuming
    /// `dirfd`.
    ///
    /// The watch layer holds one long-lived descriptor per watched directory; every rescan
    /// re-opens it via `openat(dirfd, ".")` so the stream starts at the beginning and the
    /// original descriptor's state is untouched.
    pub fn reopen(dirfd: RawFd) -> Result<Self> {
        let fd = crate::fcntl::openat(
            dirfd,
            crate::c_paths::dot(),
            OFlag::O_RDONLY | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC,
        )?;

        let dir = unsafe { Self::fdopen(fd.fd())? };
        fd.into_fd();
        Ok(dir)
    }
}

impl Iterator for Dir {
    type Item = Result<Dirent>;

    #[inline]
    fn next(&mut self) -> Option<Result<Dirent>> {
        unsafe {
            crate::errno::errno_set(0);

            let entry = libc::readdir(self.0.as_ptr());

            if entry.is_null() {
                return match crate::errno::errno_get() {
                    0 => None,
                    eno => Some(Err(Error::from_code(eno))),
                };
            }

            Some(Ok(Dirent::new(entry)))
        }
    }
}

impl Drop for Dir {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            libc::closedir(self.0.as_ptr());
        }
    }
}

/// An entry yielded by iterating over a `Dir`.
#[derive(Clone, Debug)]
pub(crate) struct Dirent {
    entry: libc::dirent,
}

impl Dirent {
    #[inline]
    unsafe fn new(raw_entry: *const libc::dirent) -> Self {
        macro_rules! field_ptr {
            ($sptr:expr , $stype:path ; $fname:ident , $ftype:ty) => {{
                (($sptr) as *const u8).add(memoffset::offset_of!($stype, $fname)) as *const $ftype
            }};
        }

        cfg_if::cfg_if! {
            if #[cfg(target_os = "dragonfly")] {
                // DragonFlyBSD doesn't have `d_reclen`, so we have to use
                // `offsetof(dirent, d_name) + d_namlen + 1`.
                let namlen = *field_ptr!(raw_entry, libc::dirent; d_namlen, u16);

                let reclen = memoffset::offset_of!(libc::dirent, d_name) as u16 + namlen + 1;
            } else {
                // Get the value of `d_reclen` without dereferencing `raw_entry` or constructing
                // a reference; only part of `d_name` might be addressable.
                let reclen = *field_ptr!(raw_entry, libc::dirent; d_reclen, u16);
            }
        }

        // There should be enough space for all the fields before `d_name`, plus 2 bytes for at
        // least one character of the name and a terminating NUL
        debug_assert!(reclen as usize >= memoffset::offset_of!(libc::dirent, d_name) + 2);
        debug_assert!(reclen as usize <= std::mem::size_of::<libc::dirent>());

        // Now only copy out the first `reclen` bytes of the entry
        let mut entry = std::mem::MaybeUninit::<libc::dirent>::uninit();
        std::ptr::copy_nonoverlapping(
            raw_entry as *const u8,
            entry.as_mut_ptr() as *mut u8,
            reclen as usize,
        );
        let entry = entry.assume_init();

        debug_assert_eq!(libc::strlen(entry.d_name.as_ptr()), entry.d_namlen as usize);

        Self { entry }
    }

    #[inline]
    fn namelen(&self) -> usize {
        self.entry.d_namlen as usize
    }

    /// Get the name of this entry as a `CStr`.
    #[inline]
    pub fn name_cstr(&self) -> &CStr {
        // SAFETY: d_namlen is set by the kernel to strlen(d_name)
        unsafe {
            CStr::from_bytes_with_nul_unchecked(cvt_char_buf(
                &self.entry.d_name[..self.namelen() + 1],
            ))
        }
    }

    /// Get this entry's inode.
    ///
    /// Note: If this entry refers to a mountpoint, this is the inode of the *underlying
    /// directory* on which the filesystem is mounted, which may not match the inode obtained by
    /// `stat()`ing this file. The watch layer keys mountpoints by exactly this number.
    #[inline]
    pub fn ino(&self) -> u64 {
        #[cfg(any(freebsdlike, netbsdlike))]
        let ino = self.entry.d_fileno;
        #[cfg(apple)]
        let ino = self.entry.d_ino;

        ino as u64
    }

    /// Get the kind of the file referred to by this entry, without making any syscalls.
    ///
    /// The OS is allowed to report `DT_UNKNOWN` at any time, in which case this returns
    /// `FileKind::UNKNOWN`.
    #[inline]
    pub fn file_kind(&self) -> FileKind {
        if self.entry.d_type == libc::DT_UNKNOWN {
            FileKind::UNKNOWN
        } else {
            // DTTOIF()
            FileKind::from_mode((self.entry.d_type as u32) << 12)
        }
    }
}

#[inline]
fn cvt_char_buf(buf: &[libc::c_char]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, buf.len()) }
}
