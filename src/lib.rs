//! Linux inotify API emulation on top of kqueue(2).
//!
//! A client opens an instance with [`inotify_init1()`], adds named-path watches with
//! [`inotify_add_watch()`], and reads a stream of fixed-layout event records from the returned
//! file descriptor, with the identity, ordering, coalescing, rename-cookie, and overflow
//! semantics a Linux inotify consumer expects. Underneath, each instance is a dedicated worker
//! thread translating `EVFILT_VNODE` activity (which only speaks open-file-descriptors, not
//! paths or directory children) into inotify records, rescanning watched directories to
//! recover per-child `CREATE`/`DELETE`/`MOVED_FROM`/`MOVED_TO` events by diffing listings.
//!
//! ## File descriptor handling
//!
//! The descriptor returned by [`inotify_init1()`] is one end of a socket pair; closing it is
//! how an instance is destroyed. Reads never split an event record: a read returns whole
//! records up to a record boundary, so use a buffer of at least [`INOTIFY_MIN_BUFSIZE`] bytes.
//!
//! ## Scope
//!
//! Watches are not recursive (watch each directory explicitly), do not follow symlinks when
//! [`InotifyMask::DONT_FOLLOW`] is given, and do not cross mount boundaries.

mod internal_prelude {
    pub(crate) use crate::errno::errno_get;
    pub(crate) use crate::fdesc::FileDesc;
    pub(crate) use crate::{AsPath, Error, Result};

    pub(crate) use std::ffi::{CStr, CString, OsStr, OsString};
    pub(crate) use std::os::unix::ffi::OsStrExt;
    pub(crate) use std::os::unix::io::RawFd;
}

mod as_path;
mod err;
mod errno;
mod fdesc;

pub use as_path::AsPath;
pub use err::{Error, Result};
pub use errno::{errno_get, errno_set};
pub use fdesc::FileDesc;

mod dirent;
mod fcntl;
mod kqueue;
mod socket;
mod stat;
mod uio;
mod unistd;

mod consts;
mod dep_list;
mod event;
mod event_queue;
mod inotify;
mod inotify_watch;
mod instance;
mod watch;
mod watch_set;
mod worker;

pub use consts::{
    InotifyFlags, InotifyMask, IN_DEF_MAX_QUEUED_EVENTS, IN_DEF_SOCKBUFSIZE,
    IN_MAX_QUEUED_EVENTS, IN_SOCKBUFSIZE,
};
pub use event::{InotifyEvent, InotifyEventIter, INOTIFY_MIN_BUFSIZE};
pub use inotify::{
    inotify_add_watch, inotify_init, inotify_init1, inotify_rm_watch, inotify_set_param, Inotify,
};

/// A collection of functions that return `&'static CStr`s for commonly used paths.
pub(crate) mod c_paths {
    use std::ffi::CStr;

    /// Return an `&'static CStr` containing a single dot (`.`).
    #[inline]
    pub fn dot() -> &'static CStr {
        unsafe { CStr::from_bytes_with_nul_unchecked(b".\0") }
    }
}
