use crate::internal_prelude::*;

use crate::consts::InotifyMask;
use crate::fcntl::OFlag;
use crate::kqueue::Kqueue;
use crate::stat::FileKind;

/// Convert an inotify watch mask to kqueue vnode filter flags.
///
/// The translation depends on the kind of the watched file and on whether this watch is acting
/// as the *parent* of an inotify watch (the watched object itself) or as a *child* (a file
/// inside a watched directory).
pub(crate) fn inotify_to_kqueue(mask: InotifyMask, kind: FileKind, is_parent: bool) -> u32 {
    let mut fflags = 0;

    if !(kind.is_file() || kind.is_dir() || kind.is_symlink()) {
        return fflags;
    }

    #[cfg(target_os = "freebsd")]
    {
        if mask.contains(InotifyMask::OPEN) {
            fflags |= libc::NOTE_OPEN;
        }
        if mask.contains(InotifyMask::CLOSE_NOWRITE) {
            fflags |= libc::NOTE_CLOSE;
        }
        if mask.contains(InotifyMask::CLOSE_WRITE) && kind.is_file() {
            fflags |= libc::NOTE_CLOSE_WRITE;
        }
        if mask.contains(InotifyMask::ACCESS) && (kind.is_file() || kind.is_dir()) {
            fflags |= libc::NOTE_READ;
        }
    }

    if mask.contains(InotifyMask::ATTRIB) {
        fflags |= libc::NOTE_ATTRIB;
    }
    if mask.contains(InotifyMask::MODIFY) && kind.is_file() {
        fflags |= libc::NOTE_WRITE;
    }

    if is_parent {
        if kind.is_dir() {
            // Directory content changes arrive as NOTE_WRITE (NOTE_EXTEND on some kernels) and
            // are expanded into per-child events by the directory differ.
            fflags |= libc::NOTE_WRITE | libc::NOTE_EXTEND;
        }
        if mask.contains(InotifyMask::ATTRIB) && kind.is_file() {
            fflags |= libc::NOTE_LINK;
        }
        if mask.contains(InotifyMask::MOVE_SELF) {
            fflags |= libc::NOTE_RENAME;
        }
        fflags |= libc::NOTE_DELETE | libc::NOTE_REVOKE;
    }

    fflags
}

/// Convert kqueue vnode filter flags to an inotify event mask.
///
/// `is_deleted` reports whether the file's link count has dropped to zero; an unlink that
/// leaves hardlinks behind is an attribute change, not a deletion.
pub(crate) fn kqueue_to_inotify(
    fflags: u32,
    kind: FileKind,
    is_parent: bool,
    is_deleted: bool,
) -> InotifyMask {
    let mut mask = InotifyMask::empty();

    #[cfg(target_os = "freebsd")]
    {
        if fflags & libc::NOTE_OPEN != 0 {
            mask |= InotifyMask::OPEN;
        }
        if fflags & libc::NOTE_CLOSE != 0 {
            mask |= InotifyMask::CLOSE_NOWRITE;
        }
        if fflags & libc::NOTE_CLOSE_WRITE != 0 {
            mask |= InotifyMask::CLOSE_WRITE;
        }
        if fflags & libc::NOTE_READ != 0 && (kind.is_file() || kind.is_dir()) {
            mask |= InotifyMask::ACCESS;
        }
    }

    if fflags & libc::NOTE_ATTRIB != 0
        || (fflags & (libc::NOTE_LINK | libc::NOTE_DELETE) != 0 && kind.is_file() && is_parent)
    {
        mask |= InotifyMask::ATTRIB;
    }

    if fflags & libc::NOTE_WRITE != 0 && kind.is_file() {
        mask |= InotifyMask::MODIFY;
    }

    if fflags & libc::NOTE_DELETE != 0 && is_parent && (is_deleted || !kind.is_file()) {
        mask |= InotifyMask::DELETE_SELF;
    }

    if fflags & libc::NOTE_RENAME != 0 && is_parent {
        mask |= InotifyMask::MOVE_SELF;
    }

    if fflags & libc::NOTE_REVOKE != 0 && is_parent {
        mask |= InotifyMask::UNMOUNT;
    }

    // Only parent watches decorate with ISDIR here; directory children get it per-event from
    // their dep item's kind.
    if mask.intersects(
        InotifyMask::ATTRIB | InotifyMask::OPEN | InotifyMask::ACCESS | InotifyMask::CLOSE,
    ) && kind.is_dir()
        && is_parent
    {
        mask |= InotifyMask::ISDIR;
    }

    mask
}

/// Open a file descriptor suitable for a kqueue vnode watch.
///
/// The descriptor is read-only, non-blocking, and close-on-exec (`O_EVTONLY` instead of
/// `O_RDONLY` on macOS, so the watch does not prevent unmounting). `DONT_FOLLOW` opens the
/// symlink itself where the platform can (`O_SYMLINK`), and refuses to follow it elsewhere;
/// `ONLYDIR` makes the open fail with `ENOTDIR` for non-directories.
pub(crate) fn watch_open(dirfd: RawFd, path: &CStr, mask: InotifyMask) -> Result<FileDesc> {
    #[cfg(apple)]
    let mut flags = OFlag::O_EVTONLY | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC;
    #[cfg(not(apple))]
    let mut flags = OFlag::O_RDONLY | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC;

    if mask.contains(InotifyMask::DONT_FOLLOW) {
        #[cfg(apple)]
        {
            flags |= OFlag::O_SYMLINK;
        }
        #[cfg(not(apple))]
        {
            flags |= OFlag::O_NOFOLLOW;
        }
    }

    if mask.contains(InotifyMask::ONLYDIR) {
        flags |= OFlag::O_DIRECTORY;
    }

    crate::fcntl::openat(dirfd, path, flags)
}

/// The link between a kqueue-level watch and the inotify watches interested in it: either the
/// watched object itself (`Parent`) or a named child of a watched directory.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Dep {
    Parent,
    Child { name: CString },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WatchDep {
    /// The owning inotify watch's descriptor.
    pub wd: i32,
    pub dep: Dep,
}

impl WatchDep {
    #[inline]
    pub fn is_parent(&self) -> bool {
        self.dep == Dep::Parent
    }
}

/// A single kqueue vnode watch, shared by every inotify watch that cares about the file.
///
/// Owns the open file descriptor; registration in the kernel always matches the union of the
/// filter flags its dependents need.
#[derive(Debug)]
pub(crate) struct Watch {
    fd: FileDesc,
    /// Inode as seen by `readdir` in the parent directory; differs from `fstat`'s inode at
    /// mount points.
    pub inode: u64,
    pub dev: u64,
    /// Currently registered kqueue filter flags.
    fflags: u32,
    /// Mask events caused by the differ's own directory scan on the next delivery.
    pub skip_next: bool,
    pub deps: Vec<WatchDep>,
}

impl Watch {
    pub fn new(fd: FileDesc, dev: u64, inode: u64) -> Self {
        Self {
            fd,
            inode,
            dev,
            fflags: 0,
            skip_next: false,
            deps: Vec::new(),
        }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd.fd()
    }

    /// Register this watch's vnode filter with the given flags.
    ///
    /// Re-registering the currently registered flags is a no-op; kqueue replaces the filter
    /// flags of an existing `EV_ADD`ed event, so a changed union costs exactly one syscall.
    pub fn register(&mut self, kq: &Kqueue, fflags: u32) -> Result<()> {
        if fflags == self.fflags {
            return Ok(());
        }

        kq.register_vnode(self.fd(), fflags)?;
        self.fflags = fflags;
        Ok(())
    }

    pub fn find_dep(&self, wd: i32, dep: &Dep) -> Option<usize> {
        self.deps.iter().position(|d| d.wd == wd && d.dep == *dep)
    }

    pub fn parent_dep(&self) -> Option<&WatchDep> {
        self.deps.iter().find(|d| d.is_parent())
    }
}
