/// Parameter key for [`inotify_set_param()`](crate::inotify_set_param): size in bytes of the
/// instance's communication socket buffer.
///
/// This doubles as the recommended `read(2)` buffer size for event consumers; smaller client
/// buffers can cause partial event reads.
pub const IN_SOCKBUFSIZE: i32 = 0;

/// Parameter key for [`inotify_set_param()`](crate::inotify_set_param): the counterpart of
/// Linux's `/proc/sys/fs/inotify/max_queued_events`.
pub const IN_MAX_QUEUED_EVENTS: i32 = 1;

/// Default communication socket buffer size, in bytes.
pub const IN_DEF_SOCKBUFSIZE: usize = 4096;

/// Default limit on the number of queued events per instance.
pub const IN_DEF_MAX_QUEUED_EVENTS: usize = 16384;

bitflags::bitflags! {
    /// Flags to [`inotify_init1()`](crate::inotify_init1) or [`Inotify::new()`](crate::Inotify).
    pub struct InotifyFlags: libc::c_int {
        /// Set the `O_NONBLOCK` flag on the returned inotify file descriptor.
        const NONBLOCK = libc::O_NONBLOCK;
        /// Set the close-on-exec flag on the returned inotify file descriptor.
        const CLOEXEC = libc::O_CLOEXEC;
    }
}

bitflags::bitflags! {
    /// "Masks" identifying inotify events (and some other flags).
    ///
    /// These are passed to [`inotify_add_watch()`](crate::inotify_add_watch)/
    /// [`Inotify::add_watch()`](crate::Inotify::add_watch), and they are returned in the events
    /// yielded by an [`InotifyEventIter`](crate::InotifyEventIter).
    ///
    /// The numeric values match Linux's `<sys/inotify.h>`, so event streams produced by this
    /// crate can be consumed by code written against the Linux API.
    pub struct InotifyMask: u32 {
        /// The watched file (or a file in the watched directory) was accessed.
        const ACCESS = 0x0000_0001;
        /// The watched file (or a file in the watched directory) was modified.
        const MODIFY = 0x0000_0002;
        /// Metadata of the watched file/directory (or a file in the watched directory) was
        /// changed.
        const ATTRIB = 0x0000_0004;
        /// The watched file (or a file in the watched directory) was open for write access and
        /// was closed.
        const CLOSE_WRITE = 0x0000_0008;
        /// The watched file (or a file in the watched directory) was open for non-write access
        /// and was closed.
        const CLOSE_NOWRITE = 0x0000_0010;
        /// The watched file/directory (or a file in the watched directory) was opened.
        const OPEN = 0x0000_0020;
        /// A file in the watched directory is being renamed.
        const MOVED_FROM = 0x0000_0040;
        /// A file is being renamed into (or within) the watched directory.
        const MOVED_TO = 0x0000_0080;
        /// A file was created in the watched directory.
        const CREATE = 0x0000_0100;
        /// A file was deleted from the watched directory.
        const DELETE = 0x0000_0200;
        /// The watched file/directory was deleted.
        const DELETE_SELF = 0x0000_0400;
        /// The watched file/directory was moved.
        const MOVE_SELF = 0x0000_0800;

        /// An alias for all of the previously listed events.
        const ALL_EVENTS = 0x0000_0FFF;
        /// An alias for [`Self::MOVED_FROM`] | [`Self::MOVED_TO`].
        const MOVE = 0x0000_00C0;
        /// An alias for [`Self::CLOSE_WRITE`] | [`Self::CLOSE_NOWRITE`].
        const CLOSE = 0x0000_0018;

        /// When returned in an event, this means that the filesystem containing the watched
        /// object was unmounted. An [`Self::IGNORED`] event will follow.
        const UNMOUNT = 0x0000_2000;
        /// When returned in an event, this means that the event queue overflowed and some
        /// events may have been discarded. The watch descriptor of this event is -1.
        const Q_OVERFLOW = 0x0000_4000;
        /// When returned in an event, this means that the watch has been removed, either
        /// explicitly with [`inotify_rm_watch()`](crate::inotify_rm_watch) or implicitly
        /// because the file was deleted or its filesystem was unmounted.
        const IGNORED = 0x0000_8000;

        /// When passed to `add_watch`, only watch the path if it is a directory (fail with
        /// `ENOTDIR` otherwise).
        const ONLYDIR = 0x0100_0000;
        /// When passed to `add_watch`, don't dereference the path if it is a symbolic link.
        const DONT_FOLLOW = 0x0200_0000;
        /// When passed to `add_watch`, don't watch events for directory children that have been
        /// unlinked. Accepted for compatibility; this library does not change its behavior.
        const EXCL_UNLINK = 0x0400_0000;
        /// When passed to `add_watch`, add the given events to the watch mask instead of
        /// replacing it.
        const MASK_ADD = 0x2000_0000;
        /// When returned in an event, this means that the subject of the event is a directory.
        const ISDIR = 0x4000_0000;
        /// When passed to `add_watch`, remove the watch after one event has been generated.
        const ONESHOT = 0x8000_0000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!(
            InotifyMask::MOVE,
            InotifyMask::MOVED_FROM | InotifyMask::MOVED_TO
        );
        assert_eq!(
            InotifyMask::CLOSE,
            InotifyMask::CLOSE_WRITE | InotifyMask::CLOSE_NOWRITE
        );
        assert!(InotifyMask::ALL_EVENTS.contains(InotifyMask::MOVE_SELF));
        assert!(!InotifyMask::ALL_EVENTS.contains(InotifyMask::UNMOUNT));
    }
}
