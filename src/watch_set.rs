use std::collections::{BTreeMap, HashMap};

use crate::internal_prelude::*;

use crate::watch::Watch;

/// Identity of a kqueue-level watch: one per file, however many names it has.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct WatchKey {
    pub dev: u64,
    pub inode: u64,
}

/// The set of kqueue-level watches owned by one worker, keyed by `(device, inode)`.
///
/// A secondary index by file descriptor resolves delivered kevents (whose `ident` is the fd)
/// back to the watch they fired on.
#[derive(Debug, Default)]
pub(crate) struct WatchSet {
    watches: BTreeMap<WatchKey, Watch>,
    by_fd: HashMap<RawFd, WatchKey>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: WatchKey) -> Option<&Watch> {
        self.watches.get(&key)
    }

    pub fn get_mut(&mut self, key: WatchKey) -> Option<&mut Watch> {
        self.watches.get_mut(&key)
    }

    pub fn insert(&mut self, w: Watch) {
        let key = WatchKey {
            dev: w.dev,
            inode: w.inode,
        };
        debug_assert!(!self.watches.contains_key(&key));

        self.by_fd.insert(w.fd(), key);
        self.watches.insert(key, w);
    }

    /// Remove (and drop, closing its descriptor) the watch under `key`.
    pub fn remove(&mut self, key: WatchKey) -> Option<Watch> {
        let w = self.watches.remove(&key)?;
        self.by_fd.remove(&w.fd());
        Some(w)
    }

    pub fn key_for_fd(&self, fd: RawFd) -> Option<WatchKey> {
        self.by_fd.get(&fd).copied()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcntl::OFlag;

    fn open_dot() -> crate::FileDesc {
        crate::fcntl::openat(libc::AT_FDCWD, ".", OFlag::O_RDONLY | OFlag::O_DIRECTORY).unwrap()
    }

    #[test]
    fn test_insert_find_remove() {
        let mut ws = WatchSet::new();
        let fdesc = open_dot();
        let fd = fdesc.fd();

        ws.insert(Watch::new(fdesc, 1, 2));
        let key = WatchKey { dev: 1, inode: 2 };

        assert_eq!(ws.len(), 1);
        assert!(ws.get(key).is_some());
        assert_eq!(ws.key_for_fd(fd), Some(key));
        assert_eq!(ws.key_for_fd(fd + 1), None);
        assert!(ws.get(WatchKey { dev: 1, inode: 3 }).is_none());

        let w = ws.remove(key).unwrap();
        assert_eq!(ws.len(), 0);
        assert_eq!(ws.key_for_fd(fd), None);
        drop(w);
    }
}
