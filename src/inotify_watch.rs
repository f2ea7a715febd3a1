use std::collections::BTreeMap;

use crate::internal_prelude::*;

use crate::consts::InotifyMask;
use crate::dep_list::{self, DepItem, DepList};
use crate::kqueue::Kqueue;
use crate::stat::{fstatat, AtFlag, FileKind, Stat};
use crate::watch::{inotify_to_kqueue, watch_open, Dep, Watch, WatchDep};
use crate::watch_set::{WatchKey, WatchSet};

/// One client-visible watch: the unit of subscription created by `inotify_add_watch()`.
#[derive(Debug)]
pub(crate) struct IWatch {
    pub wd: i32,
    /// The parent kqueue watch's file descriptor (owned by that watch).
    pub fd: RawFd,
    pub flags: InotifyMask,
    pub kind: FileKind,
    pub inode: u64,
    pub dev: u64,
    /// Set when the watch has been stopped (oneshot fired, file deleted, `rm_watch`) but its
    /// `IGNORED` record may not have been consumed yet; suppresses further events.
    pub closed: bool,
    /// Children of the watched directory as of the last scan; empty for non-directories.
    pub deps: DepList,
}

impl IWatch {
    #[inline]
    pub fn parent_key(&self) -> WatchKey {
        WatchKey {
            dev: self.dev,
            inode: self.inode,
        }
    }
}

/// The watch-table slice of a worker's state, threaded through the watch-management routines.
///
/// All three structures are touched only from the worker thread; addressing watches by key and
/// inotify watches by descriptor (instead of holding references across mutations) is what lets
/// the cyclic Watch <-> InotifyWatch relationship live in owned collections.
pub(crate) struct WatchCtx<'a> {
    pub kq: &'a Kqueue,
    pub watches: &'a mut WatchSet,
    pub iwatches: &'a mut BTreeMap<i32, IWatch>,
}

/// Resolve the file kind a dependency link refers to.
fn dep_kind(iwatches: &BTreeMap<i32, IWatch>, wd: &WatchDep) -> FileKind {
    match iwatches.get(&wd.wd) {
        Some(iw) => match &wd.dep {
            Dep::Parent => iw.kind,
            Dep::Child { name } => iw
                .deps
                .get(name)
                .map_or(FileKind::UNKNOWN, |item| item.kind),
        },
        None => FileKind::UNKNOWN,
    }
}

/// The file kind of a kqueue watch, as recorded by its dependents.
pub(crate) fn watch_kind(w: &Watch, iwatches: &BTreeMap<i32, IWatch>) -> FileKind {
    w.deps
        .first()
        .map_or(FileKind::UNKNOWN, |wd| dep_kind(iwatches, wd))
}

/// The union of kqueue filter flags required by every dependent of `w`.
fn union_fflags(w: &Watch, iwatches: &BTreeMap<i32, IWatch>) -> u32 {
    let mut fflags = 0;
    for wd in &w.deps {
        if let Some(iw) = iwatches.get(&wd.wd) {
            fflags |= inotify_to_kqueue(iw.flags, dep_kind(iwatches, wd), wd.is_parent());
        }
    }
    fflags
}

/// Re-register `w` with the current union of its dependents' filter flags.
fn update_registration(kq: &Kqueue, w: &mut Watch, iwatches: &BTreeMap<i32, IWatch>) -> Result<()> {
    let fflags = union_fflags(w, iwatches);
    debug_assert_ne!(fflags, 0);
    w.register(kq, fflags)
}

/// Attach a dependency link to the watch under `key` and re-register it.
///
/// On registration failure the link is detached again and, if the watch has no other
/// dependents, the watch itself is destroyed.
fn add_dep(ctx: &mut WatchCtx, key: WatchKey, wd: i32, dep: Dep) -> Result<()> {
    let WatchCtx {
        kq,
        watches,
        iwatches,
    } = ctx;

    let w = match watches.get_mut(key) {
        Some(w) => w,
        None => return Err(Error::from_code(libc::ENOENT)),
    };

    w.deps.push(WatchDep { wd, dep });

    if let Err(e) = update_registration(kq, w, iwatches) {
        w.deps.pop();
        if w.deps.is_empty() {
            watches.remove(key);
        }
        return Err(e);
    }

    Ok(())
}

/// Detach a dependency link from the watch under `key`.
///
/// The watch is destroyed (closing its descriptor) when its last link goes away; otherwise its
/// registration shrinks to the remaining union.
fn del_dep(ctx: &mut WatchCtx, key: WatchKey, wd: i32, dep: &Dep) {
    let WatchCtx {
        kq,
        watches,
        iwatches,
    } = ctx;

    let w = match watches.get_mut(key) {
        Some(w) => w,
        None => return,
    };

    if let Some(idx) = w.find_dep(wd, dep) {
        w.deps.remove(idx);
        if w.deps.is_empty() {
            watches.remove(key);
        } else if let Err(e) = update_registration(kq, w, iwatches) {
            log::warn!("failed to re-register watch after dependency removal: {}", e);
        }
    }
}

/// Build a new inotify watch around an opened descriptor, including the initial directory
/// listing and child subwatches, and insert it under `wd`.
///
/// Takes ownership of `fd`; if a kqueue watch for this file already exists (reachable through
/// some other name), `fd` is dropped in favor of the established descriptor.
pub(crate) fn create(
    ctx: &mut WatchCtx,
    wd: i32,
    fd: FileDesc,
    st: &Stat,
    flags: InotifyMask,
) -> Result<()> {
    let key = WatchKey {
        dev: st.dev(),
        inode: st.ino(),
    };

    let parent_fd = match ctx.watches.get(key) {
        Some(w) => {
            // Already watching this file under another name; one descriptor is enough
            drop(fd);
            w.fd()
        }
        None => {
            let parent_fd = fd.fd();
            ctx.watches.insert(Watch::new(fd, key.dev, key.inode));
            parent_fd
        }
    };

    let kind = st.file_kind();
    let mut iw = IWatch {
        wd,
        fd: parent_fd,
        flags,
        kind,
        inode: key.inode,
        dev: key.dev,
        closed: false,
        deps: DepList::new(),
    };

    if kind.is_dir() {
        let listing = dep_list::listing(parent_fd, &iw.deps).map_err(|e| {
            log::warn!("initial listing of watch {} failed: {}", wd, e);
            if ctx
                .watches
                .get(key)
                .map_or(false, |w| w.deps.is_empty())
            {
                ctx.watches.remove(key);
            }
            e
        })?;
        for item in listing.into_items() {
            iw.deps.insert(item);
        }
    }

    ctx.iwatches.insert(wd, iw);

    if let Err(e) = add_dep(ctx, key, wd, Dep::Parent) {
        ctx.iwatches.remove(&wd);
        return Err(e);
    }

    if kind.is_dir() {
        let names: Vec<CString> = ctx.iwatches[&wd].deps.names().cloned().collect();
        for name in names {
            add_subwatch(ctx, wd, &name);
        }
    }

    Ok(())
}

/// Tear down the inotify watch `wd`: drop every child subwatch link, the parent link, and the
/// watch itself. Enqueueing the `IGNORED` record is the caller's business.
pub(crate) fn release(ctx: &mut WatchCtx, wd: i32) {
    let (parent_key, items) = match ctx.iwatches.get(&wd) {
        Some(iw) => (
            iw.parent_key(),
            iw.deps.iter().cloned().collect::<Vec<DepItem>>(),
        ),
        None => return,
    };

    for item in &items {
        del_subwatch(ctx, wd, item);
    }

    del_dep(ctx, parent_key, wd, &Dep::Parent);

    ctx.iwatches.remove(&wd);
}

/// Start watching one child of a watched directory.
///
/// Failures are logged and swallowed: a child that cannot be opened (gone already, permission,
/// kqueue registration limit) simply produces no child-level events, exactly as when its
/// translated filter is empty.
pub(crate) fn add_subwatch(ctx: &mut WatchCtx, wd: i32, name: &CStr) {
    let (closed, flags, dirfd, dev) = match ctx.iwatches.get(&wd) {
        Some(iw) => (iw.closed, iw.flags, iw.fd, iw.dev),
        None => return,
    };

    if closed {
        return;
    }

    let item = match ctx.iwatches[&wd].deps.get(name) {
        Some(item) => item.clone(),
        None => return,
    };

    let mut key = WatchKey {
        dev,
        inode: item.inode,
    };

    if let Some(w) = ctx.watches.get(key) {
        // Watch exists already (a hardlink, or another inotify watch on the same directory).
        // Inherit the authoritative file kind from it.
        let kind = watch_kind(w, ctx.iwatches);
        if !item.kind.is_unknown() && item.kind != kind {
            log::warn!(
                "file kinds taken with readdir and fstat are different: {:?} != {:?}",
                item.kind,
                kind
            );
        }
        if let Some(iw) = ctx.iwatches.get_mut(&wd) {
            iw.deps.set_kind(name, kind);
        }

        if inotify_to_kqueue(flags, kind, false) == 0 {
            return;
        }

        hold(ctx, key, wd, name);
        return;
    }

    // Nothing interesting can be registered for this child; don't open it at all
    if !item.kind.is_unknown() && inotify_to_kqueue(flags, item.kind, false) == 0 {
        return;
    }

    let fd = match watch_open(dirfd, name, InotifyMask::DONT_FOLLOW) {
        Ok(fd) => fd,
        Err(e) => {
            log::debug!("failed to open subwatch {:?}: {}", name, e);
            lstat_fallback(ctx, wd, name, dirfd);
            return;
        }
    };

    let st = match crate::stat::fstat(fd.fd()) {
        Ok(st) => st,
        Err(e) => {
            log::warn!("failed to stat subwatch {:?}: {}", name, e);
            lstat_fallback(ctx, wd, name, dirfd);
            return;
        }
    };

    if let Some(iw) = ctx.iwatches.get_mut(&wd) {
        iw.deps.set_kind(name, st.file_kind());
    }

    if inotify_to_kqueue(flags, st.file_kind(), false) == 0 {
        return;
    }

    // The name may not refer to the inode the listing saw anymore
    if item.inode != st.ino() {
        if dev != st.dev() {
            // It's a mount point. Represent it by the underlying directory's inode (the one
            // readdir reports) and do not cross onto the mounted filesystem.
        } else {
            // Race: the file was replaced after the directory listing
            log::warn!("{:?} has been replaced after directory listing", name);
            if let Some(iw) = ctx.iwatches.get_mut(&wd) {
                iw.deps.set_inode(name, st.ino());
            }
            key.inode = st.ino();
            if ctx.watches.get(key).is_some() {
                hold(ctx, key, wd, name);
                return;
            }
        }
    }

    ctx.watches.insert(Watch::new(fd, key.dev, key.inode));
    hold(ctx, key, wd, name);
}

/// Final step of subwatch creation: link the inotify watch to the kqueue watch.
fn hold(ctx: &mut WatchCtx, key: WatchKey, wd: i32, name: &CStr) {
    if let Err(e) = add_dep(
        ctx,
        key,
        wd,
        Dep::Child {
            name: name.to_owned(),
        },
    ) {
        log::warn!("failed to register subwatch {:?}: {}", name, e);
    }
}

/// A child that can't be watched still deserves an accurate file kind in the dep list (the
/// differ needs it for ISDIR decoration); take it with `fstatat(AT_SYMLINK_NOFOLLOW)`.
fn lstat_fallback(ctx: &mut WatchCtx, wd: i32, name: &CStr, dirfd: RawFd) {
    let needs_kind = ctx.iwatches[&wd]
        .deps
        .get(name)
        .map_or(false, |item| item.kind.is_unknown());
    if !needs_kind {
        return;
    }

    match fstatat(dirfd, name, AtFlag::AT_SYMLINK_NOFOLLOW) {
        Ok(st) => {
            if let Some(iw) = ctx.iwatches.get_mut(&wd) {
                iw.deps.set_kind(name, st.file_kind());
            }
        }
        Err(e) => log::debug!("failed to lstat subwatch {:?}: {}", name, e),
    }
}

/// Stop watching one child of a watched directory.
pub(crate) fn del_subwatch(ctx: &mut WatchCtx, wd: i32, item: &DepItem) {
    let dev = match ctx.iwatches.get(&wd) {
        Some(iw) => iw.dev,
        None => return,
    };

    del_dep(
        ctx,
        WatchKey {
            dev,
            inode: item.inode,
        },
        wd,
        &Dep::Child {
            name: item.name.clone(),
        },
    );
}

/// Rename the dependency link of a child that moved within its directory. The kqueue watch
/// itself (keyed by inode) is untouched.
pub(crate) fn move_subwatch(ctx: &mut WatchCtx, wd: i32, from: &DepItem, to: &DepItem) {
    debug_assert_eq!(from.inode, to.inode);

    let dev = match ctx.iwatches.get(&wd) {
        Some(iw) => iw.dev,
        None => return,
    };

    let key = WatchKey {
        dev,
        inode: to.inode,
    };

    if let Some(w) = ctx.watches.get_mut(key) {
        let from_dep = Dep::Child {
            name: from.name.clone(),
        };
        if let Some(idx) = w.find_dep(wd, &from_dep) {
            w.deps[idx].dep = Dep::Child {
                name: to.name.clone(),
            };
        }
    }
}

/// Apply a new flag mask to an existing inotify watch (second `add_watch` on the same file).
///
/// `MASK_ADD` merges instead of replacing. The parent registration is recomputed, and every
/// child either gains a subwatch (newly relevant), loses one (no longer relevant), or has its
/// watch's union updated.
pub(crate) fn update_flags(ctx: &mut WatchCtx, wd: i32, flags: InotifyMask) {
    let (parent_key, mut new_flags) = match ctx.iwatches.get(&wd) {
        Some(iw) => (iw.parent_key(), flags),
        None => return,
    };

    if flags.contains(InotifyMask::MASK_ADD) {
        new_flags |= ctx.iwatches[&wd].flags;
    }

    ctx.iwatches.get_mut(&wd).unwrap().flags = new_flags;

    {
        let WatchCtx {
            kq,
            watches,
            iwatches,
        } = ctx;
        match watches.get_mut(parent_key) {
            Some(w) => {
                if let Err(e) = update_registration(kq, w, iwatches) {
                    log::warn!("failed to re-register parent watch {}: {}", wd, e);
                }
            }
            None => debug_assert!(false, "parent watch missing"),
        }
    }

    let items: Vec<DepItem> = ctx.iwatches[&wd].deps.iter().cloned().collect();
    for item in items {
        let key = WatchKey {
            dev: parent_key.dev,
            inode: item.inode,
        };
        let child_dep = Dep::Child {
            name: item.name.clone(),
        };

        let has_dep = ctx
            .watches
            .get(key)
            .map_or(false, |w| w.find_dep(wd, &child_dep).is_some());

        if !has_dep {
            // Newly relevant (or previously failed) child
            add_subwatch(ctx, wd, &item.name);
        } else if inotify_to_kqueue(new_flags, item.kind, false) == 0 {
            del_dep(ctx, key, wd, &child_dep);
        } else {
            let WatchCtx {
                kq,
                watches,
                iwatches,
            } = ctx;
            if let Some(w) = watches.get_mut(key) {
                if let Err(e) = update_registration(kq, w, iwatches) {
                    log::warn!("failed to re-register subwatch {:?}: {}", item.name, e);
                }
            }
        }
    }
}
