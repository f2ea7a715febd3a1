use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::internal_prelude::*;

use crate::consts::{InotifyFlags, InotifyMask, IN_DEF_SOCKBUFSIZE, IN_MAX_QUEUED_EVENTS, IN_SOCKBUFSIZE};
use crate::dep_list::{self, DepAction, DepItem};
use crate::event_queue::EventQueue;
use crate::inotify_watch::{self, IWatch, WatchCtx};
use crate::kqueue::Kqueue;
use crate::socket::Socket;
use crate::stat::fstat;
use crate::watch::{kqueue_to_inotify, watch_open};
use crate::watch_set::{WatchKey, WatchSet};

/// One queued client call, value-typed; the reply travels back through the same cell.
#[derive(Debug)]
pub(crate) enum Command {
    Add { path: CString, mask: InotifyMask },
    Remove { wd: i32 },
    SetParam { param: i32, value: isize },
}

#[derive(Copy, Clone, Debug)]
struct CmdReply {
    retval: i32,
    error: i32,
}

#[derive(Debug, Default)]
struct ChanState {
    cmd: Option<Command>,
    reply: Option<CmdReply>,
    /// The worker has torn down; all commands fail with `EBADF`.
    dead: bool,
}

/// The client-side face of a worker: enough state to submit one command at a time and wait for
/// its reply.
///
/// Commands are serialized by `client_lock`; the single-slot cell plus condvar is the
/// rendezvous. The doorbell is rung while the cell is locked, which also guarantees the worker
/// cannot finish tearing down (it must take the same lock to mark itself dead) between the
/// liveness check and the ring.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    kq_fd: RawFd,
    sock_fd: RawFd,
    client_fd: RawFd,
    chan: Mutex<ChanState>,
    cond: Condvar,
    client_lock: Mutex<()>,
}

impl WorkerHandle {
    #[inline]
    pub fn client_fd(&self) -> RawFd {
        self.client_fd
    }

    /// Submit one command and wait for the worker's reply.
    ///
    /// `revalidate` runs once the per-instance command mutex is held; returning `false` aborts
    /// with `EBADF` (the dispatch layer uses it to detect a recycled instance slot). Fails with
    /// `EBADF` likewise if the worker has torn down (or tears down while we wait).
    pub fn execute(&self, cmd: Command, revalidate: impl FnOnce() -> bool) -> Result<i32> {
        let _serialized = self.client_lock.lock().unwrap();

        if !revalidate() {
            return Err(Error::from_code(libc::EBADF));
        }

        let mut st = self.chan.lock().unwrap();
        if st.dead {
            return Err(Error::from_code(libc::EBADF));
        }

        st.cmd = Some(cmd);
        st.reply = None;

        if self.ring_doorbell().is_err() {
            st.cmd = None;
            return Err(Error::from_code(libc::EBADF));
        }

        loop {
            if let Some(reply) = st.reply.take() {
                return if reply.retval == -1 {
                    Err(Error::from_code(reply.error))
                } else {
                    Ok(reply.retval)
                };
            }
            if st.dead {
                return Err(Error::from_code(libc::EBADF));
            }
            st = self.cond.wait(st).unwrap();
        }
    }

    fn ring_doorbell(&self) -> Result<()> {
        #[cfg(any(freebsdlike, apple))]
        return crate::kqueue::trigger_doorbell(self.kq_fd, self.sock_fd);

        // No user event filter; nudge the worker through the socket instead
        #[cfg(netbsdlike)]
        return crate::unistd::write(self.client_fd, &[0]).map(|_| ());
    }

    /// Wake every current and future command waiter with `EBADF`. Called by the worker while
    /// it still owns its kqueue.
    fn mark_dead(&self) {
        let mut st = self.chan.lock().unwrap();
        st.dead = true;
        st.cmd = None;
        self.cond.notify_all();
    }
}

/// Fixed deaggregation order for the inotify events produced by one kqueue wakeup.
///
/// `OPEN`/`ACCESS`/`CLOSE_*` only ever materialize on platforms whose vnode filter reports
/// them; the conversion table takes care of that.
const IE_ORDER: [InotifyMask; 9] = [
    InotifyMask::OPEN,
    InotifyMask::ACCESS,
    InotifyMask::MODIFY,
    InotifyMask::CLOSE_NOWRITE,
    InotifyMask::CLOSE_WRITE,
    InotifyMask::ATTRIB,
    InotifyMask::MOVE_SELF,
    InotifyMask::DELETE_SELF,
    InotifyMask::UNMOUNT,
];

/// The per-instance worker: a dedicated thread owning a kqueue, the worker end of the
/// communication socket, the watch tables, and the outbound event queue.
///
/// Everything here is touched only by the worker thread; client threads reach it exclusively
/// through the command cell in `WorkerHandle`.
pub(crate) struct Worker {
    kq: Kqueue,
    sock: Socket,
    /// The client's end of the socket pair. Not owned (the client closes it); `None` once EOF
    /// has been observed.
    client_fd: Option<RawFd>,
    sockbufsize: usize,
    iwatches: BTreeMap<i32, IWatch>,
    wd_last: i32,
    wd_overflow: bool,
    watches: WatchSet,
    eq: EventQueue,
    handle: Arc<WorkerHandle>,
}

/// Create a worker and start its thread.
///
/// Returns the client's end of the socket pair (the inotify instance descriptor) and the
/// command handle.
pub(crate) fn create(flags: InotifyFlags) -> Result<(FileDesc, Arc<WorkerHandle>)> {
    let kq = Kqueue::new_cloexec()?;

    let (sock, client) = Socket::pair()?;
    let _ = sock.set_nosigpipe();
    sock.fdesc().set_cloexec(true)?;
    sock.set_send_buffer_size(IN_DEF_SOCKBUFSIZE)?;

    let client = client.into_fdesc();
    client.set_cloexec(flags.contains(InotifyFlags::CLOEXEC))?;
    client.set_nonblocking(flags.contains(InotifyFlags::NONBLOCK))?;

    kq.register_doorbell(sock.fd())?;
    kq.register_write(sock.fd())?;

    let handle = Arc::new(WorkerHandle {
        kq_fd: kq.fd(),
        sock_fd: sock.fd(),
        client_fd: client.fd(),
        chan: Mutex::new(ChanState::default()),
        cond: Condvar::new(),
        client_lock: Mutex::new(()),
    });

    let worker = Worker {
        kq,
        sock,
        client_fd: Some(client.fd()),
        sockbufsize: IN_DEF_SOCKBUFSIZE,
        iwatches: BTreeMap::new(),
        wd_last: 0,
        wd_overflow: false,
        watches: WatchSet::new(),
        eq: EventQueue::new(),
        handle: Arc::clone(&handle),
    };

    spawn_with_signals_blocked(worker)?;

    Ok((client, handle))
}

/// Start the worker thread with every signal blocked, so signals keep being delivered to
/// client threads only.
fn spawn_with_signals_blocked(worker: Worker) -> Result<()> {
    let mut set = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
    let mut oset = std::mem::MaybeUninit::<libc::sigset_t>::uninit();

    unsafe {
        libc::sigfillset(set.as_mut_ptr());
        match libc::pthread_sigmask(libc::SIG_BLOCK, set.as_ptr(), oset.as_mut_ptr()) {
            0 => (),
            eno => return Err(Error::from_code(eno)),
        }
    }

    let result = std::thread::Builder::new().spawn(move || worker.run());

    unsafe {
        libc::pthread_sigmask(libc::SIG_SETMASK, oset.as_ptr(), std::ptr::null_mut());
    }

    match result {
        Ok(_detached) => Ok(()),
        Err(e) => Err(Error::from_code(e.raw_os_error().unwrap_or(libc::ENOMEM))),
    }
}

/// Allocate the next watch descriptor: monotonically increasing from 1, wrapping at `i32::MAX`
/// and probing for a free id once wrapped. Never zero or negative.
fn next_wd(wd_last: &mut i32, wd_overflow: &mut bool, in_use: impl Fn(i32) -> bool) -> i32 {
    loop {
        if *wd_last == i32::MAX {
            *wd_last = 0;
            *wd_overflow = true;
        }
        *wd_last += 1;
        if !*wd_overflow || !in_use(*wd_last) {
            return *wd_last;
        }
    }
}

/// Place one translated event in the queue, honoring the owning watch's mask, `ONESHOT`, and
/// the `closed` latch. `IGNORED` and `Q_OVERFLOW` records do not pass through here.
fn enqueue_event(
    iwatches: &mut BTreeMap<i32, IWatch>,
    eq: &mut EventQueue,
    client_fd: Option<RawFd>,
    wd: i32,
    mask: InotifyMask,
    item: Option<&DepItem>,
) {
    let iw = match iwatches.get_mut(&wd) {
        Some(iw) => iw,
        None => return,
    };

    let mut mask =
        mask & ((InotifyMask::ALL_EVENTS & iw.flags) | InotifyMask::UNMOUNT | InotifyMask::ISDIR);

    // Skip bare ISDIR leftovers and events on already-stopped watches
    if !mask.intersects(InotifyMask::ALL_EVENTS | InotifyMask::UNMOUNT) || iw.closed {
        return;
    }

    if iw.flags.contains(InotifyMask::ONESHOT) {
        iw.closed = true;
    }

    let mut cookie = 0;
    let mut name = None;
    if let Some(item) = item {
        name = Some(item.name.as_c_str());
        if mask.intersects(InotifyMask::MOVE) {
            cookie = item.inode as u32;
        }
        if item.kind.is_dir() {
            mask |= InotifyMask::ISDIR;
        }
    }

    if !eq.enqueue(client_fd, wd, mask, cookie, name) {
        log::debug!("event queue overflow, dropped {:?} for watch {}", mask, wd);
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "freebsd")] {
        /// Mask the open/read/close activity caused by the differ's own directory scan.
        fn mask_scan_noise(fflags: u32, skip_next: bool) -> u32 {
            if skip_next {
                fflags & !(libc::NOTE_OPEN | libc::NOTE_READ | libc::NOTE_CLOSE)
            } else {
                fflags
            }
        }
    } else {
        fn mask_scan_noise(fflags: u32, _skip_next: bool) -> u32 {
            fflags
        }
    }
}

/// Whether the file behind `fd` has no remaining hardlinks (treat inaccessible as gone).
fn is_unlinked(fd: RawFd) -> bool {
    match fstat(fd) {
        Ok(st) => st.nlink() == 0,
        Err(e) => {
            if e.code() != libc::ENOENT {
                log::debug!("fstat of watch fd {} failed: {}", fd, e);
            }
            true
        }
    }
}

impl Worker {
    fn ctx(&mut self) -> WatchCtx {
        WatchCtx {
            kq: &self.kq,
            watches: &mut self.watches,
            iwatches: &mut self.iwatches,
        }
    }

    /// The worker thread's command-and-event loop.
    fn run(mut self) {
        let mut sbspace = 0usize;
        let mut errors = 0u32;
        let mut received = [crate::kqueue::ev_set(0, 0, 0, 0, 0); 1];

        loop {
            if sbspace > 0 && self.eq.len() > 0 {
                self.eq.flush(&self.sock, sbspace);
                sbspace = 0;
            }

            let nevents = match self.kq.wait(&mut received) {
                Ok(n) => {
                    errors = 0;
                    n
                }
                Err(e) => {
                    if e.code() != libc::EINTR {
                        log::error!("kevent failed: {}", e);
                        errors += 1;
                        if errors >= 10 {
                            // The kqueue is beyond recovery; behave as if the client had gone
                            self.shutdown();
                            return;
                        }
                    }
                    continue;
                }
            };

            for i in 0..nevents {
                let event = received[i];

                if event.ident == self.sock.fd() as libc::uintptr_t {
                    if event.flags as u32 & libc::EV_EOF as u32 != 0 {
                        // Client closed its descriptor: unlist, fail waiters, release watches
                        self.shutdown();
                        return;
                    } else if event.filter == libc::EVFILT_WRITE {
                        sbspace = event.data as usize;
                        if sbspace >= self.sockbufsize {
                            // The client drained the communication socket completely
                            self.eq.reset_last();
                        }
                    } else {
                        self.doorbell_rung();
                    }
                } else {
                    self.produce_notifications(&event);
                }
            }
        }
    }

    fn shutdown(mut self) {
        crate::instance::unlist(&self.handle);
        self.client_fd = None;
        self.handle.mark_dead();
        // Dropping self closes every watch descriptor, the kqueue, and the socket end
    }

    fn doorbell_rung(&mut self) {
        #[cfg(netbsdlike)]
        {
            // Consume the one-byte nudge (commands are serialized, so exactly one is pending)
            let mut buf = [0u8; 1];
            let _ = crate::unistd::read(self.sock.fd(), &mut buf);
        }

        let cmd = match self.handle.chan.lock().unwrap().cmd.take() {
            Some(cmd) => cmd,
            None => return,
        };

        let reply = match cmd {
            Command::Add { path, mask } => match self.add_or_modify(&path, mask) {
                Ok(wd) => CmdReply {
                    retval: wd,
                    error: 0,
                },
                Err(e) => CmdReply {
                    retval: -1,
                    error: e.code(),
                },
            },
            Command::Remove { wd } => match self.remove(wd) {
                Ok(()) => CmdReply {
                    retval: 0,
                    error: 0,
                },
                Err(e) => CmdReply {
                    retval: -1,
                    error: e.code(),
                },
            },
            Command::SetParam { param, value } => match self.set_param(param, value) {
                Ok(()) => CmdReply {
                    retval: 0,
                    error: 0,
                },
                Err(e) => CmdReply {
                    retval: -1,
                    error: e.code(),
                },
            },
        };

        let mut st = self.handle.chan.lock().unwrap();
        st.reply = Some(reply);
        self.handle.cond.notify_all();
    }

    /// Add a new watch, or update the one already covering the file `path` resolves to.
    fn add_or_modify(&mut self, path: &CStr, mask: InotifyMask) -> Result<i32> {
        let fd = watch_open(libc::AT_FDCWD, path, mask)?;
        let st = fstat(fd.fd())?;

        let key = WatchKey {
            dev: st.dev(),
            inode: st.ino(),
        };

        // Hardlinks and symlinks to an already-watched file share its watch descriptor
        if let Some(w) = self.watches.get(key) {
            if let Some(parent) = w.parent_dep() {
                let wd = parent.wd;
                drop(fd);
                inotify_watch::update_flags(&mut self.ctx(), wd, mask);
                return Ok(wd);
            }
        }

        let iwatches = &self.iwatches;
        let wd = next_wd(&mut self.wd_last, &mut self.wd_overflow, |wd| {
            iwatches.contains_key(&wd)
        });

        inotify_watch::create(&mut self.ctx(), wd, fd, &st, mask)?;

        Ok(wd)
    }

    fn remove(&mut self, wd: i32) -> Result<()> {
        if !self.iwatches.contains_key(&wd) {
            return Err(Error::from_code(libc::EINVAL));
        }

        self.remove_iwatch(wd);
        Ok(())
    }

    /// Stop and free one inotify watch, queueing its final `IGNORED` record.
    fn remove_iwatch(&mut self, wd: i32) {
        if !self.eq.enqueue(self.client_fd, wd, InotifyMask::IGNORED, 0, None) {
            log::debug!("event queue overflow, dropped IGNORED for watch {}", wd);
        }
        inotify_watch::release(&mut self.ctx(), wd);
    }

    fn set_param(&mut self, param: i32, value: isize) -> Result<()> {
        match param {
            IN_SOCKBUFSIZE => {
                if value <= 0 {
                    return Err(Error::from_code(libc::EINVAL));
                }
                self.sock.set_send_buffer_size(value as usize)?;
                self.sockbufsize = value as usize;
                Ok(())
            }
            IN_MAX_QUEUED_EVENTS => self.eq.set_max_events(value),
            _ => Err(Error::from_code(libc::EINVAL)),
        }
    }

    /// Translate one delivered vnode event into inotify records.
    fn produce_notifications(&mut self, event: &libc::kevent) {
        let fd = event.ident as RawFd;
        let key = match self.watches.key_for_fd(fd) {
            Some(key) => key,
            None => return, // stale event from a watch already dropped
        };

        let (skip_next, deps) = match self.watches.get_mut(key) {
            Some(w) => {
                let skip = w.skip_next;
                w.skip_next = false;
                (skip, w.deps.clone())
            }
            None => return,
        };

        let fflags = mask_scan_noise(event.fflags as u32, skip_next);

        let kind = inotify_watch::watch_kind(self.watches.get(key).unwrap(), &self.iwatches);

        // An unlink only counts as deletion once the link count reaches zero
        let deleted =
            fflags & libc::NOTE_DELETE != 0 && (!kind.is_file() || is_unlinked(fd));

        for &flag in IE_ORDER.iter() {
            for dep in &deps {
                let is_parent = dep.is_parent();
                let iw_kind = match self.iwatches.get(&dep.wd) {
                    Some(iw) => iw.kind,
                    None => continue,
                };

                let i_mask = kqueue_to_inotify(fflags, kind, is_parent, deleted);

                if is_parent
                    && flag == InotifyMask::MODIFY
                    && fflags & (libc::NOTE_WRITE | libc::NOTE_EXTEND) != 0
                    && iw_kind.is_dir()
                {
                    self.produce_directory_diff(dep.wd);
                    if let Some(w) = self.watches.get_mut(key) {
                        w.skip_next = true;
                    }
                } else if i_mask.contains(flag) {
                    let item = match &dep.dep {
                        crate::watch::Dep::Parent => None,
                        crate::watch::Dep::Child { name } => {
                            match self.iwatches[&dep.wd].deps.get(name) {
                                Some(item) => Some(item.clone()),
                                None => continue,
                            }
                        }
                    };

                    enqueue_event(
                        &mut self.iwatches,
                        &mut self.eq,
                        self.client_fd,
                        dep.wd,
                        flag | (i_mask & !InotifyMask::ALL_EVENTS),
                        item.as_ref(),
                    );
                }
            }
        }

        // Reap watches stopped by this wakeup: oneshots that fired, the deleted/revoked file's
        // own watches. Each removal can drop deps (or the whole watch), so re-inspect after
        // every one.
        loop {
            let target = {
                let w = match self.watches.get(key) {
                    Some(w) => w,
                    None => break,
                };
                w.deps.iter().find_map(|dep| {
                    let iw = self.iwatches.get(&dep.wd)?;
                    if iw.closed
                        || (dep.is_parent()
                            && (deleted || fflags & libc::NOTE_REVOKE != 0))
                    {
                        Some(dep.wd)
                    } else {
                        None
                    }
                })
            };

            match target {
                Some(wd) => self.remove_iwatch(wd),
                None => break,
            }
        }
    }

    /// Rescan a watched directory and turn the result into `CREATE`/`DELETE`/`MOVED_*` records
    /// plus subwatch bookkeeping.
    fn produce_directory_diff(&mut self, wd: i32) {
        let fd = match self.iwatches.get(&wd) {
            Some(iw) => iw.fd,
            None => return,
        };

        let listing = match dep_list::listing(fd, &self.iwatches[&wd].deps) {
            Ok(listing) => listing,
            Err(e) => {
                // The dep list is untouched; the next directory event rescans from scratch
                log::warn!("failed to create a listing for watch {}: {}", wd, e);
                return;
            }
        };

        let actions = dep_list::calculate(&self.iwatches[&wd].deps, listing);

        for action in actions {
            match action {
                DepAction::Added(item) => {
                    if let Some(iw) = self.iwatches.get_mut(&wd) {
                        iw.deps.insert(item.clone());
                    }
                    inotify_watch::add_subwatch(&mut self.ctx(), wd, &item.name);

                    // The subwatch attempt may have sharpened the item's kind and inode
                    let item = self
                        .iwatches
                        .get(&wd)
                        .and_then(|iw| iw.deps.get(&item.name).cloned())
                        .unwrap_or(item);
                    enqueue_event(
                        &mut self.iwatches,
                        &mut self.eq,
                        self.client_fd,
                        wd,
                        InotifyMask::CREATE,
                        Some(&item),
                    );
                }
                DepAction::Removed(item) => {
                    enqueue_event(
                        &mut self.iwatches,
                        &mut self.eq,
                        self.client_fd,
                        wd,
                        InotifyMask::DELETE,
                        Some(&item),
                    );
                    inotify_watch::del_subwatch(&mut self.ctx(), wd, &item);
                    if let Some(iw) = self.iwatches.get_mut(&wd) {
                        iw.deps.remove(&item.name);
                    }
                }
                DepAction::Replaced(item) => {
                    // No DELETE: the MOVED_TO that overwrote it stands in for its disappearance
                    inotify_watch::del_subwatch(&mut self.ctx(), wd, &item);
                    if let Some(iw) = self.iwatches.get_mut(&wd) {
                        iw.deps.remove(&item.name);
                    }
                }
                DepAction::Moved { from, to } => {
                    enqueue_event(
                        &mut self.iwatches,
                        &mut self.eq,
                        self.client_fd,
                        wd,
                        InotifyMask::MOVED_FROM,
                        Some(&from),
                    );
                    enqueue_event(
                        &mut self.iwatches,
                        &mut self.eq,
                        self.client_fd,
                        wd,
                        InotifyMask::MOVED_TO,
                        Some(&to),
                    );
                    inotify_watch::move_subwatch(&mut self.ctx(), wd, &from, &to);
                    if let Some(iw) = self.iwatches.get_mut(&wd) {
                        iw.deps.remove(&from.name);
                        iw.deps.insert(to);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_wd_monotonic() {
        let mut last = 0;
        let mut overflow = false;

        assert_eq!(next_wd(&mut last, &mut overflow, |_| false), 1);
        assert_eq!(next_wd(&mut last, &mut overflow, |_| false), 2);
        assert_eq!(next_wd(&mut last, &mut overflow, |_| false), 3);
        assert!(!overflow);
    }

    #[test]
    fn test_next_wd_wraps_and_probes() {
        let mut last = i32::MAX - 1;
        let mut overflow = false;

        assert_eq!(next_wd(&mut last, &mut overflow, |_| false), i32::MAX);
        assert!(!overflow);

        // Wrap: ids 1 and 2 are still taken, 3 is free
        let taken = [1, 2];
        assert_eq!(
            next_wd(&mut last, &mut overflow, |wd| taken.contains(&wd)),
            3
        );
        assert!(overflow);

        // Never returns zero or a negative id
        let mut last = i32::MAX;
        let mut overflow = true;
        assert_eq!(next_wd(&mut last, &mut overflow, |_| false), 1);
    }
}
