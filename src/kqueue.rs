use crate::internal_prelude::*;

/// Construct a `struct kevent`, like the `EV_SET()` macro.
///
/// The field types (and therefore the constant types) vary across the BSDs, so everything is
/// funneled through plain integers and cast into place.
pub(crate) fn ev_set(ident: usize, filter: i32, flags: u32, fflags: u32, data: isize) -> libc::kevent {
    let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
    ev.ident = ident as _;
    ev.filter = filter as _;
    ev.flags = flags as _;
    ev.fflags = fflags as _;
    ev.data = data as _;
    ev
}

/// A wrapper around a kqueue instance.
///
/// The kqueue file descriptor always has its close-on-exec flag set (it would not be inherited
/// by `fork()`ed children either way, but an `exec()` without `fork()` should not leak it).
#[derive(Debug)]
pub(crate) struct Kqueue(FileDesc);

impl Kqueue {
    pub fn new_cloexec() -> Result<Self> {
        #[cfg(target_os = "netbsd")]
        let kq = unsafe { Error::unpack_fdesc(libc::kqueue1(libc::O_CLOEXEC))? };

        #[cfg(not(target_os = "netbsd"))]
        let kq = {
            let kq = unsafe { Error::unpack_fdesc(libc::kqueue())? };
            kq.set_cloexec(true)?;
            kq
        };

        Ok(Self(kq))
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.0.fd()
    }

    /// Apply a list of changes without draining any pending events.
    pub fn change(&self, changes: &[libc::kevent]) -> Result<()> {
        Error::unpack(unsafe {
            libc::kevent(
                self.fd(),
                changes.as_ptr(),
                changes.len() as _,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        })
        .map(|_| ())
    }

    /// Block until at least one event is available, and fill `events` with as many as fit.
    pub fn wait(&self, events: &mut [libc::kevent]) -> Result<usize> {
        let n = Error::unpack(unsafe {
            libc::kevent(
                self.fd(),
                std::ptr::null(),
                0,
                events.as_mut_ptr(),
                events.len() as _,
                std::ptr::null(),
            )
        })?;

        Ok(n as usize)
    }

    /// Register (or re-register) an `EVFILT_VNODE` filter for `fd` with the given filter flags.
    pub fn register_vnode(&self, fd: RawFd, fflags: u32) -> Result<()> {
        let ev = ev_set(
            fd as usize,
            libc::EVFILT_VNODE as i32,
            (libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR) as u32,
            fflags,
            0,
        );
        self.change(&[ev])
    }

    /// Register an `EVFILT_WRITE` filter reporting free space in `fd`'s send buffer.
    pub fn register_write(&self, fd: RawFd) -> Result<()> {
        let ev = ev_set(
            fd as usize,
            libc::EVFILT_WRITE as i32,
            (libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR) as u32,
            0,
            0,
        );
        self.change(&[ev])
    }

    /// Register the command doorbell under `ident`.
    ///
    /// Where `EVFILT_USER` is available the doorbell is a user event triggered by client
    /// threads; NetBSD and OpenBSD instead watch the worker's socket end for a one-byte nudge
    /// (`EVFILT_READ` with a low-water mark of one byte).
    pub fn register_doorbell(&self, ident: RawFd) -> Result<()> {
        cfg_if::cfg_if! {
            if #[cfg(any(freebsdlike, apple))] {
                let ev = ev_set(
                    ident as usize,
                    libc::EVFILT_USER as i32,
                    (libc::EV_ADD | libc::EV_CLEAR) as u32,
                    0,
                    0,
                );
            } else {
                let ev = ev_set(
                    ident as usize,
                    libc::EVFILT_READ as i32,
                    (libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR) as u32,
                    libc::NOTE_LOWAT,
                    1,
                );
            }
        }

        self.change(&[ev])
    }
}

/// Trigger the `EVFILT_USER` doorbell registered under `ident` on the kqueue `kq_fd`.
///
/// Called from client threads, which only hold the raw kqueue descriptor; the caller must
/// guarantee the worker (and therefore the kqueue) is still alive.
#[cfg(any(freebsdlike, apple))]
pub(crate) fn trigger_doorbell(kq_fd: RawFd, ident: RawFd) -> Result<()> {
    let ev = ev_set(
        ident as usize,
        libc::EVFILT_USER as i32,
        0,
        libc::NOTE_TRIGGER,
        0,
    );

    Error::unpack(unsafe {
        libc::kevent(
            kq_fd,
            &ev,
            1,
            std::ptr::null_mut(),
            0,
            std::ptr::null(),
        )
    })
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloexec() {
        let kq = Kqueue::new_cloexec().unwrap();
        assert!(kq.0.get_cloexec().unwrap());
    }

    #[test]
    fn test_write_filter_fires() {
        let (a, _b) = crate::socket::Socket::pair().unwrap();

        let kq = Kqueue::new_cloexec().unwrap();
        kq.register_write(a.fd()).unwrap();

        let mut events = [ev_set(0, 0, 0, 0, 0)];
        let n = kq.wait(&mut events).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].ident, a.fd() as _);
        assert_eq!(events[0].filter, libc::EVFILT_WRITE as _);
        // data reports the space available in the send buffer
        assert!(events[0].data > 0);
    }

    #[cfg(any(freebsdlike, apple))]
    #[test]
    fn test_doorbell() {
        let kq = Kqueue::new_cloexec().unwrap();
        kq.register_doorbell(42).unwrap();

        trigger_doorbell(kq.fd(), 42).unwrap();

        let mut events = [ev_set(0, 0, 0, 0, 0)];
        let n = kq.wait(&mut events).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].ident, 42);
        assert_eq!(events[0].filter, libc::EVFILT_USER as _);
    }
}
