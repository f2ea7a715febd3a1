use std::collections::VecDeque;

use crate::internal_prelude::*;

use crate::consts::{InotifyMask, IN_DEF_MAX_QUEUED_EVENTS};
use crate::event::encode_event;
use crate::socket::{pending_input, Socket};
use crate::uio::IoVec;

/// The outbound queue of encoded inotify event records for one instance.
///
/// Holds the records not yet written to the communication socket, plus a shadow of the last
/// record that was written: a new event identical to the newest record the client has not read
/// yet is dropped, reproducing Linux's collapsing of adjacent duplicates.
#[derive(Debug)]
pub(crate) struct EventQueue {
    events: VecDeque<Box<[u8]>>,
    max_events: usize,
    /// Last record sent to the socket, kept until the client is known to have drained it.
    last: Option<Box<[u8]>>,
    /// Records believed to be sitting in the socket buffer.
    sb_events: usize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            events: VecDeque::new(),
            max_events: IN_DEF_MAX_QUEUED_EVENTS,
            last: None,
            sb_events: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Set the maximum queue length, in events.
    pub fn set_max_events(&mut self, max_events: isize) -> Result<()> {
        if max_events <= 0 {
            return Err(Error::from_code(libc::EINVAL));
        }
        // TODO: truncate an already-longer queue
        self.max_events = max_events as usize;
        Ok(())
    }

    /// Place one event in the queue.
    ///
    /// When the queue is full the event is replaced by a single `Q_OVERFLOW` record (or, past
    /// that point, dropped entirely) and `false` is returned so the caller can stop producing
    /// related events. `client_fd` is the client's end of the communication socket, peeked to
    /// decide whether the last-sent record is still unread.
    pub fn enqueue(
        &mut self,
        client_fd: Option<RawFd>,
        mut wd: i32,
        mut mask: InotifyMask,
        mut cookie: u32,
        name: Option<&CStr>,
    ) -> bool {
        if self.events.len() >= self.max_events {
            return false;
        }

        let mut name = name;
        let mut overflowed = false;
        if self.events.len() == self.max_events - 1 {
            wd = -1;
            mask = InotifyMask::Q_OVERFLOW;
            cookie = 0;
            name = None;
            overflowed = true;
        }

        let record = encode_event(wd, mask.bits(), cookie, name);

        // Compare with the previously reported event: the queue tail, or the last record sent
        // to the socket when the queue is empty. Encoding is deterministic, so identical
        // events have identical bytes.
        let prev = self.events.back().or_else(|| self.last.as_ref());
        if prev.map_or(false, |prev| **prev == *record) {
            if !self.events.is_empty() {
                // Identical to the queue tail: drop
                return !overflowed;
            }
            // Identical to the last-sent record; drop only if the client has not read it yet
            if let Some(fd) = client_fd {
                if pending_input(fd).map_or(false, |buffered| buffered > 0) {
                    return !overflowed;
                }
            }
        }

        self.events.push_back(record);
        !overflowed
    }

    /// Write as many queued records as fit in `sbspace` bytes to the socket, in one vectored
    /// send.
    ///
    /// The last record written becomes the new shadow for duplicate collapsing. A failed send
    /// is logged and left for the next `EVFILT_WRITE` wakeup to retry.
    pub fn flush(&mut self, sock: &Socket, sbspace: usize) {
        // IOV_MAX is 1024 on every supported system; the libc crate doesn't expose it for all
        // of them
        const IOV_MAX: usize = 1024;

        let mut count = 0;
        let mut total = 0;
        for record in self.events.iter().take(IOV_MAX) {
            if total + record.len() > sbspace {
                break;
            }
            total += record.len();
            count += 1;
        }

        if count == 0 {
            return;
        }

        let iovs: Vec<IoVec> = self
            .events
            .iter()
            .take(count)
            .map(|record| IoVec::new(record))
            .collect();

        match sock.send_vectored(&iovs) {
            Ok(sent) => {
                debug_assert_eq!(sent, total);
                drop(iovs);

                let mut last = None;
                for _ in 0..count {
                    last = self.events.pop_front();
                }
                self.last = last;
                self.sb_events += count;
            }
            Err(e) => {
                log::warn!("sending of inotify events to socket failed: {}", e);
            }
        }
    }

    /// Forget the last-sent record: the client has drained the socket, so there is nothing
    /// left to collapse duplicates against.
    pub fn reset_last(&mut self) {
        self.last = None;
        self.sb_events = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InotifyEventIter;

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn test_enqueue_and_flush() {
        let (server, client) = Socket::pair().unwrap();
        let mut eq = EventQueue::new();

        assert!(eq.enqueue(
            Some(client.fd()),
            1,
            InotifyMask::CREATE,
            0,
            Some(&cstr("a"))
        ));
        assert!(eq.enqueue(
            Some(client.fd()),
            1,
            InotifyMask::DELETE,
            0,
            Some(&cstr("a"))
        ));
        assert_eq!(eq.len(), 2);

        eq.flush(&server, 4096);
        assert_eq!(eq.len(), 0);
        assert_eq!(eq.sb_events, 2);

        let mut buf = [0; 256];
        let n = crate::unistd::read(client.fd(), &mut buf).unwrap();
        let events: Vec<_> = InotifyEventIter::from_buffer(&buf[..n]).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].mask(), InotifyMask::CREATE);
        assert_eq!(events[1].mask(), InotifyMask::DELETE);
    }

    #[test]
    fn test_adjacent_duplicates_coalesce() {
        let (_server, client) = Socket::pair().unwrap();
        let mut eq = EventQueue::new();

        for _ in 0..3 {
            eq.enqueue(
                Some(client.fd()),
                1,
                InotifyMask::MODIFY,
                0,
                Some(&cstr("f")),
            );
        }
        assert_eq!(eq.len(), 1);

        // A different event breaks the run
        eq.enqueue(Some(client.fd()), 1, InotifyMask::ATTRIB, 0, Some(&cstr("f")));
        eq.enqueue(Some(client.fd()), 1, InotifyMask::MODIFY, 0, Some(&cstr("f")));
        assert_eq!(eq.len(), 3);
    }

    #[test]
    fn test_coalesce_against_unread_shadow() {
        let (server, client) = Socket::pair().unwrap();
        let mut eq = EventQueue::new();

        eq.enqueue(
            Some(client.fd()),
            1,
            InotifyMask::MODIFY,
            0,
            Some(&cstr("f")),
        );
        eq.flush(&server, 4096);
        assert_eq!(eq.len(), 0);

        // Queue is empty but the client has not read the record yet: the duplicate is dropped
        eq.enqueue(
            Some(client.fd()),
            1,
            InotifyMask::MODIFY,
            0,
            Some(&cstr("f")),
        );
        assert_eq!(eq.len(), 0);

        // Drain the socket; now the duplicate must be delivered again
        let mut buf = [0; 256];
        crate::unistd::read(client.fd(), &mut buf).unwrap();
        eq.enqueue(
            Some(client.fd()),
            1,
            InotifyMask::MODIFY,
            0,
            Some(&cstr("f")),
        );
        assert_eq!(eq.len(), 1);
    }

    #[test]
    fn test_overflow_collapses_to_one_record() {
        let (_server, client) = Socket::pair().unwrap();
        let mut eq = EventQueue::new();
        eq.set_max_events(4).unwrap();

        for i in 0..100u32 {
            let name = cstr(&format!("f{}", i));
            eq.enqueue(Some(client.fd()), 1, InotifyMask::CREATE, 0, Some(&name));
        }

        // 3 real events, then the fourth slot became the single overflow record
        assert_eq!(eq.len(), 4);

        let overflow = eq.events.back().unwrap().clone();
        let ev = InotifyEventIter::from_buffer(&overflow).next().unwrap();
        assert_eq!(ev.wd(), -1);
        assert_eq!(ev.mask(), InotifyMask::Q_OVERFLOW);
        assert_eq!(ev.name(), None);
    }

    #[test]
    fn test_set_max_events_rejects_nonpositive() {
        let mut eq = EventQueue::new();
        assert_eq!(
            eq.set_max_events(0).unwrap_err(),
            Error::from_code(libc::EINVAL)
        );
        assert_eq!(
            eq.set_max_events(-5).unwrap_err(),
            Error::from_code(libc::EINVAL)
        );
        eq.set_max_events(1).unwrap();
    }

    #[test]
    fn test_flush_respects_budget() {
        let (server, client) = Socket::pair().unwrap();
        let mut eq = EventQueue::new();

        eq.enqueue(Some(client.fd()), 1, InotifyMask::CREATE, 0, Some(&cstr("a")));
        eq.enqueue(Some(client.fd()), 1, InotifyMask::CREATE, 0, Some(&cstr("b")));

        // Only the first record fits
        let first_len = eq.events[0].len();
        eq.flush(&server, first_len);
        assert_eq!(eq.len(), 1);

        eq.flush(&server, 4096);
        assert_eq!(eq.len(), 0);
    }
}
