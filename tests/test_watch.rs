//! End-to-end watch behavior, exercised through the public API against a real filesystem.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::time::{Duration, Instant};

use kqinotify::{
    Inotify, InotifyFlags, InotifyMask, IN_MAX_QUEUED_EVENTS, IN_SOCKBUFSIZE,
    INOTIFY_MIN_BUFSIZE,
};

#[derive(Clone, Debug, PartialEq)]
struct Event {
    wd: i32,
    mask: InotifyMask,
    cookie: u32,
    name: Option<OsString>,
}

/// Read events until `want` have arrived or the deadline passes. The instance must be
/// non-blocking.
fn read_events(ino: &Inotify, want: usize) -> Vec<Event> {
    let mut events = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut buf = [0; INOTIFY_MIN_BUFSIZE * 8];

    while events.len() < want && Instant::now() < deadline {
        match ino.read_events(&mut buf) {
            Ok(iter) => {
                for ev in iter {
                    events.push(Event {
                        wd: ev.wd(),
                        mask: ev.mask(),
                        cookie: ev.cookie(),
                        name: ev.name().map(|n| n.to_os_string()),
                    });
                }
            }
            Err(e) if e.code() == libc::EAGAIN => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => panic!("read failed: {}", e),
        }
    }

    events
}

/// Drain whatever arrives within a settling window.
fn drain_events(ino: &Inotify) -> Vec<Event> {
    let mut events = Vec::new();
    let mut quiet = 0;
    let mut buf = [0; INOTIFY_MIN_BUFSIZE * 8];

    while quiet < 10 {
        match ino.read_events(&mut buf) {
            Ok(iter) => {
                let before = events.len();
                for ev in iter {
                    events.push(Event {
                        wd: ev.wd(),
                        mask: ev.mask(),
                        cookie: ev.cookie(),
                        name: ev.name().map(|n| n.to_os_string()),
                    });
                }
                if events.len() == before {
                    quiet += 1;
                }
            }
            Err(e) if e.code() == libc::EAGAIN => {
                quiet += 1;
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => panic!("read failed: {}", e),
        }
    }

    events
}

fn name(s: &str) -> Option<OsString> {
    Some(OsString::from(s))
}

#[test]
fn test_delete_children() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("a"), b"").unwrap();
    fs::write(tmp.path().join("b"), b"").unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    let wd = ino
        .add_watch(
            tmp.path(),
            InotifyMask::CREATE
                | InotifyMask::DELETE
                | InotifyMask::MOVED_FROM
                | InotifyMask::MOVED_TO,
        )
        .unwrap();
    assert_eq!(wd, 1);

    fs::remove_file(tmp.path().join("a")).unwrap();
    fs::remove_file(tmp.path().join("b")).unwrap();

    let events = read_events(&ino, 2);
    assert_eq!(events.len(), 2, "{:?}", events);
    for ev in &events {
        assert_eq!(ev.wd, wd);
        assert_eq!(ev.mask, InotifyMask::DELETE);
        assert_eq!(ev.cookie, 0);
    }
    let mut names: Vec<_> = events.iter().map(|e| e.name.clone().unwrap()).collect();
    names.sort();
    assert_eq!(names, vec![OsString::from("a"), OsString::from("b")]);
}

#[test]
fn test_create_children() {
    let tmp = tempfile::tempdir().unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    let wd = ino
        .add_watch(tmp.path(), InotifyMask::CREATE | InotifyMask::DELETE)
        .unwrap();

    fs::write(tmp.path().join("file"), b"").unwrap();
    fs::create_dir(tmp.path().join("subdir")).unwrap();

    let events = read_events(&ino, 2);
    assert_eq!(events.len(), 2, "{:?}", events);

    let file_ev = events.iter().find(|e| e.name == name("file")).unwrap();
    assert_eq!(file_ev.wd, wd);
    assert_eq!(file_ev.mask, InotifyMask::CREATE);

    let dir_ev = events.iter().find(|e| e.name == name("subdir")).unwrap();
    assert_eq!(dir_ev.mask, InotifyMask::CREATE | InotifyMask::ISDIR);
}

#[test]
fn test_rename_shares_cookie() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("foo"), b"").unwrap();
    fs::write(tmp.path().join("bar"), b"").unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    let wd = ino.add_watch(tmp.path(), InotifyMask::ALL_EVENTS).unwrap();

    fs::rename(tmp.path().join("foo"), tmp.path().join("bar")).unwrap();

    let events = drain_events(&ino);
    let from = events
        .iter()
        .find(|e| e.mask.contains(InotifyMask::MOVED_FROM))
        .unwrap();
    let to = events
        .iter()
        .find(|e| e.mask.contains(InotifyMask::MOVED_TO))
        .unwrap();

    assert_eq!(from.wd, wd);
    assert_eq!(to.wd, wd);
    assert_eq!(from.name, name("foo"));
    assert_eq!(to.name, name("bar"));
    assert_ne!(from.cookie, 0);
    assert_eq!(from.cookie, to.cookie);

    // MOVED_FROM must precede MOVED_TO
    let from_pos = events.iter().position(|e| e == from).unwrap();
    let to_pos = events.iter().position(|e| e == to).unwrap();
    assert!(from_pos < to_pos);

    // The overwrite is reported as the move, not as deletes/creates
    for ev in &events {
        assert!(
            !ev.mask.intersects(InotifyMask::CREATE | InotifyMask::DELETE),
            "{:?}",
            ev
        );
    }
}

#[test]
fn test_unlink_with_remaining_hardlink() {
    let tmp = tempfile::tempdir().unwrap();
    let f = tmp.path().join("f");
    let g = tmp.path().join("g");
    fs::write(&f, b"").unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    let wd = ino
        .add_watch(&f, InotifyMask::ATTRIB | InotifyMask::DELETE_SELF)
        .unwrap();

    fs::hard_link(&f, &g).unwrap();
    fs::remove_file(&g).unwrap();

    let events = read_events(&ino, 1);
    assert!(!events.is_empty());
    for ev in &events {
        assert_eq!(ev.wd, wd);
        assert!(ev.mask.contains(InotifyMask::ATTRIB), "{:?}", ev);
        assert!(!ev.mask.contains(InotifyMask::DELETE_SELF), "{:?}", ev);
        assert_eq!(ev.name, None);
    }
}

#[test]
fn test_delete_self_then_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let f = tmp.path().join("f");
    fs::write(&f, b"").unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    let wd = ino.add_watch(&f, InotifyMask::DELETE_SELF).unwrap();

    fs::remove_file(&f).unwrap();

    let events = read_events(&ino, 2);
    assert_eq!(events.len(), 2, "{:?}", events);
    assert_eq!(events[0].wd, wd);
    assert!(events[0].mask.contains(InotifyMask::DELETE_SELF));
    assert_eq!(events[1].mask, InotifyMask::IGNORED);
}

#[test]
fn test_rm_watch_produces_one_ignored() {
    let tmp = tempfile::tempdir().unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    let wd = ino.add_watch(tmp.path(), InotifyMask::ALL_EVENTS).unwrap();

    ino.rm_watch(wd).unwrap();

    let events = read_events(&ino, 1);
    assert_eq!(events.len(), 1, "{:?}", events);
    assert_eq!(events[0].wd, wd);
    assert_eq!(events[0].mask, InotifyMask::IGNORED);

    // The id is gone now
    assert_eq!(
        ino.rm_watch(wd).unwrap_err().code(),
        libc::EINVAL
    );

    // Activity after removal produces nothing for this id
    fs::write(tmp.path().join("late"), b"").unwrap();
    let events = drain_events(&ino);
    assert!(events.is_empty(), "{:?}", events);
}

#[test]
fn test_oneshot() {
    let tmp = tempfile::tempdir().unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    let wd = ino
        .add_watch(
            tmp.path(),
            InotifyMask::CREATE | InotifyMask::DELETE | InotifyMask::ONESHOT,
        )
        .unwrap();

    fs::write(tmp.path().join("one"), b"").unwrap();
    fs::write(tmp.path().join("two"), b"").unwrap();

    let events = read_events(&ino, 2);
    // Exactly one substantive event, immediately followed by IGNORED
    assert_eq!(events.len(), 2, "{:?}", events);
    assert_eq!(events[0].wd, wd);
    assert_eq!(events[0].mask, InotifyMask::CREATE);
    assert_eq!(events[1].mask, InotifyMask::IGNORED);

    let rest = drain_events(&ino);
    assert!(rest.is_empty(), "{:?}", rest);
}

#[test]
fn test_same_file_same_wd() {
    let tmp = tempfile::tempdir().unwrap();
    let f = tmp.path().join("f");
    let g = tmp.path().join("g");
    fs::write(&f, b"").unwrap();
    fs::hard_link(&f, &g).unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    let wd1 = ino.add_watch(&f, InotifyMask::ATTRIB).unwrap();
    let wd2 = ino.add_watch(&g, InotifyMask::ATTRIB).unwrap();
    assert_eq!(wd1, wd2);

    // Repeating the same mask on the same path is idempotent: same id, no events
    let wd3 = ino.add_watch(&f, InotifyMask::ATTRIB).unwrap();
    assert_eq!(wd1, wd3);
    assert!(drain_events(&ino).is_empty());
}

#[test]
fn test_add_watch_bad_arguments() {
    let tmp = tempfile::tempdir().unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();

    assert_eq!(
        ino.add_watch(tmp.path(), InotifyMask::empty())
            .unwrap_err()
            .code(),
        libc::EINVAL
    );

    assert_eq!(
        ino.add_watch(tmp.path().join("missing"), InotifyMask::ALL_EVENTS)
            .unwrap_err()
            .code(),
        libc::ENOENT
    );

    assert_eq!(
        ino.add_watch(tmp.path().join("f"), InotifyMask::ONLYDIR | InotifyMask::ALL_EVENTS)
            .unwrap_err()
            .code(),
        libc::ENOENT
    );

    fs::write(tmp.path().join("f"), b"").unwrap();
    assert_eq!(
        ino.add_watch(tmp.path().join("f"), InotifyMask::ONLYDIR | InotifyMask::ALL_EVENTS)
            .unwrap_err()
            .code(),
        libc::ENOTDIR
    );

    assert_eq!(ino.rm_watch(-1).unwrap_err().code(), libc::EINVAL);
    assert_eq!(ino.rm_watch(12345).unwrap_err().code(), libc::EINVAL);
}

#[test]
fn test_queue_overflow() {
    let tmp = tempfile::tempdir().unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    ino.set_param(IN_MAX_QUEUED_EVENTS, 4).unwrap();

    let wd = ino.add_watch(tmp.path(), InotifyMask::CREATE).unwrap();

    // Far more events than the socket buffer plus a 4-entry queue can hold
    for i in 0..400 {
        fs::write(tmp.path().join(format!("file-{:04}-padding-name", i)), b"").unwrap();
    }

    // Give the worker time to observe everything before draining
    std::thread::sleep(Duration::from_millis(500));
    let events = drain_events(&ino);

    let overflows: Vec<_> = events
        .iter()
        .filter(|e| e.mask.contains(InotifyMask::Q_OVERFLOW))
        .collect();
    assert_eq!(overflows.len(), 1, "{:?}", overflows);
    assert_eq!(overflows[0].wd, -1);
    assert_eq!(overflows[0].name, None);

    // Everything delivered before the overflow is an ordinary CREATE
    for ev in &events {
        if !ev.mask.contains(InotifyMask::Q_OVERFLOW) {
            assert_eq!(ev.wd, wd);
            assert!(ev.mask.contains(InotifyMask::CREATE));
        }
    }
}

#[test]
fn test_no_adjacent_duplicates() {
    let tmp = tempfile::tempdir().unwrap();
    let f = tmp.path().join("f");
    fs::write(&f, b"").unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    ino.add_watch(&f, InotifyMask::MODIFY).unwrap();

    for _ in 0..5 {
        use std::io::Write;
        let mut file = fs::OpenOptions::new().append(true).open(&f).unwrap();
        file.write_all(b"x").unwrap();
    }

    // One read after everything settles: the run of identical MODIFYs must have collapsed
    std::thread::sleep(Duration::from_millis(300));
    let events = read_events(&ino, 1);
    assert!(!events.is_empty());

    for pair in events.windows(2) {
        assert_ne!(pair[0], pair[1], "adjacent duplicates delivered");
    }
}

#[test]
fn test_move_self() {
    let tmp = tempfile::tempdir().unwrap();
    let f = tmp.path().join("f");
    fs::write(&f, b"").unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    let wd = ino.add_watch(&f, InotifyMask::MOVE_SELF).unwrap();

    fs::rename(&f, tmp.path().join("elsewhere")).unwrap();

    let events = read_events(&ino, 1);
    assert!(!events.is_empty());
    assert_eq!(events[0].wd, wd);
    assert!(events[0].mask.contains(InotifyMask::MOVE_SELF));
}

#[test]
fn test_names_are_nul_terminated() {
    let tmp = tempfile::tempdir().unwrap();

    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();
    ino.add_watch(tmp.path(), InotifyMask::CREATE).unwrap();

    fs::write(tmp.path().join("exact"), b"").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut buf = [0; INOTIFY_MIN_BUFSIZE * 8];
    loop {
        match ino.read_events(&mut buf) {
            Ok(mut iter) => {
                if let Some(ev) = iter.next() {
                    let raw = ev.name_cstr().unwrap();
                    assert_eq!(raw.to_bytes(), b"exact");
                    assert_eq!(
                        ev.name().unwrap(),
                        OsString::from_vec(b"exact".to_vec())
                    );
                    break;
                }
            }
            Err(e) if e.code() == libc::EAGAIN => {
                assert!(Instant::now() < deadline, "no event arrived");
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => panic!("read failed: {}", e),
        }
    }
}

#[test]
fn test_set_param_validation() {
    let ino = Inotify::new(InotifyFlags::NONBLOCK).unwrap();

    ino.set_param(IN_SOCKBUFSIZE, 8192).unwrap();
    ino.set_param(IN_MAX_QUEUED_EVENTS, 64).unwrap();

    assert_eq!(
        ino.set_param(IN_SOCKBUFSIZE, 0).unwrap_err().code(),
        libc::EINVAL
    );
    assert_eq!(
        ino.set_param(IN_MAX_QUEUED_EVENTS, -1).unwrap_err().code(),
        libc::EINVAL
    );
    assert_eq!(ino.set_param(99, 1).unwrap_err().code(), libc::EINVAL);
}
