use std::sync::{Arc, RwLock};

use crate::internal_prelude::*;

use crate::consts::InotifyFlags;
use crate::worker::{self, Command, WorkerHandle};

/// Capacity of the process-wide instance table.
const INSTANCE_SZ: usize = 100;

#[derive(Clone)]
enum Slot {
    Free,
    /// Claimed by an `init` in progress; the worker is not published yet, but the slot cannot
    /// be handed to a concurrent `init`.
    Reserved,
    Active(Arc<WorkerHandle>),
}

/// The process-wide table mapping instance descriptors to their workers.
///
/// Clients identify an instance by its raw file descriptor, and any thread may call the API,
/// so the table is shared and guarded by a single reader/writer lock: lookups during
/// dispatch read-lock it, `init` and worker teardown write-lock it.
static INSTANCES: RwLock<Vec<Slot>> = RwLock::new(Vec::new());

/// Create a new instance: reserve a slot, start a worker, publish it.
pub(crate) fn create(flags: InotifyFlags) -> Result<FileDesc> {
    let index = {
        let mut slots = INSTANCES.write().unwrap();
        if slots.is_empty() {
            slots.resize(INSTANCE_SZ, Slot::Free);
        }

        match slots.iter().position(|s| matches!(s, Slot::Free)) {
            Some(index) => {
                slots[index] = Slot::Reserved;
                index
            }
            None => return Err(Error::from_code(libc::EMFILE)),
        }
    };

    let (client, handle) = match worker::create(flags) {
        Ok(created) => created,
        Err(e) => {
            INSTANCES.write().unwrap()[index] = Slot::Free;
            return Err(e);
        }
    };

    let mut slots = INSTANCES.write().unwrap();

    // A worker whose descriptor was closed may not have unlisted itself yet, and the kernel
    // can hand the same fd number right back to us. Evict such stale entries now.
    for slot in slots.iter_mut() {
        if let Slot::Active(h) = slot {
            if h.client_fd() == client.fd() {
                log::warn!("instance fd collision found: fd {}", client.fd());
                *slot = Slot::Free;
            }
        }
    }

    slots[index] = Slot::Active(handle);

    Ok(client)
}

/// Execute one command against the instance identified by `fd`.
///
/// `EBADF` if `fd` is not an open descriptor (or the worker tears down mid-call), `EINVAL` if
/// it is open but no instance answers to it.
pub(crate) fn execute(fd: RawFd, cmd: Command) -> Result<i32> {
    if !crate::fcntl::is_fd_valid(fd) {
        return Err(Error::from_code(libc::EBADF));
    }

    let (index, handle) = {
        let slots = INSTANCES.read().unwrap();
        match slots.iter().enumerate().find_map(|(i, s)| match s {
            Slot::Active(h) if h.client_fd() == fd => Some((i, Arc::clone(h))),
            _ => None,
        }) {
            Some(found) => found,
            None => return Err(Error::from_code(libc::EINVAL)),
        }
    };

    // The worker may tear down (and its slot be recycled) between the lookup above and the
    // command submission; revalidate under the command mutex before trusting the handle.
    handle.execute(cmd, || {
        let slots = INSTANCES.read().unwrap();
        let still_ours = matches!(&slots[index], Slot::Active(h) if Arc::ptr_eq(h, &handle));
        if !still_ours {
            log::warn!("instance table race detected: fd {}", fd);
        }
        still_ours
    })
}

/// Remove a worker from the table. Called by the worker itself on teardown.
pub(crate) fn unlist(handle: &Arc<WorkerHandle>) {
    let mut slots = INSTANCES.write().unwrap();
    for slot in slots.iter_mut() {
        if matches!(slot, Slot::Active(h) if Arc::ptr_eq(h, handle)) {
            *slot = Slot::Free;
            break;
        }
    }
}
