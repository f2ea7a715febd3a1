use std::collections::BTreeMap;

use crate::internal_prelude::*;

use crate::dirent::Dir;
use crate::stat::FileKind;

/// One directory child as observed by the most recent listing.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct DepItem {
    pub name: CString,
    pub inode: u64,
    pub kind: FileKind,
}

impl DepItem {
    pub fn new(name: CString, inode: u64, kind: FileKind) -> Self {
        Self { name, inode, kind }
    }
}

/// The persistent, name-ordered set of children of one watched directory.
#[derive(Debug, Default)]
pub(crate) struct DepList {
    items: BTreeMap<CString, DepItem>,
}

impl DepList {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &CStr) -> Option<&DepItem> {
        self.items.get(name)
    }

    pub fn insert(&mut self, item: DepItem) {
        self.items.insert(item.name.clone(), item);
    }

    pub fn remove(&mut self, name: &CStr) -> Option<DepItem> {
        self.items.remove(name)
    }

    pub fn set_kind(&mut self, name: &CStr, kind: FileKind) {
        if let Some(item) = self.items.get_mut(name) {
            item.kind = kind;
        }
    }

    pub fn set_inode(&mut self, name: &CStr, inode: u64) {
        if let Some(item) = self.items.get_mut(name) {
            item.inode = inode;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DepItem> {
        self.items.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &CString> {
        self.items.keys()
    }
}

/// A fresh directory scan, classified against the previous dep list.
///
/// Entries whose name and inode both match the previous listing are recorded in `unchanged`
/// (they produce no events); everything else lands in `fresh`. An entry whose name matched but
/// whose inode did not is flagged `readded`: something else now sits where a known file used to.
#[derive(Debug, Default)]
pub(crate) struct DirListing {
    unchanged: Vec<CString>,
    fresh: Vec<FreshItem>,
}

impl DirListing {
    /// Consume a listing taken with no previous dep list (every entry is fresh), yielding the
    /// items themselves. Used for the initial scan of a newly watched directory.
    pub fn into_items(self) -> Vec<DepItem> {
        debug_assert!(self.unchanged.is_empty());
        self.fresh.into_iter().map(|fi| fi.item).collect()
    }
}

#[derive(Debug)]
struct FreshItem {
    item: DepItem,
    readded: bool,
    moved: bool,
    /// Index into the diff's changed-old-items table once a rename pair is found.
    moved_from: Option<usize>,
}

/// One observed change, in mandatory emission order.
///
/// For any single name, a disappearance (`Removed`/`Moved.from`) is always produced strictly
/// before an appearance (`Added`/`Moved.to`) of that name.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum DepAction {
    /// A file appeared. Not present for rename targets.
    Added(DepItem),
    /// A file disappeared (deleted, or moved out of the directory).
    Removed(DepItem),
    /// A file was overwritten by a rename inside the directory. No `Removed` is produced; the
    /// `Moved` that replaced it stands in for its disappearance.
    Replaced(DepItem),
    /// A file was renamed inside the directory.
    Moved { from: DepItem, to: DepItem },
}

/// Take a fresh listing of the directory open at `fd`, classified against `before`.
///
/// The directory is re-opened via `openat(fd, ".")` so the long-lived descriptor's position is
/// untouched. A directory that has already been deleted (`ENOENT` on re-open) yields an empty
/// listing: every previously known child is about to be reported gone.
pub(crate) fn listing(fd: RawFd, before: &DepList) -> Result<DirListing> {
    let dir = match Dir::reopen(fd) {
        Ok(dir) => dir,
        Err(e) if e.code() == libc::ENOENT => return Ok(DirListing::default()),
        Err(e) => return Err(e),
    };

    let mut out = DirListing::default();

    for entry in dir {
        let entry = entry?;
        let name = entry.name_cstr();
        if name.to_bytes() == b"." || name.to_bytes() == b".." {
            continue;
        }

        let mut readded = false;
        if let Some(old) = before.get(name) {
            if old.inode == entry.ino() {
                out.unchanged.push(name.to_owned());
                continue;
            }
            // The name is still there but the inode is not: the old file was overwritten
            readded = true;
        }

        out.fresh.push(FreshItem {
            item: DepItem::new(name.to_owned(), entry.ino(), entry.file_kind()),
            readded,
            moved: false,
            moved_from: None,
        });
    }

    Ok(out)
}

struct OldItem {
    item: DepItem,
    moved: bool,
    replaced: bool,
}

/// Recognize all the changes between `before` and a fresh listing.
///
/// Returns the observed changes in emission order. The caller applies them: every `Removed`,
/// `Replaced`, and `Moved.from` item leaves the dep list, and every `Added` and `Moved.to` item
/// enters it; `unchanged` entries stay put.
///
/// Between two consecutive scans a file can be: unchanged (nothing happened), added (created or
/// moved in from elsewhere), removed (unlinked or moved out), moved (renamed within the watched
/// directory), replaced (overwritten by a rename within the directory), or readded (created
/// with the name of a just-deleted file, or moved over another file).
pub(crate) fn calculate(before: &DepList, mut fresh_listing: DirListing) -> Vec<DepAction> {
    let mut old: Vec<OldItem> = before
        .iter()
        .filter(|item| !fresh_listing.unchanged.contains(&item.name))
        .map(|item| OldItem {
            item: item.clone(),
            moved: false,
            replaced: false,
        })
        .collect();

    let fresh = &mut fresh_listing.fresh;

    // Pair renames by inode: each changed old item claims the first fresh entry with the same
    // inode that is not already part of a pair.
    let mut n_moves = 0usize;
    for i in 0..old.len() {
        for j in 0..fresh.len() {
            if old[i].item.inode == fresh[j].item.inode && !fresh[j].moved {
                if fresh[j].readded {
                    // The rename target overwrote a file we knew about
                    let name = fresh[j].item.name.clone();
                    if let Some(k) = old.iter().position(|o| o.item.name == name) {
                        old[k].replaced = true;
                    }
                }

                fresh[j].moved = true;
                fresh[j].moved_from = Some(i);
                old[i].moved = true;
                n_moves += 1;
                break;
            }
        }
    }

    let mut actions = Vec::new();

    // Disappearances first: files that were deleted or moved out, and files that a rename
    // overwrote (those produce no event of their own; the MOVED_TO substitutes).
    for oi in &old {
        if !oi.moved {
            if oi.replaced {
                actions.push(DepAction::Replaced(oi.item.clone()));
            } else {
                actions.push(DepAction::Removed(oi.item.clone()));
            }
        }
    }

    // Renames next, in rounds to order overlapping pairs. Renames overlap when they share a
    // filename, e.g. "mv file file.bak; mv file.new file" between two scans: the second move
    // must not be reported until the file it overwrites has itself been reported moved. Each
    // round reports only moves whose target does not clobber a still-pending move source;
    // reporting one clears its source and lets a dependent move proceed in the next round.
    let mut want_overlap = false;
    while n_moves > 0 {
        let n_moves_prev = n_moves;

        for j in 0..fresh.len() {
            let i = match fresh[j].moved_from {
                Some(i) => i,
                None => continue,
            };

            let is_overlap = fresh[j].readded
                && old
                    .iter()
                    .any(|o| o.item.name == fresh[j].item.name && o.moved);

            if is_overlap == want_overlap {
                let mut to = fresh[j].item.clone();
                if to.kind.is_unknown() {
                    to.kind = old[i].item.kind;
                    fresh[j].item.kind = to.kind;
                }

                actions.push(DepAction::Moved {
                    from: old[i].item.clone(),
                    to,
                });

                old[i].moved = false;
                fresh[j].moved_from = None;
                want_overlap = false;
                n_moves -= 1;
            }
        }

        // No progress means a truly circular rename chain; without a temporary name to pivot
        // on it cannot be ordered, so break it at an arbitrary point.
        if n_moves_prev == n_moves {
            log::warn!("circular rename detected");
            want_overlap = true;
        }
    }

    // Appearances last
    for fi in fresh.iter() {
        if !fi.moved {
            actions.push(DepAction::Added(fi.item.clone()));
        }
    }

    actions
}
