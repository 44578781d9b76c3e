use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dentry::Dentry;
use crate::errno::Errno;
use crate::mount::Mount;
use crate::open_flags::OpenFlags;

/// Number of slots in the file-handle table.
pub(crate) const MAX_OPEN_FILES: usize = 1024;

/// Caller-visible file handle. Handles are 1-based; handle `h` occupies
/// table slot `h - 1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Fd(pub u32);

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Per-open record. Pins its dentry and mount for as long as the handle is
/// live. The position is advisory; reads and writes are positional.
#[derive(Debug, Clone)]
pub(crate) struct OpenFile {
    pub(crate) dentry: Arc<Dentry>,
    pub(crate) mount: Arc<Mount>,
    pub(crate) flags: OpenFlags,
    pub(crate) pos: u64,
}

/// Fixed-capacity table bridging [`Fd`]s to open-file records.
///
/// Each slot has its own lock, never held together with a dentry or inode
/// lock: lookups clone the record out and release the slot immediately.
pub(crate) struct HandleTable {
    slots: Vec<Mutex<Option<OpenFile>>>,
}

impl HandleTable {
    pub(crate) fn new() -> HandleTable {
        let mut slots = Vec::with_capacity(MAX_OPEN_FILES);
        slots.resize_with(MAX_OPEN_FILES, || Mutex::new(None));
        HandleTable { slots }
    }

    /// Claims the first free slot. Fails with `EMFILE` when the table is
    /// exhausted.
    pub(crate) fn alloc(&self, file: OpenFile) -> Result<Fd, Errno> {
        for (idx, slot) in self.slots.iter().enumerate() {
            let mut entry = slot.lock();
            if entry.is_none() {
                *entry = Some(file);
                return Ok(Fd(idx as u32 + 1));
            }
        }
        Err(Errno::EMFILE)
    }

    /// Snapshot of the record behind `fd`, or `EBADF`.
    pub(crate) fn get(&self, fd: Fd) -> Result<OpenFile, Errno> {
        let entry = self.slot(fd)?.lock();
        entry.clone().ok_or(Errno::EBADF)
    }

    /// Updates the advisory position. Stale handles are ignored.
    pub(crate) fn set_pos(&self, fd: Fd, pos: u64) {
        if let Ok(slot) = self.slot(fd) {
            if let Some(entry) = slot.lock().as_mut() {
                entry.pos = pos;
            }
        }
    }

    /// Frees `fd` and hands the record back to the caller, who releases the
    /// references it holds. A second free of the same handle fails with
    /// `EBADF`.
    pub(crate) fn free(&self, fd: Fd) -> Result<OpenFile, Errno> {
        self.slot(fd)?.lock().take().ok_or(Errno::EBADF)
    }

    /// Frees every in-use slot. Called before mounts are torn down.
    pub(crate) fn drain(&self) {
        for slot in &self.slots {
            slot.lock().take();
        }
    }

    /// Number of handles currently in use.
    pub(crate) fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    fn slot(&self, fd: Fd) -> Result<&Mutex<Option<OpenFile>>, Errno> {
        if fd.0 == 0 {
            return Err(Errno::EBADF);
        }
        self.slots.get(fd.0 as usize - 1).ok_or(Errno::EBADF)
    }
}
