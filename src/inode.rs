use std::sync::Arc;

use parking_lot::Mutex;

use crate::FileAttr;
use crate::FileType;
use crate::backend::HandleId;
use crate::mount::MountId;

/// An open handle issued by a backend, tagged with the mount that owns it.
///
/// The owner routes later `read`/`write` calls straight to the right backend
/// instance without consulting the mount table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BackendHandle {
    /// Opaque per-backend handle id.
    pub id: HandleId,
    /// Mount whose backend issued the handle.
    pub owner: MountId,
}

#[derive(Debug)]
struct InodeState {
    size: u64,
    backend: Option<BackendHandle>,
    /// Count of live VFS handles on this inode.
    open_handles: u32,
    atime_tick: u64,
}

/// Intrinsic metadata record of a file-system object, independent of name.
///
/// Inodes are shared through `Arc`; an inode is destroyed when the last
/// reference (dentry or open handle) drops. The file-type bit is fixed for
/// the inode's lifetime; size and the backend handle are mutable behind the
/// inode's own lock.
#[derive(Debug)]
pub struct Inode {
    ino: u64,
    mode: u32,
    uid: u32,
    gid: u32,
    state: Mutex<InodeState>,
}

impl Inode {
    /// Creates an inode with a single reference.
    pub fn new(ino: u64, mode: u32, uid: u32, gid: u32, size: u64) -> Arc<Inode> {
        Arc::new(Inode {
            ino,
            mode,
            uid,
            gid,
            state: Mutex::new(InodeState {
                size,
                backend: None,
                open_handles: 0,
                atime_tick: 0,
            }),
        })
    }

    /// Inode number, unique within a VFS instance.
    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// File type and permission bits in libc encoding.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Owning user id.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Owning group id.
    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Whether this inode is a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Extends the recorded size to at least `end`. Never shrinks.
    pub(crate) fn grow_size(&self, end: u64) {
        let mut state = self.state.lock();
        if end > state.size {
            state.size = end;
        }
    }

    /// The backend handle bound to this inode, if any.
    pub fn backend_handle(&self) -> Option<BackendHandle> {
        self.state.lock().backend
    }

    /// Binds a backend handle. Keeps an existing binding: the first open
    /// through the backend wins.
    pub(crate) fn bind_backend_handle(&self, handle: BackendHandle) {
        let mut state = self.state.lock();
        if state.backend.is_none() {
            state.backend = Some(handle);
        }
    }

    /// Records a new VFS handle on this inode.
    pub(crate) fn handle_opened(&self) {
        self.state.lock().open_handles += 1;
    }

    /// Records a closed VFS handle. When the last one goes, the bound
    /// backend handle is unbound and returned so the caller can close it
    /// through the owning backend.
    pub(crate) fn handle_closed(&self) -> Option<BackendHandle> {
        let mut state = self.state.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
        if state.open_handles == 0 {
            state.backend.take()
        } else {
            None
        }
    }

    /// Stamps the last-access tick.
    pub(crate) fn touch(&self, tick: u64) {
        let mut state = self.state.lock();
        if tick > state.atime_tick {
            state.atime_tick = tick;
        }
    }

    /// Tick of the most recent access, for access-ordering consumers.
    pub fn atime_tick(&self) -> u64 {
        self.state.lock().atime_tick
    }

    /// Metadata snapshot for `stat`.
    pub fn attr(&self) -> FileAttr {
        let state = self.state.lock();
        FileAttr {
            ino: self.ino,
            size: state.size,
            kind: FileType::from_mode(self.mode),
            perm: (self.mode & 0o7777) as u16,
            uid: self.uid,
            gid: self.gid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_grows_monotonically() {
        let inode = Inode::new(1, libc::S_IFREG as u32 | 0o644, 0, 0, 0);
        inode.grow_size(100);
        assert_eq!(inode.size(), 100);
        inode.grow_size(50);
        assert_eq!(inode.size(), 100);
        inode.grow_size(200);
        assert_eq!(inode.size(), 200);
    }

    #[test]
    fn type_bits_are_decoded() {
        let dir = Inode::new(2, libc::S_IFDIR as u32 | 0o755, 0, 0, 0);
        assert!(dir.is_dir());
        let file = Inode::new(3, libc::S_IFREG as u32 | 0o644, 0, 0, 0);
        assert!(!file.is_dir());
        assert_eq!(file.attr().kind, FileType::RegularFile);
        assert_eq!(dir.attr().perm, 0o755);
    }

    #[test]
    fn first_backend_binding_wins() {
        let inode = Inode::new(4, libc::S_IFREG as u32 | 0o644, 0, 0, 0);
        assert!(inode.backend_handle().is_none());
        inode.bind_backend_handle(BackendHandle {
            id: HandleId(7),
            owner: MountId(1),
        });
        inode.bind_backend_handle(BackendHandle {
            id: HandleId(8),
            owner: MountId(2),
        });
        let bound = inode.backend_handle().unwrap();
        assert_eq!(bound.id, HandleId(7));
        assert_eq!(bound.owner, MountId(1));
    }

    #[test]
    fn last_close_unbinds_the_backend_handle() {
        let inode = Inode::new(5, libc::S_IFREG as u32 | 0o644, 0, 0, 0);
        inode.bind_backend_handle(BackendHandle {
            id: HandleId(3),
            owner: MountId(1),
        });

        inode.handle_opened();
        inode.handle_opened();
        assert!(inode.handle_closed().is_none());
        let released = inode.handle_closed().unwrap();
        assert_eq!(released.id, HandleId(3));
        assert!(inode.backend_handle().is_none());
    }
}
