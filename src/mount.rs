use std::fmt;
use std::sync::Arc;

use crate::backend::Backend;
use crate::dentry::Dentry;
use crate::inode::Inode;

/// Identifies a mount within a VFS instance. Routes backend handles back to
/// the backend that issued them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MountId(pub u64);

/// A binding of a namespace prefix to a backend instance.
///
/// The mountpoint is stored normalized. A mount without a backend is a
/// synthetic in-memory namespace served by the dentry tree and the
/// zero-filled I/O model.
pub(crate) struct Mount {
    id: MountId,
    mountpoint: String,
    backend_root: String,
    backend: Option<Box<dyn Backend>>,
    root: Arc<Dentry>,
}

impl Mount {
    /// Creates a backendless mount entry with a synthetic root directory.
    pub(crate) fn new(id: MountId, mountpoint: String, backend_root: String, root_ino: u64) -> Mount {
        let root_inode = Inode::new(root_ino, libc::S_IFDIR as u32 | 0o755, 0, 0, 0);
        Mount {
            id,
            mountpoint,
            backend_root,
            backend: None,
            root: Dentry::new_root(root_inode),
        }
    }

    pub(crate) fn id(&self) -> MountId {
        self.id
    }

    pub(crate) fn mountpoint(&self) -> &str {
        &self.mountpoint
    }

    pub(crate) fn backend(&self) -> Option<&dyn Backend> {
        self.backend.as_deref()
    }

    pub(crate) fn attach_backend(&mut self, backend: Box<dyn Backend>) {
        self.backend = Some(backend);
    }

    pub(crate) fn root(&self) -> &Arc<Dentry> {
        &self.root
    }

    /// In-mount remainder of a normalized path, without a leading separator.
    ///
    /// The mountpoint itself maps to the empty remainder, which addresses
    /// the backend root.
    pub(crate) fn relative_path<'a>(&self, path: &'a str) -> &'a str {
        let rel = if self.mountpoint == "/" {
            path
        } else {
            path.strip_prefix(self.mountpoint.as_str()).unwrap_or(path)
        };
        rel.trim_start_matches('/')
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("id", &self.id)
            .field("mountpoint", &self.mountpoint)
            .field("backend_root", &self.backend_root)
            .field("has_backend", &self.backend.is_some())
            .finish()
    }
}

/// Selects the mount with the longest mountpoint that prefixes `path`.
///
/// A match must end at a component boundary so that `/ab` never claims
/// `/abc`. The `/` mount always matches as a fallback. When two entries tie
/// on length the first in list order wins, which is deterministic given
/// head insertion.
pub(crate) fn find_best<'a>(mounts: &'a [Arc<Mount>], path: &str) -> Option<&'a Arc<Mount>> {
    let mut best: Option<&'a Arc<Mount>> = None;
    let mut best_len = 0;

    for mount in mounts {
        let mp = mount.mountpoint();
        if mp == "/" {
            if best.is_none() {
                best = Some(mount);
                best_len = 1;
            }
            continue;
        }

        if path.starts_with(mp)
            && (path.len() == mp.len() || path.as_bytes()[mp.len()] == b'/')
            && mp.len() > best_len
        {
            best = Some(mount);
            best_len = mp.len();
        }
    }

    best
}
