use std::sync::Arc;

use log::debug;
use log::warn;
use parking_lot::Mutex;

use crate::FileAttr;
use crate::access;
use crate::access::AccessFlags;
use crate::access::check_access;
use crate::backend::BackendType;
use crate::clock::Clock;
use crate::dentry;
use crate::dentry::Dentry;
use crate::errno::Errno;
use crate::handle::Fd;
use crate::handle::HandleTable;
use crate::handle::OpenFile;
use crate::inode::BackendHandle;
use crate::inode::Inode;
use crate::mount;
use crate::mount::Mount;
use crate::mount::MountId;
use crate::open_flags::OpenFlags;
use crate::path;
use crate::posix::PosixBackendType;
use crate::registry::BackendRegistry;

/// First inode number issued by a fresh instance.
const FIRST_INO: u64 = 1000;

/// Effective identity used for the implicit permission checks in `open`,
/// `read`, `write`, `unlink` and `rename`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Effective user id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
}

impl Credentials {
    /// The superuser: reads and writes anything, executes anything with at
    /// least one execute bit set.
    pub const ROOT: Credentials = Credentials { uid: 0, gid: 0 };
}

impl Default for Credentials {
    fn default() -> Self {
        Credentials::ROOT
    }
}

/// Whether path resolution may materialize missing components.
#[derive(Debug, Copy, Clone)]
enum ResolveMode {
    /// Missing components fail with `ENOENT`.
    RequireExisting,
    /// Missing components come into existence as the walk touches them.
    /// Intermediates become directories mode `0755` owned by root; the
    /// final component is created with `final_mode`.
    CreateMissing { final_mode: u32 },
}

struct Resolved {
    dentry: Arc<Dentry>,
    mount: Arc<Mount>,
    /// Whether the final component was materialized by this walk.
    created: bool,
}

struct MountList {
    initialized: bool,
    mounts: Vec<Arc<Mount>>,
}

/// A virtual-filesystem instance.
///
/// Owns the backend registry, the mount table and the file-handle table.
/// All operations may be called concurrently from any number of threads;
/// `shutdown` must not race other operations. Every operation except
/// [`Vfs::init`] and [`Vfs::register_backend`] fails with `EIO` until the
/// instance is initialized.
pub struct Vfs {
    /// Guards the mount list and the initialized flag.
    mounts: Mutex<MountList>,
    registry: BackendRegistry,
    handles: HandleTable,
    inos: Clock,
    mount_ids: Clock,
    ticks: Clock,
    creds: Credentials,
}

impl Default for Vfs {
    fn default() -> Self {
        Vfs::new()
    }
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let list = self.mounts.lock();
        f.debug_struct("Vfs")
            .field("initialized", &list.initialized)
            .field("mounts", &list.mounts.len())
            .field("open_handles", &self.handles.in_use())
            .finish()
    }
}

impl Vfs {
    /// Creates an uninitialized instance.
    pub fn new() -> Vfs {
        Vfs {
            mounts: Mutex::new(MountList {
                initialized: false,
                mounts: Vec::new(),
            }),
            registry: BackendRegistry::new(),
            handles: HandleTable::new(),
            inos: Clock::starting_at(FIRST_INO),
            mount_ids: Clock::starting_at(1),
            ticks: Clock::starting_at(1),
            creds: Credentials::ROOT,
        }
    }

    /// Sets the identity used for implicit permission checks.
    pub fn with_credentials(mut self, creds: Credentials) -> Vfs {
        self.creds = creds;
        self
    }

    /// Initializes the instance: registers the bundled posix backend,
    /// creates the default `/` mount and seeds a small sample tree.
    /// Initializing an already-initialized instance is a no-op.
    pub fn init(&self) -> Result<(), Errno> {
        {
            let mut list = self.mounts.lock();
            if list.initialized {
                return Ok(());
            }
            list.initialized = true;
        }

        match self.registry.register(Arc::new(PosixBackendType)) {
            Ok(()) => debug!("posix backend registered"),
            Err(Errno::EEXIST) => {}
            Err(err) => warn!("failed to register posix backend: {err}"),
        }

        let root_mount = Arc::new(self.make_mount("/".to_string(), ".".to_string()));
        self.seed_sample_tree(root_mount.root());
        self.mounts.lock().mounts.insert(0, root_mount);
        Ok(())
    }

    /// Tears the instance down: frees every open handle, destroys all
    /// mounts (each backend shuts down after its dentry subtree is gone)
    /// and clears the backend registry. The instance may be initialized
    /// again afterwards.
    pub fn shutdown(&self) -> Result<(), Errno> {
        let mounts = {
            let mut list = self.mounts.lock();
            if !list.initialized {
                return Ok(());
            }
            list.initialized = false;
            std::mem::take(&mut list.mounts)
        };

        self.handles.drain();
        for mount in &mounts {
            destroy_mount(mount);
        }
        self.registry.clear();
        Ok(())
    }

    /// Registers a backend type so later mounts can refer to it by name.
    pub fn register_backend(&self, ops: Arc<dyn BackendType>) -> Result<(), Errno> {
        self.registry.register(ops)
    }

    /// Binds `mountpoint` to a fresh instance of the named backend type.
    ///
    /// The backend attaches to `backend_root` (interpreted by the backend).
    /// Fails with `ENODEV` for an unknown type; a backend that fails to
    /// initialize leaves no mount entry behind.
    pub fn mount_backend(
        &self,
        mountpoint: &str,
        backend_root: &str,
        type_name: &str,
    ) -> Result<(), Errno> {
        self.ensure_init()?;
        let norm = path::normalize(mountpoint)?;
        let Some(ops) = self.registry.find(type_name) else {
            warn!("mount_backend: backend type {type_name:?} not registered");
            return Err(Errno::ENODEV);
        };

        let mut entry = self.make_mount(norm, backend_root.to_string());
        let backend = ops.init(backend_root)?;
        entry.attach_backend(backend);

        debug!(
            "mounted {type_name:?} backend at {:?} (root {backend_root:?})",
            entry.mountpoint()
        );
        self.mounts.lock().mounts.insert(0, Arc::new(entry));
        Ok(())
    }

    /// Unmounts the entry whose mountpoint matches exactly.
    pub fn unmount_backend(&self, mountpoint: &str) -> Result<(), Errno> {
        self.ensure_init()?;
        let norm = path::normalize(mountpoint)?;
        let removed = {
            let mut list = self.mounts.lock();
            match list.mounts.iter().position(|m| m.mountpoint() == norm) {
                Some(pos) => list.mounts.remove(pos),
                None => return Err(Errno::ENOENT),
            }
        };
        destroy_mount(&removed);
        Ok(())
    }

    /// Opens `path`, returning a 1-based file handle.
    ///
    /// With the create flag on a backend-backed mount the file is
    /// materialized by the backend; on a synthetic mount it is materialized
    /// in the directory cache. Directories cannot be opened (`EISDIR`).
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<Fd, Errno> {
        self.open_impl(path, flags, 0o644)
    }

    /// Creates `path` exclusively with the given permission bits and opens
    /// it read-write. Equivalent to `open` with create + exclusive.
    pub fn create(&self, path: &str, mode: u32) -> Result<Fd, Errno> {
        self.open_impl(
            path,
            OpenFlags(libc::O_CREAT | libc::O_EXCL | libc::O_RDWR),
            mode,
        )
    }

    fn open_impl(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<Fd, Errno> {
        self.ensure_init()?;
        let norm = path::normalize(path)?;
        let mount = self.best_mount(&norm)?;

        if flags.has_create() {
            if mount.backend().is_some() {
                return self.open_create_backend(&mount, &norm, flags, mode);
            }
            // Synthetic mount: the file comes into existence in the cache.
            let resolved = self.resolve(
                &norm,
                ResolveMode::CreateMissing {
                    final_mode: libc::S_IFREG as u32 | (mode & 0o7777),
                },
            )?;
            if flags.has_excl() && !resolved.created {
                return Err(Errno::EEXIST);
            }
            if resolved.dentry.inode().is_dir() {
                return Err(Errno::EISDIR);
            }
            self.check_perm(resolved.dentry.inode(), access::access_mask_for_open(flags))?;
            return self.alloc_handle(resolved, flags);
        }

        let resolved = match self.resolve(&norm, ResolveMode::RequireExisting) {
            Ok(resolved) => resolved,
            Err(Errno::ENOENT) if mount.backend().is_some() => {
                self.materialize_from_backend(&mount, &norm)?
            }
            Err(err) => return Err(err),
        };
        if resolved.dentry.inode().is_dir() {
            return Err(Errno::EISDIR);
        }
        self.check_perm(resolved.dentry.inode(), access::access_mask_for_open(flags))?;

        if resolved.dentry.inode().backend_handle().is_none() {
            if let Some(backend) = resolved.mount.backend() {
                let rel = resolved.mount.relative_path(&norm);
                let handle = backend.open(rel, flags)?;
                resolved.dentry.inode().bind_backend_handle(BackendHandle {
                    id: handle,
                    owner: resolved.mount.id(),
                });
            }
        }
        self.alloc_handle(resolved, flags)
    }

    /// Create-through-backend path: the backend materializes the file and
    /// the VFS wraps the returned handle in a detached dentry.
    fn open_create_backend(
        &self,
        mount: &Arc<Mount>,
        norm: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Fd, Errno> {
        let backend = mount.backend().ok_or(Errno::EIO)?;
        let rel = mount.relative_path(norm);
        if rel.is_empty() {
            return Err(Errno::EISDIR);
        }

        let handle = if flags.has_excl() {
            match backend.create(rel, mode) {
                Ok(handle) => handle,
                Err(Errno::ENOTSUP) => backend.open(rel, flags)?,
                Err(err) => return Err(err),
            }
        } else {
            backend.open(rel, flags)?
        };

        let inode = Inode::new(
            self.inos.tick(),
            libc::S_IFREG as u32 | (mode & 0o7777),
            0,
            0,
            0,
        );
        inode.bind_backend_handle(BackendHandle {
            id: handle,
            owner: mount.id(),
        });
        let name = norm.rsplit('/').next().unwrap_or(norm);
        let dentry = Dentry::new(name, inode);
        self.alloc_handle(
            Resolved {
                dentry,
                mount: mount.clone(),
                created: true,
            },
            flags,
        )
    }

    /// Claims a handle slot and counts it on the inode, unwinding cleanly
    /// when the table is full.
    fn alloc_handle(&self, resolved: Resolved, flags: OpenFlags) -> Result<Fd, Errno> {
        let inode = resolved.dentry.inode().clone();
        let mount = resolved.mount.clone();
        inode.handle_opened();
        match self.handles.alloc(OpenFile {
            dentry: resolved.dentry,
            mount: resolved.mount,
            flags,
            pos: 0,
        }) {
            Ok(fd) => Ok(fd),
            Err(err) => {
                self.release_inode_handle(&inode, &mount);
                Err(err)
            }
        }
    }

    /// Counterpart of [`Vfs::alloc_handle`]: drops one handle reference and
    /// closes the backend handle once the last reference is gone.
    fn release_inode_handle(&self, inode: &Arc<Inode>, mount: &Arc<Mount>) {
        let Some(bound) = inode.handle_closed() else {
            return;
        };
        if bound.owner != mount.id() {
            warn!(
                "backend handle owned by {:?} released via {:?}",
                bound.owner,
                mount.id()
            );
            return;
        }
        if let Some(backend) = mount.backend() {
            if let Err(err) = backend.close(bound.id) {
                warn!("backend close failed: {err}");
            }
        }
    }

    /// The mount has the object but the cache does not: stat it through the
    /// backend and grow the cache to match.
    fn materialize_from_backend(
        &self,
        mount: &Arc<Mount>,
        norm: &str,
    ) -> Result<Resolved, Errno> {
        let backend = mount.backend().ok_or(Errno::ENOENT)?;
        let rel = mount.relative_path(norm);
        let attr = backend.stat(rel)?;
        let mode = attr.kind.to_mode_bits() | u32::from(attr.perm);
        let resolved = self.resolve(norm, ResolveMode::CreateMissing { final_mode: mode })?;
        if resolved.created {
            resolved.dentry.inode().grow_size(attr.size);
        }
        Ok(resolved)
    }

    /// Frees a handle. A handle closes successfully exactly once; later
    /// attempts fail with `EBADF`. Closing the last handle on an inode
    /// releases the inode's backend handle through the owning backend.
    pub fn close(&self, fd: Fd) -> Result<(), Errno> {
        let file = self.handles.free(fd)?;
        self.release_inode_handle(file.dentry.inode(), &file.mount);
        Ok(())
    }

    /// Advisory position of a handle: the end of its most recent read or
    /// write. Reads and writes themselves are positional.
    pub fn handle_position(&self, fd: Fd) -> Result<u64, Errno> {
        Ok(self.handles.get(fd)?.pos)
    }

    /// Positional read into `buf`. Short reads are legal at end-of-file.
    ///
    /// Backend-bound inodes read through their owning backend; synthetic
    /// files read zeros up to the recorded size.
    pub fn read(&self, fd: Fd, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        let file = self.handles.get(fd)?;
        let inode = file.dentry.inode().clone();
        if inode.is_dir() {
            return Err(Errno::EISDIR);
        }
        self.check_perm(&inode, AccessFlags::R_OK)?;
        inode.touch(self.ticks.tick());

        if let Some(bound) = inode.backend_handle() {
            let n = self.dispatch_io(&file, bound, |backend| {
                backend.read(bound.id, buf, offset)
            })?;
            self.handles.set_pos(fd, offset + n as u64);
            return Ok(n);
        }

        let size = inode.size();
        if offset >= size {
            return Ok(0);
        }
        let n = usize::min(buf.len(), (size - offset) as usize);
        buf[..n].fill(0);
        self.handles.set_pos(fd, offset + n as u64);
        Ok(n)
    }

    /// Positional write. Extends the recorded size monotonically.
    ///
    /// Backend-bound inodes write through their owning backend; synthetic
    /// files record the new size without storing content.
    pub fn write(&self, fd: Fd, data: &[u8], offset: u64) -> Result<usize, Errno> {
        let file = self.handles.get(fd)?;
        let inode = file.dentry.inode().clone();
        if inode.is_dir() {
            return Err(Errno::EISDIR);
        }
        self.check_perm(&inode, AccessFlags::W_OK)?;

        if let Some(bound) = inode.backend_handle() {
            let n = self.dispatch_io(&file, bound, |backend| {
                backend.write(bound.id, data, offset)
            })?;
            if n > 0 {
                inode.grow_size(offset + n as u64);
            }
            self.handles.set_pos(fd, offset + n as u64);
            return Ok(n);
        }

        inode.grow_size(offset + data.len() as u64);
        self.handles.set_pos(fd, offset + data.len() as u64);
        Ok(data.len())
    }

    /// Routes an I/O call to the backend that issued `bound`.
    ///
    /// The handle's own mount is the owner by construction; no mount-table
    /// lock is taken and none is held across the backend call.
    fn dispatch_io<T>(
        &self,
        file: &OpenFile,
        bound: BackendHandle,
        op: impl FnOnce(&dyn crate::backend::Backend) -> Result<T, Errno>,
    ) -> Result<T, Errno> {
        if bound.owner != file.mount.id() {
            warn!(
                "backend handle owned by {:?} reached a handle on {:?}",
                bound.owner,
                file.mount.id()
            );
            return Err(Errno::EIO);
        }
        let backend = file.mount.backend().ok_or(Errno::EIO)?;
        op(backend)
    }

    /// Metadata for `path`: the backend's view when one is mounted there,
    /// the directory cache's otherwise.
    pub fn stat(&self, path: &str) -> Result<FileAttr, Errno> {
        self.ensure_init()?;
        let norm = path::normalize(path)?;
        let mount = self.best_mount(&norm)?;

        if let Some(backend) = mount.backend() {
            let rel = mount.relative_path(&norm);
            match backend.stat(rel) {
                Ok(attr) => return Ok(attr),
                Err(err) => {
                    debug!("backend stat for {norm:?} failed: {err}; using directory cache");
                }
            }
        }

        let resolved = self.resolve(&norm, ResolveMode::RequireExisting)?;
        Ok(resolved.dentry.inode().attr())
    }

    /// Enumerates the directory at `path`, invoking `sink` once per name.
    ///
    /// The sink returns `false` to stop enumeration early. The fallback
    /// listing emits `.` and `..` before the cached children.
    pub fn readdir<F>(&self, path: &str, mut sink: F) -> Result<(), Errno>
    where
        F: FnMut(&str, Option<&FileAttr>) -> bool,
    {
        self.ensure_init()?;
        let norm = path::normalize(path)?;
        let mount = self.best_mount(&norm)?;

        if let Some(backend) = mount.backend() {
            let rel = mount.relative_path(&norm);
            match backend.readdir(rel, &mut sink) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!("backend readdir for {norm:?} failed: {err}; using directory cache");
                }
            }
        }

        let resolved = self.resolve(&norm, ResolveMode::RequireExisting)?;
        let inode = resolved.dentry.inode();
        if !inode.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        inode.touch(self.ticks.tick());

        if !sink(".", None) || !sink("..", None) {
            return Ok(());
        }
        for child in resolved.dentry.children() {
            let attr = child.inode().attr();
            if !sink(&child.name(), Some(&attr)) {
                break;
            }
        }
        Ok(())
    }

    /// Creates the directory at `path`.
    ///
    /// Returns `EEXIST` when the entry is already present. Missing
    /// intermediate directories are created along the way.
    pub fn mkdir(&self, path: &str, mode: u32) -> Result<(), Errno> {
        self.ensure_init()?;
        let norm = path::normalize(path)?;
        let mount = self.best_mount(&norm)?;

        if let Some(backend) = mount.backend() {
            let rel = mount.relative_path(&norm);
            if rel.is_empty() {
                return Err(Errno::EEXIST);
            }
            return backend.mkdir(rel, mode & 0o7777);
        }

        let resolved = self.resolve(
            &norm,
            ResolveMode::CreateMissing {
                final_mode: libc::S_IFDIR as u32 | (mode & 0o7777),
            },
        )?;
        if !resolved.created {
            return Err(Errno::EEXIST);
        }
        if !resolved.dentry.inode().is_dir() {
            return Err(Errno::EIO);
        }
        Ok(())
    }

    /// Removes the object at `path`.
    ///
    /// Delegates to the backend when one is mounted there and drops any
    /// cached dentry; otherwise detaches the dentry and destroys its
    /// subtree. Mount roots cannot be unlinked (`EBUSY`).
    pub fn unlink(&self, path: &str) -> Result<(), Errno> {
        self.ensure_init()?;
        let norm = path::normalize(path)?;
        let mount = self.best_mount(&norm)?;

        let cached = self.resolve(&norm, ResolveMode::RequireExisting).ok();
        if let Some(resolved) = &cached {
            if resolved.dentry.parent().is_none() {
                return Err(Errno::EBUSY);
            }
            self.check_perm(resolved.dentry.inode(), AccessFlags::W_OK)?;
        }

        if let Some(backend) = mount.backend() {
            let rel = mount.relative_path(&norm);
            if rel.is_empty() {
                return Err(Errno::EBUSY);
            }
            backend.unlink(rel)?;
            if let Some(resolved) = cached {
                resolved.dentry.detach();
                dentry::destroy_tree(&resolved.dentry);
            }
            return Ok(());
        }

        let resolved = cached.ok_or(Errno::ENOENT)?;
        resolved.dentry.detach();
        dentry::destroy_tree(&resolved.dentry);
        Ok(())
    }

    /// Renames `old` to `new` within one mount.
    ///
    /// Delegates to the backend when present. The synthetic fallback moves
    /// the dentry (and its subtree) to the new parent, refusing an occupied
    /// target name. Renaming across mounts fails with `EXDEV`.
    pub fn rename(&self, old: &str, new: &str) -> Result<(), Errno> {
        self.ensure_init()?;
        let old_norm = path::normalize(old)?;
        let new_norm = path::normalize(new)?;
        let old_mount = self.best_mount(&old_norm)?;
        let new_mount = self.best_mount(&new_norm)?;
        if old_mount.id() != new_mount.id() {
            return Err(Errno::EXDEV);
        }

        let cached = self.resolve(&old_norm, ResolveMode::RequireExisting).ok();
        if let Some(resolved) = &cached {
            if resolved.dentry.parent().is_none() {
                return Err(Errno::EBUSY);
            }
            self.check_perm(resolved.dentry.inode(), AccessFlags::W_OK)?;
        }

        if let Some(backend) = old_mount.backend() {
            let old_rel = old_mount.relative_path(&old_norm);
            let new_rel = new_mount.relative_path(&new_norm);
            if old_rel.is_empty() || new_rel.is_empty() {
                return Err(Errno::EBUSY);
            }
            backend.rename(old_rel, new_rel)?;
            if let Some(resolved) = cached {
                // The cached entry now carries a stale name; the next
                // resolve re-materializes from the backend.
                resolved.dentry.detach();
                dentry::destroy_tree(&resolved.dentry);
            }
            return Ok(());
        }

        let resolved = cached.ok_or(Errno::ENOENT)?;
        let (parent_path, new_name) = split_parent(&new_norm).ok_or(Errno::EBUSY)?;
        let parent = self.resolve(parent_path, ResolveMode::RequireExisting)?;
        if !parent.dentry.inode().is_dir() {
            return Err(Errno::ENOTDIR);
        }

        // A directory cannot move below itself.
        let mut cursor = Some(parent.dentry.clone());
        while let Some(node) = cursor {
            if Arc::ptr_eq(&node, &resolved.dentry) {
                return Err(Errno::EINVAL);
            }
            cursor = node.parent();
        }

        Dentry::reattach(&resolved.dentry, new_name, &parent.dentry)
    }

    /// Evaluates the classical permission model for `path` against an
    /// explicit identity.
    pub fn permission_check(
        &self,
        path: &str,
        uid: u32,
        gid: u32,
        mask: AccessFlags,
    ) -> Result<(), Errno> {
        self.ensure_init()?;
        let norm = path::normalize(path)?;
        let resolved = self.resolve(&norm, ResolveMode::RequireExisting)?;
        let inode = resolved.dentry.inode();
        if check_access(inode.uid(), inode.gid(), inode.mode(), uid, gid, mask) {
            Ok(())
        } else {
            Err(Errno::EACCES)
        }
    }

    /// Resolves `path` to its dentry without materializing anything.
    pub fn lookup(&self, path: &str) -> Result<Arc<Dentry>, Errno> {
        self.ensure_init()?;
        let norm = path::normalize(path)?;
        let resolved = self.resolve(&norm, ResolveMode::RequireExisting)?;
        Ok(resolved.dentry)
    }

    fn ensure_init(&self) -> Result<(), Errno> {
        if self.mounts.lock().initialized {
            Ok(())
        } else {
            Err(Errno::EIO)
        }
    }

    fn best_mount(&self, norm: &str) -> Result<Arc<Mount>, Errno> {
        let list = self.mounts.lock();
        if !list.initialized {
            return Err(Errno::EIO);
        }
        mount::find_best(&list.mounts, norm)
            .cloned()
            .ok_or(Errno::ENOENT)
    }

    /// Walks the dentry tree of the best mount for `norm`.
    ///
    /// Each parent's child list is scanned under that parent's lock only;
    /// the found child is followed after the lock is released. Materialized
    /// components are published atomically per parent, so concurrent walks
    /// never create duplicate sibling names.
    fn resolve(&self, norm: &str, mode: ResolveMode) -> Result<Resolved, Errno> {
        let mount = self.best_mount(norm)?;
        if norm == "/" || norm == mount.mountpoint() {
            return Ok(Resolved {
                dentry: mount.root().clone(),
                mount,
                created: false,
            });
        }

        let rel = mount.relative_path(norm);
        let comps: Vec<&str> = path::components(rel).collect();
        let last = comps.len().saturating_sub(1);
        let mut cur = mount.root().clone();
        let mut created = false;

        for (idx, comp) in comps.iter().enumerate() {
            if !cur.inode().is_dir() {
                return Err(Errno::ENOTDIR);
            }
            match mode {
                ResolveMode::RequireExisting => {
                    cur = cur.find_child(comp).ok_or(Errno::ENOENT)?;
                    created = false;
                }
                ResolveMode::CreateMissing { final_mode } => {
                    let mode_bits = if idx == last {
                        final_mode
                    } else {
                        libc::S_IFDIR as u32 | 0o755
                    };
                    let (child, fresh) = cur.find_or_insert(comp, || {
                        Dentry::new(comp, Inode::new(self.inos.tick(), mode_bits, 0, 0, 0))
                    });
                    cur = child;
                    created = fresh;
                }
            }
        }

        Ok(Resolved {
            dentry: cur,
            mount,
            created,
        })
    }

    fn check_perm(&self, inode: &Inode, mask: AccessFlags) -> Result<(), Errno> {
        if check_access(
            inode.uid(),
            inode.gid(),
            inode.mode(),
            self.creds.uid,
            self.creds.gid,
            mask,
        ) {
            Ok(())
        } else {
            Err(Errno::EACCES)
        }
    }

    fn make_mount(&self, mountpoint: String, backend_root: String) -> Mount {
        Mount::new(
            MountId(self.mount_ids.tick()),
            mountpoint,
            backend_root,
            self.inos.tick(),
        )
    }

    fn make_dir_dentry(&self, name: &str) -> Arc<Dentry> {
        Dentry::new(
            name,
            Inode::new(self.inos.tick(), libc::S_IFDIR as u32 | 0o755, 0, 0, 0),
        )
    }

    fn make_file_dentry(&self, name: &str) -> Arc<Dentry> {
        Dentry::new(
            name,
            Inode::new(self.inos.tick(), libc::S_IFREG as u32 | 0o644, 0, 0, 0),
        )
    }

    fn seed_sample_tree(&self, root: &Arc<Dentry>) {
        let dir1 = self.make_dir_dentry("dir1");
        root.add_child(&dir1);

        let dir2 = self.make_dir_dentry("dir2");
        dir1.add_child(&dir2);
        let file = self.make_file_dentry("file");
        dir2.add_child(&file);

        let dir3 = self.make_dir_dentry("dir3");
        dir1.add_child(&dir3);
        let file2 = self.make_file_dentry("file2");
        dir3.add_child(&file2);
    }
}

fn destroy_mount(mount: &Mount) {
    dentry::destroy_tree(mount.root());
    if let Some(backend) = mount.backend() {
        if let Err(err) = backend.shutdown() {
            warn!(
                "backend shutdown for {:?} failed: {err}",
                mount.mountpoint()
            );
        }
    }
    debug!("unmounted {:?}", mount.mountpoint());
}

/// Splits a normalized path into parent path and final component.
/// `"/"` has neither and yields `None`.
fn split_parent(norm: &str) -> Option<(&str, &str)> {
    let (parent, name) = norm.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some((if parent.is_empty() { "/" } else { parent }, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileType;

    #[test]
    fn operations_fail_before_init() {
        let vfs = Vfs::new();
        assert_eq!(vfs.stat("/dir1").err(), Some(Errno::EIO));
        assert_eq!(vfs.open("/dir1", OpenFlags::RDONLY).err(), Some(Errno::EIO));
        assert_eq!(vfs.mkdir("/x", 0o755).err(), Some(Errno::EIO));
        assert_eq!(vfs.close(Fd(1)).err(), Some(Errno::EBADF));
    }

    #[test]
    fn init_is_idempotent_and_seeds_the_sample_tree() {
        let vfs = Vfs::new();
        vfs.init().unwrap();
        vfs.init().unwrap();

        let file2 = vfs.lookup("/dir1/dir3/file2").unwrap();
        assert_eq!(file2.name(), "file2");
        let attr = vfs.stat("/dir1/dir2/file").unwrap();
        assert_eq!(attr.kind, FileType::RegularFile);
        vfs.shutdown().unwrap();
    }

    #[test]
    fn resolution_normalizes_and_walks_parents() {
        let vfs = Vfs::new();
        vfs.init().unwrap();

        let dentry = vfs.lookup("/dir1//dir2/../dir3/./file2").unwrap();
        assert_eq!(dentry.name(), "file2");
        let parent = dentry.parent().unwrap();
        assert_eq!(parent.name(), "dir3");
        let grandparent = parent.parent().unwrap();
        assert_eq!(grandparent.name(), "dir1");
        let root = grandparent.parent().unwrap();
        assert_eq!(root.name(), "/");
        assert!(root.parent().is_none());
        vfs.shutdown().unwrap();
    }

    #[test]
    fn lookup_does_not_materialize() {
        let vfs = Vfs::new();
        vfs.init().unwrap();
        assert_eq!(vfs.lookup("/no/such/path").err(), Some(Errno::ENOENT));
        assert_eq!(vfs.stat("/dir1/typo").err(), Some(Errno::ENOENT));
        vfs.shutdown().unwrap();
    }

    #[test]
    fn directories_cannot_be_opened() {
        let vfs = Vfs::new();
        vfs.init().unwrap();
        assert_eq!(vfs.open("/", OpenFlags::RDONLY).err(), Some(Errno::EISDIR));
        assert_eq!(
            vfs.open("/dir1", OpenFlags::RDONLY).err(),
            Some(Errno::EISDIR)
        );
        assert_eq!(vfs.close(Fd(999)).err(), Some(Errno::EBADF));
        vfs.shutdown().unwrap();
    }

    #[test]
    fn zero_fill_model_on_synthetic_mounts() {
        let vfs = Vfs::new();
        vfs.init().unwrap();

        let fd = vfs
            .open("/dir1/scratch.dat", OpenFlags(libc::O_CREAT | libc::O_RDWR))
            .unwrap();
        assert_eq!(vfs.write(fd, b"hello world", 0).unwrap(), 11);
        assert_eq!(vfs.stat("/dir1/scratch.dat").unwrap().size, 11);
        assert_eq!(vfs.handle_position(fd).unwrap(), 11);

        let mut buf = [0xffu8; 32];
        let n = vfs.read(fd, &mut buf, 0).unwrap();
        assert_eq!(n, 11);
        assert!(buf[..n].iter().all(|b| *b == 0));
        assert_eq!(vfs.read(fd, &mut buf, 11).unwrap(), 0);

        vfs.close(fd).unwrap();
        assert_eq!(vfs.close(fd).err(), Some(Errno::EBADF));
        vfs.shutdown().unwrap();
    }

    #[test]
    fn exclusive_create_refuses_existing_entries() {
        let vfs = Vfs::new();
        vfs.init().unwrap();
        let fd = vfs.create("/dir1/fresh.txt", 0o600).unwrap();
        vfs.close(fd).unwrap();
        assert_eq!(vfs.create("/dir1/fresh.txt", 0o600).err(), Some(Errno::EEXIST));
        vfs.shutdown().unwrap();
    }

    #[test]
    fn mkdir_reports_existing_entries() {
        let vfs = Vfs::new();
        vfs.init().unwrap();
        vfs.mkdir("/dir1/newdir", 0o750).unwrap();
        assert_eq!(vfs.stat("/dir1/newdir").unwrap().kind, FileType::Directory);
        assert_eq!(vfs.stat("/dir1/newdir").unwrap().perm, 0o750);
        assert_eq!(vfs.mkdir("/dir1/newdir", 0o750).err(), Some(Errno::EEXIST));
        assert_eq!(vfs.mkdir("/dir1", 0o755).err(), Some(Errno::EEXIST));
        vfs.shutdown().unwrap();
    }

    #[test]
    fn unlink_detaches_the_subtree() {
        let vfs = Vfs::new();
        vfs.init().unwrap();
        vfs.unlink("/dir1/dir2").unwrap();
        assert_eq!(vfs.lookup("/dir1/dir2").err(), Some(Errno::ENOENT));
        assert_eq!(vfs.lookup("/dir1/dir2/file").err(), Some(Errno::ENOENT));
        assert_eq!(vfs.unlink("/dir1/dir2").err(), Some(Errno::ENOENT));
        assert_eq!(vfs.unlink("/").err(), Some(Errno::EBUSY));
        vfs.shutdown().unwrap();
    }

    #[test]
    fn rename_moves_within_a_mount() {
        let vfs = Vfs::new();
        vfs.init().unwrap();
        vfs.rename("/dir1/dir3/file2", "/dir1/dir2/renamed").unwrap();
        assert_eq!(vfs.lookup("/dir1/dir3/file2").err(), Some(Errno::ENOENT));
        assert_eq!(vfs.lookup("/dir1/dir2/renamed").unwrap().name(), "renamed");

        // a directory cannot move below itself
        assert_eq!(vfs.rename("/dir1", "/dir1/dir2/loop").err(), Some(Errno::EINVAL));
        vfs.shutdown().unwrap();
    }

    #[test]
    fn permission_checks_use_the_other_triplet_for_strangers() {
        let vfs = Vfs::new();
        vfs.init().unwrap();
        vfs.mkdir("/dir1/private", 0o700).unwrap();

        assert_eq!(
            vfs.permission_check("/dir1/private", 2000, 2000, AccessFlags::R_OK)
                .err(),
            Some(Errno::EACCES)
        );
        vfs.permission_check("/dir1/private", 0, 0, AccessFlags::R_OK)
            .unwrap();
        vfs.shutdown().unwrap();
    }

    #[test]
    fn implicit_checks_honor_configured_credentials() {
        let vfs = Vfs::new().with_credentials(Credentials {
            uid: 1000,
            gid: 1000,
        });
        vfs.init().unwrap();

        // sample files are 0644 root:root, so a stranger may read but not write
        let fd = vfs.open("/dir1/dir2/file", OpenFlags::RDONLY).unwrap();
        vfs.close(fd).unwrap();
        assert_eq!(
            vfs.open("/dir1/dir2/file", OpenFlags(libc::O_RDWR)).err(),
            Some(Errno::EACCES)
        );
        vfs.shutdown().unwrap();
    }

    #[test]
    fn reads_stamp_access_order() {
        let vfs = Vfs::new();
        vfs.init().unwrap();
        let fd = vfs
            .open("/dir1/a.bin", OpenFlags(libc::O_CREAT | libc::O_RDWR))
            .unwrap();
        let fd2 = vfs
            .open("/dir1/b.bin", OpenFlags(libc::O_CREAT | libc::O_RDWR))
            .unwrap();

        let mut buf = [0u8; 1];
        vfs.write(fd, b"x", 0).unwrap();
        vfs.write(fd2, b"x", 0).unwrap();
        vfs.read(fd2, &mut buf, 0).unwrap();
        vfs.read(fd, &mut buf, 0).unwrap();

        let a = vfs.lookup("/dir1/a.bin").unwrap();
        let b = vfs.lookup("/dir1/b.bin").unwrap();
        assert!(a.inode().atime_tick() > b.inode().atime_tick());

        vfs.close(fd).unwrap();
        vfs.close(fd2).unwrap();
        vfs.shutdown().unwrap();
    }

    #[test]
    fn shutdown_releases_everything() {
        let vfs = Vfs::new();
        vfs.init().unwrap();
        let fd = vfs
            .open("/dir1/held.txt", OpenFlags(libc::O_CREAT | libc::O_RDWR))
            .unwrap();
        let weak = {
            let dentry = vfs.lookup("/dir1/dir2").unwrap();
            Arc::downgrade(&dentry)
        };

        vfs.shutdown().unwrap();
        assert!(weak.upgrade().is_none());
        assert_eq!(vfs.close(fd).err(), Some(Errno::EBADF));
        assert_eq!(vfs.stat("/dir1").err(), Some(Errno::EIO));

        // a fresh cycle starts clean
        vfs.init().unwrap();
        assert!(vfs.lookup("/dir1/held.txt").is_err());
        vfs.lookup("/dir1/dir2/file").unwrap();
        vfs.shutdown().unwrap();
    }
}
