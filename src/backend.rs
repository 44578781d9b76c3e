use log::warn;

use crate::FileAttr;
use crate::errno::Errno;
use crate::open_flags::OpenFlags;

/// Opaque identifier issued by a backend's [`Backend::open`] and accepted by
/// its later calls. Meaningful only to the backend that issued it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

/// Sink invoked once per directory entry during [`Backend::readdir`].
///
/// Returning `false` stops enumeration. Metadata is best effort and may be
/// `None` when the backend cannot stat the entry cheaply.
pub type DirSink<'a> = dyn FnMut(&str, Option<&FileAttr>) -> bool + 'a;

/// Factory for backend instances, registered under a type name.
///
/// The registry maps the name (e.g. `"posix"`) to the factory; mounting
/// looks the name up and calls [`BackendType::init`] to attach an instance
/// to a root location.
pub trait BackendType: Send + Sync {
    /// Registry key, unique per process.
    fn name(&self) -> &'static str;

    /// Attaches a backend instance to `root`, which the backend interprets
    /// (the reference backend treats it as a host directory path).
    fn init(&self, root: &str) -> Result<Box<dyn Backend>, Errno>;
}

/// A live storage backend bound to one mount.
///
/// All paths handed to a backend are relative to its root; absolute paths
/// are rejected with `EINVAL`. Errors are standard errno values and are
/// forwarded to VFS callers unchanged. Backends own their internal
/// synchronization; the VFS never holds a dentry or inode lock across a
/// backend call.
pub trait Backend: Send + Sync {
    /// Releases all resources, including still-open handles.
    fn shutdown(&self) -> Result<(), Errno>;

    /// Creates or opens a file per POSIX flag semantics.
    fn open(&self, rel: &str, flags: OpenFlags) -> Result<HandleId, Errno>;

    /// Closes a handle previously returned by [`Backend::open`].
    fn close(&self, handle: HandleId) -> Result<(), Errno>;

    /// Positional read. Must not move any backend-side cursor; short reads
    /// are legal at end-of-file.
    fn read(&self, handle: HandleId, buf: &mut [u8], offset: u64) -> Result<usize, Errno>;

    /// Positional write. A short write signals resource exhaustion.
    fn write(&self, handle: HandleId, data: &[u8], offset: u64) -> Result<usize, Errno>;

    /// Metadata for the object at `rel`.
    fn stat(&self, rel: &str) -> Result<FileAttr, Errno>;

    /// Enumerates the directory at `rel`, invoking the sink once per name.
    fn readdir(&self, rel: &str, sink: &mut DirSink<'_>) -> Result<(), Errno>;

    /// Creates a file exclusively with the given permission bits.
    fn create(&self, rel: &str, mode: u32) -> Result<HandleId, Errno> {
        warn!("[Not Implemented] create(rel: {rel:?}, mode: {mode:#o})");
        Err(Errno::ENOTSUP)
    }

    /// Removes the object at `rel`.
    fn unlink(&self, rel: &str) -> Result<(), Errno> {
        warn!("[Not Implemented] unlink(rel: {rel:?})");
        Err(Errno::ENOTSUP)
    }

    /// Renames within this backend.
    fn rename(&self, old_rel: &str, new_rel: &str) -> Result<(), Errno> {
        warn!("[Not Implemented] rename(old: {old_rel:?}, new: {new_rel:?})");
        Err(Errno::ENOTSUP)
    }

    /// Creates a directory with the given permission bits.
    fn mkdir(&self, rel: &str, mode: u32) -> Result<(), Errno> {
        warn!("[Not Implemented] mkdir(rel: {rel:?}, mode: {mode:#o})");
        Err(Errno::ENOTSUP)
    }
}

/// Backends accept only relative paths.
pub(crate) fn ensure_relative(rel: &str) -> Result<(), Errno> {
    if rel.starts_with('/') {
        return Err(Errno::EINVAL);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_rejected() {
        assert_eq!(ensure_relative("/etc/passwd"), Err(Errno::EINVAL));
        assert_eq!(ensure_relative("a/b"), Ok(()));
        assert_eq!(ensure_relative(""), Ok(()));
    }
}
