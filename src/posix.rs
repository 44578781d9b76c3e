use std::fs;
use std::fs::DirBuilder;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::fs::FileExt;
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::FileAttr;
use crate::FileType;
use crate::backend;
use crate::backend::Backend;
use crate::backend::BackendType;
use crate::backend::DirSink;
use crate::backend::HandleId;
use crate::errno::Errno;
use crate::open_flags::OpenAccMode;
use crate::open_flags::OpenFlags;

/// Joined host paths longer than this fail with `ENAMETOOLONG`.
const MAX_PATH_LEN: usize = 4096;

/// Reference backend mapping a mount onto a directory of the host
/// filesystem. Registered under the type name `"posix"` during VFS init.
#[derive(Debug)]
pub struct PosixBackendType;

impl BackendType for PosixBackendType {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn init(&self, root: &str) -> Result<Box<dyn Backend>, Errno> {
        let meta = fs::metadata(root).map_err(Errno::from)?;
        if !meta.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        debug!("posix backend attached to {root:?}");
        Ok(Box::new(PosixBackend {
            root: PathBuf::from(root),
            handles: Mutex::new(Vec::new()),
        }))
    }
}

/// One backend instance per mount. Open files live in a growable table
/// indexed by `HandleId - 1`; the table lock is released before any I/O.
#[derive(Debug)]
struct PosixBackend {
    root: PathBuf,
    handles: Mutex<Vec<Option<Arc<File>>>>,
}

impl PosixBackend {
    fn full_path(&self, rel: &str) -> Result<PathBuf, Errno> {
        backend::ensure_relative(rel)?;
        // The VFS normalizes before dispatch; a `..` here is an escape attempt.
        if rel.split('/').any(|c| c == "..") {
            return Err(Errno::EINVAL);
        }
        let full = if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        };
        if full.as_os_str().len() > MAX_PATH_LEN {
            return Err(Errno::ENAMETOOLONG);
        }
        Ok(full)
    }

    fn insert_handle(&self, file: File) -> HandleId {
        let mut handles = self.handles.lock();
        for (idx, slot) in handles.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Arc::new(file));
                return HandleId(idx as u64 + 1);
            }
        }
        handles.push(Some(Arc::new(file)));
        HandleId(handles.len() as u64)
    }

    fn file(&self, handle: HandleId) -> Result<Arc<File>, Errno> {
        if handle.0 == 0 {
            return Err(Errno::EBADF);
        }
        let handles = self.handles.lock();
        handles
            .get(handle.0 as usize - 1)
            .and_then(|slot| slot.clone())
            .ok_or(Errno::EBADF)
    }
}

fn attr_from_metadata(meta: &fs::Metadata) -> FileAttr {
    FileAttr {
        ino: meta.ino(),
        size: meta.len(),
        kind: FileType::from_std(meta.file_type()).unwrap_or(FileType::RegularFile),
        perm: (meta.mode() & 0o7777) as u16,
        uid: meta.uid(),
        gid: meta.gid(),
    }
}

impl Backend for PosixBackend {
    fn shutdown(&self) -> Result<(), Errno> {
        // Dropping the table closes any files the VFS never closed.
        self.handles.lock().clear();
        debug!("posix backend for {:?} shut down", self.root);
        Ok(())
    }

    fn open(&self, rel: &str, flags: OpenFlags) -> Result<HandleId, Errno> {
        let full = self.full_path(rel)?;
        let mut options = OpenOptions::new();
        match flags.acc_mode() {
            OpenAccMode::O_RDONLY => {
                options.read(true);
            }
            OpenAccMode::O_WRONLY => {
                options.write(true);
            }
            OpenAccMode::O_RDWR => {
                options.read(true).write(true);
            }
        }
        if flags.has_create() {
            options.create(true).mode(0o644);
        }
        if flags.has_excl() {
            options.create_new(true);
        }
        if flags.has_trunc() {
            options.truncate(true);
        }
        let file = options.open(&full).map_err(Errno::from)?;
        Ok(self.insert_handle(file))
    }

    fn close(&self, handle: HandleId) -> Result<(), Errno> {
        if handle.0 == 0 {
            return Err(Errno::EBADF);
        }
        let mut handles = self.handles.lock();
        let slot = handles
            .get_mut(handle.0 as usize - 1)
            .ok_or(Errno::EBADF)?;
        slot.take().ok_or(Errno::EBADF)?;
        Ok(())
    }

    fn read(&self, handle: HandleId, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        let file = self.file(handle)?;
        file.read_at(buf, offset).map_err(Errno::from)
    }

    fn write(&self, handle: HandleId, data: &[u8], offset: u64) -> Result<usize, Errno> {
        let file = self.file(handle)?;
        file.write_at(data, offset).map_err(Errno::from)
    }

    fn stat(&self, rel: &str) -> Result<FileAttr, Errno> {
        let full = self.full_path(rel)?;
        let meta = fs::metadata(&full).map_err(Errno::from)?;
        Ok(attr_from_metadata(&meta))
    }

    fn readdir(&self, rel: &str, sink: &mut DirSink<'_>) -> Result<(), Errno> {
        let full = self.full_path(rel)?;
        let meta = fs::metadata(&full).map_err(Errno::from)?;
        if !meta.is_dir() {
            return Err(Errno::ENOTDIR);
        }

        if !sink(".", None) || !sink("..", None) {
            return Ok(());
        }
        for entry in fs::read_dir(&full).map_err(Errno::from)? {
            let entry = entry.map_err(Errno::from)?;
            let name = entry.file_name();
            let attr = entry.metadata().ok().map(|m| attr_from_metadata(&m));
            if !sink(&name.to_string_lossy(), attr.as_ref()) {
                break;
            }
        }
        Ok(())
    }

    fn create(&self, rel: &str, mode: u32) -> Result<HandleId, Errno> {
        let full = self.full_path(rel)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&full)
            .map_err(Errno::from)?;
        Ok(self.insert_handle(file))
    }

    fn unlink(&self, rel: &str) -> Result<(), Errno> {
        let full = self.full_path(rel)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::EISDIR) => {
                fs::remove_dir(&full).map_err(Errno::from)
            }
            Err(err) => Err(Errno::from(err)),
        }
    }

    fn rename(&self, old_rel: &str, new_rel: &str) -> Result<(), Errno> {
        let old_full = self.full_path(old_rel)?;
        let new_full = self.full_path(new_rel)?;
        fs::rename(&old_full, &new_full).map_err(Errno::from)
    }

    fn mkdir(&self, rel: &str, mode: u32) -> Result<(), Errno> {
        let full = self.full_path(rel)?;
        DirBuilder::new()
            .mode(mode)
            .create(&full)
            .map_err(Errno::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach(dir: &tempfile::TempDir) -> Box<dyn Backend> {
        PosixBackendType
            .init(dir.path().to_str().unwrap())
            .unwrap()
    }

    #[test]
    fn init_requires_a_directory() {
        assert_eq!(
            PosixBackendType.init("/nonexistent-uvfs-root").err(),
            Some(Errno::ENOENT)
        );
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let backend = attach(&dir);

        let handle = backend
            .open("test.txt", OpenFlags(libc::O_CREAT | libc::O_RDWR))
            .unwrap();
        assert_eq!(backend.write(handle, b"hello", 0).unwrap(), 5);

        let mut buf = [0u8; 16];
        let n = backend.read(handle, &mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"hello");

        let attr = backend.stat("test.txt").unwrap();
        assert_eq!(attr.size, 5);
        assert_eq!(attr.kind, FileType::RegularFile);

        backend.close(handle).unwrap();
        assert_eq!(backend.close(handle), Err(Errno::EBADF));
    }

    #[test]
    fn absolute_and_escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = attach(&dir);
        assert_eq!(backend.stat("/etc/passwd").err(), Some(Errno::EINVAL));
        assert_eq!(backend.stat("../outside").err(), Some(Errno::EINVAL));
    }

    #[test]
    fn readdir_lists_dot_entries_first() {
        let dir = tempfile::tempdir().unwrap();
        let backend = attach(&dir);
        let handle = backend
            .open("a.txt", OpenFlags(libc::O_CREAT | libc::O_WRONLY))
            .unwrap();
        backend.close(handle).unwrap();

        let mut names = Vec::new();
        backend
            .readdir("", &mut |name, _attr| {
                names.push(name.to_string());
                true
            })
            .unwrap();
        assert_eq!(&names[..2], &[".".to_string(), "..".to_string()]);
        assert!(names.contains(&"a.txt".to_string()));
    }

    #[test]
    fn readdir_honors_sink_stop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = attach(&dir);
        let mut names = Vec::new();
        backend
            .readdir("", &mut |name, _attr| {
                names.push(name.to_string());
                false
            })
            .unwrap();
        assert_eq!(names, vec![".".to_string()]);
    }

    #[test]
    fn unlink_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let backend = attach(&dir);
        let handle = backend.create("victim.txt", 0o644).unwrap();
        backend.close(handle).unwrap();

        backend.rename("victim.txt", "renamed.txt").unwrap();
        assert_eq!(backend.stat("victim.txt").err(), Some(Errno::ENOENT));
        backend.unlink("renamed.txt").unwrap();
        assert_eq!(backend.stat("renamed.txt").err(), Some(Errno::ENOENT));

        backend.mkdir("subdir", 0o755).unwrap();
        assert_eq!(backend.stat("subdir").unwrap().kind, FileType::Directory);
        backend.unlink("subdir").unwrap();
    }
}
