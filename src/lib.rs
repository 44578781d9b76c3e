//! User-space virtual filesystem core.
//!
//! A single logical namespace rooted at `/` is composed of mount entries,
//! each binding a subtree of the namespace to a storage backend that owns
//! the actual data. The VFS resolves paths to cached directory-entry nodes,
//! enforces permission checks, manages per-open file handles and dispatches
//! I/O to the right backend through a uniform contract ([`Backend`]).
//!
//! A [`Vfs`] value is a self-contained instance: build one, [`Vfs::init`]
//! it, mount backends with [`Vfs::mount_backend`], and drive it from any
//! number of threads. The bundled [`PosixBackendType`] maps a mount onto a
//! directory of the host filesystem; mounts without a backend are synthetic
//! in-memory namespaces.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

use std::os::unix::fs::FileTypeExt;

#[cfg(feature = "serializable")]
use serde::Deserialize;
#[cfg(feature = "serializable")]
use serde::Serialize;

pub use crate::access::AccessFlags;
pub use crate::access::access_mask_for_open;
pub use crate::access::check_access;
pub use crate::backend::Backend;
pub use crate::backend::BackendType;
pub use crate::backend::DirSink;
pub use crate::backend::HandleId;
pub use crate::dentry::Dentry;
pub use crate::errno::Errno;
pub use crate::handle::Fd;
pub use crate::inode::BackendHandle;
pub use crate::inode::Inode;
pub use crate::mount::MountId;
pub use crate::open_flags::OpenAccMode;
pub use crate::open_flags::OpenFlags;
pub use crate::path::normalize;
pub use crate::posix::PosixBackendType;
pub use crate::vfs::Credentials;
pub use crate::vfs::Vfs;

mod access;
mod backend;
mod clock;
mod dentry;
mod errno;
mod handle;
mod inode;
mod mount;
mod open_flags;
mod path;
mod posix;
mod registry;
mod vfs;

/// File types
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum FileType {
    /// Named pipe (`S_IFIFO`)
    NamedPipe,
    /// Character device (`S_IFCHR`)
    CharDevice,
    /// Block device (`S_IFBLK`)
    BlockDevice,
    /// Directory (`S_IFDIR`)
    Directory,
    /// Regular file (`S_IFREG`)
    RegularFile,
    /// Symbolic link (`S_IFLNK`)
    Symlink,
    /// Unix domain socket (`S_IFSOCK`)
    Socket,
}

impl FileType {
    /// Convert std `FileType` to uvfs `FileType`.
    pub fn from_std(file_type: std::fs::FileType) -> Option<Self> {
        if file_type.is_file() {
            Some(FileType::RegularFile)
        } else if file_type.is_dir() {
            Some(FileType::Directory)
        } else if file_type.is_symlink() {
            Some(FileType::Symlink)
        } else if file_type.is_fifo() {
            Some(FileType::NamedPipe)
        } else if file_type.is_socket() {
            Some(FileType::Socket)
        } else if file_type.is_char_device() {
            Some(FileType::CharDevice)
        } else if file_type.is_block_device() {
            Some(FileType::BlockDevice)
        } else {
            None
        }
    }

    /// Decode the type bits of a libc-encoded mode.
    pub fn from_mode(mode: u32) -> Self {
        match mode & libc::S_IFMT as u32 {
            x if x == libc::S_IFDIR as u32 => FileType::Directory,
            x if x == libc::S_IFLNK as u32 => FileType::Symlink,
            x if x == libc::S_IFIFO as u32 => FileType::NamedPipe,
            x if x == libc::S_IFCHR as u32 => FileType::CharDevice,
            x if x == libc::S_IFBLK as u32 => FileType::BlockDevice,
            x if x == libc::S_IFSOCK as u32 => FileType::Socket,
            _ => FileType::RegularFile,
        }
    }

    pub(crate) fn to_mode_bits(self) -> u32 {
        let bits = match self {
            FileType::NamedPipe => libc::S_IFIFO,
            FileType::CharDevice => libc::S_IFCHR,
            FileType::BlockDevice => libc::S_IFBLK,
            FileType::Directory => libc::S_IFDIR,
            FileType::RegularFile => libc::S_IFREG,
            FileType::Symlink => libc::S_IFLNK,
            FileType::Socket => libc::S_IFSOCK,
        };
        bits as u32
    }
}

/// File attributes
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct FileAttr {
    /// Inode number
    pub ino: u64,
    /// Size in bytes
    pub size: u64,
    /// Kind of file (directory, file, pipe, etc)
    pub kind: FileType,
    /// Permissions
    pub perm: u16,
    /// User id
    pub uid: u32,
    /// Group id
    pub gid: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_file_type() {
        let mode = libc::S_IFDIR as u32 | 0o755;
        assert_eq!(FileType::from_mode(mode), FileType::Directory);
        assert_eq!(
            FileType::Directory.to_mode_bits(),
            libc::S_IFDIR as u32
        );
        assert_eq!(FileType::from_mode(0o644), FileType::RegularFile);
    }
}
