use std::fmt;
use std::io;
use std::io::ErrorKind;

/// Largest value treated as an errno when translating raw backend results.
const MAX_ERRNO: i32 = 4095;

/// POSIX error code returned by VFS and backend operations.
///
/// Wraps a raw `errno` value from libc. Only a subset of codes is produced by
/// the core itself (see the associated constants); backends may return any
/// errno and it is forwarded to the caller unchanged.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Errno(pub libc::c_int);

impl Errno {
    /// Operation not permitted.
    pub const EPERM: Errno = Errno(libc::EPERM);
    /// No such file or directory.
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    /// I/O error. Also returned for operations attempted before `init` and
    /// for backend failures that do not map to any other code.
    pub const EIO: Errno = Errno(libc::EIO);
    /// Bad file descriptor: unknown or already-freed handle.
    pub const EBADF: Errno = Errno(libc::EBADF);
    /// Out of memory, or a fixed-capacity table is full.
    pub const ENOMEM: Errno = Errno(libc::ENOMEM);
    /// Permission denied.
    pub const EACCES: Errno = Errno(libc::EACCES);
    /// Resource busy.
    pub const EBUSY: Errno = Errno(libc::EBUSY);
    /// Entry already exists.
    pub const EEXIST: Errno = Errno(libc::EEXIST);
    /// Cross-device operation (rename across mounts).
    pub const EXDEV: Errno = Errno(libc::EXDEV);
    /// No such device: unknown backend type at mount time.
    pub const ENODEV: Errno = Errno(libc::ENODEV);
    /// Not a directory.
    pub const ENOTDIR: Errno = Errno(libc::ENOTDIR);
    /// Is a directory.
    pub const EISDIR: Errno = Errno(libc::EISDIR);
    /// Invalid argument: relative path, empty name, unknown flag combination.
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    /// File-handle table exhausted.
    pub const EMFILE: Errno = Errno(libc::EMFILE);
    /// No space left on device.
    pub const ENOSPC: Errno = Errno(libc::ENOSPC);
    /// Path or path component too long.
    pub const ENAMETOOLONG: Errno = Errno(libc::ENAMETOOLONG);
    /// Operation not implemented.
    pub const ENOSYS: Errno = Errno(libc::ENOSYS);
    /// Directory not empty.
    pub const ENOTEMPTY: Errno = Errno(libc::ENOTEMPTY);
    /// Operation not supported (symlinks and other optional features).
    pub const ENOTSUP: Errno = Errno(libc::ENOTSUP);

    /// Raw errno value.
    pub fn code(self) -> libc::c_int {
        self.0
    }

    /// Interprets a raw value as an errno.
    ///
    /// Anything outside the errno range is coerced to [`Errno::EIO`]; a real
    /// errno passes through unchanged. This is the only translation applied
    /// to backend results.
    pub fn from_i32(code: i32) -> Errno {
        if (1..=MAX_ERRNO).contains(&code) {
            Errno(code)
        } else {
            Errno::EIO
        }
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Errno::EPERM => "EPERM",
            Errno::ENOENT => "ENOENT",
            Errno::EIO => "EIO",
            Errno::EBADF => "EBADF",
            Errno::ENOMEM => "ENOMEM",
            Errno::EACCES => "EACCES",
            Errno::EBUSY => "EBUSY",
            Errno::EEXIST => "EEXIST",
            Errno::EXDEV => "EXDEV",
            Errno::ENODEV => "ENODEV",
            Errno::ENOTDIR => "ENOTDIR",
            Errno::EISDIR => "EISDIR",
            Errno::EINVAL => "EINVAL",
            Errno::EMFILE => "EMFILE",
            Errno::ENOSPC => "ENOSPC",
            Errno::ENAMETOOLONG => "ENAMETOOLONG",
            Errno::ENOSYS => "ENOSYS",
            Errno::ENOTEMPTY => "ENOTEMPTY",
            Errno::ENOTSUP => "ENOTSUP",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Errno({})", self.0),
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<io::Error> for Errno {
    fn from(err: io::Error) -> Errno {
        if let Some(code) = err.raw_os_error() {
            return Errno::from_i32(code);
        }
        match err.kind() {
            ErrorKind::NotFound => Errno::ENOENT,
            ErrorKind::PermissionDenied => Errno::EACCES,
            ErrorKind::AlreadyExists => Errno::EEXIST,
            ErrorKind::InvalidInput => Errno::EINVAL,
            _ => Errno::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_pass_through() {
        assert_eq!(Errno::from_i32(libc::ENOENT), Errno::ENOENT);
        assert_eq!(Errno::from_i32(libc::EACCES), Errno::EACCES);
        assert_eq!(Errno::ENOENT.code(), libc::ENOENT);
    }

    #[test]
    fn out_of_range_coerces_to_eio() {
        assert_eq!(Errno::from_i32(0), Errno::EIO);
        assert_eq!(Errno::from_i32(-7), Errno::EIO);
        assert_eq!(Errno::from_i32(1_000_000), Errno::EIO);
    }

    #[test]
    fn io_error_conversion() {
        let err = io::Error::from_raw_os_error(libc::EEXIST);
        assert_eq!(Errno::from(err), Errno::EEXIST);

        let err = io::Error::new(ErrorKind::NotFound, "gone");
        assert_eq!(Errno::from(err), Errno::ENOENT);
    }

    #[test]
    fn debug_names() {
        assert_eq!(format!("{:?}", Errno::EISDIR), "EISDIR");
        assert_eq!(format!("{:?}", Errno(libc::ELOOP)), format!("Errno({})", libc::ELOOP));
    }
}
