use std::fmt::Display;
use std::fmt::Formatter;

use bitflags::bitflags;

use crate::open_flags::OpenAccMode;
use crate::open_flags::OpenFlags;

bitflags! {
    /// Access mask bits for permission checks.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct AccessFlags: i32 {
        /// Test for the existence of a file. This is not a flag, but a constant zero.
        const F_OK = libc::F_OK;
        /// Test for read permission.
        const R_OK = libc::R_OK;
        /// Test for write permission.
        const W_OK = libc::W_OK;
        /// Test for execute permission.
        const X_OK = libc::X_OK;
    }
}

impl Display for AccessFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.bits(), f)
    }
}

/// Classical owner/group/other permission evaluation.
///
/// `file_mode` carries the permission bits of the target (type bits are
/// ignored). Root may read and write anything, and may execute iff at least
/// one of the three execute bits is set. Everyone else is checked against
/// exactly one triplet: the owner triplet if the uids match, otherwise the
/// group triplet if the gids match, otherwise the other triplet.
pub fn check_access(
    file_uid: u32,
    file_gid: u32,
    file_mode: u32,
    uid: u32,
    gid: u32,
    mask: AccessFlags,
) -> bool {
    // F_OK tests for existence of file
    if mask == AccessFlags::F_OK {
        return true;
    }
    let mode = file_mode & 0o777;

    // root is allowed to read & write anything
    if uid == 0 {
        // root only allowed to exec if one of the X bits is set
        if mask.contains(AccessFlags::X_OK) && mode & 0o111 == 0 {
            return false;
        }
        return true;
    }

    let triplet = if uid == file_uid {
        mode >> 6
    } else if gid == file_gid {
        mode >> 3
    } else {
        mode
    };

    // R_OK/W_OK/X_OK coincide with the r/w/x bits of a mode triplet
    mask.bits() & !(triplet as i32 & 0o7) == 0
}

/// Derives the permission mask an `open` call must satisfy from its flags.
pub fn access_mask_for_open(flags: OpenFlags) -> AccessFlags {
    match flags.acc_mode() {
        OpenAccMode::O_RDONLY => AccessFlags::R_OK,
        OpenAccMode::O_WRONLY => AccessFlags::W_OK,
        OpenAccMode::O_RDWR => AccessFlags::R_OK | AccessFlags::W_OK,
    }
}
