use std::fmt;
use std::fmt::Formatter;
use std::fmt::LowerHex;
use std::fmt::UpperHex;

/// How a file should be opened: read-only, write-only, or read-write.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(i32)]
#[allow(non_camel_case_types)]
pub enum OpenAccMode {
    /// Open file for reading only.
    O_RDONLY = libc::O_RDONLY,
    /// Open file for writing only.
    O_WRONLY = libc::O_WRONLY,
    /// Open file for reading and writing.
    O_RDWR = libc::O_RDWR,
}

/// Open flags as passed to the open operation.
///
/// A plain POSIX flag word: an access mode plus any of `O_CREAT`, `O_EXCL`,
/// `O_TRUNC` and `O_APPEND`. Backends receive the word unchanged.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct OpenFlags(pub i32);

impl LowerHex for OpenFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        LowerHex::fmt(&self.0, f)
    }
}

impl UpperHex for OpenFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        UpperHex::fmt(&self.0, f)
    }
}

impl OpenFlags {
    /// Read-only open with no other flags set.
    pub const RDONLY: OpenFlags = OpenFlags(libc::O_RDONLY);

    /// File access mode.
    pub fn acc_mode(self) -> OpenAccMode {
        match self.0 & libc::O_ACCMODE {
            libc::O_RDONLY => OpenAccMode::O_RDONLY,
            libc::O_WRONLY => OpenAccMode::O_WRONLY,
            libc::O_RDWR => OpenAccMode::O_RDWR,
            _ => {
                // Impossible combination of flags.
                // Do not panic because the field is public.
                OpenAccMode::O_RDONLY
            }
        }
    }

    /// Whether `O_CREAT` is set.
    pub fn has_create(self) -> bool {
        self.0 & libc::O_CREAT != 0
    }

    /// Whether `O_EXCL` is set.
    pub fn has_excl(self) -> bool {
        self.0 & libc::O_EXCL != 0
    }

    /// Whether `O_TRUNC` is set.
    pub fn has_trunc(self) -> bool {
        self.0 & libc::O_TRUNC != 0
    }
}
