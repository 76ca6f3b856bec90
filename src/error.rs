//! Closed error taxonomy for the VFS core.
//!
//! Mirrors the POSIX-style codes `vnode.c`/`ventry.c` return as negative
//! `int`s, but as a closed Rust enum instead of raw integers so callers match
//! exhaustively. [`VfsErrno::to_raw`] gives the negative-errno representation
//! a process layer would hand back to a syscall caller.

use core::fmt;

/// Error kinds a driver or the core itself can raise.
///
/// Policy (per the spec): driver errors propagate unchanged, precondition
/// violations are produced by the core's wrapper functions, and violated
/// invariants halt rather than returning an error (see `debug_assert!` use
/// throughout this crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsErrno {
    /// Negative offset, malformed `mknod` mode, bad flags.
    Inval,
    /// Directory op attempted on a non-directory vnode.
    NotDir,
    /// File op attempted on a directory where that's forbidden.
    IsDir,
    /// A path component exceeds the configured name length limit.
    NameTooLong,
    /// A path component does not exist.
    NoEnt,
    /// `create`/`mkdir` target already exists.
    Exist,
    /// The requested operation is absent from the driver's vtable.
    NotSup,
    /// Write attempted against a read-only vfs.
    RoFs,
    /// Hardlink source and target are on different vfs instances.
    XDev,
    /// Symlink resolution exceeded the configured depth limit.
    Loop_,
    /// Offset strictly greater than the vnode's current size.
    Overflow,
    /// Driver failure, or operation issued against an unmounting/unmounted vfs.
    Io,
    /// Allocation failure.
    NoMem,
    /// `unmount` attempted while references or in-flight ops remain.
    Busy,
}

impl VfsErrno {
    /// Negative-errno value, the representation a syscall-style boundary
    /// would return to userspace. Values follow common POSIX numbering.
    pub const fn to_raw(self) -> i32 {
        match self {
            VfsErrno::Inval => -22,
            VfsErrno::NotDir => -20,
            VfsErrno::IsDir => -21,
            VfsErrno::NameTooLong => -36,
            VfsErrno::NoEnt => -2,
            VfsErrno::Exist => -17,
            VfsErrno::NotSup => -95,
            VfsErrno::RoFs => -30,
            VfsErrno::XDev => -18,
            VfsErrno::Loop_ => -40,
            VfsErrno::Overflow => -75,
            VfsErrno::Io => -5,
            VfsErrno::NoMem => -12,
            VfsErrno::Busy => -16,
        }
    }
}

impl fmt::Display for VfsErrno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VfsErrno::Inval => "invalid argument",
            VfsErrno::NotDir => "not a directory",
            VfsErrno::IsDir => "is a directory",
            VfsErrno::NameTooLong => "name too long",
            VfsErrno::NoEnt => "no such entry",
            VfsErrno::Exist => "already exists",
            VfsErrno::NotSup => "operation not supported",
            VfsErrno::RoFs => "read-only filesystem",
            VfsErrno::XDev => "cross-device link",
            VfsErrno::Loop_ => "too many symbolic links",
            VfsErrno::Overflow => "offset past end of object",
            VfsErrno::Io => "i/o error",
            VfsErrno::NoMem => "out of memory",
            VfsErrno::Busy => "resource busy",
        };
        f.write_str(s)
    }
}

pub type VfsResult<T> = Result<T, VfsErrno>;
