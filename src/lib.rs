//! Virtual file system core: a ventry cache layered over filesystem-backed
//! vnodes, with a mount manager and path resolver on top.
//!
//! This crate implements the VFS *core* only (spec.md §1): the ventry
//! cache, the vnode layer, and the vfs/mount manager, plus the path
//! resolver and the public operations a process layer calls into. Concrete
//! filesystem drivers, the page cache, file descriptor tables, and
//! scheduling are external collaborators — this crate specifies only the
//! trait interfaces it needs from them ([`fstype::FsDriver`],
//! [`vnode::VnodeOps`], [`ventry::VentryOps`]).
//!
//! Process-wide state (the fs-type registry, the absolute root) is threaded
//! through an explicit [`context::VfsContext`] rather than kept in statics,
//! so independent instances never cross-talk (see SPEC_FULL.md "Ambient
//! stack" and spec.md §9 "Process-wide state").
//!
//! `no_std` outside of tests: embedding kernels provide their own `alloc`
//! backing allocator and install whatever `log::Log` sink they want (or
//! none — the crate never assumes one is present).

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod context;
pub mod error;
pub mod file;
pub mod fstype;
pub mod refcount;
pub mod resolver;
pub mod strings;
pub mod sync;
pub mod ventry;
pub mod vfs;
pub mod vnode;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

#[cfg(test)]
mod scenarios;

pub use context::{VfsContext, VfsLimits};
pub use error::{VfsErrno, VfsResult};
pub use file::{OpenFile, SeekWhence};
pub use fstype::{FsDriver, FsType, FsTypeRegistry};
pub use refcount::{Ref, WeakRef};
pub use sync::Tid;
pub use ventry::{Ventry, VentryOps};
pub use vfs::{Vfs, VfsFlags};
pub use vnode::{DirEntry, MappedRegion, Stat, Vnode, VnodeOps, VnodeType};
