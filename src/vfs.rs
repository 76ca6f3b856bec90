//! The vfs/mount layer (spec §4.4): one instance per mounted filesystem,
//! holding the read/write op fence that lets `unmount` wait for in-flight
//! operations to drain before tearing anything down.
//!
//! The original doesn't name this layer as a separate file the way
//! `ventry.c`/`vnode.c` are; its bookkeeping (`fs_mount`/`fs_unmount`,
//! per-mount vnode registry, in-flight op counters) lives in `fs.c`, which
//! wasn't part of the filtered `original_source/` set — this module's shape
//! instead follows `petitstrawberry-Scarlet`'s `VfsManager`/`VfsMount` split
//! (one struct per mount instance, holding its own root and a registry of
//! the vnodes it has materialised), generalized to the read/write op
//! fence spec.md §4.4/§5 describes explicitly.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use hashbrown::HashMap;
use log::{debug, warn};

use crate::error::{VfsErrno, VfsResult};
use crate::fstype::FsType;
use crate::refcount::Ref;
use crate::sync::Mutex;
use crate::ventry::Ventry;
use crate::vnode::Vnode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VfsFlags {
    pub readonly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Mounted,
    Unmounting,
    Unmounted,
}

/// Tracks in-flight read/write operations against a vfs so `unmount` can
/// wait for them to drain instead of racing a concrete filesystem driver
/// out from under a concurrent caller (spec §4.4, §5).
struct OpFence {
    state: Mutex<FenceState>,
    read_ops: AtomicU32,
    write_ops: AtomicU32,
}

impl OpFence {
    fn new() -> Self {
        OpFence {
            state: Mutex::new(FenceState::Mounted),
            read_ops: AtomicU32::new(0),
            write_ops: AtomicU32::new(0),
        }
    }

    fn is_active(&self) -> bool {
        *self.state.lock() == FenceState::Mounted
    }

    /// Optimistic increment-then-check: count the op first, and roll back
    /// if the fence had already started unmounting. Avoids a lock around
    /// every op while still giving `begin_unmount` a correct drain target.
    fn begin_read(&self) -> bool {
        self.read_ops.fetch_add(1, Ordering::AcqRel);
        if self.is_active() {
            true
        } else {
            self.read_ops.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    fn end_read(&self) {
        self.read_ops.fetch_sub(1, Ordering::AcqRel);
    }

    fn begin_write(&self) -> bool {
        self.write_ops.fetch_add(1, Ordering::AcqRel);
        if self.is_active() {
            true
        } else {
            self.write_ops.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    fn end_write(&self) {
        self.write_ops.fetch_sub(1, Ordering::AcqRel);
    }

    /// Marks the fence closed to new ops and spin-waits for the ones
    /// already in flight to finish. See SPEC_FULL.md §5: a host kernel with
    /// a real scheduler would park the caller here instead of spinning.
    fn drain_for_unmount(&self) {
        *self.state.lock() = FenceState::Unmounting;
        while self.read_ops.load(Ordering::Acquire) != 0
            || self.write_ops.load(Ordering::Acquire) != 0
        {
            core::hint::spin_loop();
        }
        *self.state.lock() = FenceState::Unmounted;
    }
}

/// A single mounted filesystem instance: an fs-type binding, a root ventry,
/// and the vnodes it has materialised. Vnodes borrow (do not count) their
/// owning vfs (spec §3.2); the vfs in turn holds a counted reference to
/// every vnode it created until unmount releases the registry, at which
/// point only vnodes still reachable through live ventries/handles survive.
pub struct Vfs {
    pub id: u64,
    pub fstype: Arc<FsType>,
    pub flags: VfsFlags,
    root: Mutex<Option<Ref<Ventry>>>,
    vnodes: Mutex<HashMap<u64, Ref<Vnode>>>,
    fence: OpFence,
    next_vnode_id: AtomicU64,
}

impl Vfs {
    pub fn new(id: u64, fstype: Arc<FsType>, flags: VfsFlags) -> Ref<Vfs> {
        Ref::new(Vfs {
            id,
            fstype,
            flags,
            root: Mutex::new(None),
            vnodes: Mutex::new(HashMap::new()),
            fence: OpFence::new(),
            next_vnode_id: AtomicU64::new(1),
        })
    }

    pub fn is_readonly(&self) -> bool {
        self.flags.readonly
    }

    /// Allocates a vnode id unique within this vfs instance.
    pub fn alloc_vnode_id(&self) -> u64 {
        self.next_vnode_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a freshly created vnode under the write-op fence (§4.4:
    /// "freshly created vnodes are added under the write-op fence").
    pub fn register_vnode(&self, vn: Ref<Vnode>) -> VfsResult<()> {
        if !self.fence.begin_write() {
            return Err(VfsErrno::Io);
        }
        self.vnodes.lock().insert(vn.id, vn);
        self.fence.end_write();
        Ok(())
    }

    pub fn lookup_vnode(&self, id: u64) -> Option<Ref<Vnode>> {
        self.vnodes.lock().get(&id).cloned()
    }

    pub fn root(&self) -> VfsResult<Ref<Ventry>> {
        self.root.lock().clone().ok_or(VfsErrno::Io)
    }

    /// Called once by the mount orchestration in `context.rs` right after
    /// the driver's `mount` callback returns a root vnode and the core has
    /// wrapped it in a root ventry.
    pub(crate) fn set_root(&self, root: Ref<Ventry>) {
        let mut r = self.root.lock();
        debug_assert!(r.is_none(), "vfs root set more than once");
        *r = Some(root);
    }

    pub fn begin_read_op(&self) -> VfsResult<()> {
        if self.fence.begin_read() {
            Ok(())
        } else {
            warn!(target: "vfscore::vfs", "read op rejected on vfs {} (unmounting)", self.id);
            Err(VfsErrno::Io)
        }
    }

    pub fn end_read_op(&self) {
        self.fence.end_read();
    }

    pub fn begin_write_op(&self) -> VfsResult<()> {
        if self.is_readonly() {
            return Err(VfsErrno::RoFs);
        }
        if self.fence.begin_write() {
            Ok(())
        } else {
            warn!(target: "vfscore::vfs", "write op rejected on vfs {} (unmounting)", self.id);
            Err(VfsErrno::Io)
        }
    }

    pub fn end_write_op(&self) {
        self.fence.end_write();
    }

    /// Drains in-flight ops, then releases this vfs's strong references to
    /// every vnode it materialised. Vnodes still reachable via ventries or
    /// open-file handles held elsewhere survive this; any that were only
    /// kept alive by the registry are cleaned up here (invariant §3.3: a
    /// vfs with zero outstanding ops and no referenced vnodes may be torn
    /// down).
    pub fn teardown(&self) {
        debug!(target: "vfscore::vfs", "tearing down vfs {}", self.id);
        self.fence.drain_for_unmount();
        self.vnodes.lock().clear();
        *self.root.lock() = None;
    }
}
