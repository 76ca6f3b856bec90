//! The vnode layer (spec §4.2): filesystem-backed objects, independent of
//! any particular path that names them.
//!
//! Grounded on `original_source/kernel/vfs/vnode.c` (`vn_alloc`, `vn_stat`,
//! `vn_open`/`vn_close`, `vn_read`/`vn_write`/`vn_map`, `vn_load`/`vn_save`,
//! `vn_readlink`) and, for expressing the op-vtable as a Rust trait with
//! "missing op" defaults, on `syswonder-rukos/crates/axfs_vfs`'s
//! `VfsNodeOps` (default methods returning `Unsupported` instead of C's
//! null-function-pointer check).

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use log::trace;

use crate::error::{VfsErrno, VfsResult};
use crate::refcount::{Ref, WeakRef};
use crate::sync::Mutex;
use crate::vfs::Vfs;
use crate::ventry::Ventry;

/// What kind of object a vnode represents. Mirrors `vtype_t` in the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeType {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

const S_IFMT: u32 = 0o170000;

impl VnodeType {
    /// POSIX `S_IFxxx` bits, for `stat`. Grounded on `vn_to_mode` in
    /// `vnode.c`; unlike that function this has no "invalid type" branch
    /// because `VnodeType` is a closed enum.
    pub const fn mode_bits(self) -> u32 {
        match self {
            VnodeType::Fifo => 0o010000,
            VnodeType::CharDevice => 0o020000,
            VnodeType::Directory => 0o040000,
            VnodeType::BlockDevice => 0o060000,
            VnodeType::Regular => 0o100000,
            VnodeType::Symlink => 0o120000,
            VnodeType::Socket => 0o140000,
        }
    }
}

/// `mknod`'s mode-bits precondition (spec §4.5 "Creation ops": "`mknod`
/// derives `BLK` vs `CHR` from mode; rejects otherwise with `EINVAL`").
/// Only block and character devices are constructible via `mknod` — the
/// other vnode types each have their own dedicated op (`create`, `mkdir`,
/// `symlink`).
pub fn mknod_type_from_mode(mode: u32) -> VfsResult<VnodeType> {
    match mode & S_IFMT {
        m if m == VnodeType::BlockDevice.mode_bits() => Ok(VnodeType::BlockDevice),
        m if m == VnodeType::CharDevice.mode_bits() => Ok(VnodeType::CharDevice),
        _ => Err(VfsErrno::Inval),
    }
}

/// Lifecycle state, mirroring `V_EMPTY`/`V_ALIVE`/`V_DEAD` in the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeState {
    /// Allocated, not yet populated by the driver's `load`.
    Empty,
    Alive,
    /// `nlink` reached zero and all content has been released; the vnode
    /// stays around only while counted references keep it alive (§9: we
    /// do not tie free-on-unlink to `nlink`, we tie it to refcount).
    Dead,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VnodeFlags {
    pub loaded: bool,
    pub dirty: bool,
    pub root: bool,
}

/// `stat`/`lstat` payload (spec §4.2 supplement, grounded on `vn_stat`).
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub blocks: u64,
    pub rdev: Option<u64>,
}

/// A single `readdir` result.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub vtype: VnodeType,
}

/// A mapped view of vnode content, returned by `VnodeOps::map`. The core
/// does not interpret the payload; it is opaque to everything above the
/// driver (memory management is out of scope, per spec §1 Non-goals).
pub struct MappedRegion {
    pub base: usize,
    pub len: usize,
}

struct Lifecycle {
    state: VnodeState,
    flags: VnodeFlags,
    nlink: u32,
}

/// A filesystem-backed object: the inode-equivalent. Identity is independent
/// of any path; zero or more `Ventry`s may link to the same vnode (hardlinks)
/// and a vnode may be shadowed by another vnode when something is mounted on
/// top of it (§4.3 `shadow_mount`).
pub struct Vnode {
    pub id: u64,
    pub vtype: VnodeType,
    pub device: Option<u64>,
    size: AtomicU64,
    blocks: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
    content: crate::sync::RwLock<()>,
    /// Borrowed, not counted (spec §3.2): the owning vfs is guaranteed to
    /// outlive every vnode it has materialised (it releases its registry
    /// only after the unmount op-fence has drained, see `Vfs::teardown`).
    vfs: WeakRef<Vfs>,
    /// Mount stacking: when something is mounted over the ventry naming this
    /// vnode, this holds the vnode that was visible before, so unmount can
    /// restore it (`ve_shadow_mount`/`ve_unshadow_mount` in the original).
    shadow: Mutex<Option<Ref<Vnode>>>,
    symlink_cache: Mutex<Option<String>>,
    ops: Arc<dyn VnodeOps>,
}

impl core::fmt::Debug for Vnode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vnode")
            .field("id", &self.id)
            .field("vtype", &self.vtype)
            .finish_non_exhaustive()
    }
}

impl Vnode {
    /// `vn_alloc_empty` + immediate `load` (the original always loads before
    /// handing a vnode back to `vn_alloc`'s caller).
    pub fn alloc(
        id: u64,
        vtype: VnodeType,
        vfs: &Ref<Vfs>,
        ops: Arc<dyn VnodeOps>,
        device: Option<u64>,
    ) -> VfsResult<Ref<Vnode>> {
        let vn = Ref::new(Vnode {
            id,
            vtype,
            device,
            size: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            lifecycle: Mutex::new(Lifecycle {
                state: VnodeState::Empty,
                flags: VnodeFlags::default(),
                nlink: 0,
            }),
            content: crate::sync::RwLock::new(()),
            vfs: Ref::downgrade(vfs),
            shadow: Mutex::new(None),
            symlink_cache: Mutex::new(None),
            ops,
        });
        vn.ops.load(&vn)?;
        {
            let mut l = vn.lifecycle.lock();
            l.state = VnodeState::Alive;
            l.flags.loaded = true;
        }
        trace!(target: "vfscore::vnode", "alloc id={}", vn.id);
        Ok(vn)
    }

    pub fn vfs(&self) -> Ref<Vfs> {
        self.vfs.upgrade()
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn state(&self) -> VnodeState {
        self.lifecycle.lock().state
    }

    pub fn nlink(&self) -> u32 {
        self.lifecycle.lock().nlink
    }

    pub fn is_dirty(&self) -> bool {
        self.lifecycle.lock().flags.dirty
    }

    pub fn mark_dirty(&self) {
        self.lifecycle.lock().flags.dirty = true;
    }

    /// Called by the ventry layer's `link_vnode`/`unlink_vnode`
    /// (`ve_link_vnode`/`ve_unlink_vnode` in the original); not part of the
    /// public API.
    pub(crate) fn inc_nlink(&self) {
        let mut l = self.lifecycle.lock();
        l.nlink += 1;
    }

    pub(crate) fn dec_nlink(&self) -> u32 {
        let mut l = self.lifecycle.lock();
        debug_assert!(l.nlink > 0, "nlink underflow");
        l.nlink -= 1;
        if l.nlink == 0 {
            l.state = VnodeState::Dead;
        }
        l.nlink
    }

    pub(crate) fn set_shadow(&self, shadowed: Option<Ref<Vnode>>) -> Option<Ref<Vnode>> {
        core::mem::replace(&mut *self.shadow.lock(), shadowed)
    }

    pub(crate) fn shadow(&self) -> Option<Ref<Vnode>> {
        self.shadow.lock().clone()
    }

    pub fn stat(&self) -> Stat {
        let l = self.lifecycle.lock();
        Stat {
            ino: self.id,
            mode: self.vtype.mode_bits(),
            nlink: l.nlink,
            size: self.size.load(Ordering::Acquire),
            blocks: self.blocks.load(Ordering::Acquire),
            rdev: self.device,
        }
    }

    /// `v_open` is a null-op-is-ok call: a driver not implementing it simply
    /// means "nothing special needed to open".
    pub fn open(&self, flags: u32) -> VfsResult<()> {
        match self.ops.open(self, flags) {
            Err(VfsErrno::NotSup) => Ok(()),
            other => other,
        }
    }

    pub fn close(&self) -> VfsResult<()> {
        match self.ops.close(self) {
            Err(VfsErrno::NotSup) => Ok(()),
            other => other,
        }
    }

    /// Core wrapper for `read`: enforces the offset/size precondition before
    /// calling into the driver, and serializes against concurrent writers
    /// via the content rwlock (spec §5).
    pub fn read(&self, offset: i64, buf: &mut [u8]) -> VfsResult<usize> {
        if offset < 0 {
            return Err(VfsErrno::Inval);
        }
        if self.vtype == VnodeType::Directory {
            return Err(VfsErrno::IsDir);
        }
        let size = self.size();
        if offset as u64 > size {
            return Err(VfsErrno::Overflow);
        }
        let _g = self.content.read();
        self.ops.read(self, offset, buf)
    }

    /// Core wrapper for `write`: rejects writes to a read-only vfs before
    /// ever touching the driver.
    pub fn write(&self, offset: i64, buf: &[u8]) -> VfsResult<usize> {
        if offset < 0 {
            return Err(VfsErrno::Inval);
        }
        if self.vtype == VnodeType::Directory {
            return Err(VfsErrno::IsDir);
        }
        if offset as u64 > self.size() {
            return Err(VfsErrno::Overflow);
        }
        if self.vfs().is_readonly() {
            return Err(VfsErrno::RoFs);
        }
        let _g = self.content.write();
        let n = self.ops.write(self, offset, buf)?;
        let end = offset as u64 + n as u64;
        if end > self.size() {
            self.size.store(end, Ordering::Release);
        }
        self.mark_dirty();
        Ok(n)
    }

    pub fn map(&self, offset: i64, len: usize) -> VfsResult<MappedRegion> {
        if offset < 0 {
            return Err(VfsErrno::Inval);
        }
        if offset as u64 > self.size() {
            return Err(VfsErrno::Overflow);
        }
        self.ops.map(self, offset, len)
    }

    pub fn readdir(&self, offset: i64) -> VfsResult<Vec<DirEntry>> {
        if self.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        if offset < 0 {
            return Err(VfsErrno::Inval);
        }
        self.ops.readdir(self, offset)
    }

    /// Memoizing wrapper over the driver's `readlink` (`vn_readlink` in the
    /// original caches the target the first time it's resolved).
    pub fn readlink(&self) -> VfsResult<String> {
        if self.vtype != VnodeType::Symlink {
            return Err(VfsErrno::Inval);
        }
        if let Some(cached) = self.symlink_cache.lock().clone() {
            return Ok(cached);
        }
        let target = self.ops.readlink(self)?;
        *self.symlink_cache.lock() = Some(target.clone());
        Ok(target)
    }

    /// `vn_save`: idempotent if the vnode isn't dirty.
    pub fn save(&self) -> VfsResult<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        self.ops.save(self)?;
        self.lifecycle.lock().flags.dirty = false;
        Ok(())
    }

    /// `vn_lookup`'s driver-facing half: the resolver calls this once the
    /// ventry cache misses for `name` under the directory `dve`/`self`.
    pub fn lookup(&self, dve: &Ventry, name: &str) -> VfsResult<Ref<Ventry>> {
        if self.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        self.ops.lookup(dve, self, name)
    }

    pub fn create(&self, dve: &Ventry, name: &str, mode: u32) -> VfsResult<Ref<Ventry>> {
        if self.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        if self.vfs().is_readonly() {
            return Err(VfsErrno::RoFs);
        }
        self.ops.create(dve, self, name, mode)
    }

    pub fn mknod(&self, dve: &Ventry, name: &str, mode: u32, dev: u64) -> VfsResult<Ref<Ventry>> {
        if self.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        if self.vfs().is_readonly() {
            return Err(VfsErrno::RoFs);
        }
        mknod_type_from_mode(mode)?;
        self.ops.mknod(dve, self, name, mode, dev)
    }

    pub fn symlink(&self, dve: &Ventry, name: &str, target: &str) -> VfsResult<Ref<Ventry>> {
        if self.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        if self.vfs().is_readonly() {
            return Err(VfsErrno::RoFs);
        }
        self.ops.symlink(dve, self, name, target)
    }

    pub fn hardlink(&self, dve: &Ventry, name: &str, target: &Vnode) -> VfsResult<Ref<Ventry>> {
        if self.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        if self.vfs().is_readonly() {
            return Err(VfsErrno::RoFs);
        }
        if self.vfs().id != target.vfs().id {
            return Err(VfsErrno::XDev);
        }
        self.ops.hardlink(dve, self, name, target)
    }

    pub fn mkdir(&self, dve: &Ventry, name: &str, mode: u32) -> VfsResult<Ref<Ventry>> {
        if self.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        if self.vfs().is_readonly() {
            return Err(VfsErrno::RoFs);
        }
        self.ops.mkdir(dve, self, name, mode)
    }

    pub fn unlink(&self, dve: &Ventry, ve: &Ventry, vn: &Vnode) -> VfsResult<()> {
        if self.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        if self.vfs().is_readonly() {
            return Err(VfsErrno::RoFs);
        }
        self.ops.unlink(dve, self, ve, vn)
    }

    pub fn rmdir(&self, dve: &Ventry, ve: &Ventry, vn: &Vnode) -> VfsResult<()> {
        if self.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        if self.vfs().is_readonly() {
            return Err(VfsErrno::RoFs);
        }
        self.ops.rmdir(dve, self, ve, vn)
    }
}

impl Drop for Vnode {
    fn drop(&mut self) {
        trace!(target: "vfscore::vnode", "cleanup id={}", self.id);
        self.ops.cleanup(self);
    }
}

/// The per-filesystem-type vnode operations vtable. A driver implements
/// only the operations relevant to its vnode types; everything else
/// defaults to [`VfsErrno::NotSup`], matching a null function pointer in
/// the original's `vnode_ops_t`. Operands are plain references (not counted
/// `Ref`s): the core already holds whatever reference keeps them alive for
/// the call's duration, mirroring the raw `vnode_t *`/`ventry_t *` the C
/// vtable passes through.
pub trait VnodeOps: Send + Sync {
    fn open(&self, _vn: &Vnode, _flags: u32) -> VfsResult<()> {
        Err(VfsErrno::NotSup)
    }
    fn close(&self, _vn: &Vnode) -> VfsResult<()> {
        Err(VfsErrno::NotSup)
    }
    fn load(&self, _vn: &Vnode) -> VfsResult<()> {
        Ok(())
    }
    fn save(&self, _vn: &Vnode) -> VfsResult<()> {
        Ok(())
    }
    fn cleanup(&self, _vn: &Vnode) {}

    fn read(&self, _vn: &Vnode, _offset: i64, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(VfsErrno::NotSup)
    }
    fn write(&self, _vn: &Vnode, _offset: i64, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsErrno::NotSup)
    }
    fn map(&self, _vn: &Vnode, _offset: i64, _len: usize) -> VfsResult<MappedRegion> {
        Err(VfsErrno::NotSup)
    }

    fn readdir(&self, _vn: &Vnode, _offset: i64) -> VfsResult<Vec<DirEntry>> {
        Err(VfsErrno::NotSup)
    }
    fn readlink(&self, _vn: &Vnode) -> VfsResult<String> {
        Err(VfsErrno::NotSup)
    }

    /// Produce a newly allocated, fully linked child ventry (spec §4.5 step
    /// 4: "the returned ventry must be newly constructed and validly
    /// linked"). Drivers build it via `Ventry::alloc_linked` over a vnode
    /// they allocate with `Vnode::alloc`.
    fn lookup(&self, _dve: &Ventry, _dvn: &Vnode, _name: &str) -> VfsResult<Ref<Ventry>> {
        Err(VfsErrno::NotSup)
    }
    fn create(
        &self,
        _dve: &Ventry,
        _dvn: &Vnode,
        _name: &str,
        _mode: u32,
    ) -> VfsResult<Ref<Ventry>> {
        Err(VfsErrno::NotSup)
    }
    fn mknod(
        &self,
        _dve: &Ventry,
        _dvn: &Vnode,
        _name: &str,
        _mode: u32,
        _dev: u64,
    ) -> VfsResult<Ref<Ventry>> {
        Err(VfsErrno::NotSup)
    }
    fn symlink(
        &self,
        _dve: &Ventry,
        _dvn: &Vnode,
        _name: &str,
        _target: &str,
    ) -> VfsResult<Ref<Ventry>> {
        Err(VfsErrno::NotSup)
    }
    fn hardlink(
        &self,
        _dve: &Ventry,
        _dvn: &Vnode,
        _name: &str,
        _target: &Vnode,
    ) -> VfsResult<Ref<Ventry>> {
        Err(VfsErrno::NotSup)
    }
    fn mkdir(
        &self,
        _dve: &Ventry,
        _dvn: &Vnode,
        _name: &str,
        _mode: u32,
    ) -> VfsResult<Ref<Ventry>> {
        Err(VfsErrno::NotSup)
    }
    fn unlink(&self, _dve: &Ventry, _dvn: &Vnode, _ve: &Ventry, _vn: &Vnode) -> VfsResult<()> {
        Err(VfsErrno::NotSup)
    }
    fn rmdir(&self, _dve: &Ventry, _dvn: &Vnode, _ve: &Ventry, _vn: &Vnode) -> VfsResult<()> {
        Err(VfsErrno::NotSup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fstype::{FsDriver, FsType};
    use crate::vfs::VfsFlags;

    struct NullOps;
    impl VnodeOps for NullOps {}

    struct NullDriver;
    impl FsDriver for NullDriver {
        fn name(&self) -> &str {
            "null"
        }
        fn mount(&self, vfs: &Ref<Vfs>, _source: Option<&str>) -> VfsResult<Ref<Vnode>> {
            Vnode::alloc(1, VnodeType::Directory, vfs, Arc::new(NullOps), None)
        }
    }

    fn test_vfs() -> Ref<Vfs> {
        let fstype = Arc::new(FsType {
            name: String::from("null"),
            vnode_ops: Arc::new(NullOps),
            ventry_ops: Arc::new(crate::ventry::DefaultVentryOps),
            driver: Arc::new(NullDriver),
        });
        Vfs::new(1, fstype, VfsFlags::default())
    }

    #[test]
    fn read_past_size_overflows() {
        let vfs = test_vfs();
        let vn = Vnode::alloc(2, VnodeType::Regular, &vfs, Arc::new(NullOps), None).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(vn.read(1, &mut buf), Err(VfsErrno::Overflow));
    }

    #[test]
    fn read_at_size_boundary_is_not_overflow() {
        let vfs = test_vfs();
        let vn = Vnode::alloc(3, VnodeType::Regular, &vfs, Arc::new(NullOps), None).unwrap();
        let mut buf = [0u8; 4];
        // offset == size (0) is in-bounds; the driver (NullOps) then reports NotSup.
        assert_eq!(vn.read(0, &mut buf), Err(VfsErrno::NotSup));
    }

    #[test]
    fn write_past_size_overflows() {
        let vfs = test_vfs();
        let vn = Vnode::alloc(7, VnodeType::Regular, &vfs, Arc::new(NullOps), None).unwrap();
        assert_eq!(vn.write(1, b"x"), Err(VfsErrno::Overflow));
    }

    #[test]
    fn write_at_size_boundary_is_not_overflow() {
        let vfs = test_vfs();
        let vn = Vnode::alloc(8, VnodeType::Regular, &vfs, Arc::new(NullOps), None).unwrap();
        // offset == size (0) is in-bounds; the driver (NullOps) then reports NotSup.
        assert_eq!(vn.write(0, b"x"), Err(VfsErrno::NotSup));
    }

    #[test]
    fn directory_read_is_isdir() {
        let vfs = test_vfs();
        let vn = Vnode::alloc(4, VnodeType::Directory, &vfs, Arc::new(NullOps), None).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(vn.read(0, &mut buf), Err(VfsErrno::IsDir));
    }

    #[test]
    fn open_close_null_ops_are_ok() {
        let vfs = test_vfs();
        let vn = Vnode::alloc(5, VnodeType::Regular, &vfs, Arc::new(NullOps), None).unwrap();
        assert_eq!(vn.open(0), Ok(()));
        assert_eq!(vn.close(), Ok(()));
    }

    #[test]
    fn nlink_reaching_zero_marks_dead_but_vnode_survives_refs() {
        let vfs = test_vfs();
        let vn = Vnode::alloc(6, VnodeType::Regular, &vfs, Arc::new(NullOps), None).unwrap();
        vn.inc_nlink();
        assert_eq!(vn.dec_nlink(), 0);
        assert_eq!(vn.state(), VnodeState::Dead);
        // still alive as a Rust value because `vn` is a live Ref.
        assert_eq!(vn.id, 6);
    }
}
