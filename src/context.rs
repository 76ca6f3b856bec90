//! Process-wide VFS state, made explicit (SPEC_FULL.md "Ambient stack",
//! spec §9 "Design Notes / Process-wide state"): the fs-type registry and
//! the absolute root, threaded through a value instead of `static`s so
//! multiple independent instances (hence: tests) never cross-talk.
//!
//! [`VfsContext`] is the entry point for the path-indexed public API named
//! in spec §6.2 / `include/kernel/fs.h` (`fs_mount`, `fs_stat`, `fs_create`,
//! …). Descriptor-indexed operations (`fs_read`, `fs_dup`, …) are out of
//! this module's scope — see `file.rs` — because the fd table itself is
//! process state, not core state.

use alloc::string::String;
use alloc::sync::Arc;

use log::{debug, info};

use crate::error::{VfsErrno, VfsResult};
use crate::fstype::{FsType, FsTypeRegistry};
use crate::refcount::Ref;
use crate::resolver::{self};
use crate::sync::{RwLock, Tid};
use crate::ventry::Ventry;
use crate::vfs::{Vfs, VfsFlags};
use crate::vnode::{Stat, VnodeType};

/// Injectable limits, replacing the original's compiled-in `NAME_MAX` and
/// symlink-depth constant (SPEC_FULL.md "Configuration").
#[derive(Debug, Clone, Copy)]
pub struct VfsLimits {
    pub name_max: usize,
    pub max_symlink_depth: u32,
}

impl Default for VfsLimits {
    fn default() -> Self {
        VfsLimits {
            name_max: 255,
            max_symlink_depth: 8,
        }
    }
}

pub struct VfsContext {
    pub limits: VfsLimits,
    pub fs_types: FsTypeRegistry,
    root: RwLock<Option<Ref<Ventry>>>,
    next_vfs_id: core::sync::atomic::AtomicU64,
}

/// Runs `f` (a driver call) under `vfs`'s write-op fence, per spec §4.5:
/// "Creation ops ... follow the same shape but under a write-op fence."
/// The fence is released before the result is inspected, so a driver error
/// still unwinds cleanly without leaking the in-flight-op count.
fn write_fenced<T>(vfs: &Ref<Vfs>, f: impl FnOnce() -> VfsResult<T>) -> VfsResult<T> {
    vfs.begin_write_op()?;
    let result = f();
    vfs.end_write_op();
    result
}

impl VfsContext {
    pub fn new(limits: VfsLimits) -> Self {
        VfsContext {
            limits,
            fs_types: FsTypeRegistry::new(),
            root: RwLock::new(None),
            next_vfs_id: core::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn register_fs_type(&self, ty: Arc<FsType>) -> VfsResult<()> {
        self.fs_types.register(ty)
    }

    pub fn root(&self) -> VfsResult<Ref<Ventry>> {
        self.root.read().clone().ok_or(VfsErrno::Io)
    }

    /// `fs_mount`. `target` is `None` for the very first mount (which
    /// becomes the absolute root directly, no shadowing involved) and
    /// `Some(mountpoint)` for every subsequent mount.
    pub fn mount(
        &self,
        tid: Tid,
        target: Option<&Ref<Ventry>>,
        fs_type_name: &str,
        source: Option<&str>,
        flags: VfsFlags,
    ) -> VfsResult<()> {
        let fstype = self.fs_types.get(fs_type_name)?;
        let id = self.next_vfs_id.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        let vfs = Vfs::new(id, fstype.clone(), flags);
        let root_vn = fstype.driver.mount(&vfs, source)?;
        vfs.register_vnode(root_vn.clone())?;
        let root_ve = Ventry::alloc_linked("/", root_vn, fstype.ventry_ops.clone());
        vfs.set_root(root_ve.clone());

        match target {
            None => {
                let mut root = self.root.write();
                if root.is_some() {
                    return Err(VfsErrno::Exist);
                }
                *root = Some(root_ve);
                info!(target: "vfscore::context", "mounted {} as absolute root", fs_type_name);
            }
            Some(mountpoint) => {
                Ventry::shadow_mount(mountpoint, tid, root_ve)?;
                info!(target: "vfscore::context", "mounted {} at {}", fs_type_name, mountpoint.name);
            }
        }
        Ok(())
    }

    /// `fs_unmount`: resolve `path`, require it names an active mount
    /// point, drain its vfs's op fence, then unshadow.
    pub fn unmount(&self, tid: Tid, cwd: &Ref<Ventry>, path: &str) -> VfsResult<()> {
        let target = resolver::resolve(self, tid, cwd, path, true)?;
        if !target.is_mount_point(tid) {
            return Err(VfsErrno::Inval);
        }
        let mounted_root = Ventry::unshadow_mount(&target, tid)?;
        let vfs = mounted_root.vnode(tid).vfs();
        vfs.teardown();
        debug!(target: "vfscore::context", "unmounted vfs {}", vfs.id);
        Ok(())
    }

    /// `fs_replace_root`: re-root the whole tree onto whatever `new_root`
    /// (itself a path, resolved relative to the current root) names.
    pub fn replace_root(&self, tid: Tid, new_root_path: &str) -> VfsResult<()> {
        let old_root = self.root()?;
        let new_root = resolver::resolve(self, tid, &old_root, new_root_path, true)?;
        Ventry::replace_root(&old_root, tid, new_root)
    }

    pub fn stat(&self, tid: Tid, cwd: &Ref<Ventry>, path: &str) -> VfsResult<Stat> {
        let ve = resolver::resolve(self, tid, cwd, path, true)?;
        Ok(ve.vnode(tid).stat())
    }

    pub fn lstat(&self, tid: Tid, cwd: &Ref<Ventry>, path: &str) -> VfsResult<Stat> {
        let ve = resolver::resolve(self, tid, cwd, path, false)?;
        Ok(ve.vnode(tid).stat())
    }

    /// `fs_open`: resolve the path and invoke the vnode's `open` op. Does
    /// not allocate a descriptor — that's process state; callers get back
    /// the ventry/vnode pair and build their own fd table entry around it
    /// (see `file.rs::OpenFile`).
    pub fn open(&self, tid: Tid, cwd: &Ref<Ventry>, path: &str, flags: u32) -> VfsResult<Ref<Ventry>> {
        let ve = resolver::resolve(self, tid, cwd, path, true)?;
        ve.vnode(tid).open(flags)?;
        Ok(ve)
    }

    pub fn create(&self, tid: Tid, cwd: &Ref<Ventry>, path: &str, mode: u32) -> VfsResult<Ref<Ventry>> {
        let (dir, name) = resolver::resolve_parent(self, tid, cwd, path)?;
        if dir.find_child(tid, &name).is_some() {
            return Err(VfsErrno::Exist);
        }
        let dvn = dir.vnode(tid);
        let new_ve = write_fenced(&dvn.vfs(), || dvn.create(&dir, &name, mode))?;
        Ventry::sync(&new_ve, tid);
        Ventry::add_child(&dir, tid, new_ve.clone());
        Ok(new_ve)
    }

    pub fn mknod(
        &self,
        tid: Tid,
        cwd: &Ref<Ventry>,
        path: &str,
        mode: u32,
        dev: u64,
    ) -> VfsResult<Ref<Ventry>> {
        let (dir, name) = resolver::resolve_parent(self, tid, cwd, path)?;
        if dir.find_child(tid, &name).is_some() {
            return Err(VfsErrno::Exist);
        }
        let dvn = dir.vnode(tid);
        let new_ve = write_fenced(&dvn.vfs(), || dvn.mknod(&dir, &name, mode, dev))?;
        Ventry::sync(&new_ve, tid);
        Ventry::add_child(&dir, tid, new_ve.clone());
        Ok(new_ve)
    }

    pub fn symlink(
        &self,
        tid: Tid,
        cwd: &Ref<Ventry>,
        target: &str,
        linkpath: &str,
    ) -> VfsResult<Ref<Ventry>> {
        let (dir, name) = resolver::resolve_parent(self, tid, cwd, linkpath)?;
        if dir.find_child(tid, &name).is_some() {
            return Err(VfsErrno::Exist);
        }
        let dvn = dir.vnode(tid);
        let new_ve = write_fenced(&dvn.vfs(), || dvn.symlink(&dir, &name, target))?;
        Ventry::sync(&new_ve, tid);
        Ventry::add_child(&dir, tid, new_ve.clone());
        Ok(new_ve)
    }

    /// `fs_link`: hardlink `oldpath` at `newpath`. Rejects crossing vfs
    /// instances (`VfsErrno::XDev`), matching `Vnode::hardlink`'s check.
    pub fn hardlink(
        &self,
        tid: Tid,
        cwd: &Ref<Ventry>,
        oldpath: &str,
        newpath: &str,
    ) -> VfsResult<Ref<Ventry>> {
        let old = resolver::resolve(self, tid, cwd, oldpath, true)?;
        let (dir, name) = resolver::resolve_parent(self, tid, cwd, newpath)?;
        if dir.find_child(tid, &name).is_some() {
            return Err(VfsErrno::Exist);
        }
        let dvn = dir.vnode(tid);
        let target_vn = old.vnode(tid);
        let new_ve = write_fenced(&dvn.vfs(), || dvn.hardlink(&dir, &name, &target_vn))?;
        Ventry::sync(&new_ve, tid);
        Ventry::add_child(&dir, tid, new_ve.clone());
        Ok(new_ve)
    }

    pub fn unlink(&self, tid: Tid, cwd: &Ref<Ventry>, path: &str) -> VfsResult<()> {
        let (dir, name) = resolver::resolve_parent(self, tid, cwd, path)?;
        let ve = dir.find_child(tid, &name).ok_or(VfsErrno::NoEnt)?;
        if ve.vtype == VnodeType::Directory {
            return Err(VfsErrno::IsDir);
        }
        let dvn = dir.vnode(tid);
        let vn = ve.vnode(tid);
        write_fenced(&dvn.vfs(), || dvn.unlink(&dir, &ve, &vn))?;
        ve.unlink_vnode(tid);
        Ventry::sync(&ve, tid);
        Ventry::remove_child(&dir, tid, &ve);
        Ok(())
    }

    pub fn mkdir(&self, tid: Tid, cwd: &Ref<Ventry>, path: &str, mode: u32) -> VfsResult<Ref<Ventry>> {
        let (dir, name) = resolver::resolve_parent(self, tid, cwd, path)?;
        if dir.find_child(tid, &name).is_some() {
            return Err(VfsErrno::Exist);
        }
        let dvn = dir.vnode(tid);
        let new_ve = write_fenced(&dvn.vfs(), || dvn.mkdir(&dir, &name, mode))?;
        Ventry::sync(&new_ve, tid);
        Ventry::add_child(&dir, tid, new_ve.clone());
        Ok(new_ve)
    }

    pub fn rmdir(&self, tid: Tid, cwd: &Ref<Ventry>, path: &str) -> VfsResult<()> {
        let (dir, name) = resolver::resolve_parent(self, tid, cwd, path)?;
        let ve = dir.find_child(tid, &name).ok_or(VfsErrno::NoEnt)?;
        if ve.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        if !ve.children(tid).is_empty() {
            return Err(VfsErrno::Inval);
        }
        let dvn = dir.vnode(tid);
        let vn = ve.vnode(tid);
        write_fenced(&dvn.vfs(), || dvn.rmdir(&dir, &ve, &vn))?;
        ve.unlink_vnode(tid);
        Ventry::sync(&ve, tid);
        Ventry::remove_child(&dir, tid, &ve);
        Ok(())
    }

    /// `fs_rename`: implemented in terms of hardlink+unlink, the same
    /// decomposition most non-journaling filesystems use for a
    /// same-filesystem rename. Cross-vfs renames are rejected like
    /// cross-vfs hardlinks.
    pub fn rename(&self, tid: Tid, cwd: &Ref<Ventry>, oldpath: &str, newpath: &str) -> VfsResult<()> {
        self.hardlink(tid, cwd, oldpath, newpath)?;
        self.unlink(tid, cwd, oldpath)
    }

    pub fn readlink(&self, tid: Tid, cwd: &Ref<Ventry>, path: &str) -> VfsResult<String> {
        let ve = resolver::resolve(self, tid, cwd, path, false)?;
        ve.vnode(tid).readlink()
    }

    /// `fs_chdir`: resolves and returns the new cwd ventry; storing it is
    /// the process layer's job (cwd is process state, not core state).
    pub fn chdir(&self, tid: Tid, cwd: &Ref<Ventry>, path: &str) -> VfsResult<Ref<Ventry>> {
        let ve = resolver::resolve(self, tid, cwd, path, true)?;
        if ve.vtype != VnodeType::Directory {
            return Err(VfsErrno::NotDir);
        }
        Ok(ve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::memfs::MemFs;

    fn ctx() -> VfsContext {
        let ctx = VfsContext::new(VfsLimits::default());
        ctx.register_fs_type(MemFs::fs_type()).unwrap();
        ctx.mount(1, None, "memfs", None, VfsFlags::default())
            .unwrap();
        ctx
    }

    #[test]
    fn second_absolute_mount_is_rejected() {
        let c = ctx();
        assert_eq!(
            c.mount(1, None, "memfs", None, VfsFlags::default())
                .unwrap_err(),
            VfsErrno::Exist
        );
    }

    #[test]
    fn create_stat_unlink_round_trip() {
        let c = ctx();
        let root = c.root().unwrap();
        c.create(1, &root, "/f", 0o644).unwrap();
        let st = c.stat(1, &root, "/f").unwrap();
        assert_eq!(st.nlink, 1);
        c.unlink(1, &root, "/f").unwrap();
        assert_eq!(
            c.stat(1, &root, "/f").unwrap_err(),
            VfsErrno::NoEnt
        );
    }

    #[test]
    fn mkdir_rmdir_round_trip() {
        let c = ctx();
        let root = c.root().unwrap();
        c.mkdir(1, &root, "/d", 0o755).unwrap();
        assert_eq!(c.stat(1, &root, "/d").unwrap().mode & 0o170000, VnodeType::Directory.mode_bits());
        c.rmdir(1, &root, "/d").unwrap();
        assert_eq!(c.stat(1, &root, "/d").unwrap_err(), VfsErrno::NoEnt);
    }

    #[test]
    fn rmdir_nonempty_is_rejected() {
        let c = ctx();
        let root = c.root().unwrap();
        c.mkdir(1, &root, "/d", 0o755).unwrap();
        c.create(1, &root, "/d/f", 0o644).unwrap();
        assert_eq!(c.rmdir(1, &root, "/d").unwrap_err(), VfsErrno::Inval);
    }

    #[test]
    fn symlink_readlink_round_trip() {
        let c = ctx();
        let root = c.root().unwrap();
        c.symlink(1, &root, "/target", "/link").unwrap();
        assert_eq!(c.readlink(1, &root, "/link").unwrap(), "/target");
    }

    #[test]
    fn hardlink_same_vfs_shares_vnode_then_unlink_preserves_other_name() {
        let c = ctx();
        let root = c.root().unwrap();
        c.create(1, &root, "/a", 0o644).unwrap();
        c.hardlink(1, &root, "/a", "/b").unwrap();
        assert_eq!(c.stat(1, &root, "/a").unwrap().nlink, 2);
        c.unlink(1, &root, "/a").unwrap();
        assert_eq!(c.stat(1, &root, "/b").unwrap().nlink, 1);
    }

    #[test]
    fn mknod_derives_char_device_from_mode_and_rejects_bad_mode() {
        let c = ctx();
        let root = c.root().unwrap();
        let ve = c
            .mknod(1, &root, "/dev0", 0o020000 | 0o644, 0x0500)
            .unwrap();
        let st = c.stat(1, &root, "/dev0").unwrap();
        assert_eq!(st.mode & 0o170000, VnodeType::CharDevice.mode_bits());
        assert_eq!(st.rdev, Some(0x0500));
        assert_eq!(
            c.mknod(1, &root, "/bad", 0o100644, 0).unwrap_err(),
            VfsErrno::Inval
        );
    }

    #[test]
    fn mount_and_unmount_round_trip() {
        let c = ctx();
        let root = c.root().unwrap();
        c.mkdir(1, &root, "/mnt", 0o755).unwrap();
        let mnt = resolver::resolve(&c, 1, &root, "/mnt", true).unwrap();
        c.mount(1, Some(&mnt), "memfs", None, VfsFlags::default())
            .unwrap();
        assert!(mnt.is_mount_point(1));
        c.unmount(1, &root, "/mnt").unwrap();
        assert!(!mnt.is_mount_point(1));
    }

    /// Spec §8 end-to-end scenario 3 ("Replace root"), under this crate's
    /// documented `replace_root` semantics (DESIGN.md "replace_root"): the
    /// absolute root ventry's identity is preserved, `/new` becomes
    /// reachable through it, and a ventry resolved under the old root
    /// *before* the replace stays independently valid and walkable even
    /// though it is no longer reachable from the (new) absolute path
    /// namespace — the same way an ordinary mount hides, rather than
    /// destroys, whatever was cached beneath it.
    #[test]
    fn replace_root_preserves_identity_and_old_handles() {
        let c = ctx();
        let root = c.root().unwrap();
        let old_dir = c.mkdir(1, &root, "/old", 0o755).unwrap();
        c.mkdir(1, &root, "/newroot", 0o755).unwrap();
        let newroot_mnt = resolver::resolve(&c, 1, &root, "/newroot", true).unwrap();
        c.mount(1, Some(&newroot_mnt), "memfs", None, VfsFlags::default())
            .unwrap();
        let new_fs_root = resolver::resolve(&c, 1, &root, "/newroot", true).unwrap();
        c.mkdir(1, &new_fs_root, "new", 0o755).unwrap();

        c.replace_root(1, "/newroot").unwrap();

        let new_root = c.root().unwrap();
        assert!(Ref::eq(&new_root, &root), "absolute root identity is preserved");
        let new_entry = resolver::resolve(&c, 1, &new_root, "/new", true).unwrap();
        assert_eq!(new_entry.vtype, VnodeType::Directory);

        // old root content is no longer reachable via the new absolute
        // path namespace...
        assert_eq!(
            resolver::resolve(&c, 1, &new_root, "/old", true).unwrap_err(),
            VfsErrno::NoEnt
        );
        // ...but the ventry resolved under the old root before the replace
        // is untouched and still a live, well-typed directory handle.
        assert_eq!(old_dir.vtype, VnodeType::Directory);
        assert_eq!(old_dir.vnode(1).stat().mode & 0o170000, VnodeType::Directory.mode_bits());
    }
}
