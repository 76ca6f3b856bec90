//! Filesystem type registration (spec §4.4/§6.1): the driver contract a
//! concrete filesystem implements to become mountable.
//!
//! `fs_register_type`/`fs_get_type` in `include/kernel/fs.h` name this
//! surface; the struct layout of `fs_type_t` itself isn't in the filtered
//! `original_source/` set, so the trait/struct split below is this crate's
//! own (a `driver` trait object for the one callback every fs type needs —
//! `mount` — plus the vnode/ventry op tables it installs on everything it
//! creates), following the same "ops struct bundles a name and some
//! vtables" shape `petitstrawberry-Scarlet`'s `FileSystemOperations`
//! registration uses.

use alloc::string::String;
use alloc::sync::Arc;

use crate::error::{VfsErrno, VfsResult};
use crate::refcount::Ref;
use crate::ventry::VentryOps;
use crate::vfs::Vfs;
use crate::vnode::{Vnode, VnodeOps};

/// The one callback every filesystem type must provide: given a freshly
/// constructed (rootless) `Vfs`, produce its root vnode. The core wraps the
/// result in a root ventry and attaches it at the requested mount point.
pub trait FsDriver: Send + Sync {
    fn name(&self) -> &str;
    fn mount(&self, vfs: &Ref<Vfs>, source: Option<&str>) -> VfsResult<Ref<Vnode>>;
}

/// A registered filesystem type: a name, the op-vtables every vnode/ventry
/// it creates is installed with, and the driver's mount entry point.
pub struct FsType {
    pub name: String,
    pub vnode_ops: Arc<dyn VnodeOps>,
    pub ventry_ops: Arc<dyn VentryOps>,
    pub driver: Arc<dyn FsDriver>,
}

/// Process-wide (well: `VfsContext`-wide, see §9) table of registered
/// filesystem types, keyed by name. Lookups happen on every `mount`, so
/// this is an `RwLock`, not the ventry layer's heavier reentrant lock —
/// nothing here ever re-enters.
pub struct FsTypeRegistry {
    types: crate::sync::RwLock<hashbrown::HashMap<String, Arc<FsType>>>,
}

impl FsTypeRegistry {
    pub fn new() -> Self {
        FsTypeRegistry {
            types: crate::sync::RwLock::new(hashbrown::HashMap::new()),
        }
    }

    /// `fs_register_type`.
    pub fn register(&self, ty: Arc<FsType>) -> VfsResult<()> {
        let mut types = self.types.write();
        if types.contains_key(&ty.name) {
            return Err(VfsErrno::Exist);
        }
        types.insert(ty.name.clone(), ty);
        Ok(())
    }

    /// `fs_get_type`.
    pub fn get(&self, name: &str) -> VfsResult<Arc<FsType>> {
        self.types.read().get(name).cloned().ok_or(VfsErrno::NoEnt)
    }
}

impl Default for FsTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
