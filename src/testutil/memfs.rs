//! An in-memory reference filesystem driver, grounded on the shape of
//! `petitstrawberry-Scarlet`'s `TmpFS`/`DevFS` (`fs/vfs_v2/drivers/tmpfs`,
//! `fs/vfs_v2/drivers/devfs.rs`): a single shared table of per-vnode content
//! keyed by vnode id, with directories storing a name-to-id map rather than
//! any real on-disk layout. Exists only so this crate's tests have a
//! concrete filesystem to mount; not meant to be a serious driver.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Once;

use crate::error::{VfsErrno, VfsResult};
use crate::fstype::{FsDriver, FsType};
use crate::refcount::Ref;
use crate::sync::Mutex;
use crate::ventry::{DefaultVentryOps, Ventry};
use crate::vfs::Vfs;
use crate::vnode::{DirEntry, Vnode, VnodeOps, VnodeType};

enum MemNode {
    Dir {
        children: BTreeMap<String, (u64, VnodeType)>,
    },
    File {
        data: Vec<u8>,
    },
    Symlink {
        target: String,
    },
    Device {
        dev: u64,
    },
}

struct MemFsState {
    nodes: Mutex<BTreeMap<u64, MemNode>>,
    next_id: AtomicU64,
    self_ops: Once<Arc<dyn VnodeOps>>,
}

pub struct MemFs;

impl MemFs {
    pub fn fs_type() -> Arc<FsType> {
        Arc::new(FsType {
            name: String::from("memfs"),
            // Unused by this driver directly: `mount` builds its own
            // per-instance ops (each mount needs independent storage), so
            // this is only the descriptor's nominal "default ops" slot.
            vnode_ops: Arc::new(StatelessNullOps),
            ventry_ops: Arc::new(DefaultVentryOps),
            driver: Arc::new(MemFsDriver),
        })
    }
}

struct StatelessNullOps;
impl VnodeOps for StatelessNullOps {}

struct MemFsDriver;

impl FsDriver for MemFsDriver {
    fn name(&self) -> &str {
        "memfs"
    }

    fn mount(&self, vfs: &Ref<Vfs>, _source: Option<&str>) -> VfsResult<Ref<Vnode>> {
        let state = Arc::new(MemFsState {
            nodes: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(2),
            self_ops: Once::new(),
        });
        let ops: Arc<dyn VnodeOps> = Arc::new(MemFsOps {
            state: state.clone(),
        });
        state.self_ops.call_once(|| ops.clone());

        let root_id = 1;
        state.nodes.lock().insert(
            root_id,
            MemNode::Dir {
                children: BTreeMap::new(),
            },
        );
        let root = Vnode::alloc(root_id, VnodeType::Directory, vfs, ops, None)?;
        vfs.register_vnode(root.clone())?;
        Ok(root)
    }
}

struct MemFsOps {
    state: Arc<MemFsState>,
}

impl MemFsOps {
    fn self_ops(&self) -> Arc<dyn VnodeOps> {
        self.state
            .self_ops
            .get()
            .expect("self_ops installed during mount")
            .clone()
    }

    /// Returns the canonical `Vnode` for `id`, creating and registering it
    /// with `vfs` if this is the first time it has been materialised in
    /// this process (spec §4.4: the vfs's vnode registry is the canonical
    /// object table, so `nlink`/state live in exactly one place per id).
    fn materialize(
        &self,
        vfs: &Ref<Vfs>,
        id: u64,
        vtype: VnodeType,
        device: Option<u64>,
    ) -> VfsResult<Ref<Vnode>> {
        if let Some(existing) = vfs.lookup_vnode(id) {
            return Ok(existing);
        }
        let vn = Vnode::alloc(id, vtype, vfs, self.self_ops(), device)?;
        vfs.register_vnode(vn.clone())?;
        Ok(vn)
    }

    fn alloc_id(&self) -> u64 {
        self.state.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl VnodeOps for MemFsOps {
    fn read(&self, vn: &Vnode, offset: i64, buf: &mut [u8]) -> VfsResult<usize> {
        let nodes = self.state.nodes.lock();
        match nodes.get(&vn.id) {
            Some(MemNode::File { data }) => {
                let off = offset as usize;
                if off >= data.len() {
                    return Ok(0);
                }
                let n = core::cmp::min(buf.len(), data.len() - off);
                buf[..n].copy_from_slice(&data[off..off + n]);
                Ok(n)
            }
            Some(_) => Err(VfsErrno::Inval),
            None => Err(VfsErrno::Io),
        }
    }

    fn write(&self, vn: &Vnode, offset: i64, buf: &[u8]) -> VfsResult<usize> {
        let mut nodes = self.state.nodes.lock();
        match nodes.get_mut(&vn.id) {
            Some(MemNode::File { data }) => {
                let off = offset as usize;
                if data.len() < off + buf.len() {
                    data.resize(off + buf.len(), 0);
                }
                data[off..off + buf.len()].copy_from_slice(buf);
                Ok(buf.len())
            }
            Some(_) => Err(VfsErrno::Inval),
            None => Err(VfsErrno::Io),
        }
    }

    fn readdir(&self, vn: &Vnode, offset: i64) -> VfsResult<Vec<DirEntry>> {
        let nodes = self.state.nodes.lock();
        match nodes.get(&vn.id) {
            Some(MemNode::Dir { children }) => Ok(children
                .iter()
                .skip(offset as usize)
                .map(|(name, (ino, vtype))| DirEntry {
                    name: name.clone(),
                    ino: *ino,
                    vtype: *vtype,
                })
                .collect()),
            Some(_) => Err(VfsErrno::NotDir),
            None => Err(VfsErrno::Io),
        }
    }

    fn readlink(&self, vn: &Vnode) -> VfsResult<String> {
        let nodes = self.state.nodes.lock();
        match nodes.get(&vn.id) {
            Some(MemNode::Symlink { target }) => Ok(target.clone()),
            Some(_) => Err(VfsErrno::Inval),
            None => Err(VfsErrno::Io),
        }
    }

    fn lookup(&self, _dve: &Ventry, dvn: &Vnode, name: &str) -> VfsResult<Ref<Ventry>> {
        let entry = {
            let nodes = self.state.nodes.lock();
            match nodes.get(&dvn.id) {
                Some(MemNode::Dir { children }) => {
                    children.get(name).copied().ok_or(VfsErrno::NoEnt)?
                }
                Some(_) => return Err(VfsErrno::NotDir),
                None => return Err(VfsErrno::Io),
            }
        };
        let (id, vtype) = entry;
        let vfs = dvn.vfs();
        let vn = self.materialize(&vfs, id, vtype, None)?;
        Ok(Ventry::alloc_linked(name, vn, Arc::new(DefaultVentryOps)))
    }

    fn create(&self, _dve: &Ventry, dvn: &Vnode, name: &str, _mode: u32) -> VfsResult<Ref<Ventry>> {
        let mut nodes = self.state.nodes.lock();
        let id = self.alloc_id();
        match nodes.get_mut(&dvn.id) {
            Some(MemNode::Dir { children }) => {
                if children.contains_key(name) {
                    return Err(VfsErrno::Exist);
                }
                children.insert(name.to_string(), (id, VnodeType::Regular));
            }
            Some(_) => return Err(VfsErrno::NotDir),
            None => return Err(VfsErrno::Io),
        }
        nodes.insert(id, MemNode::File { data: Vec::new() });
        drop(nodes);
        let vfs = dvn.vfs();
        let vn = self.materialize(&vfs, id, VnodeType::Regular, None)?;
        Ok(Ventry::alloc_linked(name, vn, Arc::new(DefaultVentryOps)))
    }

    fn mknod(
        &self,
        _dve: &Ventry,
        dvn: &Vnode,
        name: &str,
        mode: u32,
        dev: u64,
    ) -> VfsResult<Ref<Ventry>> {
        let vtype = crate::vnode::mknod_type_from_mode(mode)?;
        let mut nodes = self.state.nodes.lock();
        let id = self.alloc_id();
        match nodes.get_mut(&dvn.id) {
            Some(MemNode::Dir { children }) => {
                if children.contains_key(name) {
                    return Err(VfsErrno::Exist);
                }
                children.insert(name.to_string(), (id, vtype));
            }
            Some(_) => return Err(VfsErrno::NotDir),
            None => return Err(VfsErrno::Io),
        }
        nodes.insert(id, MemNode::Device { dev });
        drop(nodes);
        let vfs = dvn.vfs();
        let vn = self.materialize(&vfs, id, vtype, Some(dev))?;
        Ok(Ventry::alloc_linked(name, vn, Arc::new(DefaultVentryOps)))
    }

    fn symlink(
        &self,
        _dve: &Ventry,
        dvn: &Vnode,
        name: &str,
        target: &str,
    ) -> VfsResult<Ref<Ventry>> {
        let mut nodes = self.state.nodes.lock();
        let id = self.alloc_id();
        match nodes.get_mut(&dvn.id) {
            Some(MemNode::Dir { children }) => {
                if children.contains_key(name) {
                    return Err(VfsErrno::Exist);
                }
                children.insert(name.to_string(), (id, VnodeType::Symlink));
            }
            Some(_) => return Err(VfsErrno::NotDir),
            None => return Err(VfsErrno::Io),
        }
        nodes.insert(
            id,
            MemNode::Symlink {
                target: target.to_string(),
            },
        );
        drop(nodes);
        let vfs = dvn.vfs();
        let vn = self.materialize(&vfs, id, VnodeType::Symlink, None)?;
        Ok(Ventry::alloc_linked(name, vn, Arc::new(DefaultVentryOps)))
    }

    fn hardlink(
        &self,
        _dve: &Ventry,
        dvn: &Vnode,
        name: &str,
        target: &Vnode,
    ) -> VfsResult<Ref<Ventry>> {
        let mut nodes = self.state.nodes.lock();
        if !nodes.contains_key(&target.id) {
            return Err(VfsErrno::Io);
        }
        match nodes.get_mut(&dvn.id) {
            Some(MemNode::Dir { children }) => {
                if children.contains_key(name) {
                    return Err(VfsErrno::Exist);
                }
                children.insert(name.to_string(), (target.id, target.vtype));
            }
            Some(_) => return Err(VfsErrno::NotDir),
            None => return Err(VfsErrno::Io),
        }
        drop(nodes);
        let vfs = dvn.vfs();
        let vn = vfs.lookup_vnode(target.id).ok_or(VfsErrno::Io)?;
        Ok(Ventry::alloc_linked(name, vn, Arc::new(DefaultVentryOps)))
    }

    fn mkdir(&self, _dve: &Ventry, dvn: &Vnode, name: &str, _mode: u32) -> VfsResult<Ref<Ventry>> {
        let mut nodes = self.state.nodes.lock();
        let id = self.alloc_id();
        match nodes.get_mut(&dvn.id) {
            Some(MemNode::Dir { children }) => {
                if children.contains_key(name) {
                    return Err(VfsErrno::Exist);
                }
                children.insert(name.to_string(), (id, VnodeType::Directory));
            }
            Some(_) => return Err(VfsErrno::NotDir),
            None => return Err(VfsErrno::Io),
        }
        nodes.insert(
            id,
            MemNode::Dir {
                children: BTreeMap::new(),
            },
        );
        drop(nodes);
        let vfs = dvn.vfs();
        let vn = self.materialize(&vfs, id, VnodeType::Directory, None)?;
        Ok(Ventry::alloc_linked(name, vn, Arc::new(DefaultVentryOps)))
    }

    fn unlink(&self, _dve: &Ventry, dvn: &Vnode, _ve: &Ventry, vn: &Vnode) -> VfsResult<()> {
        let mut nodes = self.state.nodes.lock();
        match nodes.get_mut(&dvn.id) {
            Some(MemNode::Dir { children }) => {
                let before = children.len();
                children.retain(|_, (id, _)| *id != vn.id);
                if children.len() == before {
                    return Err(VfsErrno::NoEnt);
                }
            }
            Some(_) => return Err(VfsErrno::NotDir),
            None => return Err(VfsErrno::Io),
        }
        if vn.nlink() <= 1 {
            nodes.remove(&vn.id);
        }
        Ok(())
    }

    fn rmdir(&self, _dve: &Ventry, dvn: &Vnode, _ve: &Ventry, vn: &Vnode) -> VfsResult<()> {
        {
            let nodes = self.state.nodes.lock();
            if let Some(MemNode::Dir { children }) = nodes.get(&vn.id) {
                if !children.is_empty() {
                    return Err(VfsErrno::Inval);
                }
            }
        }
        let mut nodes = self.state.nodes.lock();
        match nodes.get_mut(&dvn.id) {
            Some(MemNode::Dir { children }) => {
                let before = children.len();
                children.retain(|_, (id, _)| *id != vn.id);
                if children.len() == before {
                    return Err(VfsErrno::NoEnt);
                }
            }
            Some(_) => return Err(VfsErrno::NotDir),
            None => return Err(VfsErrno::Io),
        }
        nodes.remove(&vn.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{VfsContext, VfsLimits};
    use crate::vfs::VfsFlags;

    fn mounted() -> VfsContext {
        let ctx = VfsContext::new(VfsLimits::default());
        ctx.register_fs_type(MemFs::fs_type()).unwrap();
        ctx.mount(1, None, "memfs", None, VfsFlags::default())
            .unwrap();
        ctx
    }

    #[test]
    fn write_then_read_round_trips_bytes() {
        let ctx = mounted();
        let root = ctx.root().unwrap();
        let ve = ctx.create(1, &root, "/f", 0o644).unwrap();
        let vn = ve.vnode(1);
        assert_eq!(vn.write(0, b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(vn.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn readdir_lists_created_entries() {
        let ctx = mounted();
        let root = ctx.root().unwrap();
        ctx.create(1, &root, "/a", 0o644).unwrap();
        ctx.create(1, &root, "/b", 0o644).unwrap();
        let entries = root.vnode(1).readdir(0).unwrap();
        let mut names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, alloc::vec![String::from("a"), String::from("b")]);
    }
}
