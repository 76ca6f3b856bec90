//! Descriptor-indexed public operations (spec §6.2).
//!
//! The fd table itself is process state and lives outside this core (spec
//! §1 Non-goals: "implement file descriptors"), but the *value* a
//! descriptor maps to — `{ventry_ref, pos, flags}` — and the operations
//! that act on it are core surface, grounded on the `fs_read`/`fs_write`/
//! `fs_lseek`/`fs_readdir`/`fs_dup`/... entry points declared in
//! `original_source/include/kernel/fs.h`. [`OpenFile`] is that triple; a
//! process-layer fd table stores `Ref<OpenFile>` and looks one up per
//! syscall.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::error::{VfsErrno, VfsResult};
use crate::refcount::Ref;
use crate::sync::Tid;
use crate::ventry::Ventry;
use crate::vnode::{DirEntry, MappedRegion, Stat};

/// `fs_lseek`'s `whence` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

/// One open file description: the ventry it was opened against, a byte
/// cursor for `read`/`write`/`lseek`, a separate cursor for `readdir`'s
/// iteration order (`telldir`/`seekdir` address this one, not `lseek`), and
/// the flags it was opened with. `dup`/`dup2` share one `OpenFile` between
/// two descriptor slots (hence its fields live behind atomics, not a plain
/// struct a `&mut` would serialize) — exactly the POSIX "two fds, one open
/// file description, one cursor" semantics.
pub struct OpenFile {
    ventry: Ref<Ventry>,
    pos: AtomicI64,
    dir_pos: AtomicI64,
    flags: u32,
}

impl OpenFile {
    /// `fs_open`/`fs_proc_open`'s result, wrapped for the fd table. `flags`
    /// is opaque to the core (O_RDONLY/O_APPEND/... are a process-layer
    /// concept); it is only ever handed back via [`OpenFile::flags`].
    pub fn new(ventry: Ref<Ventry>, flags: u32) -> Ref<OpenFile> {
        Ref::new(OpenFile {
            ventry,
            pos: AtomicI64::new(0),
            dir_pos: AtomicI64::new(0),
            flags,
        })
    }

    pub fn ventry(&self) -> &Ref<Ventry> {
        &self.ventry
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn pos(&self) -> i64 {
        self.pos.load(Ordering::Acquire)
    }

    /// `fs_read`. Runs under the owning vfs's read-op fence (spec §4.4/§5),
    /// so a concurrent `unmount` waits for this call to finish rather than
    /// tearing the vfs down underneath it.
    pub fn read(&self, tid: Tid, buf: &mut [u8]) -> VfsResult<usize> {
        let vn = self.ventry.vnode(tid);
        let vfs = vn.vfs();
        vfs.begin_read_op()?;
        let off = self.pos.load(Ordering::Acquire);
        let result = vn.read(off, buf);
        vfs.end_read_op();
        let n = result?;
        self.pos.fetch_add(n as i64, Ordering::AcqRel);
        Ok(n)
    }

    /// `fs_write`. Runs under the owning vfs's write-op fence, same reasoning
    /// as `read` above.
    pub fn write(&self, tid: Tid, buf: &[u8]) -> VfsResult<usize> {
        let vn = self.ventry.vnode(tid);
        let vfs = vn.vfs();
        vfs.begin_write_op()?;
        let off = self.pos.load(Ordering::Acquire);
        let result = vn.write(off, buf);
        vfs.end_write_op();
        let n = result?;
        self.pos.fetch_add(n as i64, Ordering::AcqRel);
        Ok(n)
    }

    /// `fs_readv`: scatter the sequential read across each buffer in turn,
    /// stopping at the first short read (matching `readv`'s usual contract
    /// when the underlying object is exhausted mid-vector).
    pub fn readv(&self, tid: Tid, bufs: &mut [&mut [u8]]) -> VfsResult<usize> {
        let mut total = 0usize;
        for buf in bufs.iter_mut() {
            let n = self.read(tid, buf)?;
            total += n;
            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }

    /// `fs_writev`: gather each buffer into a sequential write.
    pub fn writev(&self, tid: Tid, bufs: &[&[u8]]) -> VfsResult<usize> {
        let mut total = 0usize;
        for buf in bufs.iter() {
            total += self.write(tid, buf)?;
        }
        Ok(total)
    }

    /// `fs_lseek`. Rejects a resulting negative offset (`EINVAL`); does not
    /// itself check against the vnode's size — per spec §4.2 that check is
    /// `read`/`write`'s job, evaluated against whatever offset the next
    /// call actually uses.
    pub fn lseek(&self, tid: Tid, offset: i64, whence: SeekWhence) -> VfsResult<i64> {
        let base = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Cur => self.pos.load(Ordering::Acquire),
            SeekWhence::End => self.ventry.vnode(tid).size() as i64,
        };
        let new_pos = base.checked_add(offset).ok_or(VfsErrno::Inval)?;
        if new_pos < 0 {
            return Err(VfsErrno::Inval);
        }
        self.pos.store(new_pos, Ordering::Release);
        Ok(new_pos)
    }

    /// `fs_ioctl`. The vnode ops vtable (spec §4.2) has no `ioctl` entry —
    /// the filtered original source doesn't expose one either — so this
    /// always reports `NotSup`, same as any other op absent from a
    /// driver's vtable. A host kernel wanting device ioctls extends its own
    /// driver layer above this crate rather than inside it.
    pub fn ioctl(&self, _request: u64, _argp: usize) -> VfsResult<i64> {
        Err(VfsErrno::NotSup)
    }

    /// `fs_close`.
    pub fn close(&self, tid: Tid) -> VfsResult<()> {
        self.ventry.vnode(tid).close()
    }

    /// `fs_fstat`.
    pub fn fstat(&self, tid: Tid) -> Stat {
        self.ventry.vnode(tid).stat()
    }

    /// `fs_readdir`. Advances the directory cursor by the number of
    /// entries returned, so a second call continues where the first left
    /// off (mirroring the offset-is-an-opaque-cookie contract `readdir(3)`
    /// gives callers, here realised as "how many entries seen so far").
    pub fn readdir(&self, tid: Tid) -> VfsResult<Vec<DirEntry>> {
        let vn = self.ventry.vnode(tid);
        let off = self.dir_pos.load(Ordering::Acquire);
        let entries = vn.readdir(off)?;
        self.dir_pos
            .fetch_add(entries.len() as i64, Ordering::AcqRel);
        Ok(entries)
    }

    /// `fs_telldir`.
    pub fn telldir(&self) -> i64 {
        self.dir_pos.load(Ordering::Acquire)
    }

    /// `fs_seekdir`.
    pub fn seekdir(&self, loc: i64) {
        self.dir_pos.store(loc, Ordering::Release);
    }

    /// `fs_getpage`: map a single page's worth of content at `offset`.
    pub fn getpage(&self, tid: Tid, offset: i64) -> VfsResult<MappedRegion> {
        self.ventry.vnode(tid).map(offset, 1)
    }

    /// `fs_get_vm_file`: map an arbitrary `[offset, offset+len)` range, the
    /// wider form `getpage` is a single-page special case of.
    pub fn get_vm_file(&self, tid: Tid, offset: i64, len: usize) -> VfsResult<MappedRegion> {
        self.ventry.vnode(tid).map(offset, len)
    }

    /// `fs_dup`: a second descriptor sharing this exact open file
    /// description (same cursor, same flags). Process-layer job is just to
    /// clone the `Ref` into a new table slot; this exists so call sites
    /// read the same way the rest of the descriptor-indexed API does.
    pub fn dup(this: &Ref<OpenFile>) -> Ref<OpenFile> {
        this.clone()
    }

    /// `fs_dup2`: same sharing as `dup`; which fd number the clone lands on
    /// is entirely the process layer's table-management concern.
    pub fn dup2(this: &Ref<OpenFile>) -> Ref<OpenFile> {
        this.clone()
    }
}
