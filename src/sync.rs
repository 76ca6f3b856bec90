//! Locking primitives used by the vnode/ventry/vfs layers (spec §5).
//!
//! `spin::Mutex`/`spin::RwLock` stand in directly for the vnode lifecycle
//! lock (non-recursive) and vnode content lock (reader/writer). The ventry
//! lifecycle lock must be *recursive* (`ve_syncvn` and friends re-enter it
//! while walking a subtree), which `spin` doesn't provide, so
//! [`ReentrantMutex`] implements one keyed on an explicit caller-supplied
//! [`Tid`] rather than thread-local storage (this crate is `no_std` and has
//! no scheduler to ask "who is currently running" — see §9 "process-wide
//! state"). The public API threads a `Tid` down from whatever the embedding
//! kernel knows about its own calling thread/task.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

pub use spin::{Mutex, RwLock};

/// Identity of the calling thread/task, for reentrant-lock bookkeeping only.
/// Never consulted for scheduling decisions; the core never blocks on it.
pub type Tid = u64;

struct LockState {
    owner: Option<Tid>,
    depth: u32,
}

/// A mutex a single owning [`Tid`] may lock more than once without
/// deadlocking itself, mirroring `MTX_RECURSIVE` on the ventry lock in the
/// original. Other tids spin until the owner's outermost guard drops.
pub struct ReentrantMutex<T: ?Sized> {
    state: Mutex<LockState>,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through a `ReentrantGuard`,
// and `state` serializes which tid may hold one at a time.
unsafe impl<T: ?Sized + Send> Send for ReentrantMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for ReentrantMutex<T> {}

impl<T> ReentrantMutex<T> {
    pub const fn new(data: T) -> Self {
        ReentrantMutex {
            state: Mutex::new(LockState {
                owner: None,
                depth: 0,
            }),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> ReentrantMutex<T> {
    pub fn lock(&self, tid: Tid) -> ReentrantGuard<'_, T> {
        loop {
            let mut s = self.state.lock();
            match s.owner {
                None => {
                    s.owner = Some(tid);
                    s.depth = 1;
                    return ReentrantGuard { lock: self };
                }
                Some(owner) if owner == tid => {
                    s.depth += 1;
                    return ReentrantGuard { lock: self };
                }
                Some(_) => {
                    drop(s);
                    core::hint::spin_loop();
                }
            }
        }
    }

    /// True if `tid` currently holds this lock at any depth. Used by the
    /// ventry layer to assert re-entry rather than accidental contention.
    pub fn is_held_by(&self, tid: Tid) -> bool {
        self.state.lock().owner == Some(tid)
    }
}

pub struct ReentrantGuard<'a, T: ?Sized> {
    lock: &'a ReentrantMutex<T>,
}

impl<'a, T: ?Sized> Drop for ReentrantGuard<'a, T> {
    fn drop(&mut self) {
        let mut s = self.lock.state.lock();
        s.depth -= 1;
        if s.depth == 0 {
            s.owner = None;
        }
    }
}

impl<'a, T: ?Sized> Deref for ReentrantGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a guard means our tid is the recorded owner, and
        // `state` serializes ownership transfer, so no other tid can be
        // concurrently dereferencing a guard for this lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for ReentrantGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see Deref.
        unsafe { &mut *self.lock.data.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn reentrant_same_tid_nests() {
        let m = ReentrantMutex::new(Vec::<i32>::new());
        let mut g1 = m.lock(1);
        g1.push(1);
        {
            let mut g2 = m.lock(1);
            g2.push(2);
        }
        g1.push(3);
        drop(g1);
        assert_eq!(*m.lock(1), alloc::vec![1, 2, 3]);
    }

    #[test]
    fn different_tid_waits_for_release() {
        let m = ReentrantMutex::new(0i32);
        let g = m.lock(1);
        assert!(m.is_held_by(1));
        assert!(!m.is_held_by(2));
        drop(g);
        let g2 = m.lock(2);
        assert!(m.is_held_by(2));
        drop(g2);
    }
}
