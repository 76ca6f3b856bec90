//! The refcount primitive (spec §4.1).
//!
//! The original tracks a plain `int` refcount per object and calls a
//! type-specific cleanup hook exactly once when it drops to zero. Rust's
//! `Arc`/`Drop` already gives us that for free, so `Ref<T>` is a thin
//! newtype over `alloc::sync::Arc<T>` rather than a hand-rolled counter: the
//! "get" is `Ref::clone`, "put" is letting a `Ref` drop, and the cleanup hook
//! is each type's `Drop` impl.

use alloc::sync::{Arc, Weak};
use core::ops::Deref;

/// A counted reference to a `T`. `get()`/`clone()` increment, dropping the
/// value decrements; the last drop runs `T`'s `Drop` impl, which is where
/// each layer hangs its "cleanup" hook (`Vnode::drop`, `Ventry::drop`).
#[derive(Debug)]
pub struct Ref<T: ?Sized>(Arc<T>);

impl<T> Ref<T> {
    pub fn new(value: T) -> Self {
        Ref(Arc::new(value))
    }

    pub fn downgrade(this: &Self) -> WeakRef<T> {
        WeakRef(Arc::downgrade(&this.0))
    }

    /// Number of outstanding counted references, for diagnostics/tests only
    /// (never used in correctness-deciding code paths, since it can race).
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.0)
    }
}

impl<T: ?Sized> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Ref(self.0.clone())
    }
}

impl<T: ?Sized> Deref for Ref<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> PartialEq for Ref<T> {
    /// Identity comparison (same allocation), not structural comparison.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl<T: ?Sized> Eq for Ref<T> {}

/// A non-owning reference used for the handful of edges the spec calls out
/// as "borrowed" rather than counted (e.g. `Vnode -> vfs`). The borrowed
/// party is guaranteed by construction to outlive anything holding the weak
/// edge, so `upgrade()` failing is a bug in that guarantee, not a condition
/// callers need to handle.
#[derive(Debug)]
pub struct WeakRef<T: ?Sized>(Weak<T>);

impl<T> WeakRef<T> {
    pub fn upgrade(&self) -> Ref<T> {
        Ref(self
            .0
            .upgrade()
            .expect("borrowed reference outlived its owner"))
    }
}

impl<T: ?Sized> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        WeakRef(self.0.clone())
    }
}
