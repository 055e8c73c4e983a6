//! Exclusive and shared handles returned by `acquire`.
//!
//! Every pool in this crate hands out a [`PoolGuard<T, Rel>`] from `acquire`.
//! Guards reach their value through a raw pointer rather than owning it by
//! value, because the pool's stable-address guarantee requires two
//! *separate* guards, constructed from two *separate* `acquire` calls, to
//! observe the identical address when the second reuses a slot the first
//! released. An owned-by-value guard can't deliver that — each guard would
//! be a fresh stack/field location — so guards borrow from storage the pool
//! itself keeps alive (a slot, or a guard-owned `Box` for untracked/overflow
//! instances) rather than moving values in and out.
//!
//! `Rel` encodes *how* a guard gives its value back on drop — pushing a
//! slot index back onto a free list while leaving the pointee in place,
//! destroying an untracked instance, or (for the volatile pool) discovering
//! it has been orphaned by a `clear`. That dispatch lives entirely in the
//! `Release` impl each pool module provides; this module only knows about
//! the RAII shape and the unsafe contract around the pointer.
//!
//! An exclusive guard always holds a value for as long as it exists — Rust's
//! ownership model already gives us "moving a guard leaves the source
//! inaccessible" for free, so there is no separate empty/holding state to
//! model (unlike a language where a moved-from handle remains a live,
//! inspectable object). Callers who want an explicit "maybe holding" handle
//! use `Option<PoolGuard<T, Rel>>`, same as anywhere else in Rust.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// How a guard's value is reclaimed when the guard is dropped.
///
/// Implemented once per pool variant; never exposed to crate consumers.
pub(crate) trait Release<T>: Send + Sync {
    /// # Safety
    /// `ptr` is exactly the pointer the owning [`PoolGuard`] (or
    /// [`SharedPoolGuard`]) was constructed with, and this is called
    /// exactly once over that guard's lifetime.
    unsafe fn release(&self, ptr: *mut T);
}

/// An exclusive, RAII-owned loan of a pooled `T`.
///
/// Dereferences directly to `T`. Dropping (including via [`PoolGuard::reset`])
/// runs the pool-specific release path exactly once.
pub struct PoolGuard<T, Rel: Release<T>> {
    ptr: *mut T,
    releaser: Rel,
    released: bool,
}

// SAFETY: `ptr` is exclusively owned by this guard for its lifetime (the
// pool module constructing it upholds that); `T: Send`/`Sync` then governs
// whether the pointee may cross threads the same way a `&T`/`&mut T` would.
unsafe impl<T: Send, Rel: Release<T>> Send for PoolGuard<T, Rel> {}
unsafe impl<T: Sync, Rel: Release<T>> Sync for PoolGuard<T, Rel> {}

impl<T, Rel: Release<T>> PoolGuard<T, Rel> {
    /// # Safety
    /// `ptr` must be valid for reads and writes and exclusively reachable
    /// through this guard — no other live alias may read, mutate, or free
    /// it — until `releaser.release` runs.
    pub(crate) unsafe fn new(ptr: *mut T, releaser: Rel) -> Self {
        Self {
            ptr,
            releaser,
            released: false,
        }
    }

    /// Borrow the held value.
    #[must_use]
    pub fn get(&self) -> &T {
        // SAFETY: `ptr` is valid and exclusively ours per the constructor's
        // contract, and outlives `&self`.
        unsafe { &*self.ptr }
    }

    /// Mutably borrow the held value.
    #[must_use]
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: see `get`; `&mut self` additionally ensures no other
        // reference to this guard's value is live.
        unsafe { &mut *self.ptr }
    }

    /// Release the value back to the pool now, rather than waiting for drop.
    ///
    /// Equivalent to `drop(guard)`; provided for parity with pool APIs that
    /// expect an explicit `reset`.
    pub fn reset(self) {
        drop(self);
    }

    /// Promote this exclusive loan to a shared, reference-counted one.
    ///
    /// The instance is released only once the last clone of the returned
    /// [`SharedPoolGuard`] is dropped.
    #[must_use]
    pub fn release_as_shared(mut self) -> SharedPoolGuard<T, Rel> {
        self.released = true;
        let ptr = self.ptr;
        // SAFETY: `self` is forgotten immediately below, so `releaser` is
        // read out of its field exactly once and never dropped in place by
        // `self`'s own (now-suppressed) destructor.
        let releaser = unsafe { std::ptr::read(&self.releaser) };
        std::mem::forget(self);
        SharedPoolGuard {
            inner: Arc::new(SharedGuardInner { ptr, releaser }),
        }
    }
}

impl<T: std::fmt::Debug, Rel: Release<T>> std::fmt::Debug for PoolGuard<T, Rel> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard").field("value", self.get()).finish()
    }
}

impl<T, Rel: Release<T>> Deref for PoolGuard<T, Rel> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl<T, Rel: Release<T>> DerefMut for PoolGuard<T, Rel> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

impl<T, Rel: Release<T>> Drop for PoolGuard<T, Rel> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            // SAFETY: `released` guards against calling this twice; `ptr`
            // still satisfies the constructor's contract.
            unsafe { self.releaser.release(self.ptr) };
        }
    }
}

struct SharedGuardInner<T, Rel: Release<T>> {
    ptr: *mut T,
    releaser: Rel,
}

unsafe impl<T: Send, Rel: Release<T>> Send for SharedGuardInner<T, Rel> {}
unsafe impl<T: Sync, Rel: Release<T>> Sync for SharedGuardInner<T, Rel> {}

impl<T, Rel: Release<T>> Drop for SharedGuardInner<T, Rel> {
    fn drop(&mut self) {
        // SAFETY: this runs exactly once, when the last `Arc` clone drops.
        unsafe { self.releaser.release(self.ptr) };
    }
}

/// A shared, reference-counted loan produced by [`PoolGuard::release_as_shared`].
///
/// The underlying instance is released when the last clone is dropped.
pub struct SharedPoolGuard<T, Rel: Release<T>> {
    inner: Arc<SharedGuardInner<T, Rel>>,
}

impl<T, Rel: Release<T>> SharedPoolGuard<T, Rel> {
    /// Borrow the held value.
    #[must_use]
    pub fn get(&self) -> &T {
        // SAFETY: valid for as long as any clone of `inner` is alive.
        unsafe { &*self.inner.ptr }
    }

    /// Number of live clones of this shared guard (including this one).
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<T, Rel: Release<T>> Clone for SharedPoolGuard<T, Rel> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug, Rel: Release<T>> std::fmt::Debug for SharedPoolGuard<T, Rel> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPoolGuard")
            .field("value", self.get())
            .field("strong_count", &self.strong_count())
            .finish()
    }
}

impl<T, Rel: Release<T>> Deref for SharedPoolGuard<T, Rel> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.get()
    }
}
