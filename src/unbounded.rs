//! Cache-`N`, untracked-overflow object pool.
//!
//! `UnboundedPool<T, A, E>` never blocks: `acquire` reuses a cached-idle
//! instance if one exists, and otherwise constructs a fresh *untracked*
//! instance that is simply dropped on release rather than cached. There is
//! no back-flow — an untracked instance can never end up occupying a slot,
//! even if one is free at release time (tested by
//! `overflow_instance_has_distinct_address_and_is_untracked_on_release`
//! below).

use std::convert::Infallible;
use std::sync::Arc;

use tracing::trace;

use crate::error::PoolError;
use crate::handle::{PoolGuard, Release};
use crate::slot::SlotArray;

type Factory<T, A, E> = Box<dyn Fn(A) -> Result<T, E> + Send + Sync>;

struct Inner<T, A, E> {
    slots: SlotArray<T>,
    factory: Factory<T, A, E>,
}

/// A non-blocking pool that caches up to `capacity` idle instances; beyond
/// that, overflow acquires construct untracked instances that are
/// destroyed rather than cached on release.
pub struct UnboundedPool<T, A = (), E = Infallible> {
    inner: Arc<Inner<T, A, E>>,
}

impl<T, A, E> Clone for UnboundedPool<T, A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, A, E> std::fmt::Debug for UnboundedPool<T, A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnboundedPool")
            .field("capacity", &self.inner.slots.len())
            .field("free", &self.inner.slots.free_len())
            .field("factory", &"<factory fn>")
            .finish()
    }
}

impl<T, A, E> UnboundedPool<T, A, E> {
    /// Cache size `N` (not an admission limit — overflow always succeeds).
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.slots.len()
    }
}

impl<T, A> UnboundedPool<T, A, Infallible>
where
    T: Send + 'static,
    A: Send + 'static,
{
    /// Construct a pool caching up to `capacity` idle instances, with an
    /// infallible factory.
    #[must_use]
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        Self::try_new(capacity, move |args| Ok(factory(args)))
    }
}

impl<T, A, E> UnboundedPool<T, A, E>
where
    T: Send + 'static,
    A: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Construct a pool caching up to `capacity` idle instances, with a
    /// fallible factory.
    #[must_use]
    pub fn try_new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                slots: SlotArray::new(capacity),
                factory: Box::new(factory),
            }),
        }
    }

    /// Acquire a handle without blocking. Reuses a cached instance if one
    /// is idle; otherwise constructs a (possibly untracked) fresh one.
    pub fn acquire(
        &self,
        args: A,
    ) -> Result<PoolGuard<T, UnboundedRelease<T, A, E>>, PoolError<E>> {
        if let Some(idx) = self.inner.slots.pop_free() {
            // SAFETY: `idx` was just popped; exclusively ours until we push
            // it back (via the tracked release path).
            let existing = unsafe { self.inner.slots.occupied_ptr(idx) };
            let ptr = match existing {
                Some(ptr) => {
                    trace!(idx, "unbounded pool reusing cached instance");
                    ptr
                }
                None => match (self.inner.factory)(args) {
                    Ok(value) => unsafe { self.inner.slots.construct(idx, value) },
                    Err(err) => {
                        self.inner.slots.push_free(idx);
                        return Err(PoolError::Factory(err));
                    }
                },
            };
            return Ok(unsafe {
                PoolGuard::new(
                    ptr,
                    UnboundedRelease::Tracked {
                        inner: Arc::clone(&self.inner),
                        idx,
                    },
                )
            });
        }

        trace!("unbounded pool overflow: constructing untracked instance");
        let value = (self.inner.factory)(args).map_err(PoolError::Factory)?;
        let boxed = Box::into_raw(Box::new(value));
        Ok(unsafe { PoolGuard::new(boxed, UnboundedRelease::Untracked) })
    }

    /// Destroy every cached-idle instance, leaving slots empty. Outstanding
    /// handles are unaffected; when released, their instance enters the
    /// (now-empty) cache per the normal reuse rule.
    pub fn clear(&self) {
        let total = self.inner.slots.len();
        for _ in 0..total {
            let Some(idx) = self.inner.slots.pop_free() else {
                break;
            };
            // SAFETY: `idx` is exclusively ours for this instant.
            unsafe { self.inner.slots.clear_slot(idx) };
            self.inner.slots.push_free(idx);
        }
    }
}

/// Release path for an [`UnboundedPool`] handle.
pub enum UnboundedRelease<T, A, E> {
    /// Return the slot to the free list; the value stays resident.
    Tracked { inner: Arc<Inner<T, A, E>>, idx: usize },
    /// Destroy the untracked, overflow-constructed instance.
    Untracked,
}

impl<T, A, E> Release<T> for UnboundedRelease<T, A, E>
where
    T: Send + 'static,
    A: Send + 'static,
    E: Send + Sync + 'static,
{
    unsafe fn release(&self, ptr: *mut T) {
        match self {
            UnboundedRelease::Tracked { inner, idx } => {
                let _ = ptr;
                inner.slots.push_free(*idx);
            }
            UnboundedRelease::Untracked => {
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_never_blocks_beyond_capacity() {
        let pool = UnboundedPool::<i32, i32>::new(1, |id| id);
        let _a = pool.acquire(1).unwrap();
        let b = pool.acquire(2).unwrap();
        assert_eq!(*b, 2);
    }

    #[test]
    fn overflow_instance_has_distinct_address_and_is_untracked_on_release() {
        let pool = UnboundedPool::<i32, i32>::new(1, |id| id);
        let obj0 = pool.acquire(1).unwrap();
        let obj1 = pool.acquire(2).unwrap();

        let addr0 = obj0.get() as *const i32;
        let addr1 = obj1.get() as *const i32;
        assert_ne!(addr0, addr1);

        obj0.reset();
        obj1.reset();

        let obj2 = pool.acquire(3).unwrap();
        assert_eq!(*obj2, 1, "reused cache slot keeps its original value");
        assert_eq!(obj2.get() as *const i32, addr0);

        let obj3 = pool.acquire(4).unwrap();
        assert_eq!(*obj3, 4, "cache was exhausted again, fresh construction");
        assert_ne!(obj3.get() as *const i32, addr0);
    }

    #[test]
    fn clear_empties_cache_without_disturbing_outstanding_handles() {
        let pool = UnboundedPool::<i32, i32>::new(1, |id| id);
        let held = pool.acquire(1).unwrap();
        pool.clear();
        assert_eq!(*held, 1, "outstanding handle unaffected by clear");
        drop(held);

        let reacquired = pool.acquire(2).unwrap();
        assert_eq!(*reacquired, 2, "slot was cleared, factory runs again");
    }

    #[test]
    fn release_as_shared_keeps_untracked_instance_alive() {
        let pool = UnboundedPool::<i32, i32>::new(0, |id| id);
        let guard = pool.acquire(5).unwrap();
        let shared = guard.release_as_shared();
        let clone = shared.clone();
        assert_eq!(*shared, 5);
        drop(shared);
        assert_eq!(*clone, 5);
    }
}
