//! Generation-tracked unbounded pool.
//!
//! `VolatileUnboundedPool<T, A, E>` is an [`UnboundedPool`](crate::unbounded::UnboundedPool)
//! plus a `clear` that can *detach* the live generation: every currently
//! cached-idle instance is destroyed immediately, and outstanding handles
//! discover on release that their generation is no longer current, so they
//! destroy their instance too instead of re-entering the cache.
//!
//! `generation_size()` is defined behaviorally as *outstanding handles plus
//! cached-idle instances belonging to the current generation*. We track it
//! with two plain atomics per [`Generation`] rather than by reflecting
//! `Arc::strong_count` of a shared block: having every cached-idle instance
//! hold its own clone of `Arc<Generation<T>>` (a tempting literal reading of
//! the generation-accounting rule above) would make a generation a
//! self-referential cycle that `clear(true)` could never fully release.
//! The atomic counters produce the exact numbers the worked scenario tests
//! below pin, without that leak — see DESIGN.md.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::PoolError;
use crate::handle::{PoolGuard, Release};
use crate::slot::SlotArray;

type Factory<T, A, E> = Box<dyn Fn(A) -> Result<T, E> + Send + Sync>;

/// A cohort of instances sharing a generation: a cache plus the counters
/// that back [`VolatileUnboundedPool::generation_size`].
struct Generation<T> {
    slots: SlotArray<T>,
    /// Instances belonging to this generation, idle or checked out.
    live: AtomicUsize,
    /// Subset of `live` currently idle in a slot.
    cached_idle: AtomicUsize,
}

impl<T> Generation<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: SlotArray::new(capacity),
            live: AtomicUsize::new(0),
            cached_idle: AtomicUsize::new(0),
        }
    }
}

struct Inner<T, A, E> {
    capacity: usize,
    current: Mutex<Arc<Generation<T>>>,
    factory: Factory<T, A, E>,
}

/// An [`UnboundedPool`](crate::unbounded::UnboundedPool) with a clear that
/// can invalidate the current cache generation.
pub struct VolatileUnboundedPool<T, A = (), E = Infallible> {
    inner: Arc<Inner<T, A, E>>,
}

impl<T, A, E> Clone for VolatileUnboundedPool<T, A, E> {
    /// Cheap `Arc` clone. Both the source and the clone keep sharing the
    /// same current generation, so `generation_size()` observed through
    /// either rises and falls together — see DESIGN.md for why this, not a
    /// true Rust move (which the compiler already forbids using the
    /// moved-from value from), is the operation that matches the original
    /// "shared state survives a move" scenario.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, A, E> std::fmt::Debug for VolatileUnboundedPool<T, A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileUnboundedPool")
            .field("capacity", &self.inner.capacity)
            .field("generation_size", &self.generation_size())
            .field("factory", &"<factory fn>")
            .finish()
    }
}

impl<T, A, E> VolatileUnboundedPool<T, A, E> {
    /// Cache size `N` (not an admission limit).
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.capacity
    }

    /// Count of instances belonging to the current generation: outstanding
    /// handles plus cached-idle instances.
    #[must_use]
    pub fn generation_size(&self) -> usize {
        self.inner.current.lock().live.load(Ordering::Acquire)
    }
}

impl<T, A> VolatileUnboundedPool<T, A, Infallible>
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

impl<T, A, E> VolatileUnboundedPool<T, A, E>
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
                capacity,
                current: Mutex::new(Arc::new(Generation::new(capacity))),
                factory: Box::new(factory),
            }),
        }
    }

    /// Acquire a handle without blocking, against the current generation.
    pub fn acquire(
        &self,
        args: A,
    ) -> Result<PoolGuard<T, VolatileRelease<T, A, E>>, PoolError<E>> {
        let gen = Arc::clone(&self.inner.current.lock());

        if let Some(idx) = gen.slots.pop_free() {
            // SAFETY: `idx` was just popped; exclusively ours until pushed
            // back or cleared.
            let existing = unsafe { gen.slots.occupied_ptr(idx) };
            let ptr = match existing {
                Some(ptr) => {
                    gen.cached_idle.fetch_sub(1, Ordering::AcqRel);
                    trace!(idx, "volatile pool reusing cached instance");
                    ptr
                }
                None => match (self.inner.factory)(args) {
                    Ok(value) => {
                        let ptr = unsafe { gen.slots.construct(idx, value) };
                        gen.live.fetch_add(1, Ordering::AcqRel);
                        ptr
                    }
                    Err(err) => {
                        gen.slots.push_free(idx);
                        return Err(PoolError::Factory(err));
                    }
                },
            };
            return Ok(unsafe {
                PoolGuard::new(
                    ptr,
                    VolatileRelease::Tracked {
                        inner: Arc::clone(&self.inner),
                        gen,
                        idx,
                    },
                )
            });
        }

        trace!("volatile pool overflow: constructing untracked instance");
        let value = (self.inner.factory)(args).map_err(PoolError::Factory)?;
        gen.live.fetch_add(1, Ordering::AcqRel);
        let boxed = Box::into_raw(Box::new(value));
        Ok(unsafe { PoolGuard::new(boxed, VolatileRelease::Untracked { gen }) })
    }

    /// Destroy every cached-idle instance of the current generation.
    ///
    /// `detach = false` only empties the cache; outstanding handles keep
    /// belonging to the same generation and re-enter it normally on
    /// release. `detach = true` additionally swaps in a brand-new, empty
    /// generation: outstanding handles still reference the old one (so
    /// they remain valid to read), but discover on release that they are
    /// orphaned and destroy their instance instead of caching it.
    pub fn clear(&self, detach: bool) {
        let gen = Arc::clone(&self.inner.current.lock());
        if detach {
            let fresh = Arc::new(Generation::new(self.inner.capacity));
            *self.inner.current.lock() = fresh;
        }
        Self::drain_idle(&gen);
    }

    fn drain_idle(gen: &Arc<Generation<T>>) {
        let total = gen.slots.len();
        for _ in 0..total {
            let Some(idx) = gen.slots.pop_free() else {
                break;
            };
            // SAFETY: `idx` is exclusively ours for this instant.
            if unsafe { gen.slots.occupied_ptr(idx) }.is_some() {
                unsafe { gen.slots.clear_slot(idx) };
                gen.cached_idle.fetch_sub(1, Ordering::AcqRel);
                gen.live.fetch_sub(1, Ordering::AcqRel);
            }
            gen.slots.push_free(idx);
        }
    }
}

/// Release path for a [`VolatileUnboundedPool`] handle.
pub enum VolatileRelease<T, A, E> {
    /// Either returns to the cache (current generation) or is destroyed
    /// in place (orphaned: the generation has since been detached).
    Tracked {
        inner: Arc<Inner<T, A, E>>,
        gen: Arc<Generation<T>>,
        idx: usize,
    },
    /// Overflow instance: always destroyed, never cached.
    Untracked { gen: Arc<Generation<T>> },
}

impl<T, A, E> Release<T> for VolatileRelease<T, A, E>
where
    T: Send + 'static,
    A: Send + 'static,
    E: Send + Sync + 'static,
{
    unsafe fn release(&self, ptr: *mut T) {
        match self {
            VolatileRelease::Tracked { inner, gen, idx } => {
                let is_current = Arc::ptr_eq(&inner.current.lock(), gen);
                if is_current {
                    gen.slots.push_free(*idx);
                    gen.cached_idle.fetch_add(1, Ordering::AcqRel);
                } else {
                    trace!(idx, "volatile pool instance orphaned by clear(true), destroying");
                    // SAFETY: caller's contract guarantees exclusive access
                    // to `ptr`/`idx` at this point.
                    unsafe { gen.slots.clear_slot(*idx) };
                    gen.live.fetch_sub(1, Ordering::AcqRel);
                }
            }
            VolatileRelease::Untracked { gen } => {
                gen.live.fetch_sub(1, Ordering::AcqRel);
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_size_counts_outstanding_and_cached_instances() {
        let pool = VolatileUnboundedPool::<i32, i32>::new(1, |id| id);
        assert_eq!(pool.generation_size(), 0);

        let a = pool.acquire(1).unwrap();
        assert_eq!(pool.generation_size(), 1);

        a.reset();
        assert_eq!(pool.generation_size(), 1, "released instance is now cached-idle");

        let a = pool.acquire(10).unwrap();
        assert_eq!(pool.generation_size(), 1, "reused from cache, no new instance");

        let overflow = pool.acquire(20).unwrap();
        assert_eq!(pool.generation_size(), 2, "overflow instance also belongs to the generation");

        overflow.reset();
        assert_eq!(pool.generation_size(), 1);

        a.reset();
        assert_eq!(pool.generation_size(), 1, "tracked release re-caches, count unchanged");
    }

    #[test]
    fn clear_detach_orphans_outstanding_handles() {
        let pool = VolatileUnboundedPool::<i32, i32>::new(1, |id| id);
        let tracked = pool.acquire(42).unwrap();
        let overflow = pool.acquire(442).unwrap();
        assert_eq!(pool.generation_size(), 2);

        pool.clear(true);
        assert_eq!(pool.generation_size(), 0);

        assert_eq!(*tracked, 42);
        assert_eq!(*overflow, 442);

        drop(tracked);
        drop(overflow);
        assert_eq!(
            pool.generation_size(),
            0,
            "releasing orphaned handles does not affect the new generation"
        );

        let fresh = pool.acquire(7).unwrap();
        assert_eq!(*fresh, 7);
        assert_eq!(pool.generation_size(), 1);
    }

    #[test]
    fn clear_without_detach_keeps_outstanding_handles_in_same_generation() {
        let pool = VolatileUnboundedPool::<i32, i32>::new(2, |id| id);
        let held = pool.acquire(1).unwrap();
        pool.acquire(2).unwrap().reset();
        assert_eq!(pool.generation_size(), 2);

        pool.clear(false);
        assert_eq!(pool.generation_size(), 1, "cached instance destroyed, outstanding one remains");

        held.reset();
        assert_eq!(pool.generation_size(), 1, "same generation, now cached again");
    }

    #[test]
    fn pool_can_be_outlived_by_its_handles() {
        let pool = Box::new(VolatileUnboundedPool::<i32, i32>::new(1, |id| id));
        let tracked = pool.acquire(42).unwrap();
        let overflow = pool.acquire(442).unwrap();

        drop(pool);

        assert_eq!(*tracked, 42);
        assert_eq!(*overflow, 442);
    }

    #[test]
    fn clone_shares_the_same_generation() {
        let pool1 = VolatileUnboundedPool::<i32, i32>::new(4, |id| id);
        let pool2 = pool1.clone();

        let _held = pool1.acquire(1).unwrap();
        assert_eq!(pool1.generation_size(), 1);
        assert_eq!(pool2.generation_size(), 1, "clone observes the same generation");

        let _held2 = pool2.acquire(2).unwrap();
        assert_eq!(pool1.generation_size(), 2);
        assert_eq!(pool2.generation_size(), 2);
    }
}
