//! Admission-limited, blocking object pool.
//!
//! `BoundedPool<T, A, E>` admits at most `N` live borrowers. `acquire`
//! blocks until a slot is available; if the slot already holds a
//! previously-constructed value, that value is returned as-is and `args`
//! is silently discarded — the pool treats the first value ever
//! constructed in a slot as canonical until the pool itself is dropped
//! (there is no `clear` on this variant; see the worked example
//! `admission_bound_holds_under_concurrent_load` in the module tests below).
//!
//! A single [`Mutex`]+[`Condvar`] pair (`gate`/`available`) does double
//! duty as both the admission semaphore (serializing pops/pushes of the
//! free-list) and the synchronization [`visit`](BoundedPool::visit) needs:
//! an exclusive visit holds `gate` for its entire traversal, which both
//! blocks new acquires and (combined with waiting on `free_len() ==
//! capacity`) guarantees every slot is idle first. A shared visit takes
//! `gate` once per slot, so a concurrent acquire on a *different* index is
//! never blocked for more than a pointer read.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::PoolError;
use crate::handle::{PoolGuard, Release};
use crate::slot::SlotArray;

type Factory<T, A, E> = Box<dyn Fn(A) -> Result<T, E> + Send + Sync>;

struct Inner<T, A, E> {
    slots: SlotArray<T>,
    in_use: Vec<AtomicBool>,
    gate: Mutex<()>,
    available: Condvar,
    factory: Factory<T, A, E>,
}

/// An admission-limited pool of at most `capacity` live `T` borrowers.
pub struct BoundedPool<T, A = (), E = Infallible> {
    inner: Arc<Inner<T, A, E>>,
}

impl<T, A, E> Clone for BoundedPool<T, A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, A, E> std::fmt::Debug for BoundedPool<T, A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedPool")
            .field("capacity", &self.inner.slots.len())
            .field("free", &self.inner.slots.free_len())
            .field("factory", &"<factory fn>")
            .finish()
    }
}

impl<T, A, E> BoundedPool<T, A, E> {
    /// Admission limit and cache size (the two coincide for this variant).
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.slots.len()
    }
}

impl<T, A> BoundedPool<T, A, Infallible>
where
    T: Send + 'static,
    A: Send + 'static,
{
    /// Construct a pool of `capacity` admission slots with an infallible
    /// factory.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        Self::try_new(capacity, move |args| Ok(factory(args)))
    }
}

impl<T, A, E> BoundedPool<T, A, E>
where
    T: Send + 'static,
    A: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Construct a pool of `capacity` admission slots with a fallible
    /// factory.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn try_new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
    {
        assert!(capacity > 0, "bounded pool capacity must be greater than zero");
        let mut in_use = Vec::with_capacity(capacity);
        in_use.resize_with(capacity, || AtomicBool::new(false));
        Self {
            inner: Arc::new(Inner {
                slots: SlotArray::new(capacity),
                in_use,
                gate: Mutex::new(()),
                available: Condvar::new(),
                factory: Box::new(factory),
            }),
        }
    }

    /// Acquire a handle, blocking until one of the `capacity` admission
    /// slots is free.
    ///
    /// If the slot selected already holds a value from an earlier
    /// construction, that value is returned and `args` is ignored.
    pub fn acquire(&self, args: A) -> Result<PoolGuard<T, BoundedRelease<T, A, E>>, PoolError<E>> {
        let idx = {
            let mut gate = self.inner.gate.lock();
            loop {
                if let Some(idx) = self.inner.slots.pop_free() {
                    self.inner.in_use[idx].store(true, Ordering::Release);
                    break idx;
                }
                debug!(capacity = self.inner.slots.len(), "bounded pool full, acquire blocking");
                self.inner.available.wait(&mut gate);
            }
        };

        // SAFETY: `idx` was just popped from the free list under `gate`;
        // no other thread can observe or mutate it until we push it back.
        let existing = unsafe { self.inner.slots.occupied_ptr(idx) };
        let ptr = match existing {
            Some(ptr) => {
                trace!(idx, "bounded pool reusing cached instance, factory not run");
                ptr
            }
            None => match (self.inner.factory)(args) {
                // SAFETY: see above.
                Ok(value) => unsafe { self.inner.slots.construct(idx, value) },
                Err(err) => {
                    let mut gate = self.inner.gate.lock();
                    self.inner.in_use[idx].store(false, Ordering::Release);
                    self.inner.slots.push_free(idx);
                    self.inner.available.notify_all();
                    drop(gate);
                    return Err(PoolError::Factory(err));
                }
            },
        };

        Ok(unsafe {
            PoolGuard::new(
                ptr,
                BoundedRelease {
                    inner: Arc::clone(&self.inner),
                    idx,
                },
            )
        })
    }

    /// Iterate every cached-idle instance currently in the pool.
    ///
    /// `shared = true` takes a brief per-slot lock so concurrent acquires
    /// on other slots are never blocked; `shared = false` waits for every
    /// slot to become idle first, then holds the pool exclusively for the
    /// whole traversal. In both modes, returning `false` from `visitor`
    /// stops the walk early.
    pub fn visit(&self, mut visitor: impl FnMut(&T) -> bool, shared: bool) {
        if shared {
            for idx in 0..self.inner.slots.len() {
                let gate = self.inner.gate.lock();
                let idle = !self.inner.in_use[idx].load(Ordering::Acquire);
                // SAFETY: while holding `gate`, no acquire can claim `idx`
                // out from under us (acquire's pop also locks `gate`), so
                // an idle slot observed here cannot become in-use until we
                // drop the lock below.
                let ptr = if idle {
                    unsafe { self.inner.slots.occupied_ptr(idx) }
                } else {
                    None
                };
                let keep_going = match ptr {
                    Some(ptr) => visitor(unsafe { &*ptr }),
                    None => true,
                };
                drop(gate);
                if !keep_going {
                    return;
                }
            }
        } else {
            let mut gate = self.inner.gate.lock();
            while self.inner.slots.free_len() != self.inner.slots.len() {
                self.inner.available.wait(&mut gate);
            }
            for idx in 0..self.inner.slots.len() {
                // SAFETY: `gate` is held and every slot is idle, so no
                // acquire can be mutating any slot concurrently.
                if let Some(ptr) = unsafe { self.inner.slots.occupied_ptr(idx) } {
                    if !visitor(unsafe { &*ptr }) {
                        break;
                    }
                }
            }
            drop(gate);
        }
    }
}

/// Release path for a [`BoundedPool`] handle: marks the slot idle again and
/// wakes one waiter. The value itself is left resident in its slot.
pub struct BoundedRelease<T, A, E> {
    inner: Arc<Inner<T, A, E>>,
    idx: usize,
}

impl<T, A, E> Release<T> for BoundedRelease<T, A, E>
where
    T: Send + 'static,
    A: Send + 'static,
    E: Send + Sync + 'static,
{
    unsafe fn release(&self, _ptr: *mut T) {
        let mut gate = self.inner.gate.lock();
        self.inner.in_use[self.idx].store(false, Ordering::Release);
        self.inner.slots.push_free(self.idx);
        self.inner.available.notify_all();
        drop(gate);
        trace!(idx = self.idx, "bounded pool slot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn admission_bound_holds_under_concurrent_load() {
        crate::init_test_tracing();
        let constructed = Arc::new(AtomicUsize::new(0));
        let pool = {
            let constructed = Arc::clone(&constructed);
            BoundedPool::<i32, i32>::new(2, move |id| {
                constructed.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                id
            })
        };

        let mut seen = std::collections::HashSet::new();
        thread::scope(|scope| {
            let handles: Vec<_> = (0..32)
                .map(|i| {
                    let pool = pool.clone();
                    scope.spawn(move || {
                        let guard = pool.acquire(i).unwrap();
                        let ptr = guard.get() as *const i32;
                        thread::sleep(Duration::from_millis(1));
                        ptr
                    })
                })
                .collect();
            for h in handles {
                seen.insert(h.join().unwrap());
            }
        });

        assert!(constructed.load(Ordering::SeqCst) <= 2);
        assert!(seen.len() <= 2);
    }

    #[test]
    fn acquire_blocks_until_release() {
        crate::init_test_tracing();
        let pool = BoundedPool::<i32, i32>::new(1, |id| id);
        let held = pool.acquire(1).unwrap();

        let start = Instant::now();
        let barrier = Arc::new(Barrier::new(2));
        let pool2 = pool.clone();
        let barrier2 = Arc::clone(&barrier);
        let waiter = thread::spawn(move || {
            barrier2.wait();
            let guard = pool2.acquire(2).unwrap();
            *guard
        });

        barrier.wait();
        thread::sleep(Duration::from_millis(200));
        assert!(!waiter.is_finished(), "acquire should still be blocked");

        drop(held);
        let value = waiter.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(value, 1, "reused slot keeps original value, args ignored");
    }

    #[test]
    fn reacquire_after_release_reuses_address_without_rerunning_factory() {
        let pool = BoundedPool::<Vec<u8>, u8>::new(1, |b| vec![b; 4]);
        let first = pool.acquire(1).unwrap();
        let ptr_first = first.get() as *const Vec<u8>;
        first.reset();

        let second = pool.acquire(9).unwrap();
        assert_eq!(ptr_first, second.get() as *const Vec<u8>);
        assert_eq!(*second, vec![1, 1, 1, 1], "factory not re-run on reuse");
    }

    #[test]
    fn shared_visit_returns_promptly_while_a_handle_is_outstanding() {
        let pool = BoundedPool::<i32, i32>::new(2, |id| id);
        let _held = pool.acquire(1).unwrap();
        let other = pool.acquire(2).unwrap();
        other.reset();

        let start = Instant::now();
        let mut seen = Vec::new();
        pool.visit(
            |v| {
                seen.push(*v);
                true
            },
            true,
        );
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn exclusive_visit_blocks_until_all_slots_idle() {
        let pool = BoundedPool::<i32, i32>::new(1, |id| id);
        let held = pool.acquire(7).unwrap();

        let pool2 = pool.clone();
        let visited = thread::spawn(move || {
            let mut seen = None;
            pool2.visit(
                |v| {
                    seen = Some(*v);
                    true
                },
                false,
            );
            seen
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!visited.is_finished());
        drop(held);
        assert_eq!(visited.join().unwrap(), Some(7));
    }

    #[test]
    fn visitor_returning_false_stops_iteration_early() {
        let pool = BoundedPool::<i32, i32>::new(3, |id| id);
        for i in 0..3 {
            pool.acquire(i).unwrap().reset();
        }

        let mut visited = 0;
        pool.visit(
            |_| {
                visited += 1;
                false
            },
            false,
        );
        assert_eq!(visited, 1);
    }
}
