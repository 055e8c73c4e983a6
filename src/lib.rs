//! Concurrent object pools for reusing expensive-to-construct values.
//!
//! This crate amortizes construction cost of an expensive `T` (a parser, a
//! compiled program, a scratch buffer) across many short-lived borrows. It
//! provides three pool variants, each a distinct admission/reuse/lifetime
//! state machine:
//!
//! - [`BoundedPool`]: admits at most `N` live borrowers; `acquire` blocks
//!   until one is returned.
//! - [`UnboundedPool`]: caches up to `N` idle instances; acquisitions
//!   beyond `N` construct untracked instances that are discarded (not
//!   cached) on release.
//! - [`VolatileUnboundedPool`]: an [`UnboundedPool`] plus a `clear` that can
//!   invalidate the current cache generation, orphaning outstanding
//!   handles so their release destroys rather than caches.
//!
//! # Handles
//!
//! `acquire` returns a [`PoolGuard`], an RAII loan that releases on drop
//! (or explicit [`PoolGuard::reset`]). It may be promoted to a
//! reference-counted [`SharedPoolGuard`] via
//! [`PoolGuard::release_as_shared`], deferring release until the last
//! clone drops.
//!
//! # Reuse and stable addresses
//!
//! When a pool reuses a cached-idle instance, the factory is **not**
//! re-run — the `args` passed to `acquire` are silently ignored in favor
//! of the instance already occupying that slot. A slot's storage address
//! is stable for as long as the pool lives: releasing a handle and
//! re-acquiring without an intervening clear observes the identical
//! address (see `src/slot.rs` and each variant's module docs).
//!
//! # Errors
//!
//! Pools never fail on their own in steady state; the only fallible path
//! is the caller-supplied factory. `try_new`/`try_acquire`-style
//! constructors built from a `Fn(A) -> Result<T, E>` factory propagate
//! that error as [`PoolError<E>`], leaving the pool's admission state
//! exactly as it was (no slot consumed, no permit lost). `new` builds a
//! pool from an infallible `Fn(A) -> T` factory directly.
//!
//! # Example
//!
//! ```
//! use concur_pool::BoundedPool;
//!
//! let pool = BoundedPool::<Vec<u8>, usize>::new(4, |size| vec![0u8; size]);
//! let mut buf = pool.acquire(1024).unwrap();
//! buf[0] = 42;
//! drop(buf); // returned to the pool for the next acquire to reuse
//! ```

mod bounded;
mod error;
mod handle;
mod slot;
mod unbounded;
mod volatile;

pub use bounded::{BoundedPool, BoundedRelease};
pub use error::PoolError;
pub use handle::{PoolGuard, SharedPoolGuard};
pub use unbounded::{UnboundedPool, UnboundedRelease};
pub use volatile::{VolatileRelease, VolatileUnboundedPool};

/// Install a `tracing` subscriber once, for tests that want the pools'
/// `debug!`/`trace!` events visible under `cargo test -- --nocapture`.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}
