//! Errors surfaced by pool construction.
//!
//! Steady-state pool operations never fail on their own (see the crate-level
//! docs); the only fallible path is the caller's factory. When it fails, the
//! pool's state is left exactly as it was before the call: no slot is
//! consumed, and the bounded pool's admission permit is returned.

/// Error returned when a pool's factory fails to construct a value.
///
/// `acquire`/`get` on the fallible constructors (`try_*`) return
/// `Result<_, PoolError<E>>`; the infallible constructors (`F: Fn() -> T`)
/// never produce this and simply return the guard directly.
#[derive(Debug, thiserror::Error)]
pub enum PoolError<E> {
    /// The user-supplied factory returned an error.
    #[error("pool factory failed to construct a value")]
    Factory(#[source] E),
}

impl<E> PoolError<E> {
    /// Extract the underlying factory error.
    pub fn into_inner(self) -> E {
        match self {
            PoolError::Factory(e) => e,
        }
    }
}

