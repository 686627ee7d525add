use crate::IdRange;

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `slotid` can emit.
///
/// Allocation outcomes (`Exhausted`, `OutOfRange`, `AlreadyAllocated`) are
/// ordinary, recoverable conditions reported to the caller. `Backend` is only
/// produced by stores that talk to an external service.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Every ID in the space is currently allocated.
    #[error("id space is exhausted")]
    Exhausted,

    /// The ID lies outside the configured space.
    #[error("id {id} is outside of {range}")]
    OutOfRange { id: u64, range: IdRange },

    /// An explicit reservation targeted an ID that is already taken.
    #[error("id {id} is already allocated")]
    AlreadyAllocated { id: u64 },

    /// A range or store was constructed with unusable bounds.
    #[error("invalid id range: {reason}")]
    InvalidRange { reason: String },

    /// The backing store could not be reached or rejected a transaction.
    #[error("store backend unavailable: {0}")]
    Backend(String),

    /// The allocator lock was poisoned by a panicking thread.
    ///
    /// When the `parking-lot` feature is enabled, mutexes do **not** poison,
    /// so this variant is not available.
    #[cfg(not(feature = "parking-lot"))]
    #[error("allocator lock poisoned")]
    LockPoisoned,
}

#[cfg(not(feature = "parking-lot"))]
use crate::mutex::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
// Convert all poisoned lock errors to a simplified `LockPoisoned`
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}
