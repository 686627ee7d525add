use crate::{
    Error, IdRange, IdStore, Result,
    mutex::{Mutex, MutexGuard},
};
#[cfg(feature = "tracing")]
use tracing::instrument;

struct AllocatorState<S> {
    store: S,
    /// Offset of the next slot to probe. A hint only: correctness never
    /// depends on it.
    cursor: u64,
}

/// A lock-based allocator handing out unique IDs from a bounded range.
///
/// The allocator owns one [`IdStore`] and a round-robin scan cursor behind a
/// single mutex. Every public operation holds that lock for its full
/// duration, so calls from different threads are fully serialized and no two
/// callers ever receive the same ID while it is outstanding.
///
/// Freed IDs are reused, but the scan resumes from where the previous one
/// stopped instead of from the bottom of the range. Once the low end of the
/// range is crowded this keeps a typical `generate` close to O(1); the worst
/// case, with the space nearly full, is one sweep over the whole range.
///
/// When the store performs network I/O (e.g. [`RedisStore`]) the lock is held
/// across that round trip.
///
/// [`RedisStore`]: crate::RedisStore
///
/// # Example
///
/// ```
/// use slotid::{Allocator, Error, LocalStore};
///
/// let allocator = Allocator::with_store(LocalStore::new(2).unwrap()).unwrap();
/// assert_eq!(allocator.generate(), Ok(0));
/// assert_eq!(allocator.generate(), Ok(1));
/// assert_eq!(allocator.generate(), Err(Error::Exhausted));
///
/// allocator.free(0).unwrap();
/// assert_eq!(allocator.generate(), Ok(0));
/// ```
pub struct Allocator<S> {
    state: Mutex<AllocatorState<S>>,
    range: IdRange,
}

impl<S> Allocator<S>
where
    S: IdStore,
{
    /// Creates an allocator over `range`, backed by `store`.
    ///
    /// The scan cursor starts at `range.min()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if the store does not track exactly
    /// `range.size()` slots.
    pub fn new(store: S, range: IdRange) -> Result<Self> {
        if store.max_size() != range.size() {
            return Err(Error::InvalidRange {
                reason: format!(
                    "store tracks {} slots but range {} has {}",
                    store.max_size(),
                    range,
                    range.size()
                ),
            });
        }
        Ok(Self {
            state: Mutex::new(AllocatorState { store, cursor: 0 }),
            range,
        })
    }

    /// Creates an allocator over `[0, store.max_size())`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if the store tracks zero slots.
    pub fn with_store(store: S) -> Result<Self> {
        let range = IdRange::with_size(store.max_size())?;
        Self::new(store, range)
    }

    /// The ID space this allocator hands out.
    pub const fn range(&self) -> IdRange {
        self.range
    }

    /// Hands out the next free ID.
    ///
    /// Probes slots starting at the scan cursor, moving forward and wrapping
    /// from `max` back to `min`, and claims the first free one. The cursor is
    /// left just past the returned ID.
    ///
    /// # Errors
    ///
    /// - [`Error::Exhausted`] if the allocation counter already equals the
    ///   size of the range (checked before any probing), or if a full sweep
    ///   found no free slot because another process sharing the store claimed
    ///   the last ones concurrently.
    /// - [`Error::Backend`] if the store fails.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn generate(&self) -> Result<u64> {
        let size = self.range.size();
        let mut state = self.lock()?;

        if state.store.allocated_count()? >= size {
            return Err(Error::Exhausted);
        }

        for _ in 0..size {
            if state.cursor >= size {
                state.cursor = 0;
            }
            let offset = state.cursor;
            state.cursor += 1;

            if state.store.try_allocate(offset)? {
                return Ok(self.range.id_at(offset));
            }
        }

        Err(Error::Exhausted)
    }

    /// Reserves a caller-chosen ID.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfRange`] if `id` is outside the range.
    /// - [`Error::AlreadyAllocated`] if `id` is taken.
    /// - [`Error::Backend`] if the store fails.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn allocate(&self, id: u64) -> Result<()> {
        let offset = self.offset_of(id)?;
        let mut state = self.lock()?;
        if state.store.try_allocate(offset)? {
            Ok(())
        } else {
            Err(Error::AlreadyAllocated { id })
        }
    }

    /// Releases `id`. Freeing an ID that is not allocated is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfRange`] if `id` is outside the range; nothing is
    ///   changed.
    /// - [`Error::Backend`] if the store fails.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn free(&self, id: u64) -> Result<()> {
        let offset = self.offset_of(id)?;
        let mut state = self.lock()?;
        state.store.try_free(offset)?;
        Ok(())
    }

    /// Releases every ID and rewinds the scan cursor to `min`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the store fails.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn free_all(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.store.free_all()?;
        state.cursor = 0;
        Ok(())
    }

    /// Returns `true` if `id` is currently allocated.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfRange`] if `id` is outside the range.
    /// - [`Error::Backend`] if the store fails.
    pub fn is_allocated(&self, id: u64) -> Result<bool> {
        let offset = self.offset_of(id)?;
        self.lock()?.store.is_allocated(offset)
    }

    /// Number of IDs currently allocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the store fails.
    pub fn allocated_count(&self) -> Result<u64> {
        self.lock()?.store.allocated_count()
    }

    fn offset_of(&self, id: u64) -> Result<u64> {
        self.range.offset_of(id).ok_or(Error::OutOfRange {
            id,
            range: self.range,
        })
    }

    #[cfg(feature = "parking-lot")]
    #[allow(clippy::unnecessary_wraps)]
    fn lock(&self) -> Result<MutexGuard<'_, AllocatorState<S>>> {
        Ok(self.state.lock())
    }

    #[cfg(not(feature = "parking-lot"))]
    fn lock(&self) -> Result<MutexGuard<'_, AllocatorState<S>>> {
        Ok(self.state.lock()?)
    }
}
