use crate::Result;

/// Records which slots of an ID space are allocated.
///
/// A store is addressed by *offset* in `[0, max_size())`. Callers are
/// responsible for range checking, so implementations may assume every offset
/// they receive is valid.
///
/// Implementations keep a bitmap and an allocation counter, and must keep the
/// counter equal to the bitmap's population count at all times.
pub trait IdStore {
    /// Returns `true` if the slot at `offset` is taken.
    fn is_allocated(&mut self, offset: u64) -> Result<bool>;

    /// Marks the slot at `offset` as taken and increments the counter.
    fn allocate(&mut self, offset: u64) -> Result<()>;

    /// Marks the slot at `offset` as free and decrements the counter.
    fn free(&mut self, offset: u64) -> Result<()>;

    /// Frees every slot and resets the counter to zero.
    fn free_all(&mut self) -> Result<()>;

    /// Number of slots this store tracks.
    fn max_size(&self) -> u64;

    /// Number of slots currently taken.
    fn allocated_count(&mut self) -> Result<u64>;

    /// Claims the slot at `offset` if it is free.
    ///
    /// Returns `true` if the slot was free and is now taken, `false` if it was
    /// already taken (in which case nothing changes). The default
    /// implementation is a check followed by a write; stores shared between
    /// processes should override it with a single atomic operation.
    fn try_allocate(&mut self, offset: u64) -> Result<bool> {
        if self.is_allocated(offset)? {
            return Ok(false);
        }
        self.allocate(offset)?;
        Ok(true)
    }

    /// Releases the slot at `offset` if it is taken.
    ///
    /// Returns `true` if the slot was taken and is now free. See
    /// [`Self::try_allocate`] for the atomicity contract.
    fn try_free(&mut self, offset: u64) -> Result<bool> {
        if !self.is_allocated(offset)? {
            return Ok(false);
        }
        self.free(offset)?;
        Ok(true)
    }
}

impl<S: IdStore + ?Sized> IdStore for Box<S> {
    fn is_allocated(&mut self, offset: u64) -> Result<bool> {
        (**self).is_allocated(offset)
    }

    fn allocate(&mut self, offset: u64) -> Result<()> {
        (**self).allocate(offset)
    }

    fn free(&mut self, offset: u64) -> Result<()> {
        (**self).free(offset)
    }

    fn free_all(&mut self) -> Result<()> {
        (**self).free_all()
    }

    fn max_size(&self) -> u64 {
        (**self).max_size()
    }

    fn allocated_count(&mut self) -> Result<u64> {
        (**self).allocated_count()
    }

    fn try_allocate(&mut self, offset: u64) -> Result<bool> {
        (**self).try_allocate(offset)
    }

    fn try_free(&mut self, offset: u64) -> Result<bool> {
        (**self).try_free(offset)
    }
}
