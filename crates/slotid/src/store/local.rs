use crate::{Error, IdStore, Result};

const WORD_BITS: u64 = u64::BITS as u64;

/// Fixed-length bit vector over `u64` words.
///
/// Only bit-granular access is exposed; `set` and `clear` report whether they
/// flipped the bit so the owner can keep an exact population count.
#[derive(Clone, Debug)]
struct BitVector {
    words: Vec<u64>,
    len: u64,
}

impl BitVector {
    fn new(len: u64) -> Self {
        let words = len.div_ceil(WORD_BITS) as usize;
        Self {
            words: vec![0; words],
            len,
        }
    }

    #[inline]
    const fn locate(index: u64) -> (usize, u64) {
        ((index / WORD_BITS) as usize, 1 << (index % WORD_BITS))
    }

    #[inline]
    fn get(&self, index: u64) -> bool {
        debug_assert!(index < self.len);
        let (word, mask) = Self::locate(index);
        self.words[word] & mask != 0
    }

    #[inline]
    fn set(&mut self, index: u64) -> bool {
        debug_assert!(index < self.len);
        let (word, mask) = Self::locate(index);
        let was_clear = self.words[word] & mask == 0;
        self.words[word] |= mask;
        was_clear
    }

    #[inline]
    fn clear(&mut self, index: u64) -> bool {
        debug_assert!(index < self.len);
        let (word, mask) = Self::locate(index);
        let was_set = self.words[word] & mask != 0;
        self.words[word] &= !mask;
        was_set
    }

    fn reset(&mut self) {
        self.words.fill(0);
    }
}

/// An [`IdStore`] held entirely in process memory.
///
/// Backed by a bit vector of `max_size` bits plus a counter. Every operation
/// is O(1) except [`IdStore::free_all`], and none of them can fail. The store
/// has no synchronization of its own; the owning allocator's lock covers it.
///
/// # Example
///
/// ```
/// use slotid::{IdStore, LocalStore};
///
/// let mut store = LocalStore::new(16).unwrap();
/// store.allocate(3).unwrap();
/// assert!(store.is_allocated(3).unwrap());
/// assert_eq!(store.allocated_count().unwrap(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct LocalStore {
    bits: BitVector,
    allocated: u64,
}

impl LocalStore {
    /// Creates an empty store tracking `max_size` slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `max_size` is zero or does not fit
    /// in addressable memory.
    pub fn new(max_size: u64) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::InvalidRange {
                reason: "store size must be greater than 0".to_string(),
            });
        }
        if usize::try_from(max_size.div_ceil(WORD_BITS)).is_err() {
            return Err(Error::InvalidRange {
                reason: format!("store size {max_size} exceeds addressable memory"),
            });
        }
        Ok(Self {
            bits: BitVector::new(max_size),
            allocated: 0,
        })
    }
}

impl IdStore for LocalStore {
    fn is_allocated(&mut self, offset: u64) -> Result<bool> {
        Ok(self.bits.get(offset))
    }

    fn allocate(&mut self, offset: u64) -> Result<()> {
        if self.bits.set(offset) {
            self.allocated += 1;
        }
        Ok(())
    }

    fn free(&mut self, offset: u64) -> Result<()> {
        if self.bits.clear(offset) {
            self.allocated -= 1;
        }
        Ok(())
    }

    fn free_all(&mut self) -> Result<()> {
        self.bits.reset();
        self.allocated = 0;
        Ok(())
    }

    fn max_size(&self) -> u64 {
        self.bits.len
    }

    fn allocated_count(&mut self) -> Result<u64> {
        Ok(self.allocated)
    }

    fn try_allocate(&mut self, offset: u64) -> Result<bool> {
        let claimed = self.bits.set(offset);
        if claimed {
            self.allocated += 1;
        }
        Ok(claimed)
    }

    fn try_free(&mut self, offset: u64) -> Result<bool> {
        let released = self.bits.clear(offset);
        if released {
            self.allocated -= 1;
        }
        Ok(released)
    }
}
