use crate::{Error, Result};
use core::fmt;

/// A contiguous, half-open space of IDs: `[min, max)`.
///
/// Stores never see IDs directly. They work with *offsets* (`id - min`), so a
/// store sized to [`IdRange::size`] can back any range of that size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdRange {
    min: u64,
    max: u64,
}

impl IdRange {
    /// Creates the range `[min, max)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if the range would be empty.
    pub fn new(min: u64, max: u64) -> Result<Self> {
        if min >= max {
            return Err(Error::InvalidRange {
                reason: format!("min ({min}) must be less than max ({max})"),
            });
        }
        Ok(Self { min, max })
    }

    /// Creates the range `[0, size)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `size` is zero.
    pub fn with_size(size: u64) -> Result<Self> {
        Self::new(0, size)
    }

    /// Inclusive lower bound.
    pub const fn min(&self) -> u64 {
        self.min
    }

    /// Exclusive upper bound.
    pub const fn max(&self) -> u64 {
        self.max
    }

    /// Number of IDs in the range. Never zero.
    pub const fn size(&self) -> u64 {
        self.max - self.min
    }

    pub const fn contains(&self, id: u64) -> bool {
        id >= self.min && id < self.max
    }

    /// Maps an ID to its store offset, or `None` if it is out of range.
    pub const fn offset_of(&self, id: u64) -> Option<u64> {
        if self.contains(id) {
            Some(id - self.min)
        } else {
            None
        }
    }

    /// Maps a store offset back to its ID.
    pub const fn id_at(&self, offset: u64) -> u64 {
        debug_assert!(offset < self.size());
        self.min + offset
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_ranges() {
        assert!(matches!(
            IdRange::new(5, 5),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            IdRange::new(9, 3),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            IdRange::with_size(0),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    fn offsets_are_relative_to_min() {
        let range = IdRange::new(100, 110).unwrap();
        assert_eq!(range.size(), 10);
        assert_eq!(range.offset_of(100), Some(0));
        assert_eq!(range.offset_of(109), Some(9));
        assert_eq!(range.offset_of(110), None);
        assert_eq!(range.offset_of(99), None);
        assert_eq!(range.id_at(3), 103);
    }

    #[test]
    fn displays_half_open_interval() {
        let range = IdRange::new(1, 8).unwrap();
        assert_eq!(range.to_string(), "[1, 8)");
    }
}
