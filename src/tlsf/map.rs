//! Size class mapper of the space manager.
use crate::{
    utils::locate_most_left_one_bit, FIRST_LEVEL_INDEX_COUNT, SECOND_LEVEL_INDEX_COUNT,
    SECOND_LEVEL_INDEX_COUNT_LOG2,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) struct MapParams {
    alignment: u64,
    /// Subtracted from `floor(log2(size))` to get the first level index of a
    /// size outside the small-size range.
    first_level_index_shift: u32,
}

impl MapParams {
    /// Returns `None` unless `alignment` is a power of two whose product with
    /// `FIRST_LEVEL_INDEX_COUNT` is representable.
    pub fn new(alignment: u64) -> Option<Self> {
        if !alignment.is_power_of_two() {
            return None;
        }
        let span = alignment.checked_mul(FIRST_LEVEL_INDEX_COUNT as u64)?;
        Some(Self {
            alignment,
            first_level_index_shift: locate_most_left_one_bit(span)? - 1,
        })
    }

    /// Find the free list `(first_level_index, second_level_index)` of a
    /// free block of the specified size.
    ///
    /// Sizes below `SECOND_LEVEL_INDEX_COUNT * alignment` are spread linearly
    /// over the first row; larger sizes go to the row of their most
    /// significant bit, subdivided by the next `SECOND_LEVEL_INDEX_COUNT_LOG2`
    /// bits.
    #[inline]
    pub fn map(&self, size: u64) -> (usize, usize) {
        if size < SECOND_LEVEL_INDEX_COUNT as u64 * self.alignment {
            return (0, (size / self.alignment) as usize);
        }

        // `size` is non-zero here
        let msb = locate_most_left_one_bit(size).unwrap_or(0);
        let second_level_index = (size >> (msb - SECOND_LEVEL_INDEX_COUNT_LOG2))
            ^ (1 << SECOND_LEVEL_INDEX_COUNT_LOG2);
        let first_level_index = msb - self.first_level_index_shift;

        debug_assert!((first_level_index as usize) < FIRST_LEVEL_INDEX_COUNT);
        debug_assert!((second_level_index as usize) < SECOND_LEVEL_INDEX_COUNT);
        (first_level_index as usize, second_level_index as usize)
    }

    /// Round a requested size up so that [`Self::map`] lands on a list whose
    /// every item is at least as large as `size`.
    #[inline]
    pub fn round_up(&self, size: u64) -> u64 {
        if size < (1 << SECOND_LEVEL_INDEX_COUNT_LOG2) {
            return size;
        }
        let msb = locate_most_left_one_bit(size).unwrap_or(0);
        size.saturating_add((1 << (msb - SECOND_LEVEL_INDEX_COUNT_LOG2)) - 1)
    }

    /// The smallest size stored in the list `(first_level_index,
    /// second_level_index)`.
    #[cfg(test)]
    pub fn list_min_size(&self, first_level_index: usize, second_level_index: usize) -> u64 {
        if first_level_index == 0 {
            second_level_index as u64 * self.alignment
        } else {
            let msb = first_level_index as u32 + self.first_level_index_shift;
            (1 << msb) + ((second_level_index as u64) << (msb - SECOND_LEVEL_INDEX_COUNT_LOG2))
        }
    }
}
