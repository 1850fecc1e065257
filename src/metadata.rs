//! The Metadata Store: first-level bitmap, second-level bitmaps and the
//! segregated list heads.
use const_default1::ConstDefault;

use crate::{FIRST_LEVEL_INDEX_COUNT, SECOND_LEVEL_INDEX_COUNT};

/// Storage for the two-level bitmap index and the free list heads.
///
/// Indices passed to these methods are always less than
/// [`FIRST_LEVEL_INDEX_COUNT`] and [`SECOND_LEVEL_INDEX_COUNT`].
pub trait TlsfMetadata {
    /// Bit `i` is set iff first-level class `i` has a non-empty list.
    fn first_level_bitmap(&self) -> u64;

    fn set_first_level_bitmap(&mut self, bitmap: u64);

    /// Bit `j` is set iff the list `(first_level_index, j)` is non-empty.
    fn second_level_bitmap(&self, first_level_index: usize) -> u64;

    fn set_second_level_bitmap(&mut self, first_level_index: usize, bitmap: u64);

    /// The head of a segregated free list.
    fn segregated_list_head(
        &self,
        first_level_index: usize,
        second_level_index: usize,
    ) -> Option<u64>;

    fn set_segregated_list_head(
        &mut self,
        first_level_index: usize,
        second_level_index: usize,
        address: Option<u64>,
    );
}

/// [`TlsfMetadata`] kept in plain in-memory arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleTlsfMetadata {
    first_level_bitmap: u64,
    second_level_bitmap: [u64; FIRST_LEVEL_INDEX_COUNT],
    segregated_list: [[Option<u64>; SECOND_LEVEL_INDEX_COUNT]; FIRST_LEVEL_INDEX_COUNT],
}

impl SimpleTlsfMetadata {
    /// All lists empty.
    pub const INIT: Self = Self {
        first_level_bitmap: 0,
        second_level_bitmap: [0; FIRST_LEVEL_INDEX_COUNT],
        segregated_list: [[None; SECOND_LEVEL_INDEX_COUNT]; FIRST_LEVEL_INDEX_COUNT],
    };

    #[inline]
    pub const fn new() -> Self {
        Self::INIT
    }
}

impl ConstDefault for SimpleTlsfMetadata {
    const DEFAULT: Self = Self::INIT;
}

impl Default for SimpleTlsfMetadata {
    fn default() -> Self {
        Self::INIT
    }
}

impl TlsfMetadata for SimpleTlsfMetadata {
    #[inline]
    fn first_level_bitmap(&self) -> u64 {
        self.first_level_bitmap
    }

    #[inline]
    fn set_first_level_bitmap(&mut self, bitmap: u64) {
        self.first_level_bitmap = bitmap;
    }

    #[inline]
    fn second_level_bitmap(&self, first_level_index: usize) -> u64 {
        self.second_level_bitmap[first_level_index]
    }

    #[inline]
    fn set_second_level_bitmap(&mut self, first_level_index: usize, bitmap: u64) {
        self.second_level_bitmap[first_level_index] = bitmap;
    }

    #[inline]
    fn segregated_list_head(
        &self,
        first_level_index: usize,
        second_level_index: usize,
    ) -> Option<u64> {
        self.segregated_list[first_level_index][second_level_index]
    }

    #[inline]
    fn set_segregated_list_head(
        &mut self,
        first_level_index: usize,
        second_level_index: usize,
        address: Option<u64>,
    ) {
        self.segregated_list[first_level_index][second_level_index] = address;
    }
}
