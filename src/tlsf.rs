//! The TLSF space manager core
use core::{debug_assert, debug_assert_eq, ops::Range};
use log::{debug, error, info, trace};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::{
    division::{
        DivisionMetadata, EmbeddedDivisionMetadata, METADATA_SIZE_BYTES, MIN_ACCESSIBLE_MEM_SIZE,
    },
    metadata::{SimpleTlsfMetadata, TlsfMetadata},
    space::ByteArena,
    utils::{align_up, locate_most_left_one_bit, locate_most_right_one_bit},
    Error, Result, MIN_ALIGNMENT,
};

mod map;
use self::map::MapParams;

/// A pair of first level index and second level index.
type Class = (usize, usize);

#[doc = svgbobdoc::transform!(
/// A TLSF (two-level segregated fit) manager of the free space in a flat
/// address range.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///   First level
///                                                          FIRST_LEVEL_INDEX_COUNT = 64
///                          ,-----+-----+-----+-----+-----+-----+-----+-----,
///   first_level_bitmap  =  | ... |  0  |  0  |  1  |  0  |  0  |  0  |  0  |
///                          +-----+-----+-----+-----+-----+-----+-----+-----+
///   min size (align = 8)   | ... | 2¹⁴ | 2¹³ | 2¹² | 2¹¹ | 2¹⁰ |  2⁹ |  0  |
///                          '-----+-----+-----+--+--+-----+-----+-----+-----'
///                                               |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Second Level                                |
///                                               v             SECOND_LEVEL_INDEX_COUNT = 64
///                             ,-----+-----+-----+-----+-----+-----+-----+-----,
///  "second_level_bitmap[4]" = | ... |  0  |  1  |  0  |  0  |  0  |  0  |  0  |
///                             +-----+-----+-----+-----+-----+-----+-----+-----+
///         min size 2¹²(1+n/64)| ... |  6  |  5  |  4  |  3  |  2  |  1  |  0  |
///                             +-----+-----+-----+-----+-----+-----+-----+-----+
///             segregated_list | ... |     |  O  |     |     |     |     |     |
///                             '-----+-----+--|--+-----+-----+-----+-----+-----'
///                                            |
///                                            |  size = 4416..4480
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Free blocks                              |
///             ,------------------------------'
///             | ,---+---+-------,    ,---+---+-------,    ,---+---+-------,
///             '-+>O | O-+-------+----+>O | O-+-------+----+>O |   |       |
///               +---+---'       |    +---+---'       |    +---+---'       |
///               '---------------'    '---------------'    '---------------'
///                  4416 bytes           4448 bytes           4424 bytes
/// ```
/// </center>
///
/// # Properties
///
/// Allocation, release and extension complete in constant time. Every
/// operation is serialized by a lock covering the whole manager.
///
/// The arena is always partitioned into physically adjacent blocks. No two
/// adjacent blocks are free at the same time, and every free block is linked
/// into exactly one segregated list.
///
/// `D` decides where the boundary tag of each block is stored (see
/// [`DivisionMetadata`]) and `M` where the bitmaps and list heads are.
)]
pub struct SpaceManager<D, M = SimpleTlsfMetadata> {
    alignment: u64,
    inner: Mutex<Inner<D, M>>,
}

/// Information about a physical block, as reported by
/// [`SpaceManager::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub address: u64,
    pub accessible_size: u64,
    pub free: bool,
}

struct Inner<D, M> {
    metadata: M,
    division: D,
    params: MapParams,
    alignment: u64,
    /// `beginning_pos..ending_pos`. `None` until a space is applied.
    arena: Option<Range<u64>>,
    /// The address of the physically last block.
    last_address: Option<u64>,
}

impl<D: DivisionMetadata> SpaceManager<D> {
    /// Format `beginning_pos..beginning_pos + size` as a single free block
    /// and manage it.
    ///
    /// `size` must be a multiple of `alignment`, which must be a power of two
    /// no less than [`MIN_ALIGNMENT`].
    pub fn new(division: D, alignment: u64, beginning_pos: u64, size: u64) -> Result<Self> {
        Self::with_metadata(SimpleTlsfMetadata::new(), division, alignment, beginning_pos, size)
    }

    /// Construct a manager without any space. The first call to
    /// [`Self::extend`] decides where the arena is.
    pub fn empty(division: D, alignment: u64) -> Result<Self> {
        Ok(Self {
            alignment,
            inner: Mutex::new(Inner::new(SimpleTlsfMetadata::new(), division, alignment)?),
        })
    }

    /// Manage `beginning_pos..beginning_pos + size`, whose boundary tags
    /// were already formatted by another manager, e.g., one whose division
    /// metadata was taken by [`Self::into_division`].
    ///
    /// The free lists are rebuilt by walking every block once.
    pub fn attach(division: D, alignment: u64, beginning_pos: u64, size: u64) -> Result<Self> {
        let mut inner = Inner::new(SimpleTlsfMetadata::new(), division, alignment)?;
        inner.attach(beginning_pos, size)?;
        Ok(Self {
            alignment,
            inner: Mutex::new(inner),
        })
    }
}

impl SpaceManager<EmbeddedDivisionMetadata<ByteArena>> {
    /// Manage a zero-filled [`ByteArena`] covering `beginning_pos..
    /// beginning_pos + size`, with boundary tags embedded in it.
    pub fn with_byte_arena(alignment: u64, beginning_pos: u64, size: u64) -> Result<Self> {
        let len = usize::try_from(size).map_err(|_| Error::InvalidSize(size))?;
        let arena = ByteArena::new(beginning_pos, len);
        Self::new(
            EmbeddedDivisionMetadata::new(arena),
            alignment,
            beginning_pos,
            size,
        )
    }
}

impl<D: DivisionMetadata, M: TlsfMetadata> SpaceManager<D, M> {
    /// [`Self::new`] with a given (empty) metadata store.
    pub fn with_metadata(
        metadata: M,
        division: D,
        alignment: u64,
        beginning_pos: u64,
        size: u64,
    ) -> Result<Self> {
        let mut inner = Inner::new(metadata, division, alignment)?;
        inner.apply(beginning_pos, size)?;
        Ok(Self {
            alignment,
            inner: Mutex::new(inner),
        })
    }

    /// Allocate a block whose accessible size is at least `size` bytes.
    ///
    /// Returns the address of the block. The accessible bytes start at
    /// `address + D::DATA_OFFSET`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSize`] if `size` is zero; [`Error::OutOfSpace`] if no
    /// free block is large enough.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time.
    pub fn allocate(&self, size: u64) -> Result<u64> {
        let aligned_size = self.aligned_request(size)?;

        let mut inner = self.inner.lock();
        let address = inner
            .pickout_free_buffer(aligned_size)
            .ok_or(Error::OutOfSpace)?;
        inner.prepare_space_for_use(address, aligned_size);
        trace!("allocate({}) = {:#x}", size, address);
        Ok(address)
    }

    /// Like [`Self::allocate`] but, if no free block is large enough, hand
    /// out the largest free block there is.
    ///
    /// The returned block may be smaller than `size`; check it with
    /// [`Self::accessible_size`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSize`] if `size` is zero; [`Error::OutOfSpace`] only if
    /// there is no free block at all.
    pub fn try_allocate(&self, size: u64) -> Result<u64> {
        let aligned_size = self.aligned_request(size)?;

        let mut inner = self.inner.lock();
        let address = match inner.pickout_free_buffer(aligned_size) {
            Some(address) => address,
            None => inner
                .pickout_biggest_free_space()
                .ok_or(Error::OutOfSpace)?,
        };
        inner.prepare_space_for_use(address, aligned_size);
        trace!("try_allocate({}) = {:#x}", size, address);
        Ok(address)
    }

    /// Return an allocated block to the free space, coalescing it with its
    /// free neighbors.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] if `pos` is not the address of a block;
    /// [`Error::AlreadyFree`] if the block is not allocated.
    ///
    /// With embedded boundary tags, release builds only look at the tag at
    /// `pos`. User bytes that happen to look like a tag pointing at itself
    /// pass for a block there and corrupt the free lists. Builds with debug
    /// assertions also walk the arena to make sure `pos` starts a block.
    pub fn release(&self, pos: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_block(pos)?;
        if inner.division.is_free(pos) {
            return Err(Error::AlreadyFree(pos));
        }

        inner.division.set_free(pos);

        if !inner.is_the_end(pos) {
            let next_physical_address = inner.division.next_physical_address(pos);
            inner
                .division
                .set_pre_physical_address(next_physical_address, Some(pos));
            inner.division.set_pre_free(next_physical_address);
        }

        inner.merge(pos);
        trace!("release({:#x})", pos);
        Ok(())
    }

    /// Grow the arena by `beginning_pos..beginning_pos + size`, which must
    /// immediately follow or precede the existing arena. If there is no arena
    /// yet, the range becomes the arena.
    ///
    /// # Errors
    ///
    /// [`Error::NotContiguous`] if the range touches neither end of the
    /// arena; [`Error::InvalidSize`] if `size` is not a positive multiple of
    /// the alignment or too small to hold a block.
    pub fn extend(&self, beginning_pos: u64, size: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let arena = match inner.arena.clone() {
            Some(arena) => arena,
            None => {
                inner.check_span(beginning_pos, size, D::DATA_OFFSET)?;
                inner.division.grow(beginning_pos, size)?;
                return inner.apply(beginning_pos, size);
            }
        };

        if beginning_pos == arena.end {
            let accessible_mem_size = inner.check_span(beginning_pos, size, D::BLOCK_OVERHEAD)?;
            info!(
                "Appending extra area with accessible size {} to the existing space!",
                accessible_mem_size
            );
            inner.division.grow(beginning_pos, size)?;
            inner.append(beginning_pos, size, accessible_mem_size);
            Ok(())
        } else if beginning_pos.checked_add(size) == Some(arena.start) {
            let accessible_mem_size = inner.check_span(beginning_pos, size, D::BLOCK_OVERHEAD)?;
            info!(
                "Inserting extra area with accessible size {} before the existing space!",
                accessible_mem_size
            );
            inner.division.grow(beginning_pos, size)?;
            inner.prepend(beginning_pos, accessible_mem_size);
            Ok(())
        } else {
            error!("Extending area must be continuous with the existing space!");
            Err(Error::NotContiguous {
                beginning_pos,
                size,
            })
        }
    }

    /// The size of the arena, or zero if there is none.
    pub fn size(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .arena
            .as_ref()
            .map_or(0, |arena| arena.end - arena.start)
    }

    #[inline]
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// `beginning_pos..ending_pos`, or `None` if there is no arena yet.
    pub fn range(&self) -> Option<Range<u64>> {
        self.inner.lock().arena.clone()
    }

    /// The accessible size of the allocated block at `pos`.
    pub fn accessible_size(&self, pos: u64) -> Result<u64> {
        let inner = self.inner.lock();
        inner.check_block(pos)?;
        Ok(inner.division.accessible_mem_size(pos))
    }

    /// The user-visible bytes of the allocated block at `pos`.
    pub fn data_range(&self, pos: u64) -> Result<Range<u64>> {
        let size = self.accessible_size(pos)?;
        let start = pos + D::DATA_OFFSET;
        Ok(start..start + size)
    }

    /// The total accessible size of all free blocks.
    ///
    /// # Time Complexity
    ///
    /// Linear in the number of blocks.
    pub fn free_size(&self) -> u64 {
        self.blocks()
            .iter()
            .filter(|block| block.free)
            .map(|block| block.accessible_size)
            .sum()
    }

    /// Walk every physical block in address order.
    ///
    /// # Time Complexity
    ///
    /// Linear in the number of blocks.
    pub fn blocks(&self) -> Vec<BlockInfo> {
        self.inner.lock().blocks()
    }

    /// Lock the manager and borrow its division metadata, e.g., to access the
    /// [`Space`](crate::Space) of an embedded backend.
    pub fn lock_division(&self) -> MappedMutexGuard<'_, D> {
        MutexGuard::map(self.inner.lock(), |inner| &mut inner.division)
    }

    /// Take the division metadata, which can be handed to
    /// [`Self::attach`] later.
    pub fn into_division(self) -> D {
        self.inner.into_inner().division
    }

    fn aligned_request(&self, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(Error::InvalidSize(size));
        }
        // Requests are multiples of the alignment, the floor included
        align_up(size.max(MIN_ACCESSIBLE_MEM_SIZE), self.alignment).ok_or(Error::OutOfSpace)
    }
}

impl<D, M> core::fmt::Debug for SpaceManager<D, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpaceManager")
            .field("alignment", &self.alignment)
            .finish_non_exhaustive()
    }
}

impl<D: DivisionMetadata, M: TlsfMetadata> Inner<D, M> {
    fn new(metadata: M, division: D, alignment: u64) -> Result<Self> {
        if alignment < MIN_ALIGNMENT {
            return Err(Error::InvalidAlignment(alignment));
        }
        let params = MapParams::new(alignment).ok_or(Error::InvalidAlignment(alignment))?;
        Ok(Self {
            metadata,
            division,
            params,
            alignment,
            arena: None,
            last_address: None,
        })
    }

    /// Validate a span about to be formatted as one block whose tag consumes
    /// `overhead` bytes of it. Returns the block's accessible size.
    fn check_span(&self, beginning_pos: u64, size: u64, overhead: u64) -> Result<u64> {
        if size == 0 || size % self.alignment != 0 || beginning_pos.checked_add(size).is_none() {
            return Err(Error::InvalidSize(size));
        }

        let min_accessible_mem_size = if D::SEPARATED {
            self.alignment
        } else {
            MIN_ACCESSIBLE_MEM_SIZE
        };
        match size.checked_sub(overhead) {
            Some(accessible_mem_size) if accessible_mem_size >= min_accessible_mem_size => {
                Ok(accessible_mem_size)
            }
            _ => Err(Error::InvalidSize(size)),
        }
    }

    /// Format a new arena as one free block.
    fn apply(&mut self, beginning_pos: u64, size: u64) -> Result<()> {
        let accessible_mem_size = self.check_span(beginning_pos, size, D::DATA_OFFSET)?;
        debug!("Initialize space with size {}", accessible_mem_size);

        let division = &mut self.division;
        division.set_pre_physical_address(beginning_pos, None);
        division.set_address(beginning_pos);
        division.set_accessible_mem_size(beginning_pos, accessible_mem_size);
        division.set_free(beginning_pos);
        // The first block has no predecessor. Clear the bit anyway.
        division.set_pre_used(beginning_pos);

        self.arena = Some(beginning_pos..beginning_pos + size);
        self.last_address = Some(beginning_pos);

        let class = self.mapping(accessible_mem_size);
        self.insert_free_space(beginning_pos, class);
        Ok(())
    }

    /// Adopt an already formatted arena and rebuild the free lists.
    fn attach(&mut self, beginning_pos: u64, size: u64) -> Result<()> {
        self.check_span(beginning_pos, size, D::DATA_OFFSET)?;
        let ending_pos = beginning_pos + size;
        self.arena = Some(beginning_pos..ending_pos);

        let mut address = beginning_pos;
        let mut pre_address = None;
        let mut pre_free = false;
        loop {
            if address
                .checked_add(D::DATA_OFFSET)
                .map_or(true, |data| data > ending_pos)
                || self.division.address(address) != Some(address)
                || self.division.is_pre_free(address) != pre_free
                || (pre_free && self.division.pre_physical_address(address) != pre_address)
            {
                return Err(Error::Corrupted(address));
            }

            let free = self.division.is_free(address);
            if free && pre_free {
                return Err(Error::Corrupted(address));
            }
            let accessible_mem_size = self.division.accessible_mem_size(address);
            let min_accessible_mem_size = if D::SEPARATED {
                1
            } else {
                MIN_ACCESSIBLE_MEM_SIZE
            };
            if accessible_mem_size < min_accessible_mem_size
                || (address + D::DATA_OFFSET)
                    .checked_add(accessible_mem_size)
                    .map_or(true, |end| end > ending_pos)
            {
                return Err(Error::Corrupted(address));
            }

            if free {
                let class = self.mapping(accessible_mem_size);
                self.insert_free_space(address, class);
            }

            if self.is_the_end(address) {
                break;
            }

            let next_physical_address = self.division.next_physical_address(address);
            if next_physical_address <= address {
                return Err(Error::Corrupted(address));
            }
            pre_address = Some(address);
            pre_free = free;
            address = next_physical_address;
        }

        self.last_address = Some(address);
        debug!(
            "Attached to formatted space {:#x}..{:#x}",
            beginning_pos, ending_pos
        );
        Ok(())
    }

    /// Format a new free block at the end of the arena and coalesce it with
    /// the last block.
    fn append(&mut self, beginning_pos: u64, size: u64, accessible_mem_size: u64) {
        // The part of the tag preceding the block header lives in the last
        // bytes of the previous block.
        let address = beginning_pos - (D::DATA_OFFSET - D::BLOCK_OVERHEAD);
        let last_address = self.last_address;

        let division = &mut self.division;
        division.set_address(address);
        division.set_accessible_mem_size(address, accessible_mem_size);
        division.set_free(address);
        match last_address {
            Some(last_address) if division.is_free(last_address) => {
                division.set_pre_physical_address(address, Some(last_address));
                division.set_pre_free(address);
            }
            _ => division.set_pre_used(address),
        }

        if let Some(arena) = &mut self.arena {
            arena.end = beginning_pos + size;
        }
        self.last_address = Some(address);
        self.merge(address);
    }

    /// Format a new free block at the beginning of the arena and coalesce it
    /// with the first block.
    fn prepend(&mut self, beginning_pos: u64, accessible_mem_size: u64) {
        let division = &mut self.division;
        division.set_pre_physical_address(beginning_pos, None);
        division.set_address(beginning_pos);
        division.set_accessible_mem_size(beginning_pos, accessible_mem_size);
        division.set_free(beginning_pos);
        division.set_pre_used(beginning_pos);

        let next_physical_address = division.next_physical_address(beginning_pos);
        division.set_pre_physical_address(next_physical_address, Some(beginning_pos));
        division.set_pre_free(next_physical_address);

        if let Some(arena) = &mut self.arena {
            debug_assert_eq!(arena.start, next_physical_address);
            arena.start = beginning_pos;
        }
        self.merge(beginning_pos);
    }

    /// Check that `pos` is the address of a block in the arena.
    fn check_block(&self, pos: u64) -> Result<()> {
        let arena = self.arena.as_ref().ok_or(Error::InvalidAddress(pos))?;
        if pos < arena.start
            || pos >= arena.end
            || pos.saturating_add(D::DATA_OFFSET) > arena.end
            || self.division.address(pos) != Some(pos)
            || (cfg!(debug_assertions) && !self.reaches(pos))
        {
            return Err(Error::InvalidAddress(pos));
        }
        Ok(())
    }

    /// Whether walking the arena from its start lands on `pos`. Linear in
    /// the number of blocks.
    fn reaches(&self, pos: u64) -> bool {
        let mut address = match &self.arena {
            Some(arena) => arena.start,
            None => return false,
        };
        loop {
            if address >= pos {
                return address == pos;
            }
            if self.is_the_end(address) {
                return false;
            }
            address = self.division.next_physical_address(address);
        }
    }

    #[inline]
    fn mapping(&self, size: u64) -> Class {
        self.params.map(size)
    }

    /// Find the head of the first non-empty list whose every item is at least
    /// as large as the items of `class`.
    ///
    /// Returns the head together with the class it was actually found in.
    fn search_suitable_space(
        &self,
        (first_level_index, second_level_index): Class,
    ) -> Option<(u64, Class)> {
        let mut first_level_index = first_level_index;
        let mut second_level_map =
            self.metadata.second_level_bitmap(first_level_index) & (!0u64 << second_level_index);

        // Check if it is necessary to find bigger space from first level.
        if second_level_map == 0 {
            let first_level_map = self.metadata.first_level_bitmap()
                & (!0u64).checked_shl(first_level_index as u32 + 1).unwrap_or(0);
            first_level_index = locate_most_right_one_bit(first_level_map)? as usize;
            second_level_map = self.metadata.second_level_bitmap(first_level_index);
        }

        let second_level_index = locate_most_right_one_bit(second_level_map)? as usize;
        let address = self
            .metadata
            .segregated_list_head(first_level_index, second_level_index);
        debug_assert!(address.is_some());

        Some((address?, (first_level_index, second_level_index)))
    }

    /// Remove a free block from the list of `class`, which must be the class
    /// of its current size.
    fn remove_free_space(&mut self, address: u64, (first_level_index, second_level_index): Class) {
        debug_assert!(self.division.is_free(address));

        let pre_free_address = self.division.pre_free_address(address);
        let next_free_address = self.division.next_free_address(address);

        if let Some(pre_free_address) = pre_free_address {
            self.division
                .set_next_free_address(pre_free_address, next_free_address);
        }

        if let Some(next_free_address) = next_free_address {
            self.division
                .set_pre_free_address(next_free_address, pre_free_address);
        }

        if pre_free_address.is_none() {
            // `address` is the head of the list
            debug_assert_eq!(
                self.metadata
                    .segregated_list_head(first_level_index, second_level_index),
                Some(address)
            );
            self.metadata.set_segregated_list_head(
                first_level_index,
                second_level_index,
                next_free_address,
            );

            if next_free_address.is_none() {
                // The list is now empty - update the bitmaps
                let second_level_bitmap = self.metadata.second_level_bitmap(first_level_index)
                    & !(1 << second_level_index);
                self.metadata
                    .set_second_level_bitmap(first_level_index, second_level_bitmap);

                if second_level_bitmap == 0 {
                    let first_level_bitmap =
                        self.metadata.first_level_bitmap() & !(1 << first_level_index);
                    self.metadata.set_first_level_bitmap(first_level_bitmap);
                }
            }
        }
    }

    /// Push a free block to the head of the list of `class`.
    fn insert_free_space(&mut self, address: u64, (first_level_index, second_level_index): Class) {
        let head_address = self
            .metadata
            .segregated_list_head(first_level_index, second_level_index);
        if let Some(head_address) = head_address {
            self.division
                .set_pre_free_address(head_address, Some(address));
        }
        self.division.set_next_free_address(address, head_address);
        self.division.set_pre_free_address(address, None);
        self.metadata
            .set_segregated_list_head(first_level_index, second_level_index, Some(address));

        let first_level_bitmap = self.metadata.first_level_bitmap() | (1 << first_level_index);
        self.metadata.set_first_level_bitmap(first_level_bitmap);

        let second_level_bitmap =
            self.metadata.second_level_bitmap(first_level_index) | (1 << second_level_index);
        self.metadata
            .set_second_level_bitmap(first_level_index, second_level_bitmap);
    }

    /// Fold the physically following block at `address` into
    /// `pre_address`. Returns `pre_address`.
    fn absorb(&mut self, pre_address: u64, address: u64) -> u64 {
        let new_size = self.division.accessible_mem_size(pre_address)
            + self.division.accessible_mem_size(address)
            + D::BLOCK_OVERHEAD;
        trace!("absorb({:#x}, {:#x}) -> {}", pre_address, address, new_size);

        if !self.is_the_end(address) {
            let next_physical_address = self.division.next_physical_address(address);
            self.division
                .set_pre_physical_address(next_physical_address, Some(pre_address));
            self.division.set_pre_free(next_physical_address);
        }

        self.division.set_accessible_mem_size(pre_address, new_size);

        if self.last_address == Some(address) {
            self.last_address = Some(pre_address);
        }
        self.division.clear(address);
        pre_address
    }

    /// Merge a free block with the physically preceding block if that one
    /// is free. Returns the address of the resulting block.
    fn merge_pre(&mut self, address: u64) -> u64 {
        debug_assert!(self.division.is_free(address));

        if !self.division.is_pre_free(address) {
            return address;
        }

        match self.division.pre_physical_address(address) {
            Some(pre_physical_address) => {
                let class = self.mapping(self.division.accessible_mem_size(pre_physical_address));
                self.remove_free_space(pre_physical_address, class);
                self.absorb(pre_physical_address, address)
            }
            None => {
                debug_assert!(false, "{:#x} has a free predecessor but no link", address);
                address
            }
        }
    }

    /// Merge a free block with the physically following block if that one
    /// is free. Returns the address of the resulting block.
    fn merge_next(&mut self, address: u64) -> u64 {
        debug_assert!(self.division.is_free(address));

        if self.is_the_end(address) {
            return address;
        }

        let next_physical_address = self.division.next_physical_address(address);
        if self.division.is_free(next_physical_address) {
            let class = self.mapping(self.division.accessible_mem_size(next_physical_address));
            self.remove_free_space(next_physical_address, class);
            self.absorb(address, next_physical_address)
        } else {
            address
        }
    }

    /// Coalesce a free block with its free neighbors and link the result.
    fn merge(&mut self, address: u64) {
        let address = self.merge_pre(address);
        let address = self.merge_next(address);

        let class = self.mapping(self.division.accessible_mem_size(address));
        self.insert_free_space(address, class);
    }

    /// Split the free block at `address` into a `size`-byte front part and
    /// a free remainder, which is not linked to any list.
    ///
    /// Returns the address of the remainder.
    fn split_buffer(&mut self, address: u64, size: u64) -> u64 {
        debug_assert!(self.division.is_free(address));

        let accessible_mem_size = self.division.accessible_mem_size(address);
        let remaining_address = address + size + D::BLOCK_OVERHEAD;
        let remaining_size = accessible_mem_size - (size + D::BLOCK_OVERHEAD);
        let was_end = self.is_the_end(address);
        let next_physical_address = self.division.next_physical_address(address);

        let division = &mut self.division;
        division.set_pre_physical_address(remaining_address, Some(address));
        division.set_address(remaining_address);
        division.set_accessible_mem_size(remaining_address, remaining_size);
        division.set_free(remaining_address);
        division.set_pre_free(remaining_address);

        if was_end {
            self.last_address = Some(remaining_address);
        } else {
            division.set_pre_physical_address(next_physical_address, Some(remaining_address));
            division.set_pre_free(next_physical_address);
        }

        division.set_accessible_mem_size(address, size);
        trace!(
            "split {:#x} at {} -> {:#x} ({})",
            address,
            size,
            remaining_address,
            remaining_size
        );
        remaining_address
    }

    /// Put back the part of a free block beyond `size`, if it is large enough
    /// to be useful on its own.
    fn trim_free_space(&mut self, address: u64, size: u64) {
        let splitting_threshold = if D::SEPARATED {
            size.saturating_add(self.alignment)
        } else {
            size.saturating_add(METADATA_SIZE_BYTES.max(self.alignment))
        };

        if self.division.accessible_mem_size(address) < splitting_threshold {
            return;
        }

        let remaining_address = self.split_buffer(address, size);
        let class = self.mapping(self.division.accessible_mem_size(remaining_address));
        self.insert_free_space(remaining_address, class);
    }

    /// Unlink a free block of at least `size` bytes.
    fn pickout_free_buffer(&mut self, size: u64) -> Option<u64> {
        // Skip the list whose smaller items would not fit
        let class = self.mapping(self.params.round_up(size));
        let (address, class) = self.search_suitable_space(class)?;
        debug_assert!(self.division.accessible_mem_size(address) >= size);
        self.remove_free_space(address, class);
        Some(address)
    }

    /// Unlink a free block from the highest non-empty list.
    fn pickout_biggest_free_space(&mut self) -> Option<u64> {
        let first_level_index =
            locate_most_left_one_bit(self.metadata.first_level_bitmap())? as usize;
        let second_level_index =
            locate_most_left_one_bit(self.metadata.second_level_bitmap(first_level_index))? as usize;
        let class = (first_level_index, second_level_index);

        let address = self.metadata.segregated_list_head(class.0, class.1)?;
        self.remove_free_space(address, class);
        Some(address)
    }

    /// Trim an unlinked free block to `size` and mark it used.
    fn prepare_space_for_use(&mut self, address: u64, size: u64) {
        self.trim_free_space(address, size);

        if !self.is_the_end(address) {
            let next_physical_address = self.division.next_physical_address(address);
            self.division.set_pre_used(next_physical_address);
        }

        self.division.set_used(address);
    }

    /// Whether the block at `address` is the physically last one.
    #[inline]
    fn is_the_end(&self, address: u64) -> bool {
        let ending_pos = self.arena.as_ref().map_or(0, |arena| arena.end);
        address + D::DATA_OFFSET + self.division.accessible_mem_size(address) >= ending_pos
    }

    fn blocks(&self) -> Vec<BlockInfo> {
        let mut blocks = Vec::new();
        let mut address = match &self.arena {
            Some(arena) => arena.start,
            None => return blocks,
        };
        loop {
            blocks.push(BlockInfo {
                address,
                accessible_size: self.division.accessible_mem_size(address),
                free: self.division.is_free(address),
            });
            if self.is_the_end(address) {
                return blocks;
            }
            address = self.division.next_physical_address(address);
        }
    }
}

#[cfg(test)]
mod tests;
