//! Division metadata: the boundary tags of each block.
//!
//! A block is identified by its address. Its tag consists of five
//! word-sized fields:
//!
//! ```text
//! |-------pre_phy_buffer-----|   PRE_PHY_OFFSET
//! |-------cur_phy_buffer-----|   CUR_PHY_OFFSET
//! |-------size field-----P-F-|   SIZE_FIELD_OFFSET
//! |-------next_free----------|   NEXT_FREE_OFFSET
//! |-------pre_free-----------|   PRE_FREE_OFFSET
//! ```
//!
//! `F` ([`BUFFER_FREE_BIT`]) tells whether the block is free and `P`
//! ([`PRE_BUFFER_FREE_BIT`]) whether the physically preceding block is.
use crate::{space::WORD_BYTES, Result};

mod embedded;
mod side_table;
pub use self::{embedded::EmbeddedDivisionMetadata, side_table::SideTableDivisionMetadata};

/// The width of each field of a tag.
pub const METADATA_UNIT_BYTES: u64 = WORD_BYTES;

/// The size of a complete tag.
pub const METADATA_SIZE_BYTES: u64 = 5 * METADATA_UNIT_BYTES;

/// The bytes of an embedded tag that stay unavailable to the user while the
/// block is allocated: `cur_phy_buffer` and the size field.
pub const BUFFER_METADATA_OVERHEAD: u64 = 2 * METADATA_UNIT_BYTES;

pub const PRE_PHY_OFFSET: u64 = 0;
pub const CUR_PHY_OFFSET: u64 = PRE_PHY_OFFSET + METADATA_UNIT_BYTES;
pub const SIZE_FIELD_OFFSET: u64 = CUR_PHY_OFFSET + METADATA_UNIT_BYTES;
pub const NEXT_FREE_OFFSET: u64 = SIZE_FIELD_OFFSET + METADATA_UNIT_BYTES;
pub const PRE_FREE_OFFSET: u64 = NEXT_FREE_OFFSET + METADATA_UNIT_BYTES;

/// The offset of the user-accessible bytes of an embedded block.
pub const ASSEMEM_OFFSET: u64 = NEXT_FREE_OFFSET;

/// The smallest accessible size of any allocation. An embedded free block
/// needs this much room for `next_free`, `pre_free` and the following
/// block's `pre_phy_buffer`.
pub const MIN_ACCESSIBLE_MEM_SIZE: u64 = METADATA_SIZE_BYTES - BUFFER_METADATA_OVERHEAD;

/// The bit of the size field indicating the block is free.
pub const BUFFER_FREE_BIT: u64 = 1 << 0;

/// The bit of the size field indicating the physically preceding block is
/// free.
pub const PRE_BUFFER_FREE_BIT: u64 = 1 << 1;

/// The bits of the size field holding status flags.
pub const STATUS_BITS: u64 = BUFFER_FREE_BIT | PRE_BUFFER_FREE_BIT;

/// Per-block boundary tag accessors.
///
/// Every method takes the address of the block whose tag is accessed.
/// Setters create a tag on demand; getters on an address that carries no tag
/// return unspecified values (but never panic for the side-table backend).
pub trait DivisionMetadata {
    /// Whether the tags are stored apart from the arena. When `false`, tags
    /// consume arena bytes and the accessible size of each block excludes
    /// [`BUFFER_METADATA_OVERHEAD`].
    const SEPARATED: bool;

    /// The distance from a block's address to its first accessible byte.
    const DATA_OFFSET: u64;

    /// The arena bytes consumed by the tag of each block besides its
    /// accessible bytes.
    const BLOCK_OVERHEAD: u64;

    fn pre_physical_address(&self, address: u64) -> Option<u64>;

    fn set_pre_physical_address(&mut self, address: u64, pre_physical_address: Option<u64>);

    /// The address of the physically following block, derived from the
    /// address and the accessible size.
    fn next_physical_address(&self, address: u64) -> u64;

    /// The address recorded in the tag, which equals `address` iff a block
    /// starts there.
    fn address(&self, address: u64) -> Option<u64>;

    /// Record `address` as the start of a block.
    fn set_address(&mut self, address: u64);

    /// The accessible size, with the status bits masked out.
    fn accessible_mem_size(&self, address: u64) -> u64;

    /// Set the accessible size, preserving the status bits.
    fn set_accessible_mem_size(&mut self, address: u64, accessible_mem_size: u64);

    fn pre_free_address(&self, address: u64) -> Option<u64>;

    fn set_pre_free_address(&mut self, address: u64, pre_free_address: Option<u64>);

    fn next_free_address(&self, address: u64) -> Option<u64>;

    fn set_next_free_address(&mut self, address: u64, next_free_address: Option<u64>);

    fn is_free(&self, address: u64) -> bool;

    fn set_free(&mut self, address: u64);

    fn set_used(&mut self, address: u64);

    fn is_pre_free(&self, address: u64) -> bool;

    fn set_pre_free(&mut self, address: u64);

    fn set_pre_used(&mut self, address: u64);

    /// Forget the tag of a block that was absorbed by its predecessor.
    #[inline]
    fn clear(&mut self, _address: u64) {}

    /// Prepare `beginning_pos..beginning_pos + size` to receive tags before
    /// the arena is extended over it.
    #[inline]
    fn grow(&mut self, _beginning_pos: u64, _size: u64) -> Result<()> {
        Ok(())
    }
}

/// Encode an optional address as stored in a word.
#[inline]
pub(crate) fn encode_address(address: Option<u64>) -> u64 {
    match address {
        Some(address) => {
            debug_assert_ne!(address, crate::NULL_SPACE_ADDRESS);
            address
        }
        None => crate::NULL_SPACE_ADDRESS,
    }
}

/// Decode an optional address from a word.
#[inline]
pub(crate) fn decode_address(word: u64) -> Option<u64> {
    if word == crate::NULL_SPACE_ADDRESS {
        None
    } else {
        Some(word)
    }
}
