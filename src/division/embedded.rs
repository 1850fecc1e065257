use super::{
    decode_address, encode_address, DivisionMetadata, ASSEMEM_OFFSET, BUFFER_FREE_BIT,
    BUFFER_METADATA_OVERHEAD, CUR_PHY_OFFSET, METADATA_UNIT_BYTES, NEXT_FREE_OFFSET,
    PRE_BUFFER_FREE_BIT, PRE_FREE_OFFSET, PRE_PHY_OFFSET, SIZE_FIELD_OFFSET, STATUS_BITS,
};
use crate::{space::Space, Result, NULL_SPACE_ADDRESS};

/// Boundary tags written into the arena itself, next to the user bytes.
///
/// A block at `address` occupies `address + CUR_PHY_OFFSET..address +
/// ASSEMEM_OFFSET + accessible_mem_size`. Its `pre_phy_buffer` field lives in
/// the last word of the preceding block, and `next_free`/`pre_free` overlap
/// the first accessible bytes, so those fields are only meaningful while the
/// respective block is free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedDivisionMetadata<S> {
    space: S,
}

impl<S: Space> EmbeddedDivisionMetadata<S> {
    #[inline]
    pub fn new(space: S) -> Self {
        Self { space }
    }

    #[inline]
    pub fn space(&self) -> &S {
        &self.space
    }

    #[inline]
    pub fn space_mut(&mut self) -> &mut S {
        &mut self.space
    }

    #[inline]
    pub fn into_inner(self) -> S {
        self.space
    }

    #[inline]
    fn size_field(&self, address: u64) -> u64 {
        self.space.read_word(address + SIZE_FIELD_OFFSET)
    }

    #[inline]
    fn update_size_field(&mut self, address: u64, f: impl FnOnce(u64) -> u64) {
        let field = self.size_field(address);
        self.space.write_word(address + SIZE_FIELD_OFFSET, f(field));
    }
}

impl<S: Space> DivisionMetadata for EmbeddedDivisionMetadata<S> {
    const SEPARATED: bool = false;
    const DATA_OFFSET: u64 = ASSEMEM_OFFSET;
    const BLOCK_OVERHEAD: u64 = BUFFER_METADATA_OVERHEAD;

    #[inline]
    fn pre_physical_address(&self, address: u64) -> Option<u64> {
        decode_address(self.space.read_word(address + PRE_PHY_OFFSET))
    }

    #[inline]
    fn set_pre_physical_address(&mut self, address: u64, pre_physical_address: Option<u64>) {
        self.space
            .write_word(address + PRE_PHY_OFFSET, encode_address(pre_physical_address));
    }

    #[inline]
    fn next_physical_address(&self, address: u64) -> u64 {
        address + ASSEMEM_OFFSET + self.accessible_mem_size(address) - METADATA_UNIT_BYTES
    }

    #[inline]
    fn address(&self, address: u64) -> Option<u64> {
        decode_address(self.space.read_word(address + CUR_PHY_OFFSET))
    }

    #[inline]
    fn set_address(&mut self, address: u64) {
        self.space.write_word(address + CUR_PHY_OFFSET, address);
    }

    #[inline]
    fn accessible_mem_size(&self, address: u64) -> u64 {
        self.size_field(address) & !STATUS_BITS
    }

    #[inline]
    fn set_accessible_mem_size(&mut self, address: u64, accessible_mem_size: u64) {
        debug_assert_eq!(accessible_mem_size & STATUS_BITS, 0);
        self.update_size_field(address, |field| {
            accessible_mem_size | (field & STATUS_BITS)
        });
    }

    #[inline]
    fn pre_free_address(&self, address: u64) -> Option<u64> {
        decode_address(self.space.read_word(address + PRE_FREE_OFFSET))
    }

    #[inline]
    fn set_pre_free_address(&mut self, address: u64, pre_free_address: Option<u64>) {
        self.space
            .write_word(address + PRE_FREE_OFFSET, encode_address(pre_free_address));
    }

    #[inline]
    fn next_free_address(&self, address: u64) -> Option<u64> {
        decode_address(self.space.read_word(address + NEXT_FREE_OFFSET))
    }

    #[inline]
    fn set_next_free_address(&mut self, address: u64, next_free_address: Option<u64>) {
        self.space
            .write_word(address + NEXT_FREE_OFFSET, encode_address(next_free_address));
    }

    #[inline]
    fn is_free(&self, address: u64) -> bool {
        self.size_field(address) & BUFFER_FREE_BIT != 0
    }

    #[inline]
    fn set_free(&mut self, address: u64) {
        self.update_size_field(address, |field| field | BUFFER_FREE_BIT);
    }

    #[inline]
    fn set_used(&mut self, address: u64) {
        self.update_size_field(address, |field| field & !BUFFER_FREE_BIT);
    }

    #[inline]
    fn is_pre_free(&self, address: u64) -> bool {
        self.size_field(address) & PRE_BUFFER_FREE_BIT != 0
    }

    #[inline]
    fn set_pre_free(&mut self, address: u64) {
        self.update_size_field(address, |field| field | PRE_BUFFER_FREE_BIT);
    }

    #[inline]
    fn set_pre_used(&mut self, address: u64) {
        self.update_size_field(address, |field| field & !PRE_BUFFER_FREE_BIT);
    }

    /// The absorbed tag lies inside the predecessor's free bytes now. Only
    /// its address word is erased so that the stale block is not mistaken
    /// for a live one.
    #[inline]
    fn clear(&mut self, address: u64) {
        self.space
            .write_word(address + CUR_PHY_OFFSET, NULL_SPACE_ADDRESS);
    }

    fn grow(&mut self, beginning_pos: u64, size: u64) -> Result<()> {
        self.space.grow(beginning_pos, size)
    }
}
