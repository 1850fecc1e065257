use rustc_hash::FxHashMap;

use super::{DivisionMetadata, BUFFER_FREE_BIT, PRE_BUFFER_FREE_BIT, STATUS_BITS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tag {
    pre_phy_addr: Option<u64>,
    cur_phy_addr: Option<u64>,
    size_field: u64,
    next_free_addr: Option<u64>,
    pre_free_addr: Option<u64>,
}

impl Tag {
    const VACANT: Self = Self {
        pre_phy_addr: None,
        cur_phy_addr: None,
        size_field: 0,
        next_free_addr: None,
        pre_free_addr: None,
    };
}

/// Boundary tags kept in a map keyed by block address, leaving the arena's
/// bytes untouched. Blocks carry no per-block overhead.
#[derive(Debug, Clone, Default)]
pub struct SideTableDivisionMetadata {
    table: FxHashMap<u64, Tag>,
}

impl SideTableDivisionMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of blocks with a tag.
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[inline]
    fn tag(&self, address: u64) -> &Tag {
        self.table.get(&address).unwrap_or(&Tag::VACANT)
    }

    #[inline]
    fn tag_mut(&mut self, address: u64) -> &mut Tag {
        self.table.entry(address).or_insert(Tag::VACANT)
    }
}

impl DivisionMetadata for SideTableDivisionMetadata {
    const SEPARATED: bool = true;
    const DATA_OFFSET: u64 = 0;
    const BLOCK_OVERHEAD: u64 = 0;

    #[inline]
    fn pre_physical_address(&self, address: u64) -> Option<u64> {
        self.tag(address).pre_phy_addr
    }

    #[inline]
    fn set_pre_physical_address(&mut self, address: u64, pre_physical_address: Option<u64>) {
        self.tag_mut(address).pre_phy_addr = pre_physical_address;
    }

    #[inline]
    fn next_physical_address(&self, address: u64) -> u64 {
        address + self.accessible_mem_size(address)
    }

    #[inline]
    fn address(&self, address: u64) -> Option<u64> {
        self.tag(address).cur_phy_addr
    }

    #[inline]
    fn set_address(&mut self, address: u64) {
        self.tag_mut(address).cur_phy_addr = Some(address);
    }

    #[inline]
    fn accessible_mem_size(&self, address: u64) -> u64 {
        self.tag(address).size_field & !STATUS_BITS
    }

    #[inline]
    fn set_accessible_mem_size(&mut self, address: u64, accessible_mem_size: u64) {
        debug_assert_eq!(accessible_mem_size & STATUS_BITS, 0);
        let tag = self.tag_mut(address);
        tag.size_field = accessible_mem_size | (tag.size_field & STATUS_BITS);
    }

    #[inline]
    fn pre_free_address(&self, address: u64) -> Option<u64> {
        self.tag(address).pre_free_addr
    }

    #[inline]
    fn set_pre_free_address(&mut self, address: u64, pre_free_address: Option<u64>) {
        self.tag_mut(address).pre_free_addr = pre_free_address;
    }

    #[inline]
    fn next_free_address(&self, address: u64) -> Option<u64> {
        self.tag(address).next_free_addr
    }

    #[inline]
    fn set_next_free_address(&mut self, address: u64, next_free_address: Option<u64>) {
        self.tag_mut(address).next_free_addr = next_free_address;
    }

    #[inline]
    fn is_free(&self, address: u64) -> bool {
        self.tag(address).size_field & BUFFER_FREE_BIT != 0
    }

    #[inline]
    fn set_free(&mut self, address: u64) {
        self.tag_mut(address).size_field |= BUFFER_FREE_BIT;
    }

    #[inline]
    fn set_used(&mut self, address: u64) {
        self.tag_mut(address).size_field &= !BUFFER_FREE_BIT;
    }

    #[inline]
    fn is_pre_free(&self, address: u64) -> bool {
        self.tag(address).size_field & PRE_BUFFER_FREE_BIT != 0
    }

    #[inline]
    fn set_pre_free(&mut self, address: u64) {
        self.tag_mut(address).size_field |= PRE_BUFFER_FREE_BIT;
    }

    #[inline]
    fn set_pre_used(&mut self, address: u64) {
        self.tag_mut(address).size_field &= !PRE_BUFFER_FREE_BIT;
    }

    #[inline]
    fn clear(&mut self, address: u64) {
        self.table.remove(&address);
    }
}
