use quickcheck_macros::quickcheck;
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
};

use super::*;
use crate::{
    division::{SideTableDivisionMetadata, BUFFER_METADATA_OVERHEAD},
    space::Space,
    FIRST_LEVEL_INDEX_COUNT, SECOND_LEVEL_INDEX_COUNT,
};

type Embedded = SpaceManager<EmbeddedDivisionMetadata<ByteArena>>;
type SideTable = SpaceManager<SideTableDivisionMetadata>;

/// Tracks which positions are handed out to the user.
struct ShadowAllocator {
    regions: BTreeMap<u64, SaRegion>,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
enum SaRegion {
    Free,
    Used,
    Invalid,
}

impl ShadowAllocator {
    fn new() -> Self {
        Self {
            regions: Some((0, SaRegion::Invalid)).into_iter().collect(),
        }
    }

    fn convert_range(&mut self, range: Range<u64>, old_region: SaRegion, new_region: SaRegion) {
        if range.start == range.end {
            return;
        }

        assert_ne!(old_region, new_region);
        log::trace!(
            "sa: converting {:?} from {:?} to {:?}",
            range,
            old_region,
            new_region
        );

        let (&addr, &region) = self.regions.range(0..range.end).rev().next().unwrap();
        if addr > range.start {
            panic!("there's a discontinuity in range {:?}", range);
        } else if region != old_region {
            panic!(
                "range {:?} is {:?} (expected {:?})",
                range, region, old_region
            );
        }

        if addr == range.start {
            *self.regions.get_mut(&addr).unwrap() = new_region;
        } else {
            self.regions.insert(range.start, new_region);
        }

        // Each element must represent a discontinuity
        if let Some((_, &region)) = self.regions.range(0..range.start).rev().next() {
            if region == new_region {
                self.regions.remove(&range.start);
            }
        }

        if let Some(&end_region) = self.regions.get(&range.end) {
            if end_region == new_region {
                self.regions.remove(&range.end);
            }
        } else {
            self.regions.insert(range.end, old_region);
        }
    }

    fn insert_space(&mut self, range: Range<u64>) {
        self.convert_range(range, SaRegion::Invalid, SaRegion::Free);
    }

    fn allocate(&mut self, range: Range<u64>) {
        self.convert_range(range, SaRegion::Free, SaRegion::Used);
    }

    fn release(&mut self, range: Range<u64>) {
        self.convert_range(range, SaRegion::Used, SaRegion::Free);
    }
}

/// Walk every block and every free list and check that they agree.
fn check_invariants<D: DivisionMetadata, M: TlsfMetadata>(manager: &SpaceManager<D, M>) {
    let inner = manager.inner.lock();
    let arena = match &inner.arena {
        Some(arena) => arena.clone(),
        None => {
            assert_eq!(inner.last_address, None);
            assert_eq!(inner.metadata.first_level_bitmap(), 0);
            return;
        }
    };
    drop(inner);

    let blocks = manager.blocks();
    let inner = manager.inner.lock();
    let division = &inner.division;

    assert_eq!(blocks[0].address, arena.start);
    assert!(!division.is_pre_free(arena.start));

    let mut total = D::DATA_OFFSET - D::BLOCK_OVERHEAD;
    let mut free_blocks = BTreeSet::new();
    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(division.address(block.address), Some(block.address));
        total += block.accessible_size + D::BLOCK_OVERHEAD;

        if block.free {
            free_blocks.insert(block.address);
        }
        if i > 0 {
            let pre = &blocks[i - 1];
            assert!(!(pre.free && block.free), "adjacent free blocks {:?}", pre);
            assert_eq!(division.is_pre_free(block.address), pre.free);
            if pre.free {
                assert_eq!(
                    division.pre_physical_address(block.address),
                    Some(pre.address)
                );
            }
        }
    }

    let last = blocks.last().unwrap();
    assert_eq!(total, arena.end - arena.start);
    assert_eq!(last.address + D::DATA_OFFSET + last.accessible_size, arena.end);
    assert_eq!(inner.last_address, Some(last.address));

    let metadata = &inner.metadata;
    let mut listed = BTreeSet::new();
    for fl in 0..FIRST_LEVEL_INDEX_COUNT {
        let second_level_bitmap = metadata.second_level_bitmap(fl);
        assert_eq!(
            metadata.first_level_bitmap() & (1 << fl) != 0,
            second_level_bitmap != 0
        );

        for sl in 0..SECOND_LEVEL_INDEX_COUNT {
            let head = metadata.segregated_list_head(fl, sl);
            assert_eq!(second_level_bitmap & (1 << sl) != 0, head.is_some());

            let mut pre = None;
            let mut cursor = head;
            while let Some(address) = cursor {
                assert!(division.is_free(address));
                assert_eq!(division.pre_free_address(address), pre);
                assert_eq!(
                    inner.mapping(division.accessible_mem_size(address)),
                    (fl, sl)
                );
                assert!(listed.insert(address), "{:#x} is listed twice", address);
                pre = Some(address);
                cursor = division.next_free_address(address);
            }
        }
    }
    assert_eq!(listed, free_blocks);
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn format_single_block() {
    init_logger();
    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    check_invariants(&manager);
    assert_eq!(manager.size(), 1024);
    assert_eq!(manager.range(), Some(0..1024));
    assert_eq!(
        manager.blocks(),
        [BlockInfo {
            address: 0,
            accessible_size: 1000,
            free: true
        }]
    );
}

#[test]
fn allocate_splits_off_remainder() {
    init_logger();
    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    let pos = manager.allocate(100).unwrap();
    assert_eq!(pos, 0);
    assert_eq!(manager.accessible_size(pos), Ok(104));
    assert_eq!(manager.data_range(pos), Ok(24..128));
    assert_eq!(
        manager.blocks()[1],
        BlockInfo {
            address: 120,
            accessible_size: 880,
            free: true
        }
    );
    check_invariants(&manager);

    assert_eq!(manager.allocate(2000), Err(Error::OutOfSpace));
}

#[test]
fn released_block_is_reused() {
    init_logger();
    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    let positions: Vec<_> = (0..3).map(|_| manager.allocate(64).unwrap()).collect();
    assert_eq!(positions, [0, 80, 160]);

    manager.release(80).unwrap();
    check_invariants(&manager);
    assert_eq!(manager.allocate(64), Ok(80));
    check_invariants(&manager);
}

#[test]
fn release_rejects_bad_addresses() {
    init_logger();
    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    let a = manager.allocate(64).unwrap();
    let _b = manager.allocate(64).unwrap();

    assert_eq!(manager.release(40), Err(Error::InvalidAddress(40)));
    assert_eq!(manager.release(4096), Err(Error::InvalidAddress(4096)));
    assert_eq!(manager.release(1016), Err(Error::InvalidAddress(1016)));

    manager.release(a).unwrap();
    assert_eq!(manager.release(a), Err(Error::AlreadyFree(a)));
    check_invariants(&manager);
}

#[test]
fn merged_block_address_is_forgotten() {
    init_logger();
    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    let a = manager.allocate(64).unwrap();
    let b = manager.allocate(64).unwrap();
    manager.release(a).unwrap();
    manager.release(b).unwrap();
    assert_eq!(manager.blocks().len(), 1);
    assert_eq!(manager.release(b), Err(Error::InvalidAddress(b)));

    let manager = SideTable::new(SideTableDivisionMetadata::new(), 8, 0, 1024).unwrap();
    let a = manager.allocate(64).unwrap();
    let b = manager.allocate(64).unwrap();
    manager.release(a).unwrap();
    manager.release(b).unwrap();
    assert_eq!(manager.release(b), Err(Error::InvalidAddress(b)));
    assert_eq!(manager.lock_division().len(), 1);
}

#[test]
fn bad_requests() {
    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    assert_eq!(manager.allocate(0), Err(Error::InvalidSize(0)));
    assert_eq!(manager.try_allocate(0), Err(Error::InvalidSize(0)));
    assert_eq!(manager.allocate(u64::MAX), Err(Error::OutOfSpace));

    for &alignment in &[0, 2, 12] {
        assert_eq!(
            SideTable::new(SideTableDivisionMetadata::new(), alignment, 0, 1024).unwrap_err(),
            Error::InvalidAlignment(alignment)
        );
    }
    assert_eq!(
        SideTable::new(SideTableDivisionMetadata::new(), 8, 0, 1020).unwrap_err(),
        Error::InvalidSize(1020)
    );
    // Too small for a single embedded block
    assert_eq!(
        Embedded::with_byte_arena(8, 0, 40).unwrap_err(),
        Error::InvalidSize(40)
    );
}

#[test]
fn small_requests_get_minimum_size() {
    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    let pos = manager.allocate(1).unwrap();
    assert_eq!(manager.accessible_size(pos), Ok(MIN_ACCESSIBLE_MEM_SIZE));

    let manager = SideTable::new(SideTableDivisionMetadata::new(), 4, 0, 1024).unwrap();
    let pos = manager.allocate(1).unwrap();
    assert_eq!(manager.accessible_size(pos), Ok(MIN_ACCESSIBLE_MEM_SIZE));
    assert_eq!(manager.allocate(1), Ok(pos + MIN_ACCESSIBLE_MEM_SIZE));
}

#[test]
fn minimum_size_is_rounded_to_alignment() {
    init_logger();
    let manager = SideTable::new(SideTableDivisionMetadata::new(), 16, 0, 48).unwrap();
    assert_eq!(manager.allocate(32), Ok(0));
    assert_eq!(manager.blocks().len(), 2);
    assert_eq!(manager.free_size(), 16);

    // The 16-byte remainder is below the minimum of 32 bytes
    assert_eq!(manager.allocate(1), Err(Error::OutOfSpace));
    assert_eq!(manager.try_allocate(1), Ok(32));
    assert_eq!(manager.accessible_size(32), Ok(16));
    check_invariants(&manager);

    manager.release(0).unwrap();
    assert_eq!(manager.allocate(1), Ok(0));
    assert_eq!(manager.accessible_size(0), Ok(32));
    check_invariants(&manager);
}

#[test]
fn no_split_below_threshold() {
    // 1000 accessible bytes; the remainder would be too small to be useful
    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    let pos = manager.allocate(968).unwrap();
    assert_eq!(manager.accessible_size(pos), Ok(1000));
    assert_eq!(manager.blocks().len(), 1);
    assert_eq!(manager.allocate(8), Err(Error::OutOfSpace));
    check_invariants(&manager);

    // The remainder gets at least one alignment unit in the side table
    let manager = SideTable::new(SideTableDivisionMetadata::new(), 8, 0, 1024).unwrap();
    assert_eq!(manager.allocate(1016), Ok(0));
    // Below the minimum allocation size, so only `try_allocate` takes it
    assert_eq!(manager.allocate(8), Err(Error::OutOfSpace));
    assert_eq!(manager.try_allocate(8), Ok(1016));
    assert_eq!(manager.accessible_size(1016), Ok(8));
    assert_eq!(manager.free_size(), 0);
    check_invariants(&manager);
}

#[test]
fn side_table_blocks_are_contiguous() {
    init_logger();
    let manager = SideTable::new(SideTableDivisionMetadata::new(), 8, 4096, 1024).unwrap();
    assert_eq!(manager.allocate(100), Ok(4096));
    assert_eq!(manager.data_range(4096), Ok(4096..4200));
    assert_eq!(manager.allocate(100), Ok(4200));
    assert_eq!(manager.free_size(), 1024 - 208);
    check_invariants(&manager);
}

#[test]
fn try_allocate_falls_back_to_biggest() {
    init_logger();
    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    assert_eq!(manager.allocate(2000), Err(Error::OutOfSpace));
    let pos = manager.try_allocate(2000).unwrap();
    assert_eq!(pos, 0);
    assert_eq!(manager.accessible_size(pos), Ok(1000));
    assert_eq!(manager.try_allocate(8), Err(Error::OutOfSpace));

    let manager = SideTable::new(SideTableDivisionMetadata::new(), 8, 0, 4096).unwrap();
    let a = manager.allocate(64).unwrap();
    let _ = manager.allocate(8).unwrap();
    let b = manager.allocate(1024).unwrap();
    let _ = manager.allocate(8).unwrap();
    manager.release(a).unwrap();
    manager.release(b).unwrap();
    check_invariants(&manager);

    // The free tail (2960 bytes) is the biggest
    let c = manager.try_allocate(8192).unwrap();
    assert_eq!(c, 1136);
    assert_eq!(manager.accessible_size(c), Ok(2960));
    let d = manager.try_allocate(8192).unwrap();
    assert_eq!(d, b);
    check_invariants(&manager);
}

#[test]
fn extend_appends_and_merges() {
    init_logger();
    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    manager.extend(1024, 512).unwrap();
    assert_eq!(manager.size(), 1536);
    assert_eq!(
        manager.blocks(),
        [BlockInfo {
            address: 0,
            accessible_size: 1512,
            free: true
        }]
    );
    check_invariants(&manager);

    // A good fit rounds 1512 up to the next class, so take the block as is
    assert_eq!(manager.allocate(1512), Err(Error::OutOfSpace));
    let pos = manager.try_allocate(1512).unwrap();
    assert_eq!(manager.accessible_size(pos), Ok(1512));
    manager.extend(1536, 512).unwrap();
    assert_eq!(
        manager.blocks()[1],
        BlockInfo {
            address: 1528,
            accessible_size: 496,
            free: true
        }
    );
    check_invariants(&manager);

    manager.release(pos).unwrap();
    assert_eq!(manager.blocks().len(), 1);
    assert_eq!(manager.free_size(), 2048 - 24);
    check_invariants(&manager);
}

#[test]
fn extend_prepends_and_merges() {
    init_logger();
    let manager = Embedded::with_byte_arena(8, 4096, 1024).unwrap();
    manager.extend(3072, 1024).unwrap();
    assert_eq!(manager.range(), Some(3072..5120));
    assert_eq!(
        manager.blocks(),
        [BlockInfo {
            address: 3072,
            accessible_size: 2024,
            free: true
        }]
    );
    check_invariants(&manager);

    let manager = SideTable::new(SideTableDivisionMetadata::new(), 8, 4096, 1024).unwrap();
    let pos = manager.allocate(1024).unwrap();
    manager.extend(3072, 1024).unwrap();
    assert_eq!(manager.allocate(1024), Ok(3072));
    manager.release(pos).unwrap();
    check_invariants(&manager);
}

#[test]
fn extend_rejects_bad_ranges() {
    let manager = Embedded::with_byte_arena(8, 4096, 1024).unwrap();
    assert_eq!(
        manager.extend(8192, 1024),
        Err(Error::NotContiguous {
            beginning_pos: 8192,
            size: 1024
        })
    );
    assert_eq!(manager.extend(5120, 0), Err(Error::InvalidSize(0)));
    assert_eq!(manager.extend(5120, 100), Err(Error::InvalidSize(100)));
    // Room for the overhead but not for a minimum block
    assert_eq!(manager.extend(5120, 32), Err(Error::InvalidSize(32)));
    assert_eq!(manager.size(), 1024);
    check_invariants(&manager);
}

#[test]
fn extend_fails_if_space_cannot_grow() {
    struct Fixed(ByteArena);

    impl Space for Fixed {
        fn read_word(&self, pos: u64) -> u64 {
            self.0.read_word(pos)
        }

        fn write_word(&mut self, pos: u64, word: u64) {
            self.0.write_word(pos, word)
        }
    }

    let manager = SpaceManager::new(
        EmbeddedDivisionMetadata::new(Fixed(ByteArena::new(0, 1024))),
        8,
        0,
        1024,
    )
    .unwrap();
    assert_eq!(
        manager.extend(1024, 1024),
        Err(Error::SpaceUnavailable {
            beginning_pos: 1024,
            size: 1024
        })
    );
    assert_eq!(manager.size(), 1024);
    check_invariants(&manager);
}

#[test]
fn empty_manager_adopts_first_extension() {
    init_logger();
    let manager =
        SpaceManager::empty(EmbeddedDivisionMetadata::new(ByteArena::empty()), 8).unwrap();
    check_invariants(&manager);
    assert_eq!(manager.size(), 0);
    assert_eq!(manager.range(), None);
    assert!(manager.blocks().is_empty());
    assert_eq!(manager.allocate(8), Err(Error::OutOfSpace));
    assert_eq!(manager.release(0), Err(Error::InvalidAddress(0)));

    manager.extend(4096, 1024).unwrap();
    assert_eq!(manager.size(), 1024);
    assert_eq!(manager.allocate(8), Ok(4096));
    check_invariants(&manager);
}

#[test]
fn attach_restores_formatted_space() {
    init_logger();
    let manager = Embedded::with_byte_arena(16, 0, 8192).unwrap();
    let positions: Vec<_> = (1..10).map(|i| manager.allocate(i * 100).unwrap()).collect();
    for &pos in positions.iter().step_by(2) {
        manager.release(pos).unwrap();
    }
    let blocks = manager.blocks();
    let free_size = manager.free_size();
    check_invariants(&manager);

    let manager = SpaceManager::attach(manager.into_division(), 16, 0, 8192).unwrap();
    check_invariants(&manager);
    assert_eq!(manager.blocks(), blocks);
    assert_eq!(manager.free_size(), free_size);

    for &pos in positions.iter().skip(1).step_by(2) {
        manager.release(pos).unwrap();
    }
    assert_eq!(manager.blocks().len(), 1);
    check_invariants(&manager);
}

#[test]
fn attach_rejects_garbage() {
    // All-zero bytes describe a used block of size zero
    let division = EmbeddedDivisionMetadata::new(ByteArena::new(0, 1024));
    assert_eq!(
        SpaceManager::attach(division, 8, 0, 1024).unwrap_err(),
        Error::Corrupted(0)
    );

    let manager = Embedded::with_byte_arena(8, 0, 1024).unwrap();
    manager.allocate(64).unwrap();
    // Claim the space is longer than what was formatted
    let mut division = manager.into_division();
    division.space_mut().grow(1024, 1024).unwrap();
    assert_eq!(
        SpaceManager::attach(division, 8, 0, 2048).unwrap_err(),
        Error::Corrupted(1024 - 8)
    );
}

#[test]
fn user_bytes_survive() {
    let manager = Embedded::with_byte_arena(8, 0, 4096).unwrap();
    let a = manager.allocate(100).unwrap();
    let b = manager.allocate(100).unwrap();
    let range = manager.data_range(a).unwrap();
    manager
        .lock_division()
        .space_mut()
        .write(range.start, &[0xa5; 104]);

    manager.release(b).unwrap();
    let c = manager.allocate(200).unwrap();
    manager.release(c).unwrap();

    let mut bytes = [0; 104];
    manager.lock_division().space().read(range.start, &mut bytes);
    assert_eq!(bytes, [0xa5; 104]);
    check_invariants(&manager);
}

#[cfg(debug_assertions)]
#[test]
fn forged_tag_in_user_bytes_is_rejected() {
    let manager = Embedded::with_byte_arena(8, 0, 4096).unwrap();
    let a = manager.allocate(100).unwrap();
    let data = manager.data_range(a).unwrap();

    // User bytes that look like the tag of a block at `forged`
    let forged = data.start + 8;
    manager
        .lock_division()
        .space_mut()
        .write(forged + 8, &forged.to_le_bytes());
    assert_eq!(manager.release(forged), Err(Error::InvalidAddress(forged)));

    manager.release(a).unwrap();
    assert_eq!(manager.blocks().len(), 1);
    check_invariants(&manager);
}

#[test]
fn huge_blocks_are_searchable() {
    // Free blocks this large land in the topmost reachable first-level class
    let manager = SideTable::new(SideTableDivisionMetadata::new(), 4, 0, 1 << 62).unwrap();
    assert_eq!(manager.inner.lock().mapping(1 << 62).0, 55);
    assert_eq!(manager.allocate(1 << 61), Ok(0));
    assert_eq!(manager.allocate(1 << 61), Ok(1 << 61));
    assert_eq!(manager.allocate(4), Err(Error::OutOfSpace));
    check_invariants(&manager);
}

/// Fills and verifies user bytes where the backend has them.
trait Payload {
    fn fill(&mut self, range: Range<u64>, byte: u8);
    fn verify(&self, range: Range<u64>, byte: u8);
}

impl Payload for EmbeddedDivisionMetadata<ByteArena> {
    fn fill(&mut self, range: Range<u64>, byte: u8) {
        let len = (range.end - range.start) as usize;
        self.space_mut().write(range.start, &vec![byte; len]);
    }

    fn verify(&self, range: Range<u64>, byte: u8) {
        let mut bytes = vec![0; (range.end - range.start) as usize];
        self.space().read(range.start, &mut bytes);
        assert!(
            bytes.iter().all(|&b| b == byte),
            "user bytes at {:?} were clobbered",
            range
        );
    }
}

impl Payload for SideTableDivisionMetadata {
    fn fill(&mut self, _: Range<u64>, _: u8) {}
    fn verify(&self, _: Range<u64>, _: u8) {}
}

const ARENA_START: u64 = 1 << 20;
const ARENA_SIZE_LIMIT: u64 = 1 << 18;

fn random_inner<D: DivisionMetadata + Payload>(manager: SpaceManager<D>, bytecode: Vec<u8>) {
    let alignment = manager.alignment();
    let mut sa = ShadowAllocator::new();
    sa.insert_space(manager.range().unwrap());
    log::trace!("manager = {:?}, range = {:?}", manager, manager.range());

    #[derive(Debug)]
    struct Alloc {
        pos: u64,
        data: Range<u64>,
        byte: u8,
    }
    let mut allocs: Vec<Alloc> = Vec::new();

    let mut run = || -> Option<()> {
        let mut it = bytecode.iter().cloned();
        loop {
            let op = it.next()?;
            match op % 8 {
                0..=3 => {
                    let len = u32::from_le_bytes([it.next()?, it.next()?, it.next()?, 0]);
                    let len = (u64::from(len) * manager.size()) >> 24;
                    let fallible = op % 8 == 3;
                    log::trace!("alloc {} (fallible = {})", len, fallible);

                    let result = if fallible {
                        manager.try_allocate(len)
                    } else {
                        manager.allocate(len)
                    };
                    log::trace!(" → {:?}", result);

                    match result {
                        Ok(pos) => {
                            let data = manager.data_range(pos).unwrap();
                            assert_eq!(data.start, pos + D::DATA_OFFSET);
                            if !fallible {
                                assert!(data.end - data.start >= len);
                            }
                            sa.allocate(data.clone());

                            let byte = it.next().unwrap_or(0xcc);
                            manager.lock_division().fill(data.clone(), byte);
                            allocs.push(Alloc { pos, data, byte });
                        }
                        Err(Error::InvalidSize(0)) => assert_eq!(len, 0),
                        Err(Error::OutOfSpace) => {
                            if fallible {
                                assert_eq!(manager.free_size(), 0);
                            }
                        }
                        Err(e) => panic!("unexpected error {:?}", e),
                    }
                }
                4..=5 => {
                    let alloc_i = it.next()?;
                    if !allocs.is_empty() {
                        let alloc = allocs.swap_remove(alloc_i as usize % allocs.len());
                        log::trace!("release {:?}", alloc);

                        manager.lock_division().verify(alloc.data.clone(), alloc.byte);
                        manager.release(alloc.pos).unwrap();
                        sa.release(alloc.data);

                        // Either still a free block or absorbed by its predecessor
                        match manager.release(alloc.pos) {
                            Err(Error::AlreadyFree(_)) | Err(Error::InvalidAddress(_)) => {}
                            other => panic!("double release returned {:?}", other),
                        }
                    }
                }
                6..=7 => {
                    let units = u64::from(it.next()?) + 1;
                    let size = units * 64;
                    let range = manager.range().unwrap();
                    if range.end - range.start + size > ARENA_SIZE_LIMIT {
                        continue;
                    }
                    let extension = if op % 8 == 6 {
                        range.end..range.end + size
                    } else {
                        range.start - size..range.start
                    };
                    log::trace!("extend {:?}", extension);

                    manager.extend(extension.start, size).unwrap();
                    sa.insert_space(extension);
                }
                _ => unreachable!(),
            }

            check_invariants(&manager);
        }
    };
    run();

    for alloc in allocs.drain(..) {
        manager.lock_division().verify(alloc.data.clone(), alloc.byte);
        manager.release(alloc.pos).unwrap();
        sa.release(alloc.data);
    }
    check_invariants(&manager);

    let blocks = manager.blocks();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].free);
    assert_eq!(
        blocks[0].accessible_size,
        manager.size() - D::DATA_OFFSET,
        "alignment {}",
        alignment
    );
}

fn random_alignment(alignment_log2: u8) -> u64 {
    MIN_ALIGNMENT << (alignment_log2 % 5)
}

fn random_arena_size(arena_size: u16) -> u64 {
    (u64::from(arena_size) % 64 + 1) * 256
}

#[quickcheck]
fn random_embedded(alignment_log2: u8, arena_size: u16, bytecode: Vec<u8>) {
    init_logger();
    let manager = Embedded::with_byte_arena(
        random_alignment(alignment_log2),
        ARENA_START,
        random_arena_size(arena_size),
    )
    .unwrap();
    random_inner(manager, bytecode);
}

#[quickcheck]
fn random_side_table(alignment_log2: u8, arena_size: u16, bytecode: Vec<u8>) {
    init_logger();
    let manager = SideTable::new(
        SideTableDivisionMetadata::new(),
        random_alignment(alignment_log2),
        ARENA_START,
        random_arena_size(arena_size),
    )
    .unwrap();
    random_inner(manager, bytecode);
}

#[test]
fn embedded_overhead_per_block() {
    let manager = Embedded::with_byte_arena(8, 0, 4096).unwrap();
    let a = manager.allocate(64).unwrap();
    let b = manager.allocate(64).unwrap();
    assert_eq!(b - a, 64 + BUFFER_METADATA_OVERHEAD);
}
