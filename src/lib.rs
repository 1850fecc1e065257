//! This crate implements a free-space manager based on the TLSF (Two-Level
//! Segregated Fit) algorithm¹ for flat, byte-addressed ranges.
//!
//!  - **Allocation, release and extension are guaranteed to complete in
//!    constant time.** Every search is a couple of bit scans over the
//!    two-level bitmap index.
//!
//!  - **The space is described by 64-bit positions, not pointers.** The
//!    managed range can be process memory, a file, a device or any other
//!    linear address space. Nothing is dereferenced unless the boundary tags
//!    are stored in the range itself.
//!
//!  - **The placement of boundary tags is pluggable.** They can be embedded
//!    in the managed range ([`EmbeddedDivisionMetadata`]), which makes a
//!    formatted range self-describing and reattachable, or kept in a side
//!    table ([`SideTableDivisionMetadata`]), which leaves every managed byte
//!    to the user.
//!
//!  - **The range can grow.** An extension adjoining either end of the range
//!    is formatted as a free block and coalesced with its neighbor.
//!
//! <sub>¹ M. Masmano, I. Ripoll, A. Crespo and J. Real, "TLSF: a new dynamic
//! memory allocator for real-time systems," *Proceedings. 16th Euromicro
//! Conference on Real-Time Systems*, 2004. ECRTS 2004., Catania, Italy, 2004,
//! pp. 79-88, doi: 10.1109/EMRTS.2004.1311009.</sub>
//!
//! # Examples
//!
//! ```rust
//! use tlsf_space::{EmbeddedSpaceManager, ByteArena, Error};
//!
//! // Manage 64 KiB at position 0x10000, with boundary tags stored in a
//! // zero-filled byte vector covering the same positions.
//! let manager = EmbeddedSpaceManager::<ByteArena>::with_byte_arena(8, 0x10000, 65536).unwrap();
//!
//! let pos1 = manager.allocate(100).unwrap();
//! let pos2 = manager.allocate(1000).unwrap();
//!
//! // The user bytes of a block start after its header
//! let data = manager.data_range(pos1).unwrap();
//! assert!(data.end - data.start >= 100);
//! manager.lock_division().space_mut().write(data.start, b"hello");
//!
//! manager.release(pos1).unwrap();
//! manager.release(pos2).unwrap();
//! assert_eq!(manager.release(pos2), Err(Error::AlreadyFree(pos2)));
//!
//! // Grow the managed range at its end
//! manager.extend(0x20000, 4096).unwrap();
//! assert_eq!(manager.size(), 65536 + 4096);
//! ```
//!
//! Boundary tags kept off the range:
//!
//! ```rust
//! use tlsf_space::{SideTableSpaceManager, SideTableDivisionMetadata};
//!
//! let manager = SideTableSpaceManager::new(SideTableDivisionMetadata::new(), 16, 0, 1 << 40).unwrap();
//! assert_eq!(manager.allocate(4096), Ok(0));
//! assert_eq!(manager.allocate(4096), Ok(4096));
//! ```
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

mod buffer;
pub mod division;
mod error;
mod metadata;
pub mod space;
mod tlsf;
mod utils;

pub use self::{
    buffer::{BufferSlice, ByteBufferManager},
    division::{DivisionMetadata, EmbeddedDivisionMetadata, SideTableDivisionMetadata},
    error::{Error, Result},
    metadata::{SimpleTlsfMetadata, TlsfMetadata},
    space::{ByteArena, Space},
    tlsf::{BlockInfo, SpaceManager},
};

#[cfg(unix)]
#[cfg_attr(feature = "doc_cfg", doc(cfg(unix)))]
pub use self::space::MmapSpace;

/// The number of first-level size classes.
pub const FIRST_LEVEL_INDEX_COUNT: usize = 64;

/// The number of second-level size classes in each first-level class.
pub const SECOND_LEVEL_INDEX_COUNT: usize = 1 << SECOND_LEVEL_INDEX_COUNT_LOG2;

pub const SECOND_LEVEL_INDEX_COUNT_LOG2: u32 = 6;

/// The smallest alignment a [`SpaceManager`] accepts. Sizes are multiples of
/// the alignment, which leaves the two low bits of each size field for
/// status flags.
pub const MIN_ALIGNMENT: u64 = 4;

/// The encoding of "no block" in words stored on the arena.
pub const NULL_SPACE_ADDRESS: u64 = u64::MAX;

/// A [`SpaceManager`] whose boundary tags are embedded in a [`Space`].
pub type EmbeddedSpaceManager<S> = SpaceManager<EmbeddedDivisionMetadata<S>>;

/// A [`SpaceManager`] whose boundary tags are kept in a side table.
pub type SideTableSpaceManager = SpaceManager<SideTableDivisionMetadata>;
