//! Errors reported by the space manager and its backends.
use core::fmt;

/// The error type of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No free block can satisfy the request. This is an expected
    /// steady-state condition under load and leaves the manager intact.
    OutOfSpace,
    /// A requested size is zero, is not a multiple of the alignment, or is
    /// too small to hold a block.
    InvalidSize(u64),
    /// The alignment is not a power of two or is less than
    /// [`MIN_ALIGNMENT`](crate::MIN_ALIGNMENT).
    InvalidAlignment(u64),
    /// The address does not denote the start of a block in the arena.
    InvalidAddress(u64),
    /// The block at the address is already free.
    AlreadyFree(u64),
    /// An extension does not touch either end of the existing arena.
    NotContiguous { beginning_pos: u64, size: u64 },
    /// The underlying space cannot provide the bytes of an extension.
    SpaceUnavailable { beginning_pos: u64, size: u64 },
    /// Boundary tags found while attaching to a formatted arena are
    /// inconsistent.
    Corrupted(u64),
}

/// A specialized `Result` type for space management operations.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Returns `true` for [`Error::OutOfSpace`], the only error a caller can
    /// expect to go away by itself (e.g., after other blocks are released).
    #[inline]
    pub fn is_out_of_space(&self) -> bool {
        matches!(self, Error::OutOfSpace)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::OutOfSpace => f.write_str("out of space"),
            Error::InvalidSize(size) => write!(f, "illegal size: {}", size),
            Error::InvalidAlignment(alignment) => write!(f, "illegal alignment: {}", alignment),
            Error::InvalidAddress(pos) => write!(f, "illegal pos: {:#x}", pos),
            Error::AlreadyFree(pos) => write!(f, "space at {:#x} is already free", pos),
            Error::NotContiguous {
                beginning_pos,
                size,
            } => write!(
                f,
                "extending area {:#x}+{} must be continuous with the existing space",
                beginning_pos, size
            ),
            Error::SpaceUnavailable {
                beginning_pos,
                size,
            } => write!(
                f,
                "underlying space cannot provide {:#x}+{}",
                beginning_pos, size
            ),
            Error::Corrupted(pos) => write!(f, "inconsistent boundary tags at {:#x}", pos),
        }
    }
}

impl std::error::Error for Error {}
