//! Addressable spaces backing the embedded boundary tags.
use core::ops::Range;

use crate::{Error, Result};

/// The width of a word stored in a [`Space`].
pub const WORD_BYTES: u64 = core::mem::size_of::<u64>() as u64;

/// A flat range of bytes addressed by 64-bit positions, into which the
/// embedded backend writes its boundary tags.
///
/// Words are stored little-endian. Positions passed to `read_word` and
/// `write_word` always lie within the arena managed by the caller, which
/// must be covered by the space.
pub trait Space {
    /// Read the word starting at `pos`.
    fn read_word(&self, pos: u64) -> u64;

    /// Write the word starting at `pos`.
    fn write_word(&mut self, pos: u64, word: u64);

    /// Make `beginning_pos..beginning_pos + size` addressable. Called before
    /// the space manager formats an extension.
    ///
    /// The default implementation refuses to grow.
    fn grow(&mut self, beginning_pos: u64, size: u64) -> Result<()> {
        Err(Error::SpaceUnavailable {
            beginning_pos,
            size,
        })
    }
}

/// A heap-allocated byte vector mapped at an arbitrary base position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteArena {
    base: u64,
    bytes: Vec<u8>,
}

impl ByteArena {
    /// Construct a zero-filled arena covering `base..base + len`.
    pub fn new(base: u64, len: usize) -> Self {
        Self {
            base,
            bytes: vec![0; len],
        }
    }

    /// Construct an arena covering no bytes. It can be grown at any position
    /// once.
    pub fn empty() -> Self {
        Self::new(0, 0)
    }

    /// The covered positions.
    #[inline]
    pub fn range(&self) -> Range<u64> {
        self.base..self.base + self.bytes.len() as u64
    }

    /// Copy bytes starting at `pos` into `buf`.
    ///
    /// # Panics
    ///
    /// Panics if the range is not covered by the arena.
    pub fn read(&self, pos: u64, buf: &mut [u8]) {
        let range = self.byte_range(pos, buf.len());
        buf.copy_from_slice(&self.bytes[range]);
    }

    /// Copy `data` into the arena starting at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if the range is not covered by the arena.
    pub fn write(&mut self, pos: u64, data: &[u8]) {
        let range = self.byte_range(pos, data.len());
        self.bytes[range].copy_from_slice(data);
    }

    #[inline]
    fn byte_range(&self, pos: u64, len: usize) -> Range<usize> {
        let start = pos
            .checked_sub(self.base)
            .unwrap_or_else(|| panic!("{:#x} precedes the arena at {:#x}", pos, self.base))
            as usize;
        start..start + len
    }
}

impl Space for ByteArena {
    #[inline]
    fn read_word(&self, pos: u64) -> u64 {
        let mut word = [0; WORD_BYTES as usize];
        self.read(pos, &mut word);
        u64::from_le_bytes(word)
    }

    #[inline]
    fn write_word(&mut self, pos: u64, word: u64) {
        self.write(pos, &word.to_le_bytes());
    }

    fn grow(&mut self, beginning_pos: u64, size: u64) -> Result<()> {
        let unavailable = Error::SpaceUnavailable {
            beginning_pos,
            size,
        };
        let len = usize::try_from(size).map_err(|_| unavailable)?;
        let range = self.range();

        if self.bytes.is_empty() {
            self.base = beginning_pos;
            self.bytes.resize(len, 0);
        } else if beginning_pos == range.end {
            self.bytes.resize(self.bytes.len() + len, 0);
        } else if beginning_pos.checked_add(size) == Some(range.start) {
            self.bytes.splice(0..0, core::iter::repeat(0).take(len));
            self.base = beginning_pos;
        } else {
            return Err(unavailable);
        }
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod mmap;
        pub use self::mmap::MmapSpace;
    }
}
