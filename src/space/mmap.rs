use core::ptr::NonNull;

use super::{Space, WORD_BYTES};
use crate::{Error, Result};

/// An anonymous private memory mapping addressed from a base position.
///
/// On Linux the mapping can grow at its end with `mremap`, which never moves
/// the mapping. Growth is refused elsewhere and at the front.
#[derive(Debug)]
pub struct MmapSpace {
    ptr: NonNull<u8>,
    len: usize,
    base: u64,
}

// Safety: The mapping is exclusively owned by `MmapSpace` and only accessed
//         through `&self`/`&mut self`.
unsafe impl Send for MmapSpace {}
unsafe impl Sync for MmapSpace {}

impl MmapSpace {
    /// Map `len` zero-filled bytes addressed as `base..base + len`.
    ///
    /// Returns `None` if the mapping fails.
    pub fn new(base: u64, len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }

        // Safety: An anonymous mapping does not alias any existing memory.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_WRITE | libc::PROT_READ,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return None;
        }

        Some(Self {
            ptr: NonNull::new(ptr as *mut u8)?,
            len,
            base,
        })
    }

    /// The number of mapped bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The mapped bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // Safety: `ptr..ptr + len` is a live mapping owned by `self`
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The mapped bytes.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: `ptr..ptr + len` is a live mapping owned by `self`
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    fn offset(&self, pos: u64) -> usize {
        let offset = pos.wrapping_sub(self.base) as usize;
        assert!(
            pos >= self.base && offset + WORD_BYTES as usize <= self.len,
            "{:#x} lies outside the mapping",
            pos
        );
        offset
    }
}

impl Space for MmapSpace {
    #[inline]
    fn read_word(&self, pos: u64) -> u64 {
        let offset = self.offset(pos);
        let mut word = [0; WORD_BYTES as usize];
        word.copy_from_slice(&self.as_slice()[offset..offset + WORD_BYTES as usize]);
        u64::from_le_bytes(word)
    }

    #[inline]
    fn write_word(&mut self, pos: u64, word: u64) {
        let offset = self.offset(pos);
        self.as_mut_slice()[offset..offset + WORD_BYTES as usize]
            .copy_from_slice(&word.to_le_bytes());
    }

    #[cfg(target_os = "linux")]
    fn grow(&mut self, beginning_pos: u64, size: u64) -> Result<()> {
        let unavailable = Error::SpaceUnavailable {
            beginning_pos,
            size,
        };

        if beginning_pos != self.base + self.len as u64 {
            return Err(unavailable);
        }

        let new_len = usize::try_from(size)
            .ok()
            .and_then(|size| self.len.checked_add(size))
            .ok_or(unavailable)?;

        // Safety: `ptr..ptr + len` is a live mapping owned by `self`. Flags
        //         are zero, so the mapping is never moved.
        let ptr_new = unsafe { libc::mremap(self.ptr.as_ptr() as *mut _, self.len, new_len, 0) };
        if ptr_new == libc::MAP_FAILED {
            return Err(unavailable);
        }

        debug_assert_eq!(ptr_new as *mut u8, self.ptr.as_ptr());
        self.len = new_len;
        Ok(())
    }
}

impl Drop for MmapSpace {
    fn drop(&mut self) {
        // Safety: `ptr..ptr + len` is a live mapping owned by `self`
        unsafe { libc::munmap(self.ptr.as_ptr() as *mut _, self.len) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_words() {
        let mut space = MmapSpace::new(0x10000, 4096).unwrap();
        assert_eq!(space.read_word(0x10000), 0);
        space.write_word(0x10ff8, u64::MAX);
        assert_eq!(space.read_word(0x10ff8), u64::MAX);
        assert_eq!(space.as_slice()[4088..], [0xff; 8]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn refuses_to_grow_at_front() {
        let mut space = MmapSpace::new(0x10000, 4096).unwrap();
        assert!(space.grow(0, 0x10000).is_err());
        assert_eq!(space.len(), 4096);
    }
}
