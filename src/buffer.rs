//! A pool of byte buffers carved out of one zero-filled vector.
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::{division::SideTableDivisionMetadata, tlsf::SpaceManager, Error, Result};

/// A buffer handed out by [`ByteBufferManager`].
///
/// Give it back with [`ByteBufferManager::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct BufferSlice {
    address: u64,
    len: u64,
}

impl BufferSlice {
    /// The offset of the buffer in the pool.
    #[inline]
    pub fn address(&self) -> u64 {
        self.address
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn byte_range(&self, offset: u64, len: usize) -> core::ops::Range<usize> {
        let end = offset.checked_add(len as u64);
        assert!(
            end.map_or(false, |end| end <= self.len),
            "{}+{} is out of the buffer of length {}",
            offset,
            len,
            self.len
        );
        let start = (self.address + offset) as usize;
        start..start + len
    }
}

/// Hands out byte buffers from a fixed pool. Boundary tags are kept off the
/// pool, so every byte of it is usable.
///
/// The `blocking_*` methods wait for [`Self::release`] instead of failing
/// with [`Error::OutOfSpace`].
#[derive(Debug)]
pub struct ByteBufferManager {
    manager: SpaceManager<SideTableDivisionMetadata>,
    /// Held for a whole `allocate`, `try_allocate` or `release`, so that no
    /// one sees the pieces of a gather that is rolled back.
    pool: Mutex<()>,
    bytes: Mutex<Vec<u8>>,
    /// Counts releases so that a waiter can tell whether one happened since
    /// its last attempt.
    releases: Mutex<u64>,
    released: Condvar,
}

impl ByteBufferManager {
    /// Construct a pool of `size` zero-filled bytes. `size` must be a
    /// multiple of `alignment`.
    pub fn new(alignment: u64, size: usize) -> Result<Self> {
        let manager =
            SpaceManager::new(SideTableDivisionMetadata::new(), alignment, 0, size as u64)?;
        Ok(Self {
            manager,
            pool: Mutex::new(()),
            bytes: Mutex::new(vec![0; size]),
            releases: Mutex::new(0),
            released: Condvar::new(),
        })
    }

    /// The size of the pool.
    #[inline]
    pub fn size(&self) -> u64 {
        self.manager.size()
    }

    /// The bytes not handed out.
    pub fn free_size(&self) -> u64 {
        self.manager.free_size()
    }

    /// Allocate one buffer of at least `size` bytes.
    pub fn allocate(&self, size: u64) -> Result<BufferSlice> {
        let _pool = self.pool.lock();
        let address = self.manager.allocate(size)?;
        self.slice(address)
    }

    /// Allocate buffers totalling at least `size` bytes. The first one is as
    /// large as possible, so a single buffer is returned whenever a free
    /// block is large enough.
    ///
    /// On failure, every buffer gathered so far is released again.
    pub fn try_allocate(&self, size: u64) -> Result<Vec<BufferSlice>> {
        if size == 0 {
            return Err(Error::InvalidSize(size));
        }

        let _pool = self.pool.lock();
        let mut slices = Vec::new();
        let mut remaining_size = size;
        while remaining_size > 0 {
            match self
                .manager
                .try_allocate(remaining_size)
                .and_then(|address| self.slice(address))
            {
                Ok(slice) => {
                    remaining_size = remaining_size.saturating_sub(slice.len);
                    slices.push(slice);
                }
                Err(e) => {
                    trace!(
                        "try_allocate({}): giving back {} buffers",
                        size,
                        slices.len()
                    );
                    let gathered = !slices.is_empty();
                    for slice in slices {
                        self.manager.release(slice.address)?;
                    }
                    if gathered {
                        self.notify_released();
                    }
                    return Err(e);
                }
            }
        }
        Ok(slices)
    }

    /// [`Self::allocate`], waiting for releases while the pool is out of
    /// space.
    ///
    /// Fails with [`Error::OutOfSpace`] only if `size` exceeds the pool.
    pub fn blocking_allocate(&self, size: u64) -> Result<BufferSlice> {
        self.blocking(size, |this| this.allocate(size))
    }

    /// [`Self::try_allocate`], waiting for releases while the pool is out of
    /// space.
    ///
    /// Fails with [`Error::OutOfSpace`] only if `size` exceeds the pool.
    pub fn blocking_try_allocate(&self, size: u64) -> Result<Vec<BufferSlice>> {
        self.blocking(size, |this| this.try_allocate(size))
    }

    /// Give a buffer back to the pool and wake up the waiters.
    pub fn release(&self, slice: BufferSlice) -> Result<()> {
        {
            let _pool = self.pool.lock();
            self.manager.release(slice.address)?;
        }
        self.notify_released();
        Ok(())
    }

    /// Copy bytes of `slice` starting at `offset` into `buf`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer.
    pub fn read(&self, slice: &BufferSlice, offset: u64, buf: &mut [u8]) {
        let range = slice.byte_range(offset, buf.len());
        buf.copy_from_slice(&self.bytes.lock()[range]);
    }

    /// Copy `data` into `slice` starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer.
    pub fn write(&self, slice: &BufferSlice, offset: u64, data: &[u8]) {
        let range = slice.byte_range(offset, data.len());
        self.bytes.lock()[range].copy_from_slice(data);
    }

    fn slice(&self, address: u64) -> Result<BufferSlice> {
        Ok(BufferSlice {
            address,
            len: self.manager.accessible_size(address)?,
        })
    }

    fn blocking<T>(&self, size: u64, mut f: impl FnMut(&Self) -> Result<T>) -> Result<T> {
        if size > self.size() {
            return Err(Error::OutOfSpace);
        }

        loop {
            let seen = *self.releases.lock();
            match f(self) {
                Err(Error::OutOfSpace) => {
                    debug!("Waiting for a release to allocate {} bytes", size);
                    let mut releases = self.releases.lock();
                    while *releases == seen {
                        self.released.wait(&mut releases);
                    }
                }
                result => return result,
            }
        }
    }

    fn notify_released(&self) {
        {
            let mut releases = self.releases.lock();
            *releases = releases.wrapping_add(1);
        }
        self.released.notify_all();
    }
}
