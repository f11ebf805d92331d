//! Shared region: a [`RegionState`] header followed by the ring bytes, in one
//! named segment.
//!
//! `write` and `read` never block. They copy as much as the ring allows right
//! now, possibly in two chunks when the transfer wraps past the physical end,
//! and return how many bytes moved. Blocking is layered on top by the caller
//! using [`SharedRegion::wait_reader`] / [`SharedRegion::wait_writer`].

use crate::cancel::CancelToken;
use crate::error::{RegionError, RegionResult, check_range};
use crate::ring::{Cursors, advance, buffer_size_for};
use crate::shm_layout::{HEADER_SIZE, RegionState, StreamState, bytes_for_region};
use crate::signal::{self, WaitOutcome};
use basalt_mmap::{SharedSegment, ShmFacility};
use std::ptr;
use std::time::Duration;

/// One process's handle on a stream segment.
///
/// The host creates and initialises the segment; the client opens it by name
/// and learns the ring size from the header. Either side may write or read,
/// but a given segment must have exactly one writer and one reader.
pub struct SharedRegion {
    /// Owns the mapping lifetime; `base` points into it.
    segment: SharedSegment,
    /// Start of the mapped segment (header location).
    base: *mut u8,
    /// Local copy of the ring length, validated once at open.
    buffer_size: u64,
}

// SAFETY: the region owns its mapping and `base` is only dereferenced through
// `&self`/`&mut self`. Moving the handle to another thread is fine; sharing it
// is not, so there is deliberately no `Sync`.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Create a new segment under the platform shared-memory facility.
    pub fn create_host(name: &str, capacity: u64) -> RegionResult<Self> {
        Self::create_host_in(&ShmFacility::detect()?, name, capacity)
    }

    /// Create a new segment with room for `capacity` bytes in flight.
    ///
    /// The segment is `HEADER_SIZE + capacity + 1` bytes; the header starts
    /// with both cursors at 0, no flags and both signals cleared.
    pub fn create_host_in(facility: &ShmFacility, name: &str, capacity: u64) -> RegionResult<Self> {
        if capacity == 0 {
            return Err(RegionError::InvalidCapacity(capacity));
        }
        let buffer_size = buffer_size_for(capacity).ok_or(RegionError::InvalidCapacity(capacity))?;
        let total = bytes_for_region(buffer_size)
            .filter(|&total| usize::try_from(total).is_ok())
            .ok_or(RegionError::InvalidCapacity(capacity))?;

        let mut segment = SharedSegment::create(facility, name, total)?;
        let base = segment.as_mut_ptr();
        debug_assert_eq!(base as usize % align_of::<RegionState>(), 0);

        let region = Self {
            segment,
            base,
            buffer_size,
        };
        region.state().init(buffer_size);

        tracing::info!(segment = name, capacity, "hosting shared region");
        Ok(region)
    }

    /// Open an existing segment under the platform shared-memory facility.
    pub fn open_client(name: &str) -> RegionResult<Self> {
        Self::open_client_in(&ShmFacility::detect()?, name)
    }

    /// Open an existing segment created by a host.
    ///
    /// Maps the header alone first, reads the ring size, then remaps the full
    /// segment. The header is never re-initialised by the client.
    pub fn open_client_in(facility: &ShmFacility, name: &str) -> RegionResult<Self> {
        let mut segment = SharedSegment::open_header(facility, name, HEADER_SIZE)?;

        let buffer_size = {
            // SAFETY: the mapping is at least HEADER_SIZE bytes and page aligned.
            let state = unsafe { &*(segment.as_mut_ptr() as *const RegionState) };
            if let Err(reason) = state.validate() {
                tracing::warn!(segment = name, reason, "refusing shared region");
                return Err(RegionError::Corrupt(reason));
            }
            state.buffer_size()
        };

        // validate() guarantees this fits in usize
        segment.remap(HEADER_SIZE + buffer_size as usize)?;
        let base = segment.as_mut_ptr();

        tracing::info!(segment = name, capacity = buffer_size - 1, "joined shared region");
        Ok(Self {
            segment,
            base,
            buffer_size,
        })
    }

    /// Returns a reference to the region header.
    #[inline(always)]
    pub fn state(&self) -> &RegionState {
        // SAFETY: base points to a RegionState that was initialised by the host
        // and validated (client) or written (host) before construction finished.
        unsafe { &*(self.base as *const RegionState) }
    }

    #[inline(always)]
    fn ring_ptr(&self) -> *mut u8 {
        // SAFETY: the mapping covers HEADER_SIZE + buffer_size bytes.
        unsafe { self.base.add(HEADER_SIZE) }
    }

    #[inline]
    fn cursors(&self) -> Cursors {
        let state = self.state();
        Cursors {
            buffer_size: self.buffer_size,
            writer: state.writer_index(),
            reader: state.reader_index(),
        }
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    pub fn is_host(&self) -> bool {
        self.segment.is_host()
    }

    /// Ring length in bytes (capacity + 1).
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    /// Most bytes that can be in flight at once.
    pub fn capacity(&self) -> u64 {
        self.buffer_size - 1
    }

    /// The space available to write, in bytes.
    pub fn available_space(&self) -> u64 {
        self.cursors().available_space()
    }

    /// The number of bytes available to read.
    pub fn available_data(&self) -> u64 {
        self.cursors().available_data()
    }

    /// Copy up to `count` bytes of `data[offset..]` into the ring.
    ///
    /// Returns the number of bytes copied, which is less than `count` when the
    /// ring fills up (0 if it was already full). After every chunk the writer
    /// cursor is advanced and then the writer signal raised.
    ///
    /// # Errors
    /// `OutOfRange` if `offset + count` exceeds `data.len()`; nothing is copied.
    pub fn write(&mut self, data: &[u8], offset: usize, count: usize) -> RegionResult<usize> {
        check_range(offset, count, data.len())?;

        let mut copied = 0usize;
        while copied < count {
            let cursors = self.cursors();
            let chunk = cursors.write_chunk((count - copied) as u64) as usize;
            if chunk == 0 {
                break;
            }

            // SAFETY: the source range lies inside `data` (checked above) and
            // the destination stops at min(reader - 1, buffer end), so it is
            // inside the ring and not visible to the reader until the cursor
            // store below.
            unsafe {
                ptr::copy_nonoverlapping(
                    data.as_ptr().add(offset + copied),
                    self.ring_ptr().add(cursors.writer as usize),
                    chunk,
                );
            }

            let state = self.state();
            state.store_writer_index(advance(cursors.writer, chunk as u64, self.buffer_size));
            state.writer_signal().signal();

            tracing::trace!(at = cursors.writer, chunk, "ring write");
            copied += chunk;
        }
        Ok(copied)
    }

    /// Copy up to `count` bytes out of the ring into `buf[offset..]`.
    ///
    /// Returns the number of bytes copied, which is less than `count` when the
    /// ring runs dry (0 if it was already empty). After every chunk the reader
    /// cursor is advanced and then the reader signal raised.
    ///
    /// # Errors
    /// `OutOfRange` if `offset + count` exceeds `buf.len()`; nothing is copied.
    pub fn read(&mut self, buf: &mut [u8], offset: usize, count: usize) -> RegionResult<usize> {
        check_range(offset, count, buf.len())?;

        let mut copied = 0usize;
        while copied < count {
            let cursors = self.cursors();
            let chunk = cursors.read_chunk((count - copied) as u64) as usize;
            if chunk == 0 {
                break;
            }

            // SAFETY: the source stops at min(writer, buffer end) so it only
            // covers bytes the writer has published; the destination lies
            // inside `buf` (checked above).
            unsafe {
                ptr::copy_nonoverlapping(
                    self.ring_ptr().add(cursors.reader as usize),
                    buf.as_mut_ptr().add(offset + copied),
                    chunk,
                );
            }

            let state = self.state();
            state.store_reader_index(advance(cursors.reader, chunk as u64, self.buffer_size));
            state.reader_signal().signal();

            tracing::trace!(at = cursors.reader, chunk, "ring read");
            copied += chunk;
        }
        Ok(copied)
    }

    /// Write as much of `data` as fits.
    pub fn write_slice(&mut self, data: &[u8]) -> usize {
        // a whole slice is always in range
        self.write(data, 0, data.len()).unwrap_or(0)
    }

    /// Read as much as is available into `buf`.
    pub fn read_slice(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len();
        self.read(buf, 0, len).unwrap_or(0)
    }

    /// Wait until the reader frees space (consumes the reader signal).
    pub fn wait_reader(&self, timeout: Option<Duration>, cancel: &CancelToken) -> WaitOutcome {
        self.state().reader_signal().wait(timeout, cancel)
    }

    /// Wait until the writer publishes data (consumes the writer signal).
    pub fn wait_writer(&self, timeout: Option<Duration>, cancel: &CancelToken) -> WaitOutcome {
        self.state().writer_signal().wait(timeout, cancel)
    }

    /// Wait until every flag in `flags` has been raised (by either side).
    pub fn wait_for_state(
        &self,
        flags: StreamState,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> WaitOutcome {
        let state = self.state();
        signal::wait_until(|| state.stream_state().contains(flags), timeout, cancel)
    }

    /// Copy of the raw ring bytes, in physical order.
    #[cfg(test)]
    pub(crate) fn ring_snapshot(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.buffer_size as usize];
        // SAFETY: the ring is buffer_size bytes long.
        unsafe { ptr::copy_nonoverlapping(self.ring_ptr(), out.as_mut_ptr(), out.len()) };
        out
    }
}
