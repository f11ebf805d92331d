//! Shared memory layout of a stream region.
//!
//! Both processes map the same bytes and must agree on this layout exactly.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                           RegionState (32B)                        │
//! │  ┌────────────┬────────────┬────────────┬──────┬──────┬──────┬───┐ │
//! │  │ buffer_size│ writer_idx │ reader_idx │ flags│ wsig │ rsig │pad│ │
//! │  │   (8B)     │   (8B)     │   (8B)     │ (1B) │ (1B) │ (1B) │5B │ │
//! │  └────────────┴────────────┴────────────┴──────┴──────┴──────┴───┘ │
//! ├────────────────────────────────────────────────────────────────────┤
//! │                 ring bytes [0 .. buffer_size)                      │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Field ownership
//!
//! | field         | stored by          | consumed by          |
//! |---------------|--------------------|----------------------|
//! | buffer_size   | host, once at init | both (read only)     |
//! | writer_index  | writer only        | reader (load)        |
//! | reader_index  | reader only        | writer (load)        |
//! | writer_signal | writer (`signal`)  | reader (`wait`)      |
//! | reader_signal | reader (`signal`)  | writer (`wait`)      |
//! | stream_state  | set-only bits      | both                 |
//!
//! Each cursor has exactly one mutator across both processes, which is why no
//! lock guards the header. The signal bytes are touched by both sides but
//! only through an atomic store or compare-exchange.

use crate::ring::Cursors;
use crate::signal::BinarySignal;
use bitflags::bitflags;
use std::mem::{align_of, offset_of, size_of};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

bitflags! {
    /// Connection and lifecycle flags. Bits are only ever raised.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StreamState: u8 {
        const WRITER_CONNECTED = 1;
        const READER_CONNECTED = 1 << 1;
        const STREAM_FINISHED = 1 << 2;
    }
}

/// Header at offset 0 of every stream segment.
#[repr(C)]
pub struct RegionState {
    /// Ring length in bytes, `capacity + 1`.
    buffer_size: AtomicU64,
    /// Next ring position the writer fills.
    writer_index: AtomicU64,
    /// Next ring position the reader consumes.
    reader_index: AtomicU64,
    /// `StreamState` bits.
    stream_state: AtomicU8,
    /// Raised by the writer after each chunk: data became available.
    writer_signal: AtomicU8,
    /// Raised by the reader after each chunk: space became available.
    reader_signal: AtomicU8,
}

pub const HEADER_SIZE: usize = size_of::<RegionState>();

const _: () = {
    assert!(offset_of!(RegionState, buffer_size) == 0);
    assert!(offset_of!(RegionState, writer_index) == 8);
    assert!(offset_of!(RegionState, reader_index) == 16);
    assert!(offset_of!(RegionState, stream_state) == 24);
    assert!(offset_of!(RegionState, writer_signal) == 25);
    assert!(offset_of!(RegionState, reader_signal) == 26);
    assert!(HEADER_SIZE == 32);
    assert!(align_of::<RegionState>() == 8);
};

impl RegionState {
    /// Fresh, empty header for a ring of `buffer_size` bytes.
    pub fn new(buffer_size: u64) -> Self {
        Self::with_cursors(buffer_size, 0, 0)
    }

    /// Header with explicit cursor positions.
    pub fn with_cursors(buffer_size: u64, writer: u64, reader: u64) -> Self {
        Self {
            buffer_size: AtomicU64::new(buffer_size),
            writer_index: AtomicU64::new(writer),
            reader_index: AtomicU64::new(reader),
            stream_state: AtomicU8::new(StreamState::empty().bits()),
            writer_signal: AtomicU8::new(crate::signal::NOT_SIGNALED),
            reader_signal: AtomicU8::new(crate::signal::NOT_SIGNALED),
        }
    }

    /// Initialise a header living in freshly created shared memory.
    pub(crate) fn init(&self, buffer_size: u64) {
        self.writer_index.store(0, Ordering::Relaxed);
        self.reader_index.store(0, Ordering::Relaxed);
        self.stream_state
            .store(StreamState::empty().bits(), Ordering::Relaxed);
        self.writer_signal().reset();
        self.reader_signal().reset();
        // published last: a client that sees a buffer size sees the rest
        self.buffer_size.store(buffer_size, Ordering::Release);
    }

    /// Checks a header opened by a client before any of it is trusted.
    pub fn validate(&self) -> Result<(), &'static str> {
        let c = self.cursors();
        if c.buffer_size < 2 {
            return Err("buffer size below minimum");
        }
        if c.writer >= c.buffer_size || c.reader >= c.buffer_size {
            return Err("cursor outside ring");
        }
        if usize::try_from(c.buffer_size)
            .ok()
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .is_none()
        {
            return Err("ring does not fit the address space");
        }
        Ok(())
    }

    #[inline]
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size.load(Ordering::Acquire)
    }

    #[inline]
    pub fn writer_index(&self) -> u64 {
        self.writer_index.load(Ordering::Acquire)
    }

    #[inline]
    pub fn reader_index(&self) -> u64 {
        self.reader_index.load(Ordering::Acquire)
    }

    /// Snapshot all three geometry fields.
    #[inline]
    pub fn cursors(&self) -> Cursors {
        Cursors {
            buffer_size: self.buffer_size(),
            writer: self.writer_index(),
            reader: self.reader_index(),
        }
    }

    #[inline]
    pub fn available_data(&self) -> u64 {
        self.cursors().available_data()
    }

    #[inline]
    pub fn available_space(&self) -> u64 {
        self.cursors().available_space()
    }

    /// Writer side only.
    #[inline]
    pub(crate) fn store_writer_index(&self, index: u64) {
        debug_assert!(index < self.buffer_size());
        self.writer_index.store(index, Ordering::Release);
    }

    /// Reader side only.
    #[inline]
    pub(crate) fn store_reader_index(&self, index: u64) {
        debug_assert!(index < self.buffer_size());
        self.reader_index.store(index, Ordering::Release);
    }

    #[inline]
    pub fn stream_state(&self) -> StreamState {
        StreamState::from_bits_truncate(self.stream_state.load(Ordering::Acquire))
    }

    /// Raise flags. Flags are never cleared.
    #[inline]
    pub fn raise(&self, flags: StreamState) {
        self.stream_state.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn is_writer_connected(&self) -> bool {
        self.stream_state().contains(StreamState::WRITER_CONNECTED)
    }

    pub fn is_reader_connected(&self) -> bool {
        self.stream_state().contains(StreamState::READER_CONNECTED)
    }

    pub fn is_stream_finished(&self) -> bool {
        self.stream_state().contains(StreamState::STREAM_FINISHED)
    }

    /// Signal raised by the writer, waited on by the reader.
    #[inline]
    pub fn writer_signal(&self) -> BinarySignal<'_> {
        BinarySignal::new(&self.writer_signal)
    }

    /// Signal raised by the reader, waited on by the writer.
    #[inline]
    pub fn reader_signal(&self) -> BinarySignal<'_> {
        BinarySignal::new(&self.reader_signal)
    }
}

/// Total segment bytes for a ring of `buffer_size` bytes.
pub fn bytes_for_region(buffer_size: u64) -> Option<u64> {
    buffer_size.checked_add(HEADER_SIZE as u64)
}
