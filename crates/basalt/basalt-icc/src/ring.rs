//! Ring buffer index arithmetic.
//!
//! The ring holds `buffer_size = capacity + 1` bytes. One slot always stays
//! free so that `reader == writer` can only ever mean "empty":
//!
//! ```text
//! buffer_size = 8, capacity = 7
//!
//!  empty:  R=W=3          full:  R=3, W=2
//!  [ . . . . . . . . ]    [ x x . x x x x x ]
//!          ^RW                ^W  ^R
//! ```
//!
//! Cursors always stay in `[0, buffer_size)`; they wrap with a modulo and are
//! never stored out of range.

/// Consistent copy of the three geometry fields, taken once per chunk.
///
/// The peer may move its own cursor right after the snapshot; that only ever
/// makes the snapshot under-report what is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    pub buffer_size: u64,
    pub writer: u64,
    pub reader: u64,
}

impl Cursors {
    /// Bytes written but not yet read.
    #[inline]
    pub fn available_data(&self) -> u64 {
        (self.buffer_size + self.writer - self.reader) % self.buffer_size
    }

    /// Bytes that can be written without overtaking the reader.
    #[inline]
    pub fn available_space(&self) -> u64 {
        self.buffer_size - self.available_data() - 1
    }

    /// Length of the next contiguous write starting at the writer cursor.
    #[inline]
    pub fn write_chunk(&self, remaining: u64) -> u64 {
        remaining
            .min(self.available_space())
            .min(self.buffer_size - self.writer)
    }

    /// Length of the next contiguous read starting at the reader cursor.
    #[inline]
    pub fn read_chunk(&self, remaining: u64) -> u64 {
        remaining
            .min(self.available_data())
            .min(self.buffer_size - self.reader)
    }
}

/// Move `cursor` forward by `n` bytes, wrapping at `buffer_size`.
#[inline(always)]
pub fn advance(cursor: u64, n: u64, buffer_size: u64) -> u64 {
    (cursor + n) % buffer_size
}

/// Ring length needed for `capacity` usable bytes.
#[inline]
pub fn buffer_size_for(capacity: u64) -> Option<u64> {
    capacity.checked_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursors(buffer_size: u64, writer: u64, reader: u64) -> Cursors {
        Cursors {
            buffer_size,
            writer,
            reader,
        }
    }

    #[test]
    fn availability_table() {
        // (buffer_size, writer, reader, space, data, case)
        let cases = [
            (10, 0, 0, 9, 0, "empty buffer"),
            (10, 5, 5, 9, 0, "no data to read"),
            (10, 5, 0, 4, 5, "unread data"),
            (10, 0, 5, 4, 5, "unread data with reader past writer"),
            (10, 9, 0, 0, 9, "full without wrap"),
            (10, 2, 3, 0, 9, "full with wrap"),
        ];

        for (size, w, r, space, data, case) in cases {
            let c = cursors(size, w, r);
            assert_eq!(c.available_space(), space, "space: {case}");
            assert_eq!(c.available_data(), data, "data: {case}");
            assert_eq!(c.available_space() + c.available_data(), size - 1, "sum: {case}");
        }
    }

    #[test]
    fn chunks_stop_at_physical_end() {
        // 6 free bytes from position 5 to the end of an 11-byte ring
        let c = cursors(11, 5, 5);
        assert_eq!(c.write_chunk(10), 6);
        assert_eq!(c.write_chunk(3), 3);

        let c = cursors(11, 0, 5);
        assert_eq!(c.available_data(), 6);
        assert_eq!(c.read_chunk(10), 6);
    }

    #[test]
    fn chunks_are_bounded_by_availability() {
        let c = cursors(11, 4, 0);
        assert_eq!(c.write_chunk(10), 6);
        assert_eq!(c.read_chunk(10), 4);

        let full = cursors(11, 10, 0);
        assert_eq!(full.write_chunk(1), 0);
        let empty = cursors(11, 7, 7);
        assert_eq!(empty.read_chunk(1), 0);
    }

    #[test]
    fn advance_wraps_into_range() {
        assert_eq!(advance(5, 6, 11), 0);
        assert_eq!(advance(10, 1, 11), 0);
        assert_eq!(advance(3, 4, 11), 7);
    }

    #[test]
    fn buffer_size_has_one_spare_slot() {
        assert_eq!(buffer_size_for(10), Some(11));
        assert_eq!(buffer_size_for(u64::MAX), None);
    }
}
