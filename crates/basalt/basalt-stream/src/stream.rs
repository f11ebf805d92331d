use crate::error::{StreamError, StreamResult};
use std::io::SeekFrom;
use std::time::Duration;

/// Stream-shaped surface shared by both endpoints.
///
/// Every endpoint is one-directional and unseekable. Operations an endpoint
/// does not support fail with [`StreamError::InvalidOperation`]; the default
/// methods below encode exactly that.
pub trait ByteStream {
    fn can_read(&self) -> bool {
        false
    }

    fn can_write(&self) -> bool {
        false
    }

    fn can_seek(&self) -> bool {
        false
    }

    fn can_timeout(&self) -> bool {
        true
    }

    /// Ring capacity in bytes.
    fn length(&self) -> u64;

    /// Always 0: the stream has no addressable position.
    fn position(&self) -> u64 {
        0
    }

    fn set_position(&mut self, _position: u64) -> StreamResult<()> {
        Err(StreamError::InvalidOperation("stream does not support seeking"))
    }

    fn seek(&mut self, _pos: SeekFrom) -> StreamResult<u64> {
        Err(StreamError::InvalidOperation("stream does not support seeking"))
    }

    fn set_len(&mut self, _len: u64) -> StreamResult<()> {
        Err(StreamError::InvalidOperation("stream length is fixed by the ring capacity"))
    }

    fn read_timeout(&self) -> Option<Duration> {
        None
    }

    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> StreamResult<()> {
        Err(StreamError::InvalidOperation("stream is write-only"))
    }

    fn write_timeout(&self) -> Option<Duration> {
        None
    }

    fn set_write_timeout(&mut self, _timeout: Option<Duration>) -> StreamResult<()> {
        Err(StreamError::InvalidOperation("stream is read-only"))
    }

    /// Blocking read of exactly `count` bytes into `buf[offset..]`.
    fn read_into(&mut self, _buf: &mut [u8], _offset: usize, _count: usize) -> StreamResult<usize> {
        Err(StreamError::InvalidOperation("stream is write-only"))
    }

    /// Blocking write of `data[offset..offset + count]`.
    fn write_from(&mut self, _data: &[u8], _offset: usize, _count: usize) -> StreamResult<usize> {
        Err(StreamError::InvalidOperation("stream is read-only"))
    }

    /// Nothing is buffered locally, so this is a no-op.
    fn flush(&mut self) -> StreamResult<()> {
        Ok(())
    }
}
