use crate::endpoint::{Endpoint, Role};
use crate::error::{StreamError, StreamResult};
use crate::stream::ByteStream;
use crate::transfer::Transfer;
use basalt_config::StreamConfig;
use basalt_icc::signal;
use basalt_icc::{CancelToken, RegionError, ShmFacility, StreamState, WaitOutcome};
use basalt_perf_recorder::PerfRecorder;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Reading end of a shared-memory byte stream.
pub struct StreamReader {
    endpoint: Arc<Mutex<Endpoint>>,
    name: String,
    capacity: u64,
    role: Role,
    read_timeout: Option<Duration>,
}

impl StreamReader {
    /// Create the segment and read from it.
    pub fn create_host(name: &str, capacity: u64) -> StreamResult<Self> {
        let facility = ShmFacility::detect().map_err(RegionError::from)?;
        Self::open_in(&facility, name, Role::Host, capacity)
    }

    /// Open a segment created by the writing side.
    pub fn create_client(name: &str) -> StreamResult<Self> {
        let facility = ShmFacility::detect().map_err(RegionError::from)?;
        Self::open_in(&facility, name, Role::Client, 0)
    }

    /// Open an endpoint under an explicit facility. `capacity` is ignored for clients.
    pub fn open_in(facility: &ShmFacility, name: &str, role: Role, capacity: u64) -> StreamResult<Self> {
        let region = role.open(facility, name, capacity)?;
        region.state().raise(StreamState::READER_CONNECTED);

        let capacity = region.capacity();
        tracing::info!(segment = name, capacity, ?role, "stream reader ready");

        Ok(Self {
            endpoint: Arc::new(Mutex::new(Endpoint::new(region))),
            name: name.to_string(),
            capacity,
            role,
            read_timeout: None,
        })
    }

    /// Build from configuration: segment name, capacity, directory and read timeout.
    pub fn from_config(config: &StreamConfig, role: Role) -> StreamResult<Self> {
        config.validate()?;
        let facility = ShmFacility::resolve(config.shm_dir.as_deref()).map_err(RegionError::from)?;
        let mut reader = Self::open_in(&facility, &config.segment_name, role, config.capacity)?;
        reader.read_timeout = config.read_timeout();
        Ok(reader)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Total budget for one read call; `None` waits forever.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn available_data(&self) -> u64 {
        self.endpoint.lock().available_data()
    }

    /// Fill `buf[offset..offset + count]`, blocking while the ring is empty.
    ///
    /// Returns fewer than `count` bytes only when the writer finished the
    /// stream and the ring ran dry.
    ///
    /// # Errors
    /// `Timeout` if the read timeout runs out first; bytes already copied
    /// into `buf` stay there and the error says how many.
    pub fn read(&mut self, buf: &mut [u8], offset: usize, count: usize) -> StreamResult<usize> {
        let transfer =
            self.endpoint
                .lock()
                .read(buf, offset, count, self.read_timeout, &CancelToken::new())?;
        Ok(transfer.transferred())
    }

    /// Like [`StreamReader::read`], but gives up quietly once `cancel` fires.
    pub fn read_with_cancel(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        count: usize,
        cancel: &CancelToken,
    ) -> StreamResult<Transfer> {
        self.endpoint
            .lock()
            .read(buf, offset, count, self.read_timeout, cancel)
    }

    /// Read `count` bytes on tokio's blocking pool.
    ///
    /// The returned buffer is truncated to what was actually read. Dropping
    /// the future cancels the transfer; bytes it already took from the ring
    /// are kept for the next read. The same goes for bytes read before a
    /// timeout.
    pub async fn read_async(
        &mut self,
        count: usize,
        cancel: CancelToken,
    ) -> StreamResult<(Vec<u8>, Transfer)> {
        let call = cancel.child();
        let _abandon = call.clone().drop_guard();
        let endpoint = Arc::clone(&self.endpoint);
        let timeout = self.read_timeout;

        let transfer = tokio::task::spawn_blocking(move || -> StreamResult<Transfer> {
            let mut endpoint = endpoint.lock();
            let mut buf = vec![0u8; count];
            let result = endpoint.read(&mut buf, 0, count, timeout, &call);
            let read = match &result {
                Ok(transfer) => transfer.transferred(),
                Err(StreamError::Timeout { transferred, .. }) => *transferred,
                Err(_) => 0,
            };
            endpoint.park(&buf[..read]);
            result
        })
        .await??;

        let buf = self.endpoint.lock().take_parked(transfer.transferred());
        Ok((buf, transfer))
    }

    pub fn is_writer_connected(&self) -> bool {
        self.endpoint.lock().region.state().is_writer_connected()
    }

    /// The writer called `finish`. Data may still be waiting in the ring.
    pub fn is_finished(&self) -> bool {
        self.endpoint.lock().region.state().is_stream_finished()
    }

    /// Wait until the writing side has attached.
    ///
    /// The endpoint is only locked for each look at the flag.
    pub fn wait_for_writer(&self, timeout: Option<Duration>, cancel: &CancelToken) -> WaitOutcome {
        signal::wait_until(|| self.is_writer_connected(), timeout, cancel)
    }

    /// Stage timings; empty unless built with the `perf` feature.
    pub fn perf(&self) -> MappedMutexGuard<'_, PerfRecorder> {
        MutexGuard::map(self.endpoint.lock(), |endpoint| &mut endpoint.perf)
    }
}

impl ByteStream for StreamReader {
    fn can_read(&self) -> bool {
        true
    }

    fn length(&self) -> u64 {
        self.capacity
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> StreamResult<()> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn read_into(&mut self, buf: &mut [u8], offset: usize, count: usize) -> StreamResult<usize> {
        StreamReader::read(self, buf, offset, count)
    }
}

impl io::Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        match StreamReader::read(self, buf, 0, len) {
            Ok(n) => Ok(n),
            Err(StreamError::Timeout { transferred, .. }) if transferred > 0 => Ok(transferred),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamWriter;
    use std::thread;
    use std::time::Instant;

    fn host(capacity: u64) -> (tempfile::TempDir, ShmFacility, StreamReader) {
        let dir = tempfile::tempdir().unwrap();
        let facility = ShmFacility::with_dir(dir.path());
        let reader = StreamReader::open_in(&facility, "reader", Role::Host, capacity).unwrap();
        (dir, facility, reader)
    }

    #[test]
    fn reader_is_read_only() {
        let (_dir, _facility, mut reader) = host(10);

        assert!(reader.can_read());
        assert!(!reader.can_write());
        assert!(!reader.can_seek());
        assert!(reader.can_timeout());
        assert_eq!(reader.length(), 10);

        assert!(matches!(reader.write_from(&[1, 2], 0, 2), Err(StreamError::InvalidOperation(_))));
        assert!(matches!(reader.set_write_timeout(None), Err(StreamError::InvalidOperation(_))));
        assert!(matches!(reader.seek(io::SeekFrom::End(0)), Err(StreamError::InvalidOperation(_))));
        assert!(ByteStream::flush(&mut reader).is_ok());
    }

    #[test]
    fn read_times_out_when_no_data_arrives() {
        let (_dir, _facility, mut reader) = host(10);
        reader.set_read_timeout(Some(Duration::from_millis(100)));

        let mut buf = [0u8; 4];
        let start = Instant::now();
        let err = reader.read(&mut buf, 0, 4).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, StreamError::Timeout { transferred: 0, .. }));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    }

    #[test]
    fn cancel_ends_blocked_read_promptly() {
        let (_dir, _facility, mut reader) = host(10);
        reader.set_read_timeout(Some(Duration::from_secs(10)));

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceler = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.cancel();
        });

        let mut buf = [0u8; 4];
        let start = Instant::now();
        let transfer = reader.read_with_cancel(&mut buf, 0, 4, &cancel).unwrap();
        canceler.join().unwrap();

        assert_eq!(transfer, Transfer::Canceled { transferred: 0 });
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn finished_stream_returns_short_read() {
        let (_dir, facility, mut reader) = host(10);
        let mut writer = StreamWriter::open_in(&facility, "reader", Role::Client, 0).unwrap();

        writer.write(&[1, 2, 3], 0, 3).unwrap();
        writer.finish();
        assert!(reader.is_finished());

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf, 0, 8).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(reader.read(&mut buf, 0, 8).unwrap(), 0);
    }

    #[test]
    fn io_read_to_end_stops_at_finish() {
        let (_dir, facility, mut reader) = host(4);
        let mut writer = StreamWriter::open_in(&facility, "reader", Role::Client, 0).unwrap();

        let producer = thread::spawn(move || {
            io::Write::write_all(&mut writer, b"hello shared memory").unwrap();
            writer.finish();
        });

        let mut got = Vec::new();
        io::Read::read_to_end(&mut reader, &mut got).unwrap();
        producer.join().unwrap();
        assert_eq!(got, b"hello shared memory");
    }

    #[test]
    fn out_of_range_read_fails_before_copying() {
        let (_dir, _facility, mut reader) = host(10);
        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf, 3, 2).unwrap_err();
        assert!(err.is_out_of_range());
    }
}
