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

/// Writing end of a shared-memory byte stream.
///
/// Either process may host; the peer opens the same name as a client and
/// must hold the matching [`crate::StreamReader`].
pub struct StreamWriter {
    endpoint: Arc<Mutex<Endpoint>>,
    name: String,
    capacity: u64,
    role: Role,
    write_timeout: Option<Duration>,
}

impl StreamWriter {
    /// Create the segment and write into it.
    pub fn create_host(name: &str, capacity: u64) -> StreamResult<Self> {
        let facility = ShmFacility::detect().map_err(RegionError::from)?;
        Self::open_in(&facility, name, Role::Host, capacity)
    }

    /// Open a segment created by the reading side.
    pub fn create_client(name: &str) -> StreamResult<Self> {
        let facility = ShmFacility::detect().map_err(RegionError::from)?;
        Self::open_in(&facility, name, Role::Client, 0)
    }

    /// Open an endpoint under an explicit facility. `capacity` is ignored for clients.
    pub fn open_in(facility: &ShmFacility, name: &str, role: Role, capacity: u64) -> StreamResult<Self> {
        let region = role.open(facility, name, capacity)?;
        region.state().raise(StreamState::WRITER_CONNECTED);

        let capacity = region.capacity();
        tracing::info!(segment = name, capacity, ?role, "stream writer ready");

        Ok(Self {
            endpoint: Arc::new(Mutex::new(Endpoint::new(region))),
            name: name.to_string(),
            capacity,
            role,
            write_timeout: None,
        })
    }

    /// Build from configuration: segment name, capacity, directory and write timeout.
    pub fn from_config(config: &StreamConfig, role: Role) -> StreamResult<Self> {
        config.validate()?;
        let facility = ShmFacility::resolve(config.shm_dir.as_deref()).map_err(RegionError::from)?;
        let mut writer = Self::open_in(&facility, &config.segment_name, role, config.capacity)?;
        writer.write_timeout = config.write_timeout();
        Ok(writer)
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

    /// Total budget for one write call; `None` waits forever.
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    pub fn available_space(&self) -> u64 {
        self.endpoint.lock().region.available_space()
    }

    /// Write all of `data[offset..offset + count]`, blocking while the ring is full.
    ///
    /// # Errors
    /// `Timeout` if the write timeout runs out first; the error carries how
    /// many bytes did make it into the ring.
    pub fn write(&mut self, data: &[u8], offset: usize, count: usize) -> StreamResult<usize> {
        let transfer = self.endpoint.lock().write(
            data,
            offset,
            count,
            self.write_timeout,
            &CancelToken::new(),
        )?;
        Ok(transfer.transferred())
    }

    /// Like [`StreamWriter::write`], but gives up quietly once `cancel` fires.
    pub fn write_with_cancel(
        &mut self,
        data: &[u8],
        offset: usize,
        count: usize,
        cancel: &CancelToken,
    ) -> StreamResult<Transfer> {
        self.endpoint
            .lock()
            .write(data, offset, count, self.write_timeout, cancel)
    }

    /// Run the blocking write on tokio's blocking pool.
    ///
    /// Dropping the returned future cancels the transfer at its next wait
    /// for space. Bytes already in the ring stay there.
    pub async fn write_async(&mut self, data: Vec<u8>, cancel: CancelToken) -> StreamResult<Transfer> {
        let call = cancel.child();
        let _abandon = call.clone().drop_guard();
        let endpoint = Arc::clone(&self.endpoint);
        let timeout = self.write_timeout;
        tokio::task::spawn_blocking(move || {
            endpoint.lock().write(&data, 0, data.len(), timeout, &call)
        })
        .await?
    }

    pub fn is_reader_connected(&self) -> bool {
        self.endpoint.lock().region.state().is_reader_connected()
    }

    /// Wait until the reading side has attached.
    ///
    /// The endpoint is only locked for each look at the flag.
    pub fn wait_for_reader(&self, timeout: Option<Duration>, cancel: &CancelToken) -> WaitOutcome {
        signal::wait_until(|| self.is_reader_connected(), timeout, cancel)
    }

    /// Mark the end of the stream.
    ///
    /// The reader drains what is left in the ring and then sees its reads
    /// come back short instead of blocking.
    pub fn finish(&mut self) {
        let endpoint = self.endpoint.lock();
        let state = endpoint.region.state();
        state.raise(StreamState::STREAM_FINISHED);
        state.writer_signal().signal();
        tracing::debug!(segment = %self.name, "stream finished");
    }

    /// Stage timings; empty unless built with the `perf` feature.
    pub fn perf(&self) -> MappedMutexGuard<'_, PerfRecorder> {
        MutexGuard::map(self.endpoint.lock(), |endpoint| &mut endpoint.perf)
    }
}

impl ByteStream for StreamWriter {
    fn can_write(&self) -> bool {
        true
    }

    fn length(&self) -> u64 {
        self.capacity
    }

    fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> StreamResult<()> {
        self.write_timeout = timeout;
        Ok(())
    }

    fn write_from(&mut self, data: &[u8], offset: usize, count: usize) -> StreamResult<usize> {
        StreamWriter::write(self, data, offset, count)
    }
}

impl io::Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match StreamWriter::write(self, buf, 0, buf.len()) {
            Ok(n) => Ok(n),
            Err(StreamError::Timeout { transferred, .. }) if transferred > 0 => Ok(transferred),
            Err(err) => Err(err.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamReader;
    use std::thread;
    use std::time::Instant;

    fn host(capacity: u64) -> (tempfile::TempDir, ShmFacility, StreamWriter) {
        let dir = tempfile::tempdir().unwrap();
        let facility = ShmFacility::with_dir(dir.path());
        let writer = StreamWriter::open_in(&facility, "writer", Role::Host, capacity).unwrap();
        (dir, facility, writer)
    }

    #[test]
    fn writer_is_write_only() {
        let (_dir, _facility, mut writer) = host(10);

        assert!(writer.can_write());
        assert!(!writer.can_read());
        assert!(!writer.can_seek());
        assert_eq!(writer.length(), 10);
        assert_eq!(writer.position(), 0);

        let mut buf = [0u8; 4];
        assert!(matches!(writer.read_into(&mut buf, 0, 4), Err(StreamError::InvalidOperation(_))));
        assert!(matches!(writer.seek(io::SeekFrom::Start(0)), Err(StreamError::InvalidOperation(_))));
        assert!(matches!(writer.set_len(20), Err(StreamError::InvalidOperation(_))));
        assert!(matches!(writer.set_position(1), Err(StreamError::InvalidOperation(_))));
        assert!(matches!(writer.set_read_timeout(None), Err(StreamError::InvalidOperation(_))));
    }

    #[test]
    fn writer_raises_connected_flag() {
        let (_dir, facility, writer) = host(10);
        assert!(!writer.is_reader_connected());

        let reader = StreamReader::open_in(&facility, "writer", Role::Client, 0).unwrap();
        assert!(reader.is_writer_connected());
        assert!(writer.is_reader_connected());
        assert!(writer.wait_for_reader(Some(Duration::ZERO), &CancelToken::new()).is_signaled());
    }

    #[test]
    fn waiting_for_reader_leaves_endpoint_usable() {
        let (_dir, facility, writer) = host(10);

        thread::scope(|s| {
            let waiter = s.spawn(|| writer.wait_for_reader(Some(Duration::from_secs(10)), &CancelToken::new()));
            thread::sleep(Duration::from_millis(50));

            let start = Instant::now();
            assert_eq!(writer.available_space(), 10);
            assert!(!writer.is_reader_connected());
            assert!(start.elapsed() < Duration::from_millis(100));

            let _reader = StreamReader::open_in(&facility, "writer", Role::Client, 0).unwrap();
            assert_eq!(waiter.join().unwrap(), WaitOutcome::Signaled);
        });
    }

    #[test]
    fn write_times_out_on_full_ring() {
        let (_dir, _facility, mut writer) = host(4);
        writer.set_write_timeout(Some(Duration::from_millis(100)));

        let start = Instant::now();
        let err = writer.write(&[1, 2, 3, 4, 5, 6], 0, 6).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, StreamError::Timeout { transferred: 4, .. }));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    }

    #[test]
    fn io_write_reports_partial_progress_on_timeout() {
        let (_dir, _facility, mut writer) = host(4);
        writer.set_write_timeout(Some(Duration::from_millis(20)));

        assert_eq!(io::Write::write(&mut writer, &[9; 6]).unwrap(), 4);
        let err = io::Write::write(&mut writer, &[9; 2]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn out_of_range_write_fails_before_copying() {
        let (_dir, _facility, mut writer) = host(10);
        let err = writer.write(&[1, 2, 3], 2, 5).unwrap_err();
        assert!(err.is_out_of_range());
        assert_eq!(writer.available_space(), 10);
    }

    #[test]
    fn canceled_write_returns_progress() {
        let (_dir, _facility, mut writer) = host(4);
        let cancel = CancelToken::new();
        cancel.cancel();

        let transfer = writer.write_with_cancel(&[1; 6], 0, 6, &cancel).unwrap();
        assert_eq!(transfer, Transfer::Canceled { transferred: 4 });
    }

    #[test]
    fn config_sets_name_capacity_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = StreamConfig {
            segment_name: "configured".into(),
            capacity: 32,
            write_timeout_ms: Some(250),
            shm_dir: Some(dir.path().to_path_buf()),
            ..StreamConfig::default()
        };

        let writer = StreamWriter::from_config(&config, Role::Host).unwrap();
        assert_eq!(writer.name(), "configured");
        assert_eq!(writer.capacity(), 32);
        assert_eq!(writer.role(), Role::Host);
        assert_eq!(writer.write_timeout(), Some(Duration::from_millis(250)));
        assert!(dir.path().join("configured").exists());

        let bad = StreamConfig {
            capacity: 0,
            ..config
        };
        assert!(matches!(
            StreamWriter::from_config(&bad, Role::Host),
            Err(StreamError::Config(_))
        ));
    }
}
