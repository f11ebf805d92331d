//! Blocking transfer loops shared by [`crate::StreamWriter`] and
//! [`crate::StreamReader`].
//!
//! Each call runs against one wall-clock budget. Whenever the ring has nothing
//! to offer, the loop parks on the peer's signal for whatever budget is left
//! and re-checks once woken.
//!
//! Bytes that left the ring but never reached a caller (an async read whose
//! future was dropped) wait in the endpoint's `parked` queue and are handed
//! out first by the next read.

use crate::error::{StreamError, StreamResult};
use crate::transfer::Transfer;
use basalt_icc::{CancelToken, RegionResult, SharedRegion, ShmFacility, WaitOutcome, check_range};
use basalt_perf_recorder::{PerfRecorder, PerfStage};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Which side creates the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates and initialises the segment; removes it on drop.
    Host,
    /// Opens a segment some host already created; learns capacity from it.
    Client,
}

impl Role {
    pub(crate) fn open(
        self,
        facility: &ShmFacility,
        name: &str,
        capacity: u64,
    ) -> RegionResult<SharedRegion> {
        match self {
            Role::Host => SharedRegion::create_host_in(facility, name, capacity),
            Role::Client => SharedRegion::open_client_in(facility, name),
        }
    }
}

pub(crate) struct Endpoint {
    pub(crate) region: SharedRegion,
    pub(crate) perf: PerfRecorder,
    /// Already consumed from the ring, oldest first, not yet delivered.
    parked: VecDeque<u8>,
}

impl Endpoint {
    pub(crate) fn new(region: SharedRegion) -> Self {
        Self {
            region,
            perf: PerfRecorder::new(),
            parked: VecDeque::new(),
        }
    }

    /// Bytes a read can have without touching the ring, plus what the ring holds.
    pub(crate) fn available_data(&self) -> u64 {
        self.parked.len() as u64 + self.region.available_data()
    }

    /// Put bytes back in front of anything still parked, keeping stream order.
    pub(crate) fn park(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().rev() {
            self.parked.push_front(b);
        }
    }

    /// Take up to `n` parked bytes.
    pub(crate) fn take_parked(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.parked.len());
        self.parked.drain(..n).collect()
    }

    fn unpark_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.parked.len());
        for (dst, b) in out[..n].iter_mut().zip(self.parked.drain(..n)) {
            *dst = b;
        }
        n
    }

    /// Write `data[offset..offset + count]`, waiting for space as needed.
    pub(crate) fn write(
        &mut self,
        data: &[u8],
        offset: usize,
        count: usize,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> StreamResult<Transfer> {
        check_range(offset, count, data.len())?;

        self.perf.begin(PerfStage::StreamWrite);
        let result = self.write_inner(data, offset, count, timeout, cancel);
        self.perf.end(PerfStage::StreamWrite);
        result
    }

    fn write_inner(
        &mut self,
        data: &[u8],
        offset: usize,
        count: usize,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> StreamResult<Transfer> {
        let start = Instant::now();
        let mut written = 0usize;

        while written < count {
            if self.region.available_space() == 0 {
                let budget = remaining_budget(start, timeout, written)?;

                self.perf.begin(PerfStage::SignalWait);
                let outcome = self.region.wait_reader(budget, cancel);
                self.perf.end(PerfStage::SignalWait);

                if outcome == WaitOutcome::Canceled {
                    tracing::debug!(written, "stream write canceled");
                    return Ok(Transfer::Canceled { transferred: written });
                }
                continue;
            }

            self.perf.begin(PerfStage::RegionWrite);
            let n = self.region.write(data, offset + written, count - written)?;
            self.perf.end(PerfStage::RegionWrite);
            written += n;
        }

        Ok(Transfer::Complete(written))
    }

    /// Fill `buf[offset..offset + count]`, waiting for data as needed.
    ///
    /// Returns early, with whatever was read, once the ring is empty and the
    /// writer has finished the stream.
    pub(crate) fn read(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        count: usize,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> StreamResult<Transfer> {
        check_range(offset, count, buf.len())?;

        self.perf.begin(PerfStage::StreamRead);
        let result = self.read_inner(buf, offset, count, timeout, cancel);
        self.perf.end(PerfStage::StreamRead);
        result
    }

    fn read_inner(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        count: usize,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> StreamResult<Transfer> {
        let start = Instant::now();
        let mut read = self.unpark_into(&mut buf[offset..offset + count]);

        while read < count {
            if self.region.available_data() == 0 {
                // the flag is raised after the last cursor store, so data
                // written before finish() is visible on this second look
                if self.region.state().is_stream_finished() && self.region.available_data() == 0 {
                    tracing::trace!(read, "stream finished by writer");
                    break;
                }

                let budget = remaining_budget(start, timeout, read)?;

                self.perf.begin(PerfStage::SignalWait);
                let outcome = self.region.wait_writer(budget, cancel);
                self.perf.end(PerfStage::SignalWait);

                if outcome == WaitOutcome::Canceled {
                    tracing::debug!(read, "stream read canceled");
                    return Ok(Transfer::Canceled { transferred: read });
                }
                continue;
            }

            self.perf.begin(PerfStage::RegionRead);
            let n = self.region.read(buf, offset + read, count - read)?;
            self.perf.end(PerfStage::RegionRead);
            read += n;
        }

        Ok(Transfer::Complete(read))
    }
}

/// Time left of `timeout` since `start`, or a timeout error if none is left.
fn remaining_budget(
    start: Instant,
    timeout: Option<Duration>,
    transferred: usize,
) -> StreamResult<Option<Duration>> {
    let Some(limit) = timeout else {
        return Ok(None);
    };

    let elapsed = start.elapsed();
    if elapsed >= limit {
        tracing::debug!(transferred, ?elapsed, "stream call timed out");
        return Err(StreamError::Timeout {
            transferred,
            elapsed,
        });
    }
    Ok(Some(limit - elapsed))
}
