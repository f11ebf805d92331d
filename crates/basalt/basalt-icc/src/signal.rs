//! One-byte cross-process auto-reset event.
//!
//! No OS semaphore is involved: the event is a single byte inside the shared
//! segment, so any process that maps the segment can signal or wait on it.
//!
//! # Protocol
//!
//! **Signal:** store `SIGNALED`. Signalling an already signalled byte is a no-op.
//!
//! **Wait:**
//! 1. Try to swap `SIGNALED -> NOT_SIGNALED`; success returns at once
//! 2. Spin phase: retry the swap up to `MAX_SPIN_COUNT` times with backoff
//! 3. Sleep phase: sleep 1ms, 2ms, ... (capped at `MAX_SLEEP_MS`) and peek
//!    at the byte without consuming it
//! 4. On seeing `SIGNALED`, make one final swap attempt
//!
//! A successful swap consumes the signal, so one `signal()` satisfies exactly
//! one wait no matter how many times it was raised.
//!
//! # Memory Ordering
//!
//! `signal()` stores with `Release` and the consuming swap uses `AcqRel`, so
//! anything the signalling side wrote before signalling (ring bytes, cursor
//! updates) is visible to the side whose wait succeeded.

use crate::cancel::CancelToken;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub const NOT_SIGNALED: u8 = 0;
pub const SIGNALED: u8 = 1;

/// Swap attempts before falling back to sleeping.
pub const MAX_SPIN_COUNT: u32 = 500;

/// Ceiling for a single nap in the sleep phase, in milliseconds.
pub const MAX_SLEEP_MS: u64 = 100;

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The signal was consumed.
    Signaled,
    /// The timeout elapsed first.
    TimedOut,
    /// The cancel token fired first. The signal byte was left untouched.
    Canceled,
}

impl WaitOutcome {
    #[inline]
    pub fn is_signaled(self) -> bool {
        self == WaitOutcome::Signaled
    }
}

/// View over a signal byte living in shared memory (or anywhere else).
///
/// Several views may point at the same byte, in the same or different
/// processes. Outside this crate a view can only raise or consume the
/// signal, never clear it:
///
/// ```compile_fail
/// use std::sync::atomic::AtomicU8;
/// let byte = AtomicU8::new(1);
/// basalt_icc::BinarySignal::new(&byte).reset();
/// ```
#[derive(Clone, Copy)]
pub struct BinarySignal<'a> {
    byte: &'a AtomicU8,
}

impl<'a> BinarySignal<'a> {
    pub fn new(byte: &'a AtomicU8) -> Self {
        Self { byte }
    }

    /// Force the byte to `NOT_SIGNALED`. Only header initialisation does this.
    #[inline]
    pub(crate) fn reset(&self) {
        self.byte.store(NOT_SIGNALED, Ordering::Release);
    }

    #[inline]
    pub fn signal(&self) {
        self.byte.store(SIGNALED, Ordering::Release);
    }

    /// Peek without consuming.
    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.byte.load(Ordering::Acquire) == SIGNALED
    }

    #[inline]
    fn try_consume(&self) -> bool {
        self.byte
            .compare_exchange(SIGNALED, NOT_SIGNALED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Wait for the signal and consume it.
    ///
    /// `timeout == None` waits until signalled or cancelled. Timeout and
    /// cancellation are checked on every spin and every nap; neither raises an
    /// error, they only end the wait early.
    pub fn wait(&self, timeout: Option<Duration>, cancel: &CancelToken) -> WaitOutcome {
        spin_then_sleep(|| self.is_signaled(), || self.try_consume(), timeout, cancel)
    }
}

/// Spin-then-sleep until `ready()` holds, without consuming anything.
///
/// Same shape and bounds as [`BinarySignal::wait`], for conditions that are
/// not a signal byte (the peer's connection flag, for instance).
pub fn wait_until(ready: impl Fn() -> bool, timeout: Option<Duration>, cancel: &CancelToken) -> WaitOutcome {
    spin_then_sleep(&ready, &ready, timeout, cancel)
}

/// Both wait flavours. `consume` is retried while spinning and once more at
/// the end; the sleep phase only `probe`s.
fn spin_then_sleep(
    probe: impl Fn() -> bool,
    consume: impl Fn() -> bool,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> WaitOutcome {
    if consume() {
        return WaitOutcome::Signaled;
    }

    let deadline = Deadline::after(timeout);

    // Spin phase
    let mut spinner = SpinBackoff::new();
    while spinner.count() < MAX_SPIN_COUNT && !deadline.expired() && !cancel.is_canceled() {
        if consume() {
            return WaitOutcome::Signaled;
        }
        spinner.spin();
    }

    // Sleep phase
    let mut naps = 0u64;
    while !probe() && !deadline.expired() && !cancel.is_canceled() {
        naps += 1;
        let nap = Duration::from_millis(naps.min(MAX_SLEEP_MS));
        thread::sleep(deadline.clamp(nap));
    }

    if cancel.is_canceled() {
        tracing::trace!("wait canceled");
        return WaitOutcome::Canceled;
    }

    if consume() {
        WaitOutcome::Signaled
    } else {
        tracing::trace!(naps, "wait timed out");
        WaitOutcome::TimedOut
    }
}

/// Optional point in time after which a wait gives up.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    /// A timeout too large to represent is treated as infinite.
    pub(crate) fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.and_then(|t| Instant::now().checked_add(t)))
    }

    #[inline]
    pub(crate) fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Shorten `nap` so it does not run past the deadline.
    #[inline]
    pub(crate) fn clamp(&self, nap: Duration) -> Duration {
        match self.0 {
            Some(at) => nap.min(at.saturating_duration_since(Instant::now())),
            None => nap,
        }
    }
}

/// Exponential spin: CPU hints first, then yielding to the scheduler.
#[derive(Debug, Default)]
pub(crate) struct SpinBackoff {
    count: u32,
}

const SPIN_YIELD_THRESHOLD: u32 = 10;

impl SpinBackoff {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub(crate) fn spin(&mut self) {
        if self.count < SPIN_YIELD_THRESHOLD {
            for _ in 0..(1u32 << self.count) {
                std::hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
        self.count += 1;
    }
}
