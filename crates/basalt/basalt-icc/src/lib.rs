//! Cross-process single-producer/single-consumer byte ring.
//!
//! A [`SharedRegion`] lives in one named shared-memory segment: a fixed
//! [`RegionState`] header followed by the ring bytes. Two one-byte
//! [`BinarySignal`]s in the header let each side sleep until the other makes
//! progress.

mod cancel;
mod error;
mod region;
pub mod ring;
pub mod shm_layout;
pub mod signal;

pub use cancel::{CancelOnDrop, CancelToken};
pub use error::{RegionError, RegionResult, check_range};
pub use region::SharedRegion;
pub use ring::Cursors;
pub use shm_layout::{HEADER_SIZE, RegionState, StreamState};
pub use signal::{BinarySignal, WaitOutcome};

pub use basalt_mmap::{SegmentError, ShmFacility};
