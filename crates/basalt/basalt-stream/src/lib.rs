//! Blocking and async byte streams over a shared-memory ring.
//!
//! One process holds a [`StreamWriter`], the other a [`StreamReader`]; either
//! may be the host that creates the segment. Calls block (or suspend, for the
//! `_async` variants) while the ring is full or empty, bounded by a single
//! timeout covering the whole call.

mod endpoint;
mod error;
mod reader;
mod stream;
mod transfer;
mod writer;

pub use endpoint::Role;
pub use error::{StreamError, StreamResult};
pub use reader::StreamReader;
pub use stream::ByteStream;
pub use transfer::Transfer;
pub use writer::StreamWriter;

pub use basalt_config::StreamConfig;
pub use basalt_icc::{CancelToken, ShmFacility, WaitOutcome};
pub use basalt_perf_recorder::{PerfRecorder, PerfStage};
