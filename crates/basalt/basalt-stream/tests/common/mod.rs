#![allow(dead_code)]

use basalt_stream::{ShmFacility, StreamConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static NEXT: AtomicU32 = AtomicU32::new(0);

/// Segment name no other test in this run will pick.
pub fn unique_name(prefix: &str) -> String {
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

/// A private shared-memory directory that disappears with the test.
pub fn scratch_facility() -> (TempDir, ShmFacility) {
    let dir = tempfile::tempdir().expect("tempdir");
    let facility = ShmFacility::with_dir(dir.path());
    (dir, facility)
}

/// Honours `RUST_LOG`, else the config's `log_level`; safe to call from every test.
pub fn init_tracing(config: &StreamConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Deterministic payload so the receiving side can check every byte.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
