use crate::{BenchResult, compute_stats};
use basalt_perf_recorder::{PerfRecorder, PerfStage};

/// Writer-side stages, outermost last.
pub const WRITER_STAGES: [PerfStage; 3] =
    [PerfStage::RegionWrite, PerfStage::SignalWait, PerfStage::StreamWrite];

/// Reader-side stages, outermost last.
pub const READER_STAGES: [PerfStage; 3] =
    [PerfStage::RegionRead, PerfStage::SignalWait, PerfStage::StreamRead];

/// Convert PerfRecorder stage samples into BenchResults.
pub fn stage_results(recorder: &PerfRecorder) -> Vec<BenchResult> {
    let mut out = Vec::new();
    for stage in PerfStage::ALL {
        let mut samples: Vec<u64> = recorder.samples(stage).to_vec();
        if samples.is_empty() {
            continue;
        }
        out.push(BenchResult {
            name: stage.name().to_string(),
            unit: "ns".to_string(),
            stats: compute_stats(&mut samples),
        });
    }
    out
}

pub fn print_stage_table(recorder: &PerfRecorder, stages: &[PerfStage]) {
    println!(
        "  {:<20} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Stage", "p50", "p90", "p99", "p99.9", "max", "count"
    );
    println!("  {}", "\u{2500}".repeat(78));

    for &stage in stages {
        let mut samples = recorder.samples(stage).to_vec();
        if samples.is_empty() {
            continue;
        }
        let stats = compute_stats(&mut samples);
        println!(
            "  {:<20} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            stage.name(),
            stats.p50,
            stats.p90,
            stats.p99,
            stats.p999,
            stats.max,
            stats.count
        );
    }
}

pub fn print_writer_report(recorder: &PerfRecorder) {
    println!("\n  Writer Per-Stage Timing (ns):\n");
    print_stage_table(recorder, &WRITER_STAGES);
}

pub fn print_reader_report(recorder: &PerfRecorder) {
    println!("\n  Reader Per-Stage Timing (ns):\n");
    print_stage_table(recorder, &READER_STAGES);
}
