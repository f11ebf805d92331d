use std::hint::black_box;
use std::thread;
use std::time::{Duration, Instant};

use basalt_icc::{HEADER_SIZE, SharedRegion};
use basalt_perf::report::{print_reader_report, print_writer_report};
use basalt_perf::*;
use basalt_stream::{Role, StreamReader, StreamWriter};

const STREAM_BYTES: usize = 64 * 1024 * 1024;
const STREAM_CHUNK: usize = 4096;
const STREAM_CAPACITY: u64 = 64 * 1024;

fn main() {
    let rusage_start = capture_rusage();

    // ═══════════════════════════════════════════════════════════════════════
    // 1. Banner
    // ═══════════════════════════════════════════════════════════════════════
    let bar = "\u{2550}".repeat(90);
    println!("\n{bar}");
    println!("  BASALT PERFORMANCE REPORT");
    println!("  region micro + cross-thread stream");
    println!("{bar}");
    println!("\n  Segment header: {HEADER_SIZE} bytes");

    // ═══════════════════════════════════════════════════════════════════════
    // 2. Region micro benchmarks
    // ═══════════════════════════════════════════════════════════════════════
    section_region();

    // ═══════════════════════════════════════════════════════════════════════
    // 3. Cross-thread stream
    // ═══════════════════════════════════════════════════════════════════════
    section_stream();

    // ═══════════════════════════════════════════════════════════════════════
    // 4. Resource usage
    // ═══════════════════════════════════════════════════════════════════════
    let rusage_end = capture_rusage();
    section_header("Resource Usage");
    println!("  max RSS:            {}", format_bytes(rusage_end.max_rss_bytes.max(0) as u64));
    println!(
        "  minor faults:       {}",
        rusage_end.minor_faults - rusage_start.minor_faults
    );
    println!(
        "  major faults:       {}",
        rusage_end.major_faults - rusage_start.major_faults
    );
    println!(
        "  ctx switches:       {} voluntary, {} involuntary",
        rusage_end.vol_ctx_switches - rusage_start.vol_ctx_switches,
        rusage_end.invol_ctx_switches - rusage_start.invol_ctx_switches
    );
    println!();
}

fn section_region() {
    section_header("Shared Region (single thread, non-blocking)");
    print_table_header();

    let facility = bench_facility();
    for &len in &[16usize, 256, 4096] {
        let name = temp_segment_name(&format!("report_rw_{len}"));
        let Ok(mut region) = SharedRegion::create_host_in(&facility, &name, 65536) else {
            println!("  could not create region '{name}', skipping");
            return;
        };
        let data = payload(len);
        let mut buf = vec![0u8; len];

        let result = measure_batched(&format!("write+read {len}B"), 200, 1000, 10, || {
            region.write_slice(black_box(&data));
            black_box(region.read_slice(&mut buf));
        });
        print_result_row(&result);
    }
}

fn section_stream() {
    section_header("Stream (writer thread -> reader thread)");

    let facility = bench_facility();
    let name = temp_segment_name("report_stream");
    let writer = StreamWriter::open_in(&facility, &name, Role::Host, STREAM_CAPACITY);
    let reader = StreamReader::open_in(&facility, &name, Role::Client, 0);
    let (Ok(mut writer), Ok(mut reader)) = (writer, reader) else {
        println!("  could not open stream '{name}', skipping");
        return;
    };
    // a failed writer must not leave the reader parked forever
    reader.set_read_timeout(Some(Duration::from_secs(30)));

    let start = Instant::now();
    let producer = thread::spawn(move || {
        let data = payload(STREAM_CHUNK);
        for _ in 0..STREAM_BYTES / STREAM_CHUNK {
            if let Err(e) = writer.write(&data, 0, STREAM_CHUNK) {
                println!("  writer failed: {e}");
                break;
            }
        }
        writer
    });

    let mut buf = vec![0u8; STREAM_CHUNK];
    let mut received = 0usize;
    while received < STREAM_BYTES {
        match reader.read(&mut buf, 0, STREAM_CHUNK) {
            Ok(n) => received += n,
            Err(e) => {
                println!("  reader failed: {e}");
                break;
            }
        }
    }
    let elapsed = start.elapsed();

    let Ok(writer) = producer.join() else {
        println!("  writer thread panicked");
        return;
    };

    let rate = received as f64 / elapsed.as_secs_f64();
    println!(
        "  {} through a {} ring in {elapsed:.2?}: {}/s",
        format_bytes(received as u64),
        format_bytes(STREAM_CAPACITY),
        format_bytes(rate as u64)
    );

    print_writer_report(&writer.perf());
    print_reader_report(&reader.perf());
}
