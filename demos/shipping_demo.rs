//! Tracelink shipping demo: producers and an in-process consumer.
//!
//! Spawns one consumer thread per channel and a handful of producer
//! threads appending tagged records as fast as they can, then reports
//! what crossed the shared-memory boundary.
//!
//! Run with: cargo run --release --example shipping_demo

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracelink::ipc::{ensure_fifo, SlotPool, SHUTDOWN_SENTINEL};
use tracelink::{EventRecord, TraceConfig, TraceRuntime};

const CHANNELS: usize = 2;
const THREADS: u32 = 4;
const RECORDS_PER_THREAD: u64 = 200_000;

fn spawn_consumer(cfg: &TraceConfig, channel: usize) -> thread::JoinHandle<(usize, usize)> {
    let shm_path = cfg.shm_path(channel);
    let full_path = cfg.full_link_path(channel);
    let empty_path = cfg.empty_link_path(channel);
    ensure_fifo(&full_path).unwrap();
    ensure_fifo(&empty_path).unwrap();
    thread::spawn(move || {
        let mut full = OpenOptions::new().read(true).open(&full_path).unwrap();
        let mut empty = OpenOptions::new().write(true).open(&empty_path).unwrap();
        let mut pool: Option<SlotPool> = None;
        let mut slots = 0usize;
        let mut records = 0usize;
        let mut buf = [0u8; 4];
        loop {
            if full.read_exact(&mut buf).is_err() {
                break;
            }
            let slot = u32::from_le_bytes(buf);
            if slot == SHUTDOWN_SENTINEL {
                break;
            }
            let pool = pool.get_or_insert_with(|| SlotPool::open(&shm_path).unwrap());
            records += pool.read_records(slot as usize).len();
            slots += 1;
            empty.write_all(&buf).unwrap();
        }
        (slots, records)
    })
}

fn main() {
    println!("Tracelink shipping demo");
    println!("=======================\n");

    let dir = std::env::temp_dir().join(format!("tracelink-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let mut cfg = TraceConfig::new(CHANNELS, &dir);
    cfg.slots_per_channel = 8;
    cfg.slot_capacity = 1 << 14;
    cfg.rotate_timeout = Duration::from_secs(10);

    let consumers: Vec<_> = (0..CHANNELS).map(|c| spawn_consumer(&cfg, c)).collect();
    let runtime = Arc::new(TraceRuntime::initialize(cfg).unwrap());

    let start = Instant::now();
    let producers: Vec<_> = (0..THREADS)
        .map(|_| {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || {
                let mut tcxt = runtime.bind_thread();
                let tid = tcxt.tid();
                for seq in 0..RECORDS_PER_THREAD {
                    let mut rec = EventRecord::zeroed();
                    rec.bytes[0..4].copy_from_slice(&tid.to_le_bytes());
                    rec.bytes[4..12].copy_from_slice(&seq.to_le_bytes());
                    tcxt.append(rec);
                }
                tcxt.finalize();
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    let produce_duration = start.elapsed();
    runtime.terminate().unwrap();

    let total_expected = THREADS as u64 * RECORDS_PER_THREAD;
    let mut total_slots = 0;
    let mut total_records = 0;
    for (channel, consumer) in consumers.into_iter().enumerate() {
        let (slots, records) = consumer.join().unwrap();
        println!("  channel {}: {} slots, {} records", channel, slots, records);
        total_slots += slots;
        total_records += records;
    }

    let ns_per_record = produce_duration.as_nanos() as f64 / total_expected as f64;
    println!("\n  Threads:     {}", THREADS);
    println!("  Records:     {} ({} expected)", total_records, total_expected);
    println!("  Slots:       {}", total_slots);
    println!("  Duration:    {:.2?}", produce_duration);
    println!("  Append cost: {:.1} ns/record (amortized, incl. rotation)", ns_per_record);
    println!(
        "  Throughput:  {:.2} M records/sec",
        total_expected as f64 / produce_duration.as_secs_f64() / 1_000_000.0
    );

    assert_eq!(total_records as u64, total_expected);
    println!("\nAll records accounted for.");

    std::fs::remove_dir_all(&dir).ok();
}
