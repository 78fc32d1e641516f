//! Dispatch matrix throughput benchmark.
//!
//! Usage:
//!     cargo run --release --bin dispatch_bench
//!
//! Environment variables:
//!     PRODUCERS=4           Number of producer threads (default: 4)
//!     CONSUMERS=4           Number of consumer threads (default: 4)
//!     PRODUCER_CPU_BASE=0   Pin producer i to CPU base + i (unset: no pinning)
//!     CONSUMER_CPU_BASE=8   Pin consumer i to CPU base + i (unset: no pinning)

use std::env;
use std::hint;
use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use minstant::Instant;

use switchyard::{DispatchConfig, DispatchMatrix};

const CHANNEL_CAPACITY: usize = 4096;
const ITERATIONS_PER_PRODUCER: usize = 1 << 22;
const MAX_THREADS: usize = 64;

type Payload = u64;

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

fn pin_to_cpu(base: Option<usize>, offset: usize) {
    if let Some(base) = base {
        core_affinity::set_for_current(core_affinity::CoreId { id: base + offset });
    }
}

fn main() {
    switchyard::init_tracing();

    let producers = env_usize("PRODUCERS").unwrap_or(4).clamp(1, MAX_THREADS);
    let consumers = env_usize("CONSUMERS").unwrap_or(4).clamp(1, MAX_THREADS);
    let producer_cpu = env_usize("PRODUCER_CPU_BASE");
    let consumer_cpu = env_usize("CONSUMER_CPU_BASE");

    let matrix = match DispatchMatrix::<Payload, MAX_THREADS, MAX_THREADS>::new(DispatchConfig {
        channel_capacity: CHANNEL_CAPACITY,
        ..DispatchConfig::default()
    }) {
        Ok(matrix) => matrix,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    let total = producers * ITERATIONS_PER_PRODUCER;
    let received = AtomicUsize::new(0);
    let start_line = Barrier::new(producers + consumers + 1);

    println!(
        "switchyard dispatch ({producers}x{consumers}, capacity={CHANNEL_CAPACITY}, iters={total}):"
    );

    let elapsed = std::thread::scope(|scope| {
        for id in 0..consumers {
            let mut input = matrix.register_consumer().expect("consumer slot");
            let (received, start_line) = (&received, &start_line);
            scope.spawn(move || {
                pin_to_cpu(consumer_cpu, id);
                start_line.wait();
                while received.load(Ordering::Relaxed) < total {
                    if input.pop().is_some() {
                        received.fetch_add(1, Ordering::Relaxed);
                    } else {
                        hint::spin_loop();
                    }
                }
            });
        }

        for id in 0..producers {
            let mut output = matrix.register_producer().expect("producer slot");
            let start_line = &start_line;
            scope.spawn(move || {
                pin_to_cpu(producer_cpu, id);
                start_line.wait();
                for i in 0..ITERATIONS_PER_PRODUCER as Payload {
                    let mut item = i;
                    while let Err(rejected) = output.push(item) {
                        item = rejected;
                        hint::spin_loop();
                    }
                }
            });
        }

        start_line.wait();
        let start = Instant::now();
        while received.load(Ordering::Relaxed) < total {
            std::thread::sleep(Duration::from_millis(1));
        }
        start.elapsed()
    });

    let ops_per_ms = total as u128 * 1_000_000 / elapsed.as_nanos().max(1);
    println!("{ops_per_ms} ops/ms");
    println!("{} links", matrix.link_count());
}
