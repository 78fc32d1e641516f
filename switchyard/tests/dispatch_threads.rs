//! Multi-threaded tests for the dispatch matrix.
//!
//! Run with tracing output:
//! ```bash
//! RUST_LOG=switchyard=debug cargo test --features tracing --test dispatch_threads -- --nocapture
//! ```

use std::collections::HashMap;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use switchyard::{DispatchConfig, DispatchMatrix, Timeout};

static INIT_TRACING: Once = Once::new();

/// Initialize tracing for tests (only once).
fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        switchyard::init_tracing();
    });
}

const PRODUCERS: usize = 4;
const CONSUMERS: usize = 3;
const PER_PRODUCER: u32 = 20_000;

type Message = (usize, u32);

fn config(channel_capacity: usize) -> DispatchConfig {
    DispatchConfig {
        channel_capacity,
        ..DispatchConfig::default()
    }
}

#[test]
fn every_value_delivered_exactly_once() {
    init_test_tracing();

    let matrix: DispatchMatrix<Message, 8, 8> = DispatchMatrix::new(config(64)).unwrap();
    let total = PRODUCERS * PER_PRODUCER as usize;
    let received = AtomicUsize::new(0);

    let per_consumer: Vec<Vec<Message>> = thread::scope(|scope| {
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let mut input = matrix.register_consumer().unwrap();
                let received = &received;
                scope.spawn(move || {
                    let mut seen = Vec::new();
                    while received.load(Ordering::Acquire) < total {
                        if let Some(message) = input.pop_wait(Duration::from_millis(5)) {
                            seen.push(message);
                            received.fetch_add(1, Ordering::AcqRel);
                        }
                    }
                    seen
                })
            })
            .collect();

        for id in 0..PRODUCERS {
            let mut output = matrix.register_producer().unwrap();
            scope.spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let mut message = (id, seq);
                    while let Err(rejected) = output.push(message) {
                        message = rejected;
                        thread::yield_now();
                    }
                }
                output.unregister().unwrap();
            });
        }

        consumers.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Within one link order is FIFO, so each consumer sees every producer's
    // values in increasing order.
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for seen in &per_consumer {
        let mut last: HashMap<usize, u32> = HashMap::new();
        for &(id, seq) in seen {
            if let Some(&prev) = last.get(&id) {
                assert!(seq > prev, "producer {id}: {seq} after {prev}");
            }
            last.insert(id, seq);
            *counts.entry(id).or_default() += 1;
        }
    }
    for id in 0..PRODUCERS {
        assert_eq!(counts[&id], PER_PRODUCER as usize, "producer {id}");
    }
    assert_eq!(matrix.link_count(), PRODUCERS * CONSUMERS);
}

#[test]
fn registration_while_traffic_flows() {
    init_test_tracing();

    let matrix: DispatchMatrix<u64, 16, 16> = DispatchMatrix::new(config(16)).unwrap();
    let received = AtomicUsize::new(0);
    const ROUNDS: usize = 8;
    const PER_ROUND: u64 = 500;

    thread::scope(|scope| {
        // Each round registers a new producer (reusing a freed slot when one
        // exists) and a new consumer while earlier consumers keep popping.
        for round in 0..ROUNDS {
            let mut input = matrix.register_consumer().unwrap();
            let received = &received;
            scope.spawn(move || {
                while received.load(Ordering::Acquire) < ROUNDS * PER_ROUND as usize {
                    if input.pop_wait(Duration::from_millis(2)).is_some() {
                        received.fetch_add(1, Ordering::AcqRel);
                    }
                }
            });

            let mut output = matrix.register_producer().unwrap();
            assert_eq!(output.wired_consumers(), round + 1);
            scope
                .spawn(move || {
                    for value in 0..PER_ROUND {
                        let mut value = value;
                        while let Err(rejected) = output.push(value) {
                            value = rejected;
                            thread::yield_now();
                        }
                    }
                    output.unregister().unwrap();
                })
                .join()
                .unwrap();
        }
    });

    assert_eq!(received.load(Ordering::Acquire), ROUNDS * PER_ROUND as usize);
    // Producers ran one at a time, so a single slot served every round.
    assert_eq!(matrix.producer_count(), 1);
    assert_eq!(matrix.consumer_count(), ROUNDS);
}

#[test]
fn pop_wait_wakes_up_for_late_producer() {
    init_test_tracing();

    let matrix: DispatchMatrix<u32, 2, 2> = DispatchMatrix::new(config(4)).unwrap();
    let mut input = matrix.register_consumer().unwrap();

    thread::scope(|scope| {
        let mut output = matrix.register_producer().unwrap();
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(20));
            output.push(11).unwrap();
        });

        assert_eq!(input.pop_wait(Timeout::Infinite), Some(11));
    });
}
