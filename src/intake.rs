// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Meridian Trading Systems
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cpu_affinity;
use crate::orderbook::VenueBook;
use crate::spsc::{ring_buffer, Consumer, Producer};
use crate::types::OrderIntent;

/// Items drained per queue per scheduling pass
const DRAIN_BATCH: usize = 64;

/// Idle passes before the worker backs off from spinning to sleeping
const SPIN_PASSES: u32 = 64;

/// Event flowing through a per-venue intake queue
#[derive(Debug)]
pub enum IntakeEvent {
    /// An order intent submitted for routing
    Order(OrderIntent),
    /// A market data update pushed by a connector
    Book(VenueBook),
}

/// Producer handle for one venue class's intake queue.
///
/// Exactly one producer exists per queue; connectors hold it and submit
/// without locking. A full queue rejects immediately and the rejection is
/// counted.
pub struct IntakeProducer {
    queue_name: String,
    producer: Producer<IntakeEvent>,
    rejected: Arc<AtomicU64>,
}

impl IntakeProducer {
    /// Submit an event; returns false when the queue is full
    pub fn submit(&mut self, event: IntakeEvent) -> bool {
        match self.producer.push(event) {
            Ok(()) => true,
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Intake queue {} full, rejecting event", self.queue_name);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.producer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity()
    }
}

/// Intake fan-in: one bounded SPSC queue per venue class, drained by a single
/// dedicated worker thread.
pub struct OrderIntake {
    capacity: usize,
    queues: Vec<(String, Consumer<IntakeEvent>)>,
    rejected: Arc<AtomicU64>,
}

impl OrderIntake {
    /// Create an intake with the given per-queue capacity (power of two)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: Vec::new(),
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register an intake queue for a venue class and hand back its producer
    pub fn register_queue(&mut self, class: impl Into<String>) -> IntakeProducer {
        let class = class.into();
        let (producer, consumer) = ring_buffer(self.capacity);
        self.queues.push((class.clone(), consumer));
        debug!("Registered intake queue {} (capacity {})", class, self.capacity);

        IntakeProducer {
            queue_name: class,
            producer,
            rejected: Arc::clone(&self.rejected),
        }
    }

    /// Counter shared with all producers
    pub fn rejected_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.rejected)
    }

    /// Start the processing worker.
    ///
    /// The worker round-robins non-empty queues, draining up to a fixed batch
    /// from each per pass, and yields when every queue is empty. It pins
    /// itself to the first usable core from `cores`; an empty list leaves it
    /// unpinned. Items within one queue are observed in push order; no
    /// ordering holds across queues.
    pub fn start<F>(self, cores: Vec<usize>, mut handler: F) -> IntakeHandle
    where
        F: FnMut(&str, IntakeEvent) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let rejected = Arc::clone(&self.rejected);
        let mut queues = self.queues;

        let join = thread::Builder::new()
            .name("sor-intake".to_string())
            .spawn(move || {
                if let Some(core) = cpu_affinity::pin_current_thread(&cores) {
                    info!("Intake worker pinned to core {}", core);
                }

                let mut idle_passes = 0u32;
                while !stop_flag.load(Ordering::Acquire) {
                    let mut processed = 0usize;

                    for (name, consumer) in queues.iter_mut() {
                        for _ in 0..DRAIN_BATCH {
                            match consumer.pop() {
                                Some(event) => {
                                    handler(name, event);
                                    processed += 1;
                                }
                                None => break,
                            }
                        }
                    }

                    if processed == 0 {
                        idle_passes = idle_passes.saturating_add(1);
                        if idle_passes < SPIN_PASSES {
                            thread::yield_now();
                        } else {
                            thread::sleep(Duration::from_micros(100));
                        }
                    } else {
                        idle_passes = 0;
                    }
                }

                debug!("Intake worker stopped");
            })
            .expect("failed to spawn intake worker");

        IntakeHandle {
            stop,
            join: Some(join),
            rejected,
        }
    }
}

/// Handle to the running intake worker
pub struct IntakeHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    rejected: Arc<AtomicU64>,
}

impl IntakeHandle {
    /// Signal the worker to stop and wait for it to drain its current pass
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    /// Number of events rejected due to full queues
    pub fn rejected_orders(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl Drop for IntakeHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Token bucket admitting at most `capacity` orders per refill interval.
///
/// The bucket refills to capacity once per interval rather than continuously;
/// an exhausted bucket rejects immediately.
pub struct TokenBucket {
    capacity: u32,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket refilled to `per_second` tokens once per second
    pub fn new(per_second: u32) -> Self {
        Self::with_refill_interval(per_second, Duration::from_secs(1))
    }

    pub fn with_refill_interval(capacity: u32, refill_interval: Duration) -> Self {
        Self {
            capacity,
            refill_interval,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token; false when the bucket is exhausted
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();

        if state.last_refill.elapsed() >= self.refill_interval {
            state.tokens = self.capacity;
            state.last_refill = Instant::now();
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }
}
