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

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Maximum number of measurements to keep per venue
const MAX_LATENCY_HISTORY: usize = 1000;

/// Sliding window size for recent latency calculations
const RECENT_WINDOW_SIZE: usize = 50;

/// Latency statistics for one venue
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VenueLatencyStats {
    pub avg_ns: f64,
    pub p50_ns: f64,
    pub p95_ns: f64,
    pub p99_ns: f64,
    pub min_ns: u128,
    pub max_ns: u128,
    pub recent_avg_ns: f64,
    pub sample_count: usize,
}

/// Thread-safe venue call latency tracker.
///
/// Fed by the execution orchestrator and the health monitor; surfaced through
/// the router's metrics snapshot and consulted by the Fastest strategy.
pub struct VenueLatencyTracker {
    latencies: DashMap<String, VecDeque<u128>>,
}

impl VenueLatencyTracker {
    pub fn new() -> Self {
        Self {
            latencies: DashMap::new(),
        }
    }

    /// Record a latency measurement for a venue in nanoseconds
    pub fn record(&self, venue_id: &str, duration_ns: u128) {
        let mut entry = self
            .latencies
            .entry(venue_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(MAX_LATENCY_HISTORY + 1));
        entry.push_back(duration_ns);
        if entry.len() > MAX_LATENCY_HISTORY {
            entry.pop_front();
        }
    }

    /// Record the elapsed time since `start` for a venue
    pub fn record_since(&self, venue_id: &str, start: Instant) {
        self.record(venue_id, start.elapsed().as_nanos());
    }

    /// Latency statistics for a venue, or None when no samples exist
    pub fn stats(&self, venue_id: &str) -> Option<VenueLatencyStats> {
        let values: Vec<u128> = {
            let entry = self.latencies.get(venue_id)?;
            entry.iter().copied().collect()
        };

        let count = values.len();
        if count == 0 {
            return None;
        }

        let mut sorted = values.clone();
        sorted.sort_unstable();

        let sum: u128 = sorted.iter().sum();
        let avg = sum as f64 / count as f64;
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)] as f64;

        let recent = if count <= RECENT_WINDOW_SIZE {
            &values[..]
        } else {
            &values[count - RECENT_WINDOW_SIZE..]
        };
        let recent_avg = recent.iter().sum::<u128>() as f64 / recent.len() as f64;

        Some(VenueLatencyStats {
            avg_ns: avg,
            p50_ns: percentile(0.50),
            p95_ns: percentile(0.95),
            p99_ns: percentile(0.99),
            min_ns: sorted[0],
            max_ns: sorted[count - 1],
            recent_avg_ns: recent_avg,
            sample_count: count,
        })
    }

    /// Average latency for a venue in nanoseconds
    pub fn avg_latency(&self, venue_id: &str) -> Option<f64> {
        self.stats(venue_id).map(|s| s.avg_ns)
    }

    /// All venue ids with recorded samples
    pub fn tracked_venues(&self) -> Vec<String> {
        self.latencies.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for VenueLatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a shared venue latency tracker
pub fn create_venue_latency_tracker() -> Arc<VenueLatencyTracker> {
    Arc::new(VenueLatencyTracker::new())
}
