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

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::types::{ExecutionReport, ExecutionStatus, RoutePlan, RoutingStrategy, VenueId};

/// Tracker retention and loop cadence
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Hourly rollups kept this long
    pub hourly_retention: Duration,
    /// Daily rollups kept this long
    pub daily_retention: Duration,
    /// Interval for the aggregation pass
    pub aggregation_interval: Duration,
    /// Interval for the retention sweep
    pub cleanup_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            hourly_retention: Duration::from_secs(7 * 24 * 3600),
            daily_retention: Duration::from_secs(30 * 24 * 3600),
            aggregation_interval: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

/// Running statistics for one routing strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyStats {
    pub order_count: u64,
    pub success_count: u64,
    /// successes / submissions
    pub success_rate: f64,
    pub avg_slippage_bps: Decimal,
    pub avg_execution_time_ms: f64,
}

/// Running statistics for one venue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueStats {
    pub order_count: u64,
    pub volume: Decimal,
}

/// One hour's rollup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyRecord {
    pub hour: DateTime<Utc>,
    pub executions: u64,
    pub volume: Decimal,
    pub fees: Decimal,
    pub venue_volume: HashMap<VenueId, Decimal>,
}

/// One day's rollup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRecord {
    pub day: DateTime<Utc>,
    pub executions: u64,
    pub volume: Decimal,
    pub fees: Decimal,
    pub venue_volume: HashMap<VenueId, Decimal>,
}

/// Point-in-time view of tracked aggregates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub total_volume: Decimal,
    pub total_fees: Decimal,
    /// Estimated fees minus realized fees, accumulated when positive
    pub fees_saved: Decimal,
    pub avg_slippage_bps: Decimal,
    pub avg_execution_time_ms: f64,
    pub per_venue: HashMap<VenueId, VenueStats>,
    pub per_strategy: HashMap<RoutingStrategy, StrategyStats>,
    pub hourly: Vec<HourlyRecord>,
    pub daily: Vec<DailyRecord>,
}

#[derive(Default)]
struct TrackerState {
    total_executions: u64,
    successful_executions: u64,
    failed_executions: u64,
    total_volume: Decimal,
    total_fees: Decimal,
    fees_saved: Decimal,
    avg_slippage_bps: Decimal,
    avg_execution_time_ms: f64,
    slippage_samples: u64,
    exec_time_samples: u64,
    per_venue: HashMap<VenueId, VenueStats>,
    per_strategy: HashMap<RoutingStrategy, StrategyStats>,
    hourly: HashMap<i64, HourlyRecord>,
    daily: HashMap<i64, DailyRecord>,
}

/// Running execution aggregates per strategy, venue, hour and day.
///
/// Averages are maintained as Welford-style running means, so the reported
/// average always equals the exact mean of every recorded value. Totals are
/// monotone non-decreasing for the life of the tracker.
pub struct PerformanceTracker {
    config: TrackerConfig,
    state: Mutex<TrackerState>,
}

impl PerformanceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Record one finished execution
    pub fn record(&self, plan: &RoutePlan, report: &ExecutionReport) {
        let now = Utc::now();
        let mut state = self.state.lock();

        state.total_executions += 1;
        match report.status {
            ExecutionStatus::Completed => state.successful_executions += 1,
            ExecutionStatus::Failed => state.failed_executions += 1,
            _ => {}
        }

        let notional: Decimal = report
            .executed_routes
            .iter()
            .map(|r| r.executed_qty * r.avg_price)
            .sum();
        state.total_volume += notional;
        state.total_fees += report.total_fees;

        let saved = plan.est_fees - report.total_fees;
        if saved > Decimal::ZERO {
            state.fees_saved += saved;
        }

        if report.total_executed > Decimal::ZERO {
            state.slippage_samples += 1;
            let n = Decimal::from(state.slippage_samples);
            let prev_avg_slippage_bps = state.avg_slippage_bps;
            state.avg_slippage_bps += (report.slippage_bps - prev_avg_slippage_bps) / n;
        }

        state.exec_time_samples += 1;
        let exec_ms = report.exec_time.as_secs_f64() * 1000.0;
        state.avg_execution_time_ms +=
            (exec_ms - state.avg_execution_time_ms) / state.exec_time_samples as f64;

        for executed in &report.executed_routes {
            let venue = state.per_venue.entry(executed.venue.clone()).or_default();
            venue.order_count += 1;
            venue.volume += executed.executed_qty * executed.avg_price;
        }

        let strategy = state
            .per_strategy
            .entry(plan.intent.strategy)
            .or_default();
        strategy.order_count += 1;
        if report.status == ExecutionStatus::Completed {
            strategy.success_count += 1;
        }
        strategy.success_rate = strategy.success_count as f64 / strategy.order_count as f64;
        if report.total_executed > Decimal::ZERO {
            let n = Decimal::from(strategy.order_count);
            strategy.avg_slippage_bps += (report.slippage_bps - strategy.avg_slippage_bps) / n;
        }
        strategy.avg_execution_time_ms +=
            (exec_ms - strategy.avg_execution_time_ms) / strategy.order_count as f64;

        let hour_key = now.timestamp() - now.timestamp().rem_euclid(3600);
        let hour = state.hourly.entry(hour_key).or_insert_with(|| HourlyRecord {
            hour: DateTime::<Utc>::from_timestamp(hour_key, 0).unwrap_or(now),
            executions: 0,
            volume: Decimal::ZERO,
            fees: Decimal::ZERO,
            venue_volume: HashMap::new(),
        });
        hour.executions += 1;
        hour.volume += notional;
        hour.fees += report.total_fees;
        for executed in &report.executed_routes {
            *hour
                .venue_volume
                .entry(executed.venue.clone())
                .or_default() += executed.executed_qty * executed.avg_price;
        }

        let day_key = now.timestamp() - now.timestamp().rem_euclid(86_400);
        let day = state.daily.entry(day_key).or_insert_with(|| DailyRecord {
            day: DateTime::<Utc>::from_timestamp(day_key, 0).unwrap_or(now),
            executions: 0,
            volume: Decimal::ZERO,
            fees: Decimal::ZERO,
            venue_volume: HashMap::new(),
        });
        day.executions += 1;
        day.volume += notional;
        day.fees += report.total_fees;
        for executed in &report.executed_routes {
            *day.venue_volume.entry(executed.venue.clone()).or_default() +=
                executed.executed_qty * executed.avg_price;
        }
    }

    /// Evict rollups past their retention windows
    pub fn cleanup(&self) {
        let now = Utc::now().timestamp();
        let hourly_cutoff = now - self.config.hourly_retention.as_secs() as i64;
        let daily_cutoff = now - self.config.daily_retention.as_secs() as i64;

        let mut state = self.state.lock();
        let before = state.hourly.len() + state.daily.len();
        state.hourly.retain(|key, _| *key >= hourly_cutoff);
        state.daily.retain(|key, _| *key >= daily_cutoff);
        let evicted = before - state.hourly.len() - state.daily.len();

        if evicted > 0 {
            debug!("Evicted {} expired rollup records", evicted);
        }
    }

    /// Clone the current aggregates
    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.lock();
        TrackerSnapshot {
            total_executions: state.total_executions,
            successful_executions: state.successful_executions,
            failed_executions: state.failed_executions,
            total_volume: state.total_volume,
            total_fees: state.total_fees,
            fees_saved: state.fees_saved,
            avg_slippage_bps: state.avg_slippage_bps,
            avg_execution_time_ms: state.avg_execution_time_ms,
            per_venue: state.per_venue.clone(),
            per_strategy: state.per_strategy.clone(),
            hourly: state
                .hourly
                .values()
                .cloned()
                .sorted_by_key(|record| record.hour)
                .collect(),
            daily: state
                .daily
                .values()
                .cloned()
                .sorted_by_key(|record| record.day)
                .collect(),
        }
    }

    /// Spawn the aggregation and cleanup loops; both stop on the shared
    /// stop signal
    pub fn spawn_loops(
        self: &std::sync::Arc<Self>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let tracker = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut aggregation = tokio::time::interval(tracker.config.aggregation_interval);
            let mut cleanup = tokio::time::interval(tracker.config.cleanup_interval);
            aggregation.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = aggregation.tick() => {
                        let snapshot = tracker.snapshot();
                        debug!(
                            "Tracker aggregation: {} executions, {} volume",
                            snapshot.total_executions, snapshot.total_volume
                        );
                    }
                    _ = cleanup.tick() => {
                        tracker.cleanup();
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            info!("Tracker loops stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}
