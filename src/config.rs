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

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Router configuration.
///
/// All options are recognized by name; none are positional. The core is
/// stateless across restarts, so this struct is the whole of its persisted
/// surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Maximum number of venues a single intent may be split across
    pub max_venues_per_split: usize,
    /// Minimum child order size; smaller splits are dropped and reallocated
    pub min_split_size: Decimal,
    /// Default maximum slippage in basis points when the intent does not set one
    pub max_slippage_bps: u32,
    /// Enable the full routing pipeline; when false, route to the single best venue
    pub smart_routing_enabled: bool,
    /// Re-order candidate routes by effective fee cost
    pub fee_optimization: bool,
    /// Aggregator refresh interval in milliseconds
    pub refresh_interval_ms: u64,
    /// Overall deadline for route/execute/simulate operations in milliseconds
    pub execution_timeout_ms: u64,
    /// Retry budget for idempotent reads (book fetches); orders are never retried
    pub retry_attempts: u32,
    /// Core ids the intake worker may pin to; empty leaves the thread unpinned
    pub cpu_cores: Vec<usize>,
    /// Per-venue intake queue capacity; must be a power of two
    pub order_intake_capacity: usize,
    /// Token bucket refill rate for order admission
    pub max_orders_per_second: u32,
    /// Maximum child orders in flight at once
    pub max_concurrent_orders: usize,
    /// How long a stale per-venue book is retained after a failed fetch, in milliseconds
    pub staleness_budget_ms: u64,
    /// TTL for balance/ticker caches in milliseconds
    pub cache_ttl_ms: u64,
    /// Health probe interval in milliseconds
    pub health_check_interval_ms: u64,
    /// A single venue must hold at least this multiple of the intent quantity
    /// for the engine to skip splitting
    pub min_liquidity_ratio: Decimal,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_venues_per_split: 5,
            min_split_size: dec!(0.0001),
            max_slippage_bps: 100,
            smart_routing_enabled: true,
            fee_optimization: true,
            refresh_interval_ms: 500,
            execution_timeout_ms: 30_000,
            retry_attempts: 0,
            cpu_cores: Vec::new(),
            order_intake_capacity: 1024,
            max_orders_per_second: 100,
            max_concurrent_orders: 10,
            staleness_budget_ms: 5_000,
            cache_ttl_ms: 1_000,
            health_check_interval_ms: 30_000,
            min_liquidity_ratio: dec!(1.2),
        }
    }
}

impl RouterConfig {
    /// Validate configuration constraints
    pub fn validate(&self) -> Result<(), String> {
        if !self.order_intake_capacity.is_power_of_two() {
            return Err(format!(
                "order_intake_capacity must be a power of two, got {}",
                self.order_intake_capacity
            ));
        }
        if self.max_venues_per_split == 0 {
            return Err("max_venues_per_split must be at least 1".to_string());
        }
        if self.max_concurrent_orders == 0 {
            return Err("max_concurrent_orders must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RouterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_intake_capacity_must_be_power_of_two() {
        let mut config = RouterConfig::default();
        config.order_intake_capacity = 1000;
        assert!(config.validate().is_err());
    }
}
