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

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod fees;
pub mod intake;
pub mod orderbook;
pub mod router;
pub mod slippage;
pub mod splitter;
pub mod tracker;
pub mod types;
pub mod venue;
// Latency-critical modules
pub mod cpu_affinity;
pub mod spsc;
pub mod venue_latency;

// Re-export common types
pub use config::RouterConfig;
pub use error::{RouterError, RouterResult};
pub use types::{
    ExecutedRoute, ExecutionReport, ExecutionStatus, MarketScenario, OrderIntent, OrderType,
    Route, RoutePlan, RouteStatus, RoutingStrategy, Side, SimulationResult, Symbol, TimeInForce,
    Urgency, VenueId,
};

// Re-export the router façade
pub use router::{RouterMetrics, SmartOrderRouter};

// Re-export market data structures
pub use orderbook::{
    AggregatedBook, AggregatedLevel, BookWalk, DepthLevel, MarketConditions, PriceLevel, VenueBook,
};

// Re-export component surfaces
pub use aggregator::{AggregatorConfig, LiquidityAggregator};
pub use engine::{EngineConfig, RoutingEngine};
pub use execution::{CancelToken, ExecutionOrchestrator, OrchestratorConfig};
pub use fees::{FeeCalculation, FeeOptimizer, FeeProgram, FeeSchedule, FeeTier};
pub use intake::{IntakeEvent, IntakeHandle, IntakeProducer, OrderIntake, TokenBucket};
pub use slippage::{ImpactCheck, SliceRecommendation, SlippageConfig, SlippageProtector};
pub use splitter::{OrderSplit, OrderSplitter, SplitterConfig, VenueLiquidity};
pub use tracker::{
    DailyRecord, HourlyRecord, PerformanceTracker, StrategyStats, TrackerConfig, TrackerSnapshot,
    VenueStats,
};

// Re-export venue capabilities
pub use venue::{
    AccountInfo, PlacedOrder, SecretStore, TtlCache, VenueClient, VenueInfo, VenueOrder,
    VenueRegistry, VenueState,
};

// Re-export venue latency tracker
pub use venue_latency::{create_venue_latency_tracker, VenueLatencyStats, VenueLatencyTracker};

use std::sync::Arc;

/// Create a router with default configuration
pub fn create_router() -> Arc<SmartOrderRouter> {
    Arc::new(SmartOrderRouter::new(RouterConfig::default()))
}

/// Create a router with custom configuration
pub fn create_router_with_config(config: RouterConfig) -> Arc<SmartOrderRouter> {
    Arc::new(SmartOrderRouter::new(config))
}

/// Create a router wired to a secret store for credentialed connectors
pub fn create_router_with_secret_store(
    config: RouterConfig,
    secrets: Arc<dyn SecretStore>,
) -> Arc<SmartOrderRouter> {
    Arc::new(SmartOrderRouter::new(config).with_secret_store(secrets))
}
