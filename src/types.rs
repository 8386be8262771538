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

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RouterError, RouterResult};

/// Trading pair identifier, e.g. "BTC/USDT"
pub type Symbol = String;

/// Identifier for a trading venue
pub type VenueId = String;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side of the book an order of this side consumes
    pub fn opposing(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Time in force for limit orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    GoodTilCancelled,
    ImmediateOrCancel,
    FillOrKill,
}

/// Execution-time preference; controls deadlines and warning suppression
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    Normal,
    High,
    Immediate,
}

impl Urgency {
    /// Expected execution window for this urgency level
    pub fn execution_window(&self) -> Duration {
        match self {
            Urgency::Immediate => Duration::from_secs(1),
            Urgency::High => Duration::from_secs(5),
            Urgency::Normal => Duration::from_secs(30),
            Urgency::Low => Duration::from_secs(300),
        }
    }
}

/// Routing strategy for order splitting and venue selection.
///
/// This is a closed set: there is no plugin registry, and every strategy the
/// router supports is named here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingStrategy {
    /// Route to the venue(s) with the best execution price
    BestPrice,
    /// Route to the venue(s) with the lowest effective fees
    LowestFee,
    /// Route to the lowest-latency venue(s)
    Fastest,
    /// Minimize expected price impact across venues
    MinSlippage,
    /// Balance price, fees and liquidity
    Balanced,
    /// Weight venues by 24h traded volume
    VWAP,
    /// Uniform slices over a time horizon
    TWAP,
    /// Expose only a small visible slice at a time
    Iceberg,
    /// Split in proportion to available liquidity
    Proportional,
}

impl RoutingStrategy {
    /// Whether this strategy dispatches slices sequentially over time
    pub fn is_time_sliced(&self) -> bool {
        matches!(self, RoutingStrategy::Iceberg | RoutingStrategy::TWAP)
    }

    /// Whether the engine may collapse the plan to a single venue when one
    /// venue can absorb the full quantity at acceptable slippage
    pub fn allows_single_venue_shortcut(&self) -> bool {
        matches!(
            self,
            RoutingStrategy::BestPrice
                | RoutingStrategy::LowestFee
                | RoutingStrategy::Fastest
                | RoutingStrategy::Balanced
        )
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoutingStrategy::BestPrice => "BestPrice",
            RoutingStrategy::LowestFee => "LowestFee",
            RoutingStrategy::Fastest => "Fastest",
            RoutingStrategy::MinSlippage => "MinSlippage",
            RoutingStrategy::Balanced => "Balanced",
            RoutingStrategy::VWAP => "VWAP",
            RoutingStrategy::TWAP => "TWAP",
            RoutingStrategy::Iceberg => "Iceberg",
            RoutingStrategy::Proportional => "Proportional",
        };
        write!(f, "{}", name)
    }
}

/// A trade intent submitted to the router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Symbol to trade
    pub symbol: Symbol,
    /// Buy or sell
    pub side: Side,
    /// Total quantity to execute
    pub quantity: Decimal,
    /// Market or limit
    pub order_type: OrderType,
    /// Limit price; required when `order_type` is `Limit`
    pub limit_price: Option<Decimal>,
    /// Time in force
    pub time_in_force: TimeInForce,
    /// Maximum acceptable slippage in basis points
    pub max_slippage_bps: u32,
    /// Execution-time preference
    pub urgency: Urgency,
    /// Routing strategy
    pub strategy: RoutingStrategy,
    /// If non-empty, restrict routing to these venues
    pub preferred_venues: Vec<VenueId>,
    /// Venues that must never receive a child order
    pub avoid_venues: Vec<VenueId>,
}

impl OrderIntent {
    /// Create a market order intent with default knobs
    pub fn market(symbol: impl Into<Symbol>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            time_in_force: TimeInForce::GoodTilCancelled,
            max_slippage_bps: 100,
            urgency: Urgency::Normal,
            strategy: RoutingStrategy::Balanced,
            preferred_venues: Vec::new(),
            avoid_venues: Vec::new(),
        }
    }

    /// Create a limit order intent with default knobs
    pub fn limit(
        symbol: impl Into<Symbol>,
        side: Side,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
            time_in_force: TimeInForce::GoodTilCancelled,
            max_slippage_bps: 100,
            urgency: Urgency::Normal,
            strategy: RoutingStrategy::Balanced,
            preferred_venues: Vec::new(),
            avoid_venues: Vec::new(),
        }
    }

    /// Set the routing strategy
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the urgency
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    /// Set the maximum slippage in basis points
    pub fn with_max_slippage_bps(mut self, bps: u32) -> Self {
        self.max_slippage_bps = bps;
        self
    }

    /// Validate the intent's structural invariants
    pub fn validate(&self) -> RouterResult<()> {
        if self.symbol.is_empty() {
            return Err(RouterError::InvalidIntent("symbol is empty".to_string()));
        }

        if self.quantity <= Decimal::ZERO {
            return Err(RouterError::InvalidIntent(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }

        if self.order_type == OrderType::Limit {
            match self.limit_price {
                Some(price) if price > Decimal::ZERO => {}
                Some(price) => {
                    return Err(RouterError::InvalidIntent(format!(
                        "limit price must be positive, got {}",
                        price
                    )));
                }
                None => {
                    return Err(RouterError::InvalidIntent(
                        "limit order requires a limit price".to_string(),
                    ));
                }
            }
        }

        for venue in &self.preferred_venues {
            if self.avoid_venues.contains(venue) {
                return Err(RouterError::InvalidIntent(format!(
                    "venue {} is both preferred and avoided",
                    venue
                )));
            }
        }

        Ok(())
    }
}

/// A single child order targeting one venue within a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Target venue
    pub venue: VenueId,
    /// Symbol to trade
    pub symbol: Symbol,
    /// Order side
    pub side: Side,
    /// Child order quantity
    pub quantity: Decimal,
    /// Order type
    pub order_type: OrderType,
    /// Limit price carried over from the intent
    pub limit_price: Option<Decimal>,
    /// Estimated execution price at this venue
    pub est_price: Decimal,
    /// Estimated fee for this child order
    pub est_fee: Decimal,
    /// Dispatch priority; lower dispatches first
    pub priority: u32,
    /// Fraction of the parent quantity carried by this route
    pub split_ratio: Decimal,
    /// Delay before dispatch, used by time-sliced strategies
    pub time_delay: Duration,
}

/// Immutable routing decision for one intent.
///
/// Created by the routing engine and consumed exactly once by the execution
/// orchestrator; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePlan {
    /// Unique request identifier
    pub request_id: Uuid,
    /// The intent this plan satisfies
    pub intent: OrderIntent,
    /// Child orders, in dispatch priority order
    pub routes: Vec<Route>,
    /// Volume-weighted estimated execution price across routes
    pub est_vwap: Decimal,
    /// Total estimated fees across routes
    pub est_fees: Decimal,
    /// Expected execution time derived from urgency
    pub est_time: Duration,
    /// Plan quality heuristic in [0, 1]
    pub confidence: f64,
    /// Non-fatal observations accumulated while planning
    pub warnings: Vec<String>,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
}

/// Per-route lifecycle state recorded by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStatus {
    /// Created but not yet sent to the venue
    Pending,
    /// Sent, awaiting acknowledgement
    Sent,
    /// Acknowledged by the venue
    Accepted,
    /// Rejected by the venue
    Rejected,
    /// Partially filled
    PartiallyFilled,
    /// Fully filled
    Filled,
    /// Cancelled before completion
    Cancelled,
    /// Failed due to a venue or transport error
    Failed,
}

impl RouteStatus {
    /// Whether this state ends the route's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RouteStatus::Rejected
                | RouteStatus::PartiallyFilled
                | RouteStatus::Filled
                | RouteStatus::Cancelled
                | RouteStatus::Failed
        )
    }
}

/// Result of one child order placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedRoute {
    /// Venue the child order was sent to
    pub venue: VenueId,
    /// Exchange-assigned order id, when the venue accepted the order
    pub exchange_order_id: Option<String>,
    /// Quantity requested on this route
    pub requested_qty: Decimal,
    /// Quantity actually executed; never exceeds `requested_qty`
    pub executed_qty: Decimal,
    /// Average fill price
    pub avg_price: Decimal,
    /// Fee charged by the venue
    pub fee: Decimal,
    /// Terminal route status
    pub status: RouteStatus,
    /// Time the terminal state was recorded
    pub ts: DateTime<Utc>,
}

/// Overall execution status of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

/// Final report for one executed plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Request this report belongs to
    pub request_id: Uuid,
    /// Derived overall status
    pub status: ExecutionStatus,
    /// Per-route results
    pub executed_routes: Vec<ExecutedRoute>,
    /// Total executed quantity across routes
    pub total_executed: Decimal,
    /// Volume-weighted average fill price over executed quantity
    pub avg_price: Decimal,
    /// Total fees across routes
    pub total_fees: Decimal,
    /// Realized slippage in basis points against the intent's reference price
    pub slippage_bps: Decimal,
    /// Wall-clock execution time
    pub exec_time: Duration,
    /// Per-route error messages
    pub errors: Vec<String>,
}

impl ExecutionReport {
    /// Derive the overall status from per-route outcomes.
    ///
    /// All routes fully filled => Completed; nothing filled => Failed;
    /// anything in between => Partial.
    pub fn derive_status(intent_qty: Decimal, routes: &[ExecutedRoute]) -> ExecutionStatus {
        let total_executed: Decimal = routes.iter().map(|r| r.executed_qty).sum();

        if total_executed <= Decimal::ZERO {
            return ExecutionStatus::Failed;
        }

        let all_filled = routes.iter().all(|r| r.executed_qty == r.requested_qty);
        if all_filled && total_executed == intent_qty {
            ExecutionStatus::Completed
        } else if total_executed < intent_qty {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Completed
        }
    }
}

/// Market scenario applied during simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketScenario {
    Normal,
    Volatile,
    Illiquid,
}

/// Outcome of a routing simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Scenario the simulation ran under
    pub scenario: MarketScenario,
    /// Expected slippage in basis points under the scenario
    pub expected_slippage_bps: Decimal,
    /// Execution risk score in [0, 1]; higher means riskier
    pub risk_score: f64,
    /// The plan produced under the perturbed conditions
    pub plan: RoutePlan,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_intent_validation() {
        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(1.5));
        assert!(intent.validate().is_ok());

        let zero_qty = OrderIntent::market("BTC/USDT", Side::Buy, Decimal::ZERO);
        assert!(zero_qty.validate().is_err());

        let mut limit_without_price = OrderIntent::market("BTC/USDT", Side::Buy, dec!(1));
        limit_without_price.order_type = OrderType::Limit;
        assert!(limit_without_price.validate().is_err());

        let limit = OrderIntent::limit("BTC/USDT", Side::Sell, dec!(1), dec!(30000));
        assert!(limit.validate().is_ok());
    }

    #[test]
    fn test_intent_venue_filters_must_be_disjoint() {
        let mut intent = OrderIntent::market("ETH/USDT", Side::Buy, dec!(2));
        intent.preferred_venues = vec!["binance".to_string()];
        intent.avoid_venues = vec!["binance".to_string()];
        assert!(intent.validate().is_err());
    }

    #[test]
    fn test_intent_roundtrip_is_byte_identical() {
        let mut intent = OrderIntent::limit("BTC/USDT", Side::Buy, dec!(0.25), dec!(64000.50));
        intent.preferred_venues = vec!["kraken".to_string()];
        intent.max_slippage_bps = 25;
        intent.strategy = RoutingStrategy::VWAP;

        let encoded = serde_json::to_string(&intent).unwrap();
        let decoded: OrderIntent = serde_json::from_str(&encoded).unwrap();
        let reencoded = serde_json::to_string(&decoded).unwrap();

        assert_eq!(encoded, reencoded);
    }

    #[test]
    fn test_status_derivation() {
        let route = |req: Decimal, exec: Decimal, status: RouteStatus| ExecutedRoute {
            venue: "binance".to_string(),
            exchange_order_id: None,
            requested_qty: req,
            executed_qty: exec,
            avg_price: dec!(100),
            fee: Decimal::ZERO,
            status,
            ts: Utc::now(),
        };

        let completed = vec![
            route(dec!(6), dec!(6), RouteStatus::Filled),
            route(dec!(4), dec!(4), RouteStatus::Filled),
        ];
        assert_eq!(
            ExecutionReport::derive_status(dec!(10), &completed),
            ExecutionStatus::Completed
        );

        let partial = vec![
            route(dec!(6), dec!(6), RouteStatus::Filled),
            route(dec!(4), dec!(0), RouteStatus::Failed),
        ];
        assert_eq!(
            ExecutionReport::derive_status(dec!(10), &partial),
            ExecutionStatus::Partial
        );

        let failed = vec![
            route(dec!(6), dec!(0), RouteStatus::Failed),
            route(dec!(4), dec!(0), RouteStatus::Failed),
        ];
        assert_eq!(
            ExecutionReport::derive_status(dec!(10), &failed),
            ExecutionStatus::Failed
        );
    }

    #[test]
    fn test_urgency_execution_window() {
        assert_eq!(
            Urgency::Immediate.execution_window(),
            Duration::from_secs(1)
        );
        assert!(Urgency::Low.execution_window() > Urgency::High.execution_window());
    }
}
