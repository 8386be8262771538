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
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator::LiquidityAggregator;
use crate::error::{RouterError, RouterResult};
use crate::fees::FeeOptimizer;
use crate::orderbook::{MarketConditions, VenueBook};
use crate::slippage::{ImpactCheck, SlippageProtector};
use crate::splitter::{OrderSplitter, VenueLiquidity};
use crate::types::{OrderIntent, Route, RoutePlan, RoutingStrategy, Urgency, VenueId};
use crate::venue::VenueRegistry;
use crate::venue_latency::VenueLatencyTracker;

/// Engine-level tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// When false, every intent routes to the single best venue
    pub smart_routing_enabled: bool,
    /// Re-order candidate routes by effective fee cost
    pub fee_optimization: bool,
    /// A single venue must hold at least this multiple of the intent
    /// quantity for the engine to skip splitting
    pub min_liquidity_ratio: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            smart_routing_enabled: true,
            fee_optimization: true,
            min_liquidity_ratio: dec!(1.2),
        }
    }
}

/// Combines the aggregator, splitter, slippage protector and fee optimizer
/// into route plans.
///
/// The engine retains no reference to the plans it produces; each plan is an
/// immutable snapshot consumed once by the orchestrator.
pub struct RoutingEngine {
    config: EngineConfig,
    aggregator: Arc<LiquidityAggregator>,
    fees: Arc<FeeOptimizer>,
    registry: Arc<VenueRegistry>,
    latency: Arc<VenueLatencyTracker>,
    splitter: OrderSplitter,
    slippage: SlippageProtector,
}

impl RoutingEngine {
    pub fn new(
        config: EngineConfig,
        aggregator: Arc<LiquidityAggregator>,
        fees: Arc<FeeOptimizer>,
        registry: Arc<VenueRegistry>,
        latency: Arc<VenueLatencyTracker>,
        splitter: OrderSplitter,
        slippage: SlippageProtector,
    ) -> Self {
        Self {
            config,
            aggregator,
            fees,
            registry,
            latency,
            splitter,
            slippage,
        }
    }

    /// The slippage protector this engine plans with
    pub fn slippage_protector(&self) -> &SlippageProtector {
        &self.slippage
    }

    /// Produce a route plan for an intent from live market conditions
    pub fn plan(&self, intent: &OrderIntent) -> RouterResult<RoutePlan> {
        let conditions = self
            .aggregator
            .market_conditions(&intent.symbol)
            .ok_or_else(|| RouterError::NoEligibleVenues(intent.symbol.clone()))?;

        self.plan_with_conditions(intent, &conditions)
    }

    /// The routing pipeline proper; also the entry point for simulation,
    /// which feeds perturbed conditions
    pub fn plan_with_conditions(
        &self,
        intent: &OrderIntent,
        conditions: &MarketConditions,
    ) -> RouterResult<RoutePlan> {
        intent.validate()?;

        let mut warnings = Vec::new();

        match self.slippage.check_market_impact(intent, conditions) {
            ImpactCheck::Ok => {}
            ImpactCheck::Warn(reason) => warnings.push(reason),
            ImpactCheck::Block(reason) => {
                if intent.urgency == Urgency::Immediate {
                    warn!(
                        "Slippage block bypassed by Immediate urgency for {}: {}",
                        intent.symbol, reason
                    );
                    warnings.push(format!("slippage block bypassed: {}", reason));
                } else {
                    return Err(RouterError::SlippageProtection(reason));
                }
            }
        }

        let books = self.eligible_books(intent, conditions)?;
        let views = self.liquidity_views(intent, &books);

        let mut routes = if self.should_route_single(intent, &views) {
            self.single_venue_routes(intent, &books, &views)?
        } else {
            self.split_routes(intent, &books, &views)?
        };

        // Fee optimization re-sorts immediate dispatch; time-sliced plans
        // keep their temporal order
        let est_fees = if self.fee_optimization_enabled(intent) && !intent.strategy.is_time_sliced()
        {
            let (sorted, total) = self.fees.optimize(routes, intent.side);
            routes = sorted;
            total
        } else {
            for route in routes.iter_mut() {
                route.est_fee = self
                    .fees
                    .calculate(&route.venue, route.order_type, route.quantity, route.est_price)
                    .fee;
            }
            routes.iter().map(|r| r.est_fee).sum()
        };

        if intent.urgency != Urgency::Immediate {
            self.slippage.validate_execution(&routes, &conditions.book.venue_books)?;
        }

        let total_qty: Decimal = routes.iter().map(|r| r.quantity).sum();
        let est_vwap = if total_qty > Decimal::ZERO {
            routes
                .iter()
                .map(|r| r.quantity * r.est_price)
                .sum::<Decimal>()
                / total_qty
        } else {
            Decimal::ZERO
        };

        let confidence = self.confidence(&routes, conditions);
        self.accumulate_warnings(intent, &routes, conditions, &mut warnings);

        let plan = RoutePlan {
            request_id: Uuid::new_v4(),
            intent: intent.clone(),
            routes,
            est_vwap,
            est_fees,
            est_time: intent.urgency.execution_window(),
            confidence,
            warnings,
            created_at: Utc::now(),
        };

        info!(
            "Planned {} across {} venue(s), est_vwap {}, confidence {:.2} (request {})",
            plan.intent.symbol,
            plan.routes.len(),
            plan.est_vwap,
            plan.confidence,
            plan.request_id
        );

        Ok(plan)
    }

    fn fee_optimization_enabled(&self, intent: &OrderIntent) -> bool {
        self.config.fee_optimization || intent.strategy == RoutingStrategy::LowestFee
    }

    /// Per-venue books for venues the intent may route to
    fn eligible_books(
        &self,
        intent: &OrderIntent,
        conditions: &MarketConditions,
    ) -> RouterResult<HashMap<VenueId, VenueBook>> {
        let books: HashMap<VenueId, VenueBook> = conditions
            .book
            .venue_books
            .iter()
            .filter(|(venue, _)| {
                // Unknown venues only appear in tests; registered venues are
                // excluded while their health state is down
                self.registry
                    .state(venue)
                    .map(|state| state.available)
                    .unwrap_or(true)
            })
            .filter(|(venue, _)| !intent.avoid_venues.contains(*venue))
            .filter(|(venue, _)| {
                intent.preferred_venues.is_empty() || intent.preferred_venues.contains(*venue)
            })
            .map(|(venue, book)| (venue.clone(), book.clone()))
            .collect();

        if books.is_empty() {
            // An explicitly preferred venue that is known but down surfaces
            // as unavailable rather than ineligible
            for venue in &intent.preferred_venues {
                if let Some(state) = self.registry.state(venue) {
                    if !state.available {
                        return Err(RouterError::VenueUnavailable(venue.clone()));
                    }
                }
            }
            return Err(RouterError::NoEligibleVenues(intent.symbol.clone()));
        }

        Ok(books)
    }

    fn liquidity_views(
        &self,
        intent: &OrderIntent,
        books: &HashMap<VenueId, VenueBook>,
    ) -> Vec<VenueLiquidity> {
        books
            .values()
            .map(|book| {
                let mut view = VenueLiquidity::from_book(book, intent.side);
                view.avg_latency_ns = self.latency.avg_latency(&book.venue);
                view
            })
            .collect()
    }

    /// Single-venue vs split decision.
    ///
    /// Splitting is skipped only for strategies that do not carry their own
    /// split shape, and only when one venue can absorb the full quantity
    /// with headroom.
    fn should_route_single(&self, intent: &OrderIntent, views: &[VenueLiquidity]) -> bool {
        if !self.config.smart_routing_enabled {
            return true;
        }
        if !intent.strategy.allows_single_venue_shortcut() {
            return false;
        }

        let needed = intent.quantity * self.config.min_liquidity_ratio;
        views.iter().any(|v| v.available >= needed)
    }

    /// Build one route per venue able to absorb the full quantity, rank by
    /// effective cost, and keep the winner
    fn single_venue_routes(
        &self,
        intent: &OrderIntent,
        books: &HashMap<VenueId, VenueBook>,
        views: &[VenueLiquidity],
    ) -> RouterResult<Vec<Route>> {
        let needed = intent.quantity * self.config.min_liquidity_ratio;

        let mut candidates: Vec<Route> = views
            .iter()
            .filter(|v| v.available >= needed)
            .filter_map(|v| {
                let book = books.get(&v.venue)?;
                let est_price = book.walk(intent.side, intent.quantity)?.avg_price;
                Some(self.route_for(intent, &v.venue, intent.quantity, Decimal::ONE, est_price))
            })
            .collect();

        if candidates.is_empty() {
            return Err(RouterError::InsufficientLiquidity {
                symbol: intent.symbol.clone(),
                requested: intent.quantity.to_string(),
                available: views
                    .iter()
                    .map(|v| v.available)
                    .max()
                    .unwrap_or(Decimal::ZERO)
                    .to_string(),
            });
        }

        if self.fee_optimization_enabled(intent) {
            let (sorted, _) = self.fees.optimize(candidates, intent.side);
            candidates = sorted;
        } else {
            candidates.sort_by(|a, b| match intent.side {
                crate::types::Side::Buy => a.est_price.cmp(&b.est_price),
                crate::types::Side::Sell => b.est_price.cmp(&a.est_price),
            });
        }

        let mut winner = candidates.remove(0);
        winner.priority = 0;
        debug!(
            "Single-venue route: {} takes full quantity {}",
            winner.venue, winner.quantity
        );
        Ok(vec![winner])
    }

    /// Run the splitter and translate its assignments into priced routes
    fn split_routes(
        &self,
        intent: &OrderIntent,
        books: &HashMap<VenueId, VenueBook>,
        views: &[VenueLiquidity],
    ) -> RouterResult<Vec<Route>> {
        let splits = self.splitter.split(intent, views)?;

        let routes = splits
            .into_iter()
            .enumerate()
            .map(|(index, split)| {
                let est_price = books
                    .get(&split.venue)
                    .and_then(|book| book.walk(intent.side, split.quantity))
                    .map(|walk| walk.avg_price)
                    .or(intent.limit_price)
                    .unwrap_or(Decimal::ZERO);

                let mut route =
                    self.route_for(intent, &split.venue, split.quantity, split.ratio, est_price);
                route.priority = index as u32;
                route.time_delay = split.time_delay;
                route
            })
            .collect();

        Ok(routes)
    }

    fn route_for(
        &self,
        intent: &OrderIntent,
        venue: &str,
        quantity: Decimal,
        ratio: Decimal,
        est_price: Decimal,
    ) -> Route {
        Route {
            venue: venue.to_string(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity,
            order_type: intent.order_type,
            limit_price: intent.limit_price,
            est_price,
            est_fee: Decimal::ZERO,
            priority: 0,
            split_ratio: ratio,
            time_delay: Duration::ZERO,
        }
    }

    /// Plan confidence heuristic: 0.9 baseline, penalized for volatility,
    /// venue spread, and wide spreads. The spread penalty is skipped when
    /// the book has no resting ask to reference.
    fn confidence(&self, routes: &[Route], conditions: &MarketConditions) -> f64 {
        let mut confidence: f64 = 0.9;

        let slippage_config = self.slippage.config();
        let volatility_limit =
            slippage_config.max_volatility_std * slippage_config.baseline_volatility;
        if conditions.volatility > volatility_limit {
            confidence -= 0.2;
        }

        let venue_count = routes
            .iter()
            .map(|r| r.venue.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        if venue_count > 3 {
            confidence -= 0.1;
        }

        if conditions.best_ask.is_some() {
            if let Some(spread_bps) = conditions.spread_bps {
                if spread_bps > dec!(100) {
                    confidence -= 0.1;
                }
            }
        }

        confidence.clamp(0.0, 1.0)
    }

    fn accumulate_warnings(
        &self,
        intent: &OrderIntent,
        routes: &[Route],
        conditions: &MarketConditions,
        warnings: &mut Vec<String>,
    ) {
        let slippage_config = self.slippage.config();
        let volatility_limit =
            slippage_config.max_volatility_std * slippage_config.baseline_volatility;
        if conditions.volatility > volatility_limit {
            warnings.push(format!(
                "high volatility: {:.4} above {:.4}",
                conditions.volatility, volatility_limit
            ));
        }

        let opposing = conditions.book.opposing_quantity(intent.side);
        if opposing < intent.quantity * Decimal::TWO {
            warnings.push(format!(
                "low liquidity: opposing depth {} for order of {}",
                opposing, intent.quantity
            ));
        }

        if let Some(max_ratio) = routes.iter().map(|r| r.split_ratio).max() {
            if routes.len() == 1 || max_ratio > dec!(0.8) {
                warnings.push(format!(
                    "single-venue concentration: {} carries {}%",
                    routes
                        .iter()
                        .max_by_key(|r| r.split_ratio)
                        .map(|r| r.venue.as_str())
                        .unwrap_or(""),
                    (max_ratio * dec!(100)).round_dp(1)
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorConfig;
    use crate::fees::FeeSchedule;
    use crate::orderbook::{AggregatedBook, PriceLevel};
    use crate::slippage::SlippageConfig;
    use crate::splitter::SplitterConfig;
    use crate::types::Side;
    use crate::venue_latency::create_venue_latency_tracker;

    fn engine_with(fees: Arc<FeeOptimizer>) -> RoutingEngine {
        let registry = Arc::new(VenueRegistry::new());
        let aggregator = Arc::new(LiquidityAggregator::new(
            AggregatorConfig::default(),
            Arc::clone(&registry),
        ));
        RoutingEngine::new(
            EngineConfig::default(),
            aggregator,
            fees,
            registry,
            create_venue_latency_tracker(),
            OrderSplitter::new(SplitterConfig::default()),
            SlippageProtector::new(SlippageConfig::default()),
        )
    }

    fn engine() -> RoutingEngine {
        engine_with(Arc::new(FeeOptimizer::new()))
    }

    fn conditions_for(books: Vec<VenueBook>) -> MarketConditions {
        let merged = Arc::new(AggregatedBook::merge("BTC/USDT", books));
        MarketConditions::from_book(merged, 0.0)
    }

    fn level(price: Decimal, qty: Decimal) -> PriceLevel {
        PriceLevel::new(price, qty)
    }

    #[test]
    fn test_single_venue_market_buy_with_ample_liquidity() {
        let conditions = conditions_for(vec![VenueBook::new(
            "binance",
            "BTC/USDT",
            vec![],
            vec![level(dec!(100), dec!(5)), level(dec!(101), dec!(10))],
        )]);

        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(3));
        let plan = engine().plan_with_conditions(&intent, &conditions).unwrap();

        assert_eq!(plan.routes.len(), 1);
        assert_eq!(plan.routes[0].venue, "binance");
        assert_eq!(plan.routes[0].quantity, dec!(3));
        assert_eq!(plan.routes[0].est_price, dec!(100));
        assert!(plan.confidence >= 0.8);
    }

    #[test]
    fn test_proportional_split_across_two_venues() {
        let conditions = conditions_for(vec![
            VenueBook::new(
                "v1",
                "X/USDT",
                vec![level(dec!(100), dec!(60))],
                vec![level(dec!(100.1), dec!(50))],
            ),
            VenueBook::new(
                "v2",
                "X/USDT",
                vec![level(dec!(100), dec!(40))],
                vec![level(dec!(100.1), dec!(40))],
            ),
        ]);

        let intent = OrderIntent::market("X/USDT", Side::Sell, dec!(10))
            .with_strategy(RoutingStrategy::Proportional);
        let plan = engine().plan_with_conditions(&intent, &conditions).unwrap();

        assert_eq!(plan.routes.len(), 2);
        let v1 = plan.routes.iter().find(|r| r.venue == "v1").unwrap();
        let v2 = plan.routes.iter().find(|r| r.venue == "v2").unwrap();
        assert_eq!(v1.quantity, dec!(6));
        assert_eq!(v2.quantity, dec!(4));
        assert_eq!(v1.split_ratio, dec!(0.6));
        assert_eq!(v2.split_ratio, dec!(0.4));

        let qty_total: Decimal = plan.routes.iter().map(|r| r.quantity).sum();
        assert_eq!(qty_total, intent.quantity);
    }

    #[test]
    fn test_slippage_block_rejects_unless_immediate() {
        let conditions = conditions_for(vec![VenueBook::new(
            "binance",
            "BTC/USDT",
            vec![],
            vec![level(dec!(100), dec!(1)), level(dec!(110), dec!(100))],
        )]);

        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(50))
            .with_max_slippage_bps(100);
        let err = engine()
            .plan_with_conditions(&intent, &conditions)
            .unwrap_err();
        assert!(matches!(err, RouterError::SlippageProtection(_)));

        let immediate = intent.with_urgency(Urgency::Immediate);
        let plan = engine()
            .plan_with_conditions(&immediate, &conditions)
            .unwrap();
        assert!(!plan.warnings.is_empty());
    }

    #[test]
    fn test_fee_reordering_prefers_cheaper_venue() {
        let fees = Arc::new(FeeOptimizer::new());
        fees.update_schedule("pricey", FeeSchedule::flat(dec!(0.001), dec!(0.001), "USDT"));
        fees.update_schedule("bargain", FeeSchedule::flat(dec!(0.0008), dec!(0.0008), "USDT"));

        let conditions = conditions_for(vec![
            VenueBook::new(
                "pricey",
                "BTC/USDT",
                vec![level(dec!(99.99), dec!(50))],
                vec![level(dec!(100), dec!(50))],
            ),
            VenueBook::new(
                "bargain",
                "BTC/USDT",
                vec![level(dec!(99.99), dec!(50))],
                vec![level(dec!(100), dec!(50))],
            ),
        ]);

        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(1))
            .with_strategy(RoutingStrategy::LowestFee);
        let plan = engine_with(fees)
            .plan_with_conditions(&intent, &conditions)
            .unwrap();

        assert_eq!(plan.routes[0].venue, "bargain");
        assert_eq!(plan.est_fees, dec!(0.08));
    }

    #[test]
    fn test_avoided_venues_never_receive_routes() {
        let conditions = conditions_for(vec![
            VenueBook::new(
                "good",
                "X/USDT",
                vec![level(dec!(100), dec!(50))],
                vec![level(dec!(100.1), dec!(50))],
            ),
            VenueBook::new(
                "banned",
                "X/USDT",
                vec![level(dec!(100), dec!(500))],
                vec![level(dec!(100.1), dec!(500))],
            ),
        ]);

        let mut intent = OrderIntent::market("X/USDT", Side::Sell, dec!(10))
            .with_strategy(RoutingStrategy::Proportional);
        intent.avoid_venues = vec!["banned".to_string()];

        let plan = engine().plan_with_conditions(&intent, &conditions).unwrap();
        assert!(plan.routes.iter().all(|r| r.venue != "banned"));
    }

    #[test]
    fn test_invalid_intent_is_rejected() {
        let conditions = conditions_for(vec![VenueBook::new(
            "binance",
            "BTC/USDT",
            vec![],
            vec![level(dec!(100), dec!(10))],
        )]);

        let intent = OrderIntent::market("BTC/USDT", Side::Buy, Decimal::ZERO);
        let err = engine()
            .plan_with_conditions(&intent, &conditions)
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidIntent(_)));
    }

    #[test]
    fn test_no_eligible_venues() {
        let conditions = conditions_for(vec![VenueBook::new(
            "only",
            "BTC/USDT",
            vec![],
            vec![level(dec!(100), dec!(10))],
        )]);

        let mut intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(1));
        intent.avoid_venues = vec!["only".to_string()];

        let err = engine()
            .plan_with_conditions(&intent, &conditions)
            .unwrap_err();
        assert!(matches!(err, RouterError::NoEligibleVenues(_)));
    }

    #[test]
    fn test_iceberg_plan_carries_time_delays() {
        let conditions = conditions_for(vec![
            VenueBook::new(
                "v1",
                "X/USDT",
                vec![level(dec!(100), dec!(500))],
                vec![level(dec!(100.1), dec!(500))],
            ),
            VenueBook::new(
                "v2",
                "X/USDT",
                vec![level(dec!(100), dec!(500))],
                vec![level(dec!(100.1), dec!(500))],
            ),
        ]);

        let intent = OrderIntent::market("X/USDT", Side::Buy, dec!(100))
            .with_strategy(RoutingStrategy::Iceberg);
        let plan = engine().plan_with_conditions(&intent, &conditions).unwrap();

        assert_eq!(plan.routes.len(), 10);
        for (i, route) in plan.routes.iter().enumerate() {
            assert_eq!(route.time_delay, Duration::from_secs(5 * i as u64));
            assert_eq!(route.quantity, dec!(10));
        }
        assert_ne!(plan.routes[0].venue, plan.routes[1].venue);
    }

    #[test]
    fn test_plan_estimates_are_stable_on_frozen_snapshot() {
        let conditions = conditions_for(vec![VenueBook::new(
            "binance",
            "BTC/USDT",
            vec![level(dec!(99.9), dec!(100))],
            vec![level(dec!(100), dec!(100))],
        )]);

        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(5));
        let eng = engine();

        let first = eng.plan_with_conditions(&intent, &conditions).unwrap();
        let second = eng.plan_with_conditions(&intent, &conditions).unwrap();

        assert_eq!(first.est_vwap, second.est_vwap);
        assert_eq!(first.est_fees, second.est_fees);
    }
}
