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

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::types::{
    ExecutedRoute, ExecutionReport, ExecutionStatus, Route, RoutePlan, RouteStatus, Side,
};
use crate::venue::{VenueOrder, VenueRegistry};
use crate::venue_latency::VenueLatencyTracker;

/// Orchestrator tuning knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum child orders in flight at once
    pub max_concurrent_orders: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_orders: 10,
        }
    }
}

/// Cooperative cancellation signal for one plan's execution.
///
/// Cancellation is observed between placements; child orders already sent
/// are never aborted mid-flight.
pub struct CancelToken {
    tx: watch::Sender<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once cancellation is signalled; pends forever otherwise
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatches a plan's child orders and assembles the execution report.
///
/// Parallel fan-out is used for immediate strategies, bounded by the
/// concurrency cap; Iceberg and TWAP plans dispatch sequentially honoring
/// each route's delay. Per-route failures never abort sibling placements.
pub struct ExecutionOrchestrator {
    config: OrchestratorConfig,
    registry: Arc<VenueRegistry>,
    latency: Arc<VenueLatencyTracker>,
}

impl ExecutionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<VenueRegistry>,
        latency: Arc<VenueLatencyTracker>,
    ) -> Self {
        Self {
            config,
            registry,
            latency,
        }
    }

    /// Execute a plan to completion and assemble its report.
    ///
    /// The plan is consumed; the orchestrator is the end of its lifecycle.
    pub async fn execute(&self, plan: RoutePlan, cancel: &CancelToken) -> ExecutionReport {
        let started = Instant::now();
        info!(
            "Executing plan {} ({} routes, strategy {})",
            plan.request_id,
            plan.routes.len(),
            plan.intent.strategy
        );

        let (mut executed, mut errors) = if plan.intent.strategy.is_time_sliced() {
            self.dispatch_delayed(&plan, cancel).await
        } else {
            self.dispatch_parallel(&plan, cancel).await
        };

        self.compensate_paired_legs(&plan, &mut executed, &mut errors)
            .await;

        self.assemble_report(&plan, executed, errors, started.elapsed(), cancel)
    }

    /// Fan out placements concurrently, capped by the task pool size
    async fn dispatch_parallel(
        &self,
        plan: &RoutePlan,
        cancel: &CancelToken,
    ) -> (Vec<ExecutedRoute>, Vec<String>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_orders));
        let results: Arc<Mutex<Vec<(usize, ExecutedRoute, Option<String>)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(plan.routes.len())));

        let tasks = plan.routes.iter().enumerate().map(|(index, route)| {
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let deadline = plan.intent.urgency.execution_window();
            async move {
                let _permit = semaphore.acquire().await;

                let (executed, error) = if cancel.is_cancelled() {
                    (cancelled_route(route), None)
                } else {
                    self.place_route(route, plan, deadline).await
                };

                // Lock held only to append
                results.lock().push((index, executed, error));
            }
        });

        join_all(tasks).await;

        let mut collected = Arc::try_unwrap(results)
            .map(|m| m.into_inner())
            .unwrap_or_default();
        collected.sort_by_key(|(index, _, _)| *index);

        let mut executed = Vec::with_capacity(collected.len());
        let mut errors = Vec::new();
        for (_, route, error) in collected {
            executed.push(route);
            errors.extend(error);
        }
        (executed, errors)
    }

    /// Dispatch slices sequentially, honoring each route's delay.
    ///
    /// Cancellation of the parent plan aborts all pending slices.
    async fn dispatch_delayed(
        &self,
        plan: &RoutePlan,
        cancel: &CancelToken,
    ) -> (Vec<ExecutedRoute>, Vec<String>) {
        let started = Instant::now();
        let deadline = plan.intent.urgency.execution_window();
        let mut executed = Vec::with_capacity(plan.routes.len());
        let mut errors = Vec::new();
        let mut aborted = false;

        for route in &plan.routes {
            if aborted || cancel.is_cancelled() {
                executed.push(cancelled_route(route));
                continue;
            }

            let elapsed = started.elapsed();
            if route.time_delay > elapsed {
                let wait = route.time_delay - elapsed;
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => {
                        debug!("Plan {} cancelled; aborting pending slices", plan.request_id);
                        aborted = true;
                        executed.push(cancelled_route(route));
                        continue;
                    }
                }
            }

            let (result, error) = self.place_route(route, plan, deadline).await;
            executed.push(result);
            errors.extend(error);
        }

        (executed, errors)
    }

    /// Place one child order and record its terminal state.
    ///
    /// The venue client reports the terminal status; no order state machine
    /// lives on the venue side.
    async fn place_route(
        &self,
        route: &Route,
        plan: &RoutePlan,
        deadline: Duration,
    ) -> (ExecutedRoute, Option<String>) {
        if !self.registry.is_available(&route.venue) {
            warn!(
                "Route for plan {} targets unavailable venue {}",
                plan.request_id, route.venue
            );
            return (
                failed_route(route),
                Some(format!("{}: venue unavailable", route.venue)),
            );
        }

        let client = match self.registry.client(&route.venue) {
            Some(client) => client,
            None => {
                return (
                    failed_route(route),
                    Some(format!("{}: venue not registered", route.venue)),
                );
            }
        };

        let order = VenueOrder {
            symbol: route.symbol.clone(),
            side: route.side,
            quantity: route.quantity,
            order_type: route.order_type,
            limit_price: route.limit_price,
            time_in_force: plan.intent.time_in_force,
        };

        debug!(
            "Placing {} {} on {} for plan {}",
            route.quantity, route.symbol, route.venue, plan.request_id
        );

        let start = Instant::now();
        let result = tokio::time::timeout(deadline, client.place_order(&order, deadline)).await;
        self.latency.record_since(&route.venue, start);

        match result {
            Ok(Ok(placed)) => (
                ExecutedRoute {
                    venue: route.venue.clone(),
                    exchange_order_id: Some(placed.exchange_order_id),
                    requested_qty: route.quantity,
                    executed_qty: placed.executed_qty.min(route.quantity),
                    avg_price: placed.avg_price,
                    fee: placed.fee,
                    status: placed.status,
                    ts: Utc::now(),
                },
                None,
            ),
            Ok(Err(err)) => {
                self.registry.record_failure(&route.venue, err.to_string());
                (
                    failed_route(route),
                    Some(format!("{}: {}", route.venue, err)),
                )
            }
            Err(_) => (
                failed_route(route),
                Some(format!(
                    "{}: placement timed out after {}ms",
                    route.venue,
                    deadline.as_millis()
                )),
            ),
        }
    }

    /// Compensating action for arbitrage-style paired placements.
    ///
    /// When a plan carries exactly one buy leg and one sell leg and only one
    /// of them failed, the surviving leg is cancelled best-effort. A failed
    /// compensating cancel leaves both legs' errors in the report.
    async fn compensate_paired_legs(
        &self,
        plan: &RoutePlan,
        executed: &mut [ExecutedRoute],
        errors: &mut Vec<String>,
    ) {
        if executed.len() != 2 || plan.routes.len() != 2 {
            return;
        }
        if plan.routes[0].side == plan.routes[1].side {
            return;
        }

        let failed_idx = match (
            executed[0].status == RouteStatus::Failed,
            executed[1].status == RouteStatus::Failed,
        ) {
            (true, false) => 0,
            (false, true) => 1,
            _ => return,
        };
        let surviving_idx = 1 - failed_idx;

        let surviving = &executed[surviving_idx];
        let cancellable = matches!(
            surviving.status,
            RouteStatus::Sent | RouteStatus::Accepted | RouteStatus::PartiallyFilled
        );
        if !cancellable {
            return;
        }

        let order_id = match &surviving.exchange_order_id {
            Some(id) => id.clone(),
            None => return,
        };
        let venue = surviving.venue.clone();

        warn!(
            "Paired leg failed for plan {}; cancelling surviving leg on {}",
            plan.request_id, venue
        );

        let client = match self.registry.client(&venue) {
            Some(client) => client,
            None => return,
        };

        let deadline = plan.intent.urgency.execution_window();
        match tokio::time::timeout(deadline, client.cancel_order(&order_id, deadline)).await {
            Ok(Ok(())) => {
                executed[surviving_idx].status = RouteStatus::Cancelled;
                executed[surviving_idx].executed_qty = Decimal::ZERO;
            }
            Ok(Err(err)) => {
                warn!("Compensating cancel failed on {}: {}", venue, err);
                executed[surviving_idx].status = RouteStatus::Failed;
                errors.push(format!("{}: compensating cancel failed: {}", venue, err));
            }
            Err(_) => {
                warn!("Compensating cancel timed out on {}", venue);
                executed[surviving_idx].status = RouteStatus::Failed;
                errors.push(format!("{}: compensating cancel timed out", venue));
            }
        }
    }

    fn assemble_report(
        &self,
        plan: &RoutePlan,
        executed: Vec<ExecutedRoute>,
        errors: Vec<String>,
        exec_time: Duration,
        cancel: &CancelToken,
    ) -> ExecutionReport {
        let total_executed: Decimal = executed.iter().map(|r| r.executed_qty).sum();

        let avg_price = if total_executed > Decimal::ZERO {
            executed
                .iter()
                .map(|r| r.executed_qty * r.avg_price)
                .sum::<Decimal>()
                / total_executed
        } else {
            Decimal::ZERO
        };

        let total_fees: Decimal = executed.iter().map(|r| r.fee).sum();

        let reference = plan.intent.limit_price.unwrap_or(plan.est_vwap);
        let slippage_bps = if total_executed > Decimal::ZERO && reference > Decimal::ZERO {
            let raw = (avg_price - reference) / reference * Decimal::from(10_000);
            match plan.intent.side {
                Side::Buy => raw,
                Side::Sell => -raw,
            }
        } else {
            Decimal::ZERO
        };

        let status = if cancel.is_cancelled() && total_executed == Decimal::ZERO {
            ExecutionStatus::Cancelled
        } else {
            ExecutionReport::derive_status(plan.intent.quantity, &executed)
        };

        info!(
            "Plan {} finished {:?}: executed {}/{} at avg {}",
            plan.request_id, status, total_executed, plan.intent.quantity, avg_price
        );

        ExecutionReport {
            request_id: plan.request_id,
            status,
            executed_routes: executed,
            total_executed,
            avg_price,
            total_fees,
            slippage_bps,
            exec_time,
            errors,
        }
    }
}

fn failed_route(route: &Route) -> ExecutedRoute {
    ExecutedRoute {
        venue: route.venue.clone(),
        exchange_order_id: None,
        requested_qty: route.quantity,
        executed_qty: Decimal::ZERO,
        avg_price: Decimal::ZERO,
        fee: Decimal::ZERO,
        status: RouteStatus::Failed,
        ts: Utc::now(),
    }
}

fn cancelled_route(route: &Route) -> ExecutedRoute {
    ExecutedRoute {
        venue: route.venue.clone(),
        exchange_order_id: None,
        requested_qty: route.quantity,
        executed_qty: Decimal::ZERO,
        avg_price: Decimal::ZERO,
        fee: Decimal::ZERO,
        status: RouteStatus::Cancelled,
        ts: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RouterError, RouterResult};
    use crate::orderbook::VenueBook;
    use crate::types::{OrderIntent, OrderType, RoutingStrategy, Urgency};
    use crate::venue::{AccountInfo, PlacedOrder, VenueClient};
    use crate::venue_latency::create_venue_latency_tracker;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    #[derive(Clone, Copy)]
    enum Behavior {
        Fill(Decimal),
        Rest,
        Fail,
    }

    struct MockExecVenue {
        name: String,
        behavior: Behavior,
        cancel_fails: bool,
        placements: AtomicU32,
        cancels: AtomicU32,
    }

    impl MockExecVenue {
        fn new(name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                behavior,
                cancel_fails: false,
                placements: AtomicU32::new(0),
                cancels: AtomicU32::new(0),
            })
        }

        fn with_failing_cancel(name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                behavior,
                cancel_fails: true,
                placements: AtomicU32::new(0),
                cancels: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl VenueClient for MockExecVenue {
        async fn get_order_book(
            &self,
            symbol: &str,
            _deadline: Duration,
        ) -> RouterResult<VenueBook> {
            Ok(VenueBook::new(self.name.clone(), symbol, vec![], vec![]))
        }

        async fn place_order(
            &self,
            order: &VenueOrder,
            _deadline: Duration,
        ) -> RouterResult<PlacedOrder> {
            self.placements.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Fill(price) => Ok(PlacedOrder {
                    exchange_order_id: format!("{}-1", self.name),
                    status: RouteStatus::Filled,
                    executed_qty: order.quantity,
                    avg_price: price,
                    fee: order.quantity * price * dec!(0.001),
                    fee_asset: "USDT".to_string(),
                }),
                Behavior::Rest => Ok(PlacedOrder {
                    exchange_order_id: format!("{}-1", self.name),
                    status: RouteStatus::Accepted,
                    executed_qty: Decimal::ZERO,
                    avg_price: Decimal::ZERO,
                    fee: Decimal::ZERO,
                    fee_asset: "USDT".to_string(),
                }),
                Behavior::Fail => Err(RouterError::VenueCallFailed {
                    venue: self.name.clone(),
                    message: "order rejected by venue".to_string(),
                }),
            }
        }

        async fn cancel_order(&self, _id: &str, _deadline: Duration) -> RouterResult<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            if self.cancel_fails {
                Err(RouterError::VenueCallFailed {
                    venue: self.name.clone(),
                    message: "cancel rejected".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn get_account(&self, _deadline: Duration) -> RouterResult<AccountInfo> {
            Ok(AccountInfo {
                balances: HashMap::new(),
                can_trade: true,
            })
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn route(venue: &str, side: Side, qty: Decimal, delay: Duration) -> Route {
        Route {
            venue: venue.to_string(),
            symbol: "BTC/USDT".to_string(),
            side,
            quantity: qty,
            order_type: OrderType::Market,
            limit_price: None,
            est_price: dec!(100),
            est_fee: Decimal::ZERO,
            priority: 0,
            split_ratio: Decimal::ONE,
            time_delay: delay,
        }
    }

    fn plan(strategy: RoutingStrategy, routes: Vec<Route>) -> RoutePlan {
        let quantity = routes.iter().map(|r| r.quantity).sum();
        let side = routes.first().map(|r| r.side).unwrap_or(Side::Buy);
        let mut intent = OrderIntent::market("BTC/USDT", side, quantity);
        intent.strategy = strategy;
        intent.urgency = Urgency::High;

        RoutePlan {
            request_id: Uuid::new_v4(),
            intent,
            routes,
            est_vwap: dec!(100),
            est_fees: Decimal::ZERO,
            est_time: Duration::from_secs(5),
            confidence: 0.9,
            warnings: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn orchestrator(registry: Arc<VenueRegistry>) -> ExecutionOrchestrator {
        ExecutionOrchestrator::new(
            OrchestratorConfig::default(),
            registry,
            create_venue_latency_tracker(),
        )
    }

    #[tokio::test]
    async fn test_parallel_dispatch_completes() {
        let registry = Arc::new(VenueRegistry::new());
        registry.register("v1", MockExecVenue::new("v1", Behavior::Fill(dec!(100))));
        registry.register("v2", MockExecVenue::new("v2", Behavior::Fill(dec!(101))));

        let plan = plan(
            RoutingStrategy::Balanced,
            vec![
                route("v1", Side::Buy, dec!(6), Duration::ZERO),
                route("v2", Side::Buy, dec!(4), Duration::ZERO),
            ],
        );

        let report = orchestrator(registry)
            .execute(plan, &CancelToken::new())
            .await;

        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(report.total_executed, dec!(10));
        // Volume-weighted: (6*100 + 4*101) / 10
        assert_eq!(report.avg_price, dec!(100.4));
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_partial_execution_on_venue_failure() {
        let registry = Arc::new(VenueRegistry::new());
        registry.register("v1", MockExecVenue::new("v1", Behavior::Fill(dec!(100))));
        registry.register("v2", MockExecVenue::new("v2", Behavior::Fail));

        let plan = plan(
            RoutingStrategy::Balanced,
            vec![
                route("v1", Side::Buy, dec!(6), Duration::ZERO),
                route("v2", Side::Buy, dec!(4), Duration::ZERO),
            ],
        );

        let report = orchestrator(registry)
            .execute(plan, &CancelToken::new())
            .await;

        assert_eq!(report.status, ExecutionStatus::Partial);
        assert_eq!(report.total_executed, dec!(6));
        assert_eq!(report.executed_routes[1].status, RouteStatus::Failed);
        assert!(!report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_all_failures_yield_failed_report() {
        let registry = Arc::new(VenueRegistry::new());
        registry.register("v1", MockExecVenue::new("v1", Behavior::Fail));

        let plan = plan(
            RoutingStrategy::Balanced,
            vec![route("v1", Side::Buy, dec!(5), Duration::ZERO)],
        );

        let report = orchestrator(registry)
            .execute(plan, &CancelToken::new())
            .await;

        assert_eq!(report.status, ExecutionStatus::Failed);
        assert_eq!(report.total_executed, Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_dispatch_honors_slice_delays() {
        let registry = Arc::new(VenueRegistry::new());
        let venue = MockExecVenue::new("v1", Behavior::Fill(dec!(100)));
        registry.register("v1", venue.clone());

        let plan = plan(
            RoutingStrategy::TWAP,
            vec![
                route("v1", Side::Buy, dec!(2), Duration::ZERO),
                route("v1", Side::Buy, dec!(2), Duration::from_secs(60)),
                route("v1", Side::Buy, dec!(2), Duration::from_secs(120)),
            ],
        );

        let report = orchestrator(registry)
            .execute(plan, &CancelToken::new())
            .await;

        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(venue.placements.load(Ordering::SeqCst), 3);
        assert_eq!(report.total_executed, dec!(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_pending_slices() {
        let registry = Arc::new(VenueRegistry::new());
        let venue = MockExecVenue::new("v1", Behavior::Fill(dec!(100)));
        registry.register("v1", venue.clone());

        let plan = plan(
            RoutingStrategy::Iceberg,
            vec![
                route("v1", Side::Buy, dec!(2), Duration::ZERO),
                route("v1", Side::Buy, dec!(2), Duration::from_secs(3600)),
                route("v1", Side::Buy, dec!(2), Duration::from_secs(7200)),
            ],
        );

        let cancel = CancelToken::new();
        let orchestrator = orchestrator(registry);

        let exec = orchestrator.execute(plan, &cancel);
        tokio::pin!(exec);

        // Let the first slice go out, then cancel during the second delay
        let report = tokio::select! {
            report = &mut exec => report,
            _ = async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                cancel.cancel();
                std::future::pending::<()>().await
            } => unreachable!(),
        };

        assert_eq!(venue.placements.load(Ordering::SeqCst), 1);
        assert_eq!(report.total_executed, dec!(2));
        assert_eq!(report.status, ExecutionStatus::Partial);
        assert_eq!(report.executed_routes[1].status, RouteStatus::Cancelled);
        assert_eq!(report.executed_routes[2].status, RouteStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_paired_leg_compensation_cancels_survivor() {
        let registry = Arc::new(VenueRegistry::new());
        let resting = MockExecVenue::new("maker", Behavior::Rest);
        registry.register("maker", resting.clone());
        registry.register("taker", MockExecVenue::new("taker", Behavior::Fail));

        let plan = plan(
            RoutingStrategy::Balanced,
            vec![
                route("maker", Side::Buy, dec!(1), Duration::ZERO),
                route("taker", Side::Sell, dec!(1), Duration::ZERO),
            ],
        );

        let report = orchestrator(registry)
            .execute(plan, &CancelToken::new())
            .await;

        assert_eq!(resting.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(report.executed_routes[0].status, RouteStatus::Cancelled);
        assert_eq!(report.executed_routes[1].status, RouteStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_compensating_cancel_records_both_errors() {
        let registry = Arc::new(VenueRegistry::new());
        let resting = MockExecVenue::with_failing_cancel("maker", Behavior::Rest);
        registry.register("maker", resting.clone());
        registry.register("taker", MockExecVenue::new("taker", Behavior::Fail));

        let plan = plan(
            RoutingStrategy::Balanced,
            vec![
                route("maker", Side::Buy, dec!(1), Duration::ZERO),
                route("taker", Side::Sell, dec!(1), Duration::ZERO),
            ],
        );

        let report = orchestrator(registry)
            .execute(plan, &CancelToken::new())
            .await;

        assert_eq!(resting.cancels.load(Ordering::SeqCst), 1);
        // Both legs end up failed and both surface in the error list
        assert_eq!(report.executed_routes[0].status, RouteStatus::Failed);
        assert_eq!(report.executed_routes[1].status, RouteStatus::Failed);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_sell_slippage_is_sign_flipped() {
        let registry = Arc::new(VenueRegistry::new());
        // Fills below the 100 reference: adverse for a sell
        registry.register("v1", MockExecVenue::new("v1", Behavior::Fill(dec!(99))));

        let plan = plan(
            RoutingStrategy::Balanced,
            vec![route("v1", Side::Sell, dec!(1), Duration::ZERO)],
        );

        let report = orchestrator(registry)
            .execute(plan, &CancelToken::new())
            .await;

        // (99 - 100) / 100 = -100 bps, flipped to +100 for the sell
        assert_eq!(report.slippage_bps, dec!(100));
    }

    #[tokio::test]
    async fn test_unavailable_venue_fails_route() {
        let registry = Arc::new(VenueRegistry::new());
        registry.register("down", MockExecVenue::new("down", Behavior::Fill(dec!(100))));
        registry.set_available("down", false, Some("probe failed".to_string()));

        let plan = plan(
            RoutingStrategy::Balanced,
            vec![route("down", Side::Buy, dec!(1), Duration::ZERO)],
        );

        let report = orchestrator(registry)
            .execute(plan, &CancelToken::new())
            .await;

        assert_eq!(report.status, ExecutionStatus::Failed);
        assert_eq!(report.executed_routes[0].status, RouteStatus::Failed);
        assert!(!report.errors.is_empty());
    }
}
