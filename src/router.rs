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
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator::{AggregatorConfig, LiquidityAggregator};
use crate::config::RouterConfig;
use crate::engine::{EngineConfig, RoutingEngine};
use crate::error::{RouterError, RouterResult};
use crate::execution::{CancelToken, ExecutionOrchestrator, OrchestratorConfig};
use crate::fees::FeeOptimizer;
use crate::intake::{IntakeEvent, IntakeHandle, IntakeProducer, OrderIntake, TokenBucket};
use crate::orderbook::{AggregatedBook, MarketConditions, PriceLevel, VenueBook};
use crate::slippage::{SlippageConfig, SlippageProtector};
use crate::splitter::{OrderSplitter, SplitterConfig};
use crate::tracker::{PerformanceTracker, TrackerConfig, TrackerSnapshot};
use crate::types::{
    ExecutionReport, MarketScenario, OrderIntent, RoutePlan, SimulationResult, VenueId,
};
use crate::venue::{AccountInfo, SecretStore, TtlCache, VenueClient, VenueInfo, VenueRegistry, VenueState};
use crate::venue_latency::{VenueLatencyStats, VenueLatencyTracker};

/// Deadline for a single health probe
const PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// Maximum venues cached in the account cache
const ACCOUNT_CACHE_ENTRIES: usize = 64;

/// Combined metrics snapshot exposed by the façade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterMetrics {
    pub tracker: TrackerSnapshot,
    pub rejected_orders: u64,
    pub venues: HashMap<VenueId, VenueState>,
    pub venue_latency: HashMap<String, VenueLatencyStats>,
}

struct RunState {
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    intake: Option<IntakeHandle>,
}

/// Public surface of the smart order router.
///
/// Owns the aggregator, fee optimizer, routing engine, orchestrator and
/// tracker, plus the venue registry; components hold no reference back to
/// the façade. Plans move from the active map into execution exactly once.
pub struct SmartOrderRouter {
    config: RouterConfig,
    registry: Arc<VenueRegistry>,
    aggregator: Arc<LiquidityAggregator>,
    fees: Arc<FeeOptimizer>,
    engine: RoutingEngine,
    orchestrator: ExecutionOrchestrator,
    tracker: Arc<PerformanceTracker>,
    latency: Arc<VenueLatencyTracker>,
    secrets: Option<Arc<dyn SecretStore>>,
    rate_limiter: TokenBucket,
    account_cache: Arc<TtlCache<VenueId, AccountInfo>>,
    rejected: Arc<AtomicU64>,
    intake: Mutex<Option<OrderIntake>>,
    active_plans: Mutex<HashMap<Uuid, (RoutePlan, Arc<CancelToken>)>>,
    executing: Mutex<HashMap<Uuid, Arc<CancelToken>>>,
    run: Mutex<Option<RunState>>,
}

impl SmartOrderRouter {
    pub fn new(config: RouterConfig) -> Self {
        let registry = Arc::new(VenueRegistry::new());
        let latency = Arc::new(VenueLatencyTracker::new());
        let fees = Arc::new(FeeOptimizer::new());

        let aggregator = Arc::new(LiquidityAggregator::new(
            AggregatorConfig {
                refresh_interval: Duration::from_millis(config.refresh_interval_ms),
                staleness_budget: Duration::from_millis(config.staleness_budget_ms),
                retry_attempts: config.retry_attempts,
                ..AggregatorConfig::default()
            },
            Arc::clone(&registry),
        ));

        let splitter = OrderSplitter::new(SplitterConfig {
            min_size: config.min_split_size,
            max_venues: config.max_venues_per_split,
            ..SplitterConfig::default()
        });

        let slippage = SlippageProtector::new(SlippageConfig {
            blocking_bps: Decimal::from(config.max_slippage_bps),
            ..SlippageConfig::default()
        });

        let engine = RoutingEngine::new(
            EngineConfig {
                smart_routing_enabled: config.smart_routing_enabled,
                fee_optimization: config.fee_optimization,
                min_liquidity_ratio: config.min_liquidity_ratio,
            },
            Arc::clone(&aggregator),
            Arc::clone(&fees),
            Arc::clone(&registry),
            Arc::clone(&latency),
            splitter,
            slippage,
        );

        let orchestrator = ExecutionOrchestrator::new(
            OrchestratorConfig {
                max_concurrent_orders: config.max_concurrent_orders,
            },
            Arc::clone(&registry),
            Arc::clone(&latency),
        );

        let intake = OrderIntake::new(config.order_intake_capacity);
        let rejected = intake.rejected_counter();

        Self {
            rate_limiter: TokenBucket::new(config.max_orders_per_second),
            account_cache: Arc::new(TtlCache::new(
                Duration::from_millis(config.cache_ttl_ms),
                ACCOUNT_CACHE_ENTRIES,
            )),
            registry,
            aggregator,
            fees,
            engine,
            orchestrator,
            tracker: Arc::new(PerformanceTracker::new(TrackerConfig::default())),
            latency,
            secrets: None,
            rejected,
            intake: Mutex::new(Some(intake)),
            active_plans: Mutex::new(HashMap::new()),
            executing: Mutex::new(HashMap::new()),
            run: Mutex::new(None),
            config,
        }
    }

    /// Attach a secret store for connectors that resolve credentials through
    /// the router
    pub fn with_secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn secret_store(&self) -> Option<Arc<dyn SecretStore>> {
        self.secrets.clone()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Register a venue with its client and static metadata; idempotent
    pub fn add_venue(&self, name: &str, client: Arc<dyn VenueClient>, info: VenueInfo) {
        info!("Adding venue {} to router", name);
        self.registry.register(name, client);
        self.fees.update_schedule(name, info.fee_schedule);
    }

    /// Start tracking a symbol in the aggregator
    pub fn track_symbol(&self, symbol: &str) {
        self.aggregator.track_symbol(symbol.to_string());
    }

    /// The fee optimizer, for schedule and tier updates
    pub fn fee_optimizer(&self) -> &FeeOptimizer {
        &self.fees
    }

    /// The liquidity aggregator, for read-side queries
    pub fn liquidity(&self) -> &LiquidityAggregator {
        &self.aggregator
    }

    /// Register an intake queue for a venue class.
    ///
    /// Must be called before `start`; the queue set is fixed once the
    /// processing worker is running.
    pub fn register_intake_queue(&self, class: &str) -> RouterResult<IntakeProducer> {
        match self.intake.lock().as_mut() {
            Some(intake) => Ok(intake.register_queue(class)),
            None => Err(RouterError::InvalidState(
                "intake worker already started".to_string(),
            )),
        }
    }

    /// Start background loops: aggregator refresh, tracker aggregation and
    /// cleanup, health monitoring, and the intake worker.
    pub fn start(self: &Arc<Self>) -> RouterResult<()> {
        self.config.validate().map_err(RouterError::InvalidState)?;

        let mut run = self.run.lock();
        if run.is_some() {
            return Err(RouterError::InvalidState("already started".to_string()));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::new();

        handles.push(self.aggregator.spawn_refresh_loop(stop_rx.clone()));
        handles.push(self.tracker.spawn_loops(stop_rx.clone()));
        handles.push(self.spawn_health_loop(stop_rx.clone()));

        // Intake worker: orders funnel into the dispatch task, pushed books
        // install straight into the aggregator
        let intake = self
            .intake
            .lock()
            .take()
            .ok_or_else(|| RouterError::InvalidState("intake already consumed".to_string()))?;

        let (order_tx, order_rx) = mpsc::channel::<OrderIntent>(self.config.order_intake_capacity);
        let aggregator = Arc::clone(&self.aggregator);
        let rejected = Arc::clone(&self.rejected);

        let intake_handle = intake.start(self.config.cpu_cores.clone(), move |queue, event| {
            match event {
                IntakeEvent::Order(intent) => {
                    if order_tx.try_send(intent).is_err() {
                        rejected.fetch_add(1, Ordering::Relaxed);
                        warn!("Dispatch channel full; rejecting order from queue {}", queue);
                    }
                }
                IntakeEvent::Book(book) => aggregator.install_book(book),
            }
        });

        handles.push(self.spawn_dispatch_task(order_rx, stop_rx));

        *run = Some(RunState {
            stop_tx,
            handles,
            intake: Some(intake_handle),
        });

        info!("Smart order router started");
        Ok(())
    }

    /// Signal all background loops to stop and wait for them to finish
    pub async fn stop(&self) -> RouterResult<()> {
        let state = self
            .run
            .lock()
            .take()
            .ok_or_else(|| RouterError::InvalidState("not started".to_string()))?;

        let _ = state.stop_tx.send(true);

        if let Some(intake) = state.intake {
            tokio::task::spawn_blocking(move || intake.stop())
                .await
                .ok();
        }

        for handle in state.handles {
            let _ = handle.await;
        }

        info!("Smart order router stopped");
        Ok(())
    }

    /// Produce a route plan for an intent.
    ///
    /// The plan parks in the active-plans map until `execute` or `abort`
    /// consumes it.
    pub async fn route(&self, intent: OrderIntent) -> RouterResult<RoutePlan> {
        if !self.rate_limiter.try_acquire() {
            return Err(RouterError::RateLimited);
        }

        intent.validate()?;
        self.ensure_market_data(&intent.symbol).await?;

        let plan = self.engine.plan(&intent)?;

        self.active_plans
            .lock()
            .insert(plan.request_id, (plan.clone(), Arc::new(CancelToken::new())));

        Ok(plan)
    }

    /// Execute a previously created plan.
    ///
    /// The plan entry is moved out of the active map; a second call for the
    /// same request id fails with `PlanNotFound`.
    pub async fn execute(&self, request_id: Uuid) -> RouterResult<ExecutionReport> {
        let (plan, cancel) = self
            .active_plans
            .lock()
            .remove(&request_id)
            .ok_or_else(|| RouterError::PlanNotFound(request_id.to_string()))?;

        self.executing.lock().insert(request_id, Arc::clone(&cancel));

        let plan_for_stats = plan.clone();
        let report = self.orchestrator.execute(plan, &cancel).await;

        self.executing.lock().remove(&request_id);
        self.tracker.record(&plan_for_stats, &report);

        Ok(report)
    }

    /// Cancel a plan.
    ///
    /// Before execution starts the plan is dropped outright; mid-execution
    /// the cancellation is best-effort per route.
    pub fn abort(&self, request_id: Uuid) -> RouterResult<()> {
        if let Some((plan, cancel)) = self.active_plans.lock().remove(&request_id) {
            cancel.cancel();
            info!("Aborted plan {} before execution", plan.request_id);
            return Ok(());
        }

        if let Some(cancel) = self.executing.lock().get(&request_id) {
            cancel.cancel();
            info!("Signalled best-effort cancellation for executing plan {}", request_id);
            return Ok(());
        }

        Err(RouterError::PlanNotFound(request_id.to_string()))
    }

    /// Run the routing pipeline under a perturbed market scenario.
    ///
    /// Volatile doubles spreads and pins volatility at 10%; illiquid divides
    /// resting quantity by ten and triples spreads.
    pub async fn simulate(
        &self,
        intent: OrderIntent,
        scenario: MarketScenario,
    ) -> RouterResult<SimulationResult> {
        intent.validate()?;
        self.ensure_market_data(&intent.symbol).await?;

        let conditions = self
            .aggregator
            .market_conditions(&intent.symbol)
            .ok_or_else(|| RouterError::NoEligibleVenues(intent.symbol.clone()))?;

        let conditions = perturb_conditions(&conditions, scenario);
        let plan = self.engine.plan_with_conditions(&intent, &conditions)?;

        let expected_slippage_bps = self
            .engine
            .slippage_protector()
            .estimate_slippage(&intent, &conditions.book)
            .unwrap_or(Decimal::ZERO);

        let blocking = self.engine.slippage_protector().config().blocking_bps;
        let slippage_share = if blocking > Decimal::ZERO {
            (expected_slippage_bps / blocking)
                .min(Decimal::ONE)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let risk_score = ((1.0 - plan.confidence) + slippage_share * 0.5).clamp(0.0, 1.0);

        debug!(
            "Simulated {} under {:?}: slippage {} bps, risk {:.2}",
            intent.symbol, scenario, expected_slippage_bps, risk_score
        );

        Ok(SimulationResult {
            scenario,
            expected_slippage_bps,
            risk_score,
            plan,
        })
    }

    /// Combined metrics snapshot
    pub fn metrics(&self) -> RouterMetrics {
        let venues = self
            .registry
            .venue_names()
            .into_iter()
            .filter_map(|name| self.registry.state(&name).map(|state| (name, state)))
            .collect();

        let venue_latency = self
            .latency
            .tracked_venues()
            .into_iter()
            .filter_map(|name| self.latency.stats(&name).map(|stats| (name, stats)))
            .collect();

        RouterMetrics {
            tracker: self.tracker.snapshot(),
            rejected_orders: self.rejected.load(Ordering::Relaxed),
            venues,
            venue_latency,
        }
    }

    /// Probe every registered venue once, updating health state and the
    /// account cache
    pub async fn run_health_probes(&self) {
        for (name, client) in self.registry.clients() {
            if !client.is_connected() {
                self.registry
                    .set_available(&name, false, Some("connector disconnected".to_string()));
                continue;
            }

            let start = Instant::now();
            let result =
                tokio::time::timeout(PROBE_DEADLINE, client.get_account(PROBE_DEADLINE)).await;
            self.latency.record_since(&name, start);

            match result {
                Ok(Ok(account)) => {
                    self.account_cache.insert(name.clone(), account);
                    self.registry.set_available(&name, true, None);
                }
                Ok(Err(err)) => {
                    warn!("Health probe failed for {}: {}", name, err);
                    self.registry.set_available(&name, false, Some(err.to_string()));
                }
                Err(_) => {
                    warn!("Health probe timed out for {}", name);
                    self.registry
                        .set_available(&name, false, Some("health probe timed out".to_string()));
                }
            }
        }
    }

    /// Cached account snapshot from the last successful probe
    pub fn cached_account(&self, venue: &str) -> Option<AccountInfo> {
        self.account_cache.get(&venue.to_string())
    }

    fn spawn_health_loop(self: &Arc<Self>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let router = Arc::clone(self);
        let interval = Duration::from_millis(router.config.health_check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => router.run_health_probes().await,
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Consume intake orders: route and execute each as it arrives
    fn spawn_dispatch_task(
        self: &Arc<Self>,
        mut orders: mpsc::Receiver<OrderIntent>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_intent = orders.recv() => {
                        let Some(intent) = maybe_intent else { break };
                        match router.route(intent).await {
                            Ok(plan) => {
                                if let Err(err) = router.execute(plan.request_id).await {
                                    warn!("Intake execution failed: {}", err);
                                }
                            }
                            Err(err) => warn!("Intake routing failed: {}", err),
                        }
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Make sure the aggregator holds a snapshot for the symbol, refreshing
    /// on demand under the operation deadline
    async fn ensure_market_data(&self, symbol: &str) -> RouterResult<()> {
        self.aggregator.track_symbol(symbol.to_string());

        if self.aggregator.get_aggregated_book(symbol).is_some() {
            return Ok(());
        }

        let deadline = Duration::from_millis(self.config.execution_timeout_ms.max(1));
        tokio::time::timeout(deadline, self.aggregator.refresh_symbol(symbol))
            .await
            .map_err(|_| RouterError::Timeout(format!("market data refresh for {}", symbol)))
    }
}

/// Apply a simulation scenario to market conditions by rebuilding the
/// component books
fn perturb_conditions(conditions: &MarketConditions, scenario: MarketScenario) -> MarketConditions {
    let (spread_factor, quantity_factor, volatility) = match scenario {
        MarketScenario::Normal => return conditions.clone(),
        MarketScenario::Volatile => (dec!(2), Decimal::ONE, 0.10),
        MarketScenario::Illiquid => (dec!(3), dec!(0.1), conditions.volatility),
    };

    let books: Vec<VenueBook> = conditions
        .book
        .venue_books
        .values()
        .map(|book| {
            let mid = book.mid_price();
            let stretch = |levels: &[PriceLevel]| -> Vec<PriceLevel> {
                levels
                    .iter()
                    .filter_map(|level| {
                        let price = match mid {
                            Some(mid) => mid + (level.price - mid) * spread_factor,
                            None => level.price,
                        };
                        if price <= Decimal::ZERO {
                            return None;
                        }
                        let quantity = level.quantity * quantity_factor;
                        if quantity <= Decimal::ZERO {
                            return None;
                        }
                        Some(PriceLevel::new(price, quantity))
                    })
                    .collect()
            };

            let mut perturbed = VenueBook::new(
                book.venue.clone(),
                book.symbol.clone(),
                stretch(&book.bids),
                stretch(&book.asks),
            );
            perturbed.volume_24h = book.volume_24h;
            perturbed.last_update = book.last_update;
            perturbed
        })
        .collect();

    let merged = Arc::new(AggregatedBook::merge(conditions.symbol.clone(), books));
    MarketConditions::from_book(merged, volatility)
}
