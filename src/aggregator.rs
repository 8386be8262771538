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

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::orderbook::{AggregatedBook, DepthLevel, MarketConditions, VenueBook};
use crate::types::{Side, Symbol, VenueId};
use crate::venue::VenueRegistry;

/// Aggregator tuning knobs
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Interval between refresh ticks
    pub refresh_interval: Duration,
    /// Deadline for a single venue book fetch
    pub fetch_deadline: Duration,
    /// How long a stale book is served after its venue stops responding
    pub staleness_budget: Duration,
    /// Cap on concurrent per-symbol refresh tasks
    pub max_concurrent_symbols: usize,
    /// Retry budget for book fetches; fetches are idempotent reads
    pub retry_attempts: u32,
    /// Number of mid-price samples kept for the volatility estimate
    pub volatility_window: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(500),
            fetch_deadline: Duration::from_secs(2),
            staleness_budget: Duration::from_secs(5),
            max_concurrent_symbols: 8,
            retry_attempts: 0,
            volatility_window: 64,
        }
    }
}

struct StoredBook {
    book: VenueBook,
    fetched_at: Instant,
}

/// Maintains a current aggregated order book per tracked symbol.
///
/// Each tick fetches per-venue books concurrently under a per-call deadline
/// and installs a freshly merged snapshot under one lock acquisition;
/// readers receive cloned `Arc` snapshots and never observe a partially
/// merged book. A tick never fails as a whole: venues that stop responding
/// serve their last book for up to the staleness budget and are then dropped
/// from the merge.
pub struct LiquidityAggregator {
    config: AggregatorConfig,
    registry: Arc<VenueRegistry>,
    symbols: RwLock<HashSet<Symbol>>,
    venue_books: RwLock<HashMap<Symbol, HashMap<VenueId, StoredBook>>>,
    snapshots: RwLock<HashMap<Symbol, Arc<AggregatedBook>>>,
    mid_history: RwLock<HashMap<Symbol, VecDeque<f64>>>,
}

impl LiquidityAggregator {
    pub fn new(config: AggregatorConfig, registry: Arc<VenueRegistry>) -> Self {
        Self {
            config,
            registry,
            symbols: RwLock::new(HashSet::new()),
            venue_books: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            mid_history: RwLock::new(HashMap::new()),
        }
    }

    /// Start tracking a symbol; idempotent
    pub fn track_symbol(&self, symbol: impl Into<Symbol>) {
        let symbol = symbol.into();
        if self.symbols.write().insert(symbol.clone()) {
            debug!("Tracking symbol {}", symbol);
        }
    }

    /// Symbols currently tracked
    pub fn tracked_symbols(&self) -> Vec<Symbol> {
        self.symbols.read().iter().cloned().collect()
    }

    /// Latest merged snapshot for a symbol
    pub fn get_aggregated_book(&self, symbol: &str) -> Option<Arc<AggregatedBook>> {
        self.snapshots.read().get(symbol).cloned()
    }

    /// Best bid and ask across venues, when both sides have liquidity
    pub fn best_prices(&self, symbol: &str) -> Option<(Decimal, Decimal)> {
        let book = self.get_aggregated_book(symbol)?;
        match (book.best_bid(), book.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid, ask)),
            _ => None,
        }
    }

    /// Top `levels` of one side with cumulative volumes and contributing
    /// venues
    pub fn liquidity_depth(&self, symbol: &str, side: Side, levels: usize) -> Vec<DepthLevel> {
        self.get_aggregated_book(symbol)
            .map(|book| book.depth(side, levels))
            .unwrap_or_default()
    }

    /// Current market conditions for a symbol
    pub fn market_conditions(&self, symbol: &str) -> Option<MarketConditions> {
        let book = self.get_aggregated_book(symbol)?;
        let volatility = self.volatility_estimate(symbol);
        Some(MarketConditions::from_book(book, volatility))
    }

    /// Standard deviation of recent mid-price returns
    pub fn volatility_estimate(&self, symbol: &str) -> f64 {
        let history = self.mid_history.read();
        let mids = match history.get(symbol) {
            Some(mids) if mids.len() >= 2 => mids,
            _ => return 0.0,
        };

        let returns: Vec<f64> = mids
            .iter()
            .zip(mids.iter().skip(1))
            .filter(|(prev, _)| **prev != 0.0)
            .map(|(prev, next)| (next - prev) / prev)
            .collect();

        if returns.is_empty() {
            return 0.0;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        variance.sqrt()
    }

    /// Refresh every tracked symbol once, with bounded parallelism
    pub async fn refresh_once(self: &Arc<Self>) {
        let symbols = self.tracked_symbols();
        if symbols.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_symbols));
        let tasks: Vec<_> = symbols
            .into_iter()
            .map(|symbol| {
                let aggregator = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await;
                    aggregator.refresh_symbol(&symbol).await;
                })
            })
            .collect();

        join_all(tasks).await;
    }

    /// Fetch books for one symbol from all available venues and install a
    /// fresh merged snapshot
    pub async fn refresh_symbol(&self, symbol: &str) {
        let clients = self.registry.clients();
        if clients.is_empty() {
            return;
        }

        // Network I/O happens outside any aggregator lock
        let fetches = clients.into_iter().map(|(venue, client)| {
            let symbol = symbol.to_string();
            let deadline = self.config.fetch_deadline;
            let retries = self.config.retry_attempts;
            async move {
                let mut attempt = 0;
                loop {
                    let result = tokio::time::timeout(
                        deadline,
                        client.get_order_book(&symbol, deadline),
                    )
                    .await;

                    let outcome = match result {
                        Ok(Ok(book)) => Ok(book),
                        Ok(Err(err)) => Err(err.to_string()),
                        Err(_) => Err("book fetch timed out".to_string()),
                    };

                    match outcome {
                        Ok(book) => return (venue, Ok(book)),
                        Err(err) if attempt < retries => {
                            attempt += 1;
                            debug!("Retrying book fetch for {} on {}: {}", symbol, venue, err);
                        }
                        Err(err) => return (venue, Err(err)),
                    }
                }
            }
        });

        let results = join_all(fetches).await;
        self.install_results(symbol, results);
    }

    /// Install a book pushed by a connector (intake path) and rebuild the
    /// symbol's snapshot.
    ///
    /// Invalid books are dropped and counted as a venue failure, same as a
    /// bad fetch.
    pub fn install_book(&self, book: VenueBook) {
        let symbol = book.symbol.clone();
        self.track_symbol(symbol.clone());
        let venue = book.venue.clone();
        self.install_results(&symbol, vec![(venue, Ok(book))]);
    }

    /// Install fetch results and rebuild the symbol's merged snapshot under
    /// the aggregator lock
    fn install_results(&self, symbol: &str, results: Vec<(VenueId, Result<VenueBook, String>)>) {
        let now = Instant::now();
        let mut retained: Vec<VenueBook> = Vec::new();

        {
            let mut venue_books = self.venue_books.write();
            let per_venue = venue_books.entry(symbol.to_string()).or_default();

            for (venue, result) in results {
                match result {
                    Ok(book) => {
                        if let Err(reason) = book.validate() {
                            warn!("Dropping invalid book from {} for {}: {}", venue, symbol, reason);
                            self.registry.record_failure(&venue, reason);
                            continue;
                        }
                        self.registry.record_success(&venue);
                        per_venue.insert(
                            venue,
                            StoredBook {
                                book,
                                fetched_at: now,
                            },
                        );
                    }
                    Err(err) => {
                        let failures = self.registry.record_failure(&venue, err.clone());
                        debug!(
                            "Book fetch failed for {} on {} ({} consecutive): {}",
                            symbol, venue, failures, err
                        );
                        // The stale book keeps serving until the budget runs out
                        if let Some(stored) = per_venue.get(&venue) {
                            if now.duration_since(stored.fetched_at) > self.config.staleness_budget
                            {
                                warn!(
                                    "Dropping stale book from {} for {} after {}ms",
                                    venue,
                                    symbol,
                                    self.config.staleness_budget.as_millis()
                                );
                                per_venue.remove(&venue);
                            }
                        }
                    }
                }
            }

            retained.extend(per_venue.values().map(|stored| stored.book.clone()));
        }

        let merged = Arc::new(AggregatedBook::merge(symbol, retained));

        if let Some(mid) = merged.mid_price().and_then(|m| m.to_f64()) {
            let mut history = self.mid_history.write();
            let mids = history.entry(symbol.to_string()).or_default();
            mids.push_back(mid);
            while mids.len() > self.config.volatility_window {
                mids.pop_front();
            }
        }

        self.snapshots.write().insert(symbol.to_string(), merged);
    }

    /// Spawn the periodic refresh loop; stops when the stop signal flips
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(aggregator.config.refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                "Aggregator refresh loop started ({}ms interval)",
                aggregator.config.refresh_interval.as_millis()
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        aggregator.refresh_once().await;
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            info!("Aggregator refresh loop stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RouterError, RouterResult};
    use crate::orderbook::PriceLevel;
    use crate::venue::{AccountInfo, PlacedOrder, VenueClient, VenueOrder};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockVenue {
        name: String,
        book: Mutex<VenueBook>,
        failing: AtomicBool,
    }

    impl MockVenue {
        fn new(name: &str, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                book: Mutex::new(VenueBook::new(name, "BTC/USDT", bids, asks)),
                failing: AtomicBool::new(false),
            })
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl VenueClient for MockVenue {
        async fn get_order_book(
            &self,
            _symbol: &str,
            _deadline: Duration,
        ) -> RouterResult<VenueBook> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RouterError::VenueCallFailed {
                    venue: self.name.clone(),
                    message: "connection reset".to_string(),
                });
            }
            Ok(self.book.lock().clone())
        }

        async fn place_order(
            &self,
            _order: &VenueOrder,
            _deadline: Duration,
        ) -> RouterResult<PlacedOrder> {
            unimplemented!("not used in aggregator tests")
        }

        async fn cancel_order(&self, _id: &str, _deadline: Duration) -> RouterResult<()> {
            Ok(())
        }

        async fn get_account(&self, _deadline: Duration) -> RouterResult<AccountInfo> {
            Ok(AccountInfo {
                balances: HashMap::new(),
                can_trade: true,
            })
        }

        fn is_connected(&self) -> bool {
            !self.failing.load(Ordering::SeqCst)
        }
    }

    fn setup() -> (Arc<VenueRegistry>, Arc<MockVenue>, Arc<MockVenue>) {
        let registry = Arc::new(VenueRegistry::new());
        let binance = MockVenue::new(
            "binance",
            vec![PriceLevel::new(dec!(99), dec!(2))],
            vec![PriceLevel::new(dec!(100), dec!(5))],
        );
        let kraken = MockVenue::new(
            "kraken",
            vec![PriceLevel::new(dec!(99), dec!(3))],
            vec![PriceLevel::new(dec!(100.5), dec!(4))],
        );
        registry.register("binance", binance.clone());
        registry.register("kraken", kraken.clone());
        (registry, binance, kraken)
    }

    #[tokio::test]
    async fn test_refresh_merges_all_venues() {
        let (registry, _, _) = setup();
        let aggregator = Arc::new(LiquidityAggregator::new(
            AggregatorConfig::default(),
            registry,
        ));
        aggregator.track_symbol("BTC/USDT");

        aggregator.refresh_once().await;

        let book = aggregator.get_aggregated_book("BTC/USDT").unwrap();
        assert_eq!(book.venue_books.len(), 2);
        // Both venues bid at 99; sizes aggregate
        assert_eq!(book.bids[0].quantity, dec!(5));

        let (bid, ask) = aggregator.best_prices("BTC/USDT").unwrap();
        assert_eq!(bid, dec!(99));
        assert_eq!(ask, dec!(100));
    }

    #[tokio::test]
    async fn test_partial_aggregation_on_venue_failure() {
        let (registry, _, kraken) = setup();
        let config = AggregatorConfig {
            staleness_budget: Duration::ZERO,
            ..AggregatorConfig::default()
        };
        let aggregator = Arc::new(LiquidityAggregator::new(config, registry));
        aggregator.track_symbol("BTC/USDT");

        kraken.set_failing(true);
        aggregator.refresh_once().await;

        // The tick still produced a snapshot from the healthy venue
        let book = aggregator.get_aggregated_book("BTC/USDT").unwrap();
        assert_eq!(book.venue_books.len(), 1);
        assert!(book.venue_books.contains_key("binance"));
    }

    #[tokio::test]
    async fn test_stale_book_retained_within_budget() {
        let (registry, _, kraken) = setup();
        let config = AggregatorConfig {
            staleness_budget: Duration::from_secs(60),
            ..AggregatorConfig::default()
        };
        let aggregator = Arc::new(LiquidityAggregator::new(config, registry));
        aggregator.track_symbol("BTC/USDT");

        aggregator.refresh_once().await;
        kraken.set_failing(true);
        aggregator.refresh_once().await;

        // Kraken's last good book still contributes
        let book = aggregator.get_aggregated_book("BTC/USDT").unwrap();
        assert_eq!(book.venue_books.len(), 2);
    }

    #[tokio::test]
    async fn test_three_failures_mark_venue_unhealthy() {
        let (registry, _, kraken) = setup();
        let aggregator = Arc::new(LiquidityAggregator::new(
            AggregatorConfig::default(),
            Arc::clone(&registry),
        ));
        aggregator.track_symbol("BTC/USDT");

        kraken.set_failing(true);
        for _ in 0..3 {
            aggregator.refresh_once().await;
        }

        assert!(!registry.is_available("kraken"));
        assert!(registry.is_available("binance"));
    }

    #[tokio::test]
    async fn test_depth_and_conditions() {
        let (registry, _, _) = setup();
        let aggregator = Arc::new(LiquidityAggregator::new(
            AggregatorConfig::default(),
            registry,
        ));
        aggregator.track_symbol("BTC/USDT");
        aggregator.refresh_once().await;

        let depth = aggregator.liquidity_depth("BTC/USDT", Side::Sell, 5);
        assert_eq!(depth.len(), 2);
        assert_eq!(depth[0].price, dec!(100));
        assert_eq!(depth[1].cumulative, dec!(9));

        let conditions = aggregator.market_conditions("BTC/USDT").unwrap();
        assert_eq!(conditions.best_bid, Some(dec!(99)));
        assert_eq!(conditions.bid_quantity, dec!(5));
        assert!(conditions.spread_bps.is_some());
    }

    #[tokio::test]
    async fn test_unknown_symbol_has_no_book() {
        let (registry, _, _) = setup();
        let aggregator = Arc::new(LiquidityAggregator::new(
            AggregatorConfig::default(),
            registry,
        ));

        assert!(aggregator.get_aggregated_book("ETH/USDT").is_none());
        assert!(aggregator.best_prices("ETH/USDT").is_none());
        assert!(aggregator.liquidity_depth("ETH/USDT", Side::Buy, 5).is_empty());
    }
}
