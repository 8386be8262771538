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

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RouterError, RouterResult};
use crate::orderbook::{AggregatedBook, MarketConditions, VenueBook};
use crate::types::{OrderIntent, Route, Urgency, VenueId};

/// Slippage protection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlippageConfig {
    /// Trading is blocked when the spread exceeds this, in basis points
    pub max_spread_bps: Decimal,
    /// Maximum order size as a fraction of aggregated opposing-side volume
    pub max_volume_impact: Decimal,
    /// Estimated impact above this warns, in basis points
    pub warning_bps: Decimal,
    /// Estimated impact above this blocks, in basis points
    pub blocking_bps: Decimal,
    /// Volatility above `max_volatility_std × baseline_volatility` warns
    pub max_volatility_std: f64,
    /// Baseline volatility the multiplier applies to
    pub baseline_volatility: f64,
    /// Slice size target as a fraction of the average opposing level size
    pub slice_level_fraction: Decimal,
    /// Minimum slice size as a fraction of the intent quantity
    pub min_slice_fraction: Decimal,
    /// Delay between recommended slices
    pub slice_interval: Duration,
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            max_spread_bps: dec!(50),
            max_volume_impact: dec!(0.25),
            warning_bps: dec!(30),
            blocking_bps: dec!(100),
            max_volatility_std: 3.0,
            baseline_volatility: 0.02,
            slice_level_fraction: dec!(0.30),
            min_slice_fraction: dec!(0.01),
            slice_interval: Duration::from_secs(30),
        }
    }
}

/// Outcome of a market impact check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactCheck {
    Ok,
    Warn(String),
    Block(String),
}

/// One recommended slice of a large order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRecommendation {
    pub quantity: Decimal,
    pub delay: Duration,
    pub est_slippage_bps: Decimal,
}

/// Bounds expected price impact by walking the aggregated book.
///
/// When the intent's urgency is `Immediate`, warn-level findings are
/// suppressed; blocks are still reported and it is the engine's decision to
/// bypass them.
pub struct SlippageProtector {
    config: SlippageConfig,
}

impl SlippageProtector {
    pub fn new(config: SlippageConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SlippageConfig {
        &self.config
    }

    /// Blocking threshold for one intent: the intent's own slippage bound
    /// when set, the configured default otherwise
    fn blocking_threshold(&self, intent: &OrderIntent) -> Decimal {
        if intent.max_slippage_bps > 0 {
            Decimal::from(intent.max_slippage_bps)
        } else {
            self.config.blocking_bps
        }
    }

    /// Check an intent against current market conditions.
    ///
    /// Checks run in a fixed order: spread, volume impact, estimated price
    /// impact, volatility. The first finding wins.
    pub fn check_market_impact(
        &self,
        intent: &OrderIntent,
        conditions: &MarketConditions,
    ) -> ImpactCheck {
        let suppress_warnings = intent.urgency == Urgency::Immediate;

        if let Some(spread_bps) = conditions.spread_bps {
            if spread_bps > self.config.max_spread_bps {
                return ImpactCheck::Block(format!(
                    "spread {:.2} bps exceeds maximum {} bps",
                    spread_bps, self.config.max_spread_bps
                ));
            }
        }

        let opposing_volume = conditions.book.opposing_quantity(intent.side);
        if opposing_volume > Decimal::ZERO {
            let impact_cap = opposing_volume * self.config.max_volume_impact;
            if intent.quantity > impact_cap {
                return ImpactCheck::Block(format!(
                    "order size {} exceeds {}% of opposing volume {}",
                    intent.quantity,
                    self.config.max_volume_impact * dec!(100),
                    opposing_volume
                ));
            }
        }

        match self.estimate_slippage(intent, &conditions.book) {
            Ok(est_bps) => {
                let blocking = self.blocking_threshold(intent);
                if est_bps > blocking {
                    return ImpactCheck::Block(format!(
                        "estimated slippage {:.2} bps exceeds blocking threshold {} bps",
                        est_bps, blocking
                    ));
                }
                if est_bps > self.config.warning_bps && !suppress_warnings {
                    return ImpactCheck::Warn(format!(
                        "estimated slippage {:.2} bps exceeds warning threshold {} bps",
                        est_bps, self.config.warning_bps
                    ));
                }
            }
            Err(RouterError::InsufficientLiquidity { .. }) => {
                return ImpactCheck::Block(format!(
                    "aggregated book cannot absorb quantity {}",
                    intent.quantity
                ));
            }
            Err(_) => {}
        }

        let volatility_limit = self.config.max_volatility_std * self.config.baseline_volatility;
        if conditions.volatility > volatility_limit && !suppress_warnings {
            return ImpactCheck::Warn(format!(
                "volatility {:.4} exceeds {:.4}",
                conditions.volatility, volatility_limit
            ));
        }

        ImpactCheck::Ok
    }

    /// Estimate slippage in basis points for executing the full intent
    /// against the aggregated book.
    ///
    /// The reference price is the intent's limit price when set, otherwise
    /// the best opposing price. Fails with `InsufficientLiquidity` when the
    /// book cannot absorb the quantity.
    pub fn estimate_slippage(
        &self,
        intent: &OrderIntent,
        book: &AggregatedBook,
    ) -> RouterResult<Decimal> {
        let walk = book.walk(intent.side, intent.quantity).ok_or_else(|| {
            RouterError::InsufficientLiquidity {
                symbol: intent.symbol.clone(),
                requested: intent.quantity.to_string(),
                available: "0".to_string(),
            }
        })?;

        if walk.filled_qty < intent.quantity {
            return Err(RouterError::InsufficientLiquidity {
                symbol: intent.symbol.clone(),
                requested: intent.quantity.to_string(),
                available: walk.filled_qty.to_string(),
            });
        }

        let reference = match intent.limit_price {
            Some(price) => price,
            None => book
                .opposing_levels(intent.side)
                .first()
                .map(|l| l.price)
                .ok_or_else(|| RouterError::InsufficientLiquidity {
                    symbol: intent.symbol.clone(),
                    requested: intent.quantity.to_string(),
                    available: "0".to_string(),
                })?,
        };

        if reference <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        Ok((walk.avg_price - reference).abs() / reference * Decimal::from(10_000))
    }

    /// Recommend slices for working a large order into the book.
    ///
    /// Slice size targets a fraction of the average opposing level size,
    /// never below a fraction of the intent quantity, with a fixed interval
    /// between slices.
    pub fn optimal_slices(
        &self,
        intent: &OrderIntent,
        book: &AggregatedBook,
    ) -> Vec<SliceRecommendation> {
        let avg_level = book
            .average_opposing_level_quantity(intent.side)
            .unwrap_or(intent.quantity);

        let slice_qty = (avg_level * self.config.slice_level_fraction)
            .max(intent.quantity * self.config.min_slice_fraction)
            .min(intent.quantity);

        if slice_qty <= Decimal::ZERO {
            return Vec::new();
        }

        let slice_count = (intent.quantity / slice_qty).ceil().to_u64().unwrap_or(1).max(1);

        let mut slices = Vec::with_capacity(slice_count as usize);
        let mut remaining = intent.quantity;

        for index in 0..slice_count {
            let qty = slice_qty.min(remaining);
            if qty <= Decimal::ZERO {
                break;
            }

            let mut slice_intent = intent.clone();
            slice_intent.quantity = qty;
            let est = self
                .estimate_slippage(&slice_intent, book)
                .unwrap_or(Decimal::ZERO);

            slices.push(SliceRecommendation {
                quantity: qty,
                delay: self.config.slice_interval * index as u32,
                est_slippage_bps: est,
            });
            remaining -= qty;
        }

        debug!(
            "Recommended {} slices of ~{} for {} {}",
            slices.len(),
            slice_qty,
            intent.quantity,
            intent.symbol
        );

        slices
    }

    /// Validate planned routes against per-venue books.
    ///
    /// Every route's estimated slippage at its target venue must stay at or
    /// below the blocking threshold.
    pub fn validate_execution(
        &self,
        routes: &[Route],
        books: &HashMap<VenueId, VenueBook>,
    ) -> RouterResult<()> {
        for route in routes {
            let book = books
                .get(&route.venue)
                .ok_or_else(|| RouterError::VenueUnavailable(route.venue.clone()))?;

            let walk = match book.walk(route.side, route.quantity) {
                Some(walk) if walk.filled_qty >= route.quantity => walk,
                _ => {
                    return Err(RouterError::InsufficientLiquidity {
                        symbol: route.symbol.clone(),
                        requested: route.quantity.to_string(),
                        available: book.opposing_quantity(route.side).to_string(),
                    });
                }
            };

            let reference = route
                .limit_price
                .or_else(|| book.opposing_levels(route.side).first().map(|l| l.price))
                .unwrap_or(walk.avg_price);

            if reference <= Decimal::ZERO {
                continue;
            }

            let bps = (walk.avg_price - reference).abs() / reference * Decimal::from(10_000);
            if bps > self.config.blocking_bps {
                warn!(
                    "Route to {} fails slippage validation: {:.2} bps",
                    route.venue, bps
                );
                return Err(RouterError::SlippageProtection(format!(
                    "route to {} estimates {:.2} bps, blocking threshold {} bps",
                    route.venue, bps, self.config.blocking_bps
                )));
            }
        }

        Ok(())
    }
}

impl Default for SlippageProtector {
    fn default() -> Self {
        Self::new(SlippageConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::PriceLevel;
    use crate::types::Side;
    use std::sync::Arc;

    fn book_with_asks(asks: Vec<PriceLevel>) -> Arc<AggregatedBook> {
        let venue_book = VenueBook::new(
            "binance",
            "BTC/USDT",
            vec![PriceLevel::new(dec!(99.9), dec!(100))],
            asks,
        );
        Arc::new(AggregatedBook::merge("BTC/USDT", vec![venue_book]))
    }

    #[test]
    fn test_estimate_against_top_of_book() {
        let book = book_with_asks(vec![
            PriceLevel::new(dec!(100), dec!(5)),
            PriceLevel::new(dec!(101), dec!(10)),
        ]);
        let protector = SlippageProtector::default();

        // Fully filled at the top level: zero slippage
        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(3));
        assert_eq!(
            protector.estimate_slippage(&intent, &book).unwrap(),
            Decimal::ZERO
        );

        // Crossing into the next level moves the average
        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(10));
        let bps = protector.estimate_slippage(&intent, &book).unwrap();
        assert!(bps > Decimal::ZERO && bps < dec!(100));
    }

    #[test]
    fn test_estimate_is_monotone_in_quantity() {
        let book = book_with_asks(vec![
            PriceLevel::new(dec!(100), dec!(5)),
            PriceLevel::new(dec!(102), dec!(10)),
            PriceLevel::new(dec!(105), dec!(20)),
        ]);
        let protector = SlippageProtector::default();

        let mut last = Decimal::ZERO;
        for qty in [dec!(1), dec!(5), dec!(10), dec!(20), dec!(35)] {
            let intent = OrderIntent::market("BTC/USDT", Side::Buy, qty);
            let bps = protector.estimate_slippage(&intent, &book).unwrap();
            assert!(bps >= last, "slippage decreased as quantity grew");
            last = bps;
        }
    }

    #[test]
    fn test_estimate_insufficient_liquidity() {
        let book = book_with_asks(vec![PriceLevel::new(dec!(100), dec!(5))]);
        let protector = SlippageProtector::default();

        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(50));
        assert!(matches!(
            protector.estimate_slippage(&intent, &book),
            Err(RouterError::InsufficientLiquidity { .. })
        ));
    }

    #[test]
    fn test_thin_book_blocks_large_order() {
        let book = book_with_asks(vec![
            PriceLevel::new(dec!(100), dec!(1)),
            PriceLevel::new(dec!(110), dec!(100)),
        ]);
        let conditions = MarketConditions::from_book(book, 0.01);
        let protector = SlippageProtector::default();

        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(50))
            .with_max_slippage_bps(100);

        match protector.check_market_impact(&intent, &conditions) {
            ImpactCheck::Block(_) => {}
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_immediate_urgency_suppresses_warnings() {
        let book = book_with_asks(vec![
            PriceLevel::new(dec!(100), dec!(500)),
            PriceLevel::new(dec!(100.5), dec!(500)),
        ]);
        // Volatility well above the warn threshold
        let conditions = MarketConditions::from_book(book, 0.50);
        let protector = SlippageProtector::default();

        let normal = OrderIntent::market("BTC/USDT", Side::Buy, dec!(1));
        assert!(matches!(
            protector.check_market_impact(&normal, &conditions),
            ImpactCheck::Warn(_)
        ));

        let immediate = normal.with_urgency(Urgency::Immediate);
        assert_eq!(
            protector.check_market_impact(&immediate, &conditions),
            ImpactCheck::Ok
        );
    }

    #[test]
    fn test_wide_spread_blocks() {
        let venue_book = VenueBook::new(
            "binance",
            "BTC/USDT",
            vec![PriceLevel::new(dec!(90), dec!(100))],
            vec![PriceLevel::new(dec!(100), dec!(100))],
        );
        let book = Arc::new(AggregatedBook::merge("BTC/USDT", vec![venue_book]));
        let conditions = MarketConditions::from_book(book, 0.01);

        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(1));
        assert!(matches!(
            SlippageProtector::default().check_market_impact(&intent, &conditions),
            ImpactCheck::Block(_)
        ));
    }

    #[test]
    fn test_optimal_slices_cover_quantity() {
        let book = book_with_asks(vec![
            PriceLevel::new(dec!(100), dec!(10)),
            PriceLevel::new(dec!(101), dec!(10)),
            PriceLevel::new(dec!(102), dec!(10)),
        ]);
        let protector = SlippageProtector::default();
        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(12));

        let slices = protector.optimal_slices(&intent, &book);
        assert!(!slices.is_empty());

        let total: Decimal = slices.iter().map(|s| s.quantity).sum();
        assert_eq!(total, dec!(12));

        // 30% of the 10-unit average level: 3 per slice, 30s apart
        assert_eq!(slices[0].quantity, dec!(3));
        assert_eq!(slices[0].delay, Duration::ZERO);
        assert_eq!(slices[1].delay, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_execution_blocks_thin_venue() {
        let protector = SlippageProtector::default();

        let thin_book = VenueBook::new(
            "thin",
            "BTC/USDT",
            vec![],
            vec![
                PriceLevel::new(dec!(100), dec!(1)),
                PriceLevel::new(dec!(110), dec!(100)),
            ],
        );
        let mut books = HashMap::new();
        books.insert("thin".to_string(), thin_book);

        let route = Route {
            venue: "thin".to_string(),
            symbol: "BTC/USDT".to_string(),
            side: Side::Buy,
            quantity: dec!(50),
            order_type: crate::types::OrderType::Market,
            limit_price: None,
            est_price: dec!(100),
            est_fee: Decimal::ZERO,
            priority: 0,
            split_ratio: Decimal::ONE,
            time_delay: Duration::ZERO,
        };

        assert!(matches!(
            protector.validate_execution(&[route], &books),
            Err(RouterError::SlippageProtection(_))
        ));
    }
}
