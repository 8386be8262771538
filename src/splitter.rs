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

use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RouterError, RouterResult};
use crate::orderbook::{PriceLevel, VenueBook};
use crate::types::{OrderIntent, RoutingStrategy, Side, VenueId};

/// Decimal places child order quantities are rounded to
const QTY_SCALE: u32 = 8;

/// Per-venue liquidity view the splitter works from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueLiquidity {
    pub venue: VenueId,
    /// Quantity available on the side the order consumes
    pub available: Decimal,
    /// Spread over mid in basis points, when both sides are present
    pub spread_bps: Option<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    /// 24h traded volume, used for VWAP weighting
    pub volume_24h: Decimal,
    /// Average venue call latency in nanoseconds, when known
    pub avg_latency_ns: Option<f64>,
    /// Levels the order would consume, best price first
    pub opposing_levels: Vec<PriceLevel>,
}

impl VenueLiquidity {
    /// Build a liquidity view from a venue book for one order side
    pub fn from_book(book: &VenueBook, side: Side) -> Self {
        Self {
            venue: book.venue.clone(),
            available: book.opposing_quantity(side),
            spread_bps: book.spread_bps(),
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            volume_24h: book.volume_24h,
            avg_latency_ns: None,
            opposing_levels: book.opposing_levels(side).to_vec(),
        }
    }

    /// Largest quantity fillable while the volume-weighted price stays
    /// within `max_bps` of this venue's best opposing price
    pub fn max_quantity_within_bps(&self, max_bps: Decimal) -> Decimal {
        let reference = match self.opposing_levels.first() {
            Some(level) => level.price,
            None => return Decimal::ZERO,
        };

        let mut admitted = Decimal::ZERO;
        let mut notional = Decimal::ZERO;

        for level in &self.opposing_levels {
            let next_qty = admitted + level.quantity;
            let next_notional = notional + level.price * level.quantity;
            let vwap = next_notional / next_qty;
            let deviation = ((vwap - reference) / reference).abs() * Decimal::from(10_000);

            if deviation > max_bps && admitted > Decimal::ZERO {
                break;
            }

            admitted = next_qty;
            notional = next_notional;
        }

        admitted
    }
}

/// One child order assignment produced by the splitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSplit {
    pub venue: VenueId,
    pub quantity: Decimal,
    /// Fraction of the parent quantity
    pub ratio: Decimal,
    /// Delay before dispatch; zero for immediate strategies
    pub time_delay: Duration,
}

/// Splitter tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterConfig {
    /// Splits below this size are dropped and their quantity reallocated
    pub min_size: Decimal,
    /// Hard cap on any single split, when set
    pub max_size: Option<Decimal>,
    /// Maximum venues per split
    pub max_venues: usize,
    /// Visible fraction of the parent quantity for iceberg slices
    pub iceberg_visible_fraction: Decimal,
    /// Delay step between consecutive iceberg slices
    pub iceberg_slice_delay: Duration,
    /// Total horizon TWAP slices are spread over
    pub twap_horizon: Duration,
    /// Fixed interval between TWAP slices
    pub twap_interval: Duration,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            min_size: dec!(0.0001),
            max_size: None,
            max_venues: 5,
            iceberg_visible_fraction: dec!(0.10),
            iceberg_slice_delay: Duration::from_secs(5),
            twap_horizon: Duration::from_secs(3600),
            twap_interval: Duration::from_secs(300),
        }
    }
}

/// Translates an intent plus per-venue liquidity into child order
/// assignments that sum exactly to the intent's quantity.
///
/// The strategy set is closed: the named intent strategies that do not carry
/// their own split shape (BestPrice, LowestFee, Fastest, Balanced) fall back
/// to liquidity-proportional splitting with a strategy-specific venue
/// ranking; the engine differentiates them further through fee optimization
/// and estimates.
pub struct OrderSplitter {
    config: SplitterConfig,
}

impl OrderSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Produce child order assignments for the intent.
    ///
    /// Never returns a partial plan: any failure leaves no splits behind.
    pub fn split(
        &self,
        intent: &OrderIntent,
        venues: &[VenueLiquidity],
    ) -> RouterResult<Vec<OrderSplit>> {
        if intent.quantity <= Decimal::ZERO {
            return Err(RouterError::InvalidIntent(format!(
                "cannot split non-positive quantity {}",
                intent.quantity
            )));
        }

        let eligible = self.eligible_venues(intent, venues)?;

        let total_available: Decimal = eligible.iter().map(|v| v.available).sum();
        if total_available < intent.quantity {
            return Err(RouterError::InsufficientLiquidity {
                symbol: intent.symbol.clone(),
                requested: intent.quantity.to_string(),
                available: total_available.to_string(),
            });
        }

        let splits = match intent.strategy {
            RoutingStrategy::MinSlippage => self.split_min_slippage(intent, &eligible)?,
            RoutingStrategy::Iceberg => self.split_iceberg(intent, &eligible)?,
            RoutingStrategy::VWAP => self.split_vwap(intent, &eligible)?,
            RoutingStrategy::TWAP => self.split_twap(intent, &eligible)?,
            RoutingStrategy::Proportional
            | RoutingStrategy::BestPrice
            | RoutingStrategy::LowestFee
            | RoutingStrategy::Fastest
            | RoutingStrategy::Balanced => self.split_proportional(intent, &eligible)?,
        };

        let splits = self.finalize(intent, splits)?;

        debug!(
            "Split {} {} into {} child orders ({})",
            intent.quantity,
            intent.symbol,
            splits.len(),
            intent.strategy
        );

        Ok(splits)
    }

    /// Apply intent filters and the minimum-liquidity requirement
    fn eligible_venues(
        &self,
        intent: &OrderIntent,
        venues: &[VenueLiquidity],
    ) -> RouterResult<Vec<VenueLiquidity>> {
        let eligible: Vec<VenueLiquidity> = venues
            .iter()
            .filter(|v| !intent.avoid_venues.contains(&v.venue))
            .filter(|v| {
                intent.preferred_venues.is_empty() || intent.preferred_venues.contains(&v.venue)
            })
            .filter(|v| v.available > self.config.min_size)
            .cloned()
            .collect();

        if eligible.is_empty() {
            return Err(RouterError::NoEligibleVenues(intent.symbol.clone()));
        }

        Ok(eligible)
    }

    /// Rank venues for selection; the key depends on the strategy
    fn rank_venues(&self, strategy: RoutingStrategy, side: Side, venues: &[VenueLiquidity]) -> Vec<VenueLiquidity> {
        let mut ranked = venues.to_vec();

        match strategy {
            RoutingStrategy::BestPrice => ranked.sort_by(|a, b| {
                let price = |v: &VenueLiquidity| match side {
                    Side::Buy => v.best_ask.unwrap_or(Decimal::MAX),
                    Side::Sell => v.best_bid.unwrap_or(Decimal::MIN),
                };
                match side {
                    Side::Buy => price(a).cmp(&price(b)),
                    Side::Sell => price(b).cmp(&price(a)),
                }
                .then_with(|| b.available.cmp(&a.available))
            }),
            RoutingStrategy::Fastest => ranked.sort_by(|a, b| {
                let latency = |v: &VenueLiquidity| v.avg_latency_ns.unwrap_or(f64::MAX);
                latency(a)
                    .partial_cmp(&latency(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.available.cmp(&a.available))
            }),
            RoutingStrategy::MinSlippage => ranked.sort_by(|a, b| {
                let spread = |v: &VenueLiquidity| v.spread_bps.unwrap_or(Decimal::MAX);
                spread(a)
                    .cmp(&spread(b))
                    .then_with(|| b.available.cmp(&a.available))
            }),
            RoutingStrategy::VWAP => {
                ranked.sort_by(|a, b| b.volume_24h.cmp(&a.volume_24h));
            }
            _ => {
                ranked.sort_by(|a, b| b.available.cmp(&a.available));
            }
        }

        ranked.truncate(self.config.max_venues);
        ranked
    }

    /// Weight-proportional assignment with per-venue caps and residual
    /// redistribution
    fn weighted_assignment(
        &self,
        intent: &OrderIntent,
        ranked: &[VenueLiquidity],
        weight: impl Fn(&VenueLiquidity) -> Decimal,
    ) -> RouterResult<Vec<OrderSplit>> {
        let total_weight: Decimal = ranked.iter().map(&weight).sum();
        if total_weight <= Decimal::ZERO {
            return Err(RouterError::NoEligibleVenues(intent.symbol.clone()));
        }

        let cap = |v: &VenueLiquidity| match self.config.max_size {
            Some(max) => v.available.min(max),
            None => v.available,
        };

        let mut assigned: Vec<(usize, Decimal)> = ranked
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let raw = weight(v) / total_weight * intent.quantity;
                let rounded =
                    raw.round_dp_with_strategy(QTY_SCALE, RoundingStrategy::MidpointNearestEven);
                (i, rounded.min(cap(v)))
            })
            .collect();

        // Redistribute whatever the caps or rounding left unassigned
        let mut remaining = intent.quantity - assigned.iter().map(|(_, q)| *q).sum::<Decimal>();
        if remaining > Decimal::ZERO {
            for (i, qty) in assigned.iter_mut() {
                let headroom = cap(&ranked[*i]) - *qty;
                if headroom > Decimal::ZERO {
                    let add = headroom.min(remaining);
                    *qty += add;
                    remaining -= add;
                    if remaining <= Decimal::ZERO {
                        break;
                    }
                }
            }
        }

        if remaining > Decimal::ZERO {
            let available: Decimal = ranked.iter().map(cap).sum();
            return Err(RouterError::InsufficientLiquidity {
                symbol: intent.symbol.clone(),
                requested: intent.quantity.to_string(),
                available: available.to_string(),
            });
        }

        Ok(assigned
            .into_iter()
            .filter(|(_, qty)| *qty > Decimal::ZERO)
            .map(|(i, qty)| OrderSplit {
                venue: ranked[i].venue.clone(),
                quantity: qty,
                ratio: Decimal::ZERO,
                time_delay: Duration::ZERO,
            })
            .collect())
    }

    fn split_proportional(
        &self,
        intent: &OrderIntent,
        eligible: &[VenueLiquidity],
    ) -> RouterResult<Vec<OrderSplit>> {
        let ranked = self.rank_venues(intent.strategy, intent.side, eligible);
        self.weighted_assignment(intent, &ranked, |v| v.available)
    }

    fn split_vwap(
        &self,
        intent: &OrderIntent,
        eligible: &[VenueLiquidity],
    ) -> RouterResult<Vec<OrderSplit>> {
        let ranked = self.rank_venues(RoutingStrategy::VWAP, intent.side, eligible);

        // Venues reporting no volume fall back to liquidity weighting
        if ranked.iter().all(|v| v.volume_24h <= Decimal::ZERO) {
            return self.weighted_assignment(intent, &ranked, |v| v.available);
        }

        self.weighted_assignment(intent, &ranked, |v| v.volume_24h)
    }

    fn split_min_slippage(
        &self,
        intent: &OrderIntent,
        eligible: &[VenueLiquidity],
    ) -> RouterResult<Vec<OrderSplit>> {
        let ranked = self.rank_venues(RoutingStrategy::MinSlippage, intent.side, eligible);
        let max_bps = Decimal::from(intent.max_slippage_bps);

        let mut splits = Vec::new();
        let mut remaining = intent.quantity;

        for venue in &ranked {
            if remaining <= Decimal::ZERO || splits.len() >= self.config.max_venues {
                break;
            }

            let mut take = venue.max_quantity_within_bps(max_bps).min(remaining);
            if let Some(max) = self.config.max_size {
                take = take.min(max);
            }

            if take >= self.config.min_size {
                splits.push(OrderSplit {
                    venue: venue.venue.clone(),
                    quantity: take,
                    ratio: Decimal::ZERO,
                    time_delay: Duration::ZERO,
                });
                remaining -= take;
            }
        }

        if remaining > Decimal::ZERO {
            return Err(RouterError::InsufficientLiquidity {
                symbol: intent.symbol.clone(),
                requested: intent.quantity.to_string(),
                available: (intent.quantity - remaining).to_string(),
            });
        }

        Ok(splits)
    }

    fn split_iceberg(
        &self,
        intent: &OrderIntent,
        eligible: &[VenueLiquidity],
    ) -> RouterResult<Vec<OrderSplit>> {
        let ranked = self.rank_venues(RoutingStrategy::Iceberg, intent.side, eligible);

        let visible = (intent.quantity * self.config.iceberg_visible_fraction)
            .max(self.config.min_size)
            .min(intent.quantity);

        let slice_count = (intent.quantity / visible)
            .ceil()
            .to_u64()
            .unwrap_or(1)
            .max(1);

        let mut splits = Vec::with_capacity(slice_count as usize);
        let mut remaining = intent.quantity;

        for index in 0..slice_count {
            let qty = visible.min(remaining);
            if qty <= Decimal::ZERO {
                break;
            }

            let venue = &ranked[(index as usize) % ranked.len()];
            splits.push(OrderSplit {
                venue: venue.venue.clone(),
                quantity: qty,
                ratio: Decimal::ZERO,
                time_delay: self.config.iceberg_slice_delay * index as u32,
            });
            remaining -= qty;
        }

        Ok(splits)
    }

    fn split_twap(
        &self,
        intent: &OrderIntent,
        eligible: &[VenueLiquidity],
    ) -> RouterResult<Vec<OrderSplit>> {
        let ranked = self.rank_venues(RoutingStrategy::TWAP, intent.side, eligible);

        let interval = self.config.twap_interval.max(Duration::from_secs(1));
        let mut slice_count =
            (self.config.twap_horizon.as_secs() / interval.as_secs()).max(1) as u64;

        // Never slice below the minimum child order size
        if self.config.min_size > Decimal::ZERO {
            let max_slices = (intent.quantity / self.config.min_size)
                .floor()
                .to_u64()
                .unwrap_or(1)
                .max(1);
            slice_count = slice_count.min(max_slices);
        }

        let slice_qty = (intent.quantity / Decimal::from(slice_count))
            .round_dp_with_strategy(QTY_SCALE, RoundingStrategy::MidpointNearestEven);

        let mut splits = Vec::with_capacity(slice_count as usize);
        let mut remaining = intent.quantity;

        for index in 0..slice_count {
            let qty = if index == slice_count - 1 {
                remaining
            } else {
                slice_qty.min(remaining)
            };
            if qty <= Decimal::ZERO {
                break;
            }

            let venue = &ranked[(index as usize) % ranked.len()];
            splits.push(OrderSplit {
                venue: venue.venue.clone(),
                quantity: qty,
                ratio: Decimal::ZERO,
                time_delay: interval * index as u32,
            });
            remaining -= qty;
        }

        Ok(splits)
    }

    /// Common validation: drop dust splits, absorb residual into the largest
    /// split, and recompute ratios so the total matches the intent exactly.
    fn finalize(
        &self,
        intent: &OrderIntent,
        mut splits: Vec<OrderSplit>,
    ) -> RouterResult<Vec<OrderSplit>> {
        splits.retain(|s| s.quantity >= self.config.min_size);

        if splits.is_empty() {
            return Err(RouterError::NoEligibleVenues(intent.symbol.clone()));
        }

        let total: Decimal = splits.iter().map(|s| s.quantity).sum();
        let residual = intent.quantity - total;
        if residual != Decimal::ZERO {
            match splits.iter_mut().max_by_key(|s| s.quantity) {
                Some(largest) => {
                    largest.quantity += residual;
                    if largest.quantity <= Decimal::ZERO {
                        return Err(RouterError::InsufficientLiquidity {
                            symbol: intent.symbol.clone(),
                            requested: intent.quantity.to_string(),
                            available: total.to_string(),
                        });
                    }
                }
                None => return Err(RouterError::NoEligibleVenues(intent.symbol.clone())),
            }
        }

        for split in splits.iter_mut() {
            split.ratio = split.quantity / intent.quantity;
        }

        Ok(splits)
    }
}

impl Default for OrderSplitter {
    fn default() -> Self {
        Self::new(SplitterConfig::default())
    }
}
