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

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{OrderType, Route, Side, VenueId};

/// A volume tier discount on base fee rates.
///
/// Discounts are fractions of the base rate; a tier applies once the 30-day
/// traded volume reaches its threshold. Applying the same tier state twice
/// yields the same rate, so threshold crossings are idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    /// 30-day volume required to qualify
    pub threshold_30d_volume: Decimal,
    /// Fractional discount on the maker rate, in [0, 1]
    pub maker_discount: Decimal,
    /// Fractional discount on the taker rate, in [0, 1]
    pub taker_discount: Decimal,
}

/// Flat adjustment applied after tier discounts; negative values are rebates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeProgram {
    pub name: String,
    pub adjust: Decimal,
}

/// Fee schedule for one venue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub base_maker: Decimal,
    pub base_taker: Decimal,
    pub tiers: Vec<FeeTier>,
    pub programs: Vec<FeeProgram>,
    /// Asset fees are charged in
    pub fee_asset: String,
}

impl FeeSchedule {
    /// Schedule with flat maker/taker rates and no tiers or programs
    pub fn flat(base_maker: Decimal, base_taker: Decimal, fee_asset: impl Into<String>) -> Self {
        Self {
            base_maker,
            base_taker,
            tiers: Vec::new(),
            programs: Vec::new(),
            fee_asset: fee_asset.into(),
        }
    }

    /// Effective rate for an order type at a given 30-day volume.
    ///
    /// `base · Π(1 − discount)` over every tier whose threshold the volume
    /// has reached, then `+ Σ adjust` over special programs. May be negative
    /// when programs rebate more than the discounted base.
    pub fn effective_rate(&self, order_type: OrderType, volume_30d: Decimal) -> Decimal {
        let base = match order_type {
            OrderType::Limit => self.base_maker,
            OrderType::Market => self.base_taker,
        };

        let mut rate = base;
        for tier in &self.tiers {
            if volume_30d >= tier.threshold_30d_volume {
                let discount = match order_type {
                    OrderType::Limit => tier.maker_discount,
                    OrderType::Market => tier.taker_discount,
                };
                rate *= Decimal::ONE - discount;
            }
        }

        for program in &self.programs {
            rate += program.adjust;
        }

        rate
    }
}

/// Result of a fee calculation for one prospective child order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeCalculation {
    pub venue: VenueId,
    pub notional: Decimal,
    pub fee: Decimal,
    pub effective_rate: Decimal,
    pub fee_asset: String,
    /// Present when the effective rate is negative
    pub rebate: Option<Decimal>,
}

/// Computes effective per-venue rates and re-orders candidate routes by
/// effective cost.
///
/// Effective rates are cached per `(venue, order_type)`; schedule and tier
/// updates invalidate the venue's cached entries, and the optimizer's lock
/// release/acquire makes an update visible to any subsequent `calculate`.
pub struct FeeOptimizer {
    schedules: RwLock<HashMap<VenueId, FeeSchedule>>,
    volumes_30d: RwLock<HashMap<VenueId, Decimal>>,
    rate_cache: RwLock<HashMap<(VenueId, OrderType), Decimal>>,
}

impl FeeOptimizer {
    pub fn new() -> Self {
        Self {
            schedules: RwLock::new(HashMap::new()),
            volumes_30d: RwLock::new(HashMap::new()),
            rate_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Install or replace a venue's fee schedule
    pub fn update_schedule(&self, venue: impl Into<VenueId>, schedule: FeeSchedule) {
        let venue = venue.into();
        self.schedules.write().insert(venue.clone(), schedule);
        self.invalidate(&venue);
    }

    /// Update a venue's rolling 30-day volume used for tier qualification
    pub fn update_volume_tier(&self, venue: impl Into<VenueId>, volume_30d: Decimal) {
        let venue = venue.into();
        self.volumes_30d.write().insert(venue.clone(), volume_30d);
        self.invalidate(&venue);
    }

    fn invalidate(&self, venue: &str) {
        self.rate_cache.write().retain(|(v, _), _| v != venue);
        debug!("Invalidated fee rate cache for {}", venue);
    }

    /// Effective rate for a venue and order type, from cache when warm
    pub fn effective_rate(&self, venue: &str, order_type: OrderType) -> Decimal {
        let key = (venue.to_string(), order_type);
        if let Some(rate) = self.rate_cache.read().get(&key) {
            return *rate;
        }

        let rate = {
            let schedules = self.schedules.read();
            match schedules.get(venue) {
                Some(schedule) => {
                    let volume = self
                        .volumes_30d
                        .read()
                        .get(venue)
                        .copied()
                        .unwrap_or(Decimal::ZERO);
                    schedule.effective_rate(order_type, volume)
                }
                None => Decimal::ZERO,
            }
        };

        self.rate_cache.write().insert(key, rate);
        rate
    }

    /// Fee calculation for a prospective child order
    pub fn calculate(
        &self,
        venue: &str,
        order_type: OrderType,
        quantity: Decimal,
        price: Decimal,
    ) -> FeeCalculation {
        let rate = self.effective_rate(venue, order_type);
        let notional = quantity * price;
        let fee = notional * rate;
        let fee_asset = self
            .schedules
            .read()
            .get(venue)
            .map(|s| s.fee_asset.clone())
            .unwrap_or_default();

        FeeCalculation {
            venue: venue.to_string(),
            notional,
            fee,
            effective_rate: rate,
            fee_asset,
            rebate: if fee < Decimal::ZERO { Some(-fee) } else { None },
        }
    }

    /// Re-order candidate routes by effective per-unit cost and refresh their
    /// fee estimates.
    ///
    /// Buys sort by ascending effective cost (`notional + fee`), sells by
    /// descending effective proceeds (`notional − fee`), both normalized per
    /// unit so routes of different sizes compare fairly. The sort is stable;
    /// ties break toward the route with more quantity, then the
    /// alphabetically first venue. Returns the re-prioritized routes and the
    /// total estimated fee.
    pub fn optimize(&self, mut routes: Vec<Route>, side: Side) -> (Vec<Route>, Decimal) {
        for route in routes.iter_mut() {
            let calc = self.calculate(&route.venue, route.order_type, route.quantity, route.est_price);
            route.est_fee = calc.fee;
        }

        let unit_cost = |route: &Route| -> Decimal {
            if route.quantity == Decimal::ZERO {
                return Decimal::ZERO;
            }
            let notional = route.quantity * route.est_price;
            match side {
                Side::Buy => (notional + route.est_fee) / route.quantity,
                Side::Sell => (notional - route.est_fee) / route.quantity,
            }
        };

        routes.sort_by(|a, b| {
            let cost_order = match side {
                Side::Buy => unit_cost(a).cmp(&unit_cost(b)),
                Side::Sell => unit_cost(b).cmp(&unit_cost(a)),
            };
            cost_order
                .then_with(|| b.quantity.cmp(&a.quantity))
                .then_with(|| a.venue.cmp(&b.venue))
        });

        for (priority, route) in routes.iter_mut().enumerate() {
            route.priority = priority as u32;
        }

        let total_fee = routes.iter().map(|r| r.est_fee).sum();
        (routes, total_fee)
    }
}

impl Default for FeeOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn tiered_schedule() -> FeeSchedule {
        FeeSchedule {
            base_maker: dec!(0.001),
            base_taker: dec!(0.002),
            tiers: vec![
                FeeTier {
                    threshold_30d_volume: dec!(1000000),
                    maker_discount: dec!(0.1),
                    taker_discount: dec!(0.1),
                },
                FeeTier {
                    threshold_30d_volume: dec!(10000000),
                    maker_discount: dec!(0.25),
                    taker_discount: dec!(0.2),
                },
            ],
            programs: Vec::new(),
            fee_asset: "USDT".to_string(),
        }
    }

    fn route(venue: &str, qty: Decimal, price: Decimal) -> Route {
        Route {
            venue: venue.to_string(),
            symbol: "BTC/USDT".to_string(),
            side: Side::Buy,
            quantity: qty,
            order_type: OrderType::Market,
            limit_price: None,
            est_price: price,
            est_fee: Decimal::ZERO,
            priority: 0,
            split_ratio: Decimal::ONE,
            time_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_tier_discounts_are_multiplicative() {
        let schedule = tiered_schedule();

        // No volume, base rate applies
        assert_eq!(
            schedule.effective_rate(OrderType::Market, Decimal::ZERO),
            dec!(0.002)
        );

        // First tier: 0.002 * 0.9
        assert_eq!(
            schedule.effective_rate(OrderType::Market, dec!(1000000)),
            dec!(0.0018)
        );

        // Both tiers: 0.002 * 0.9 * 0.8
        assert_eq!(
            schedule.effective_rate(OrderType::Market, dec!(10000000)),
            dec!(0.00144)
        );
    }

    #[test]
    fn test_discounted_rate_never_exceeds_base() {
        let schedule = tiered_schedule();
        let base = schedule.effective_rate(OrderType::Limit, Decimal::ZERO);
        let discounted = schedule.effective_rate(OrderType::Limit, dec!(10000000));
        assert!(discounted <= base);
    }

    #[test]
    fn test_programs_can_produce_rebates() {
        let mut schedule = FeeSchedule::flat(dec!(0.0002), dec!(0.0005), "USDT");
        schedule.programs.push(FeeProgram {
            name: "market-maker".to_string(),
            adjust: dec!(-0.0004),
        });

        let optimizer = FeeOptimizer::new();
        optimizer.update_schedule("binance", schedule);

        let calc = optimizer.calculate("binance", OrderType::Limit, dec!(10), dec!(100));
        assert_eq!(calc.effective_rate, dec!(-0.0002));
        assert!(calc.fee < Decimal::ZERO);
        assert_eq!(calc.rebate, Some(dec!(0.2)));
    }

    #[test]
    fn test_tier_update_is_idempotent() {
        let optimizer = FeeOptimizer::new();
        optimizer.update_schedule("binance", tiered_schedule());

        optimizer.update_volume_tier("binance", dec!(1000000));
        let first = optimizer.effective_rate("binance", OrderType::Market);

        // Crossing the same threshold again does not compound
        optimizer.update_volume_tier("binance", dec!(1500000));
        let second = optimizer.effective_rate("binance", OrderType::Market);

        assert_eq!(first, second);
        assert_eq!(first, dec!(0.0018));
    }

    #[test]
    fn test_cache_invalidation_on_schedule_update() {
        let optimizer = FeeOptimizer::new();
        optimizer.update_schedule("binance", FeeSchedule::flat(dec!(0.001), dec!(0.001), "USDT"));

        assert_eq!(
            optimizer.effective_rate("binance", OrderType::Market),
            dec!(0.001)
        );

        optimizer.update_schedule("binance", FeeSchedule::flat(dec!(0.001), dec!(0.0005), "USDT"));
        assert_eq!(
            optimizer.effective_rate("binance", OrderType::Market),
            dec!(0.0005)
        );
    }

    #[test]
    fn test_optimize_orders_by_effective_cost() {
        let optimizer = FeeOptimizer::new();
        optimizer.update_schedule("expensive", FeeSchedule::flat(dec!(0.001), dec!(0.001), "USDT"));
        optimizer.update_schedule("cheap", FeeSchedule::flat(dec!(0.0008), dec!(0.0008), "USDT"));

        let routes = vec![
            route("expensive", dec!(1), dec!(100)),
            route("cheap", dec!(1), dec!(100)),
        ];

        let (sorted, total_fee) = optimizer.optimize(routes, Side::Buy);

        assert_eq!(sorted[0].venue, "cheap");
        assert_eq!(sorted[0].priority, 0);
        assert_eq!(sorted[0].est_fee, dec!(0.08));
        assert_eq!(sorted[1].venue, "expensive");
        assert_eq!(total_fee, dec!(0.18));
    }

    #[test]
    fn test_optimize_sell_prefers_higher_proceeds() {
        let optimizer = FeeOptimizer::new();
        optimizer.update_schedule("high-fee", FeeSchedule::flat(dec!(0.002), dec!(0.002), "USDT"));
        optimizer.update_schedule("low-fee", FeeSchedule::flat(dec!(0.0005), dec!(0.0005), "USDT"));

        let mut a = route("high-fee", dec!(2), dec!(100));
        a.side = Side::Sell;
        let mut b = route("low-fee", dec!(2), dec!(100));
        b.side = Side::Sell;

        let (sorted, _) = optimizer.optimize(vec![a, b], Side::Sell);
        assert_eq!(sorted[0].venue, "low-fee");
    }

    #[test]
    fn test_optimize_tie_breaks_alphabetically() {
        let optimizer = FeeOptimizer::new();
        optimizer.update_schedule("kraken", FeeSchedule::flat(dec!(0.001), dec!(0.001), "USDT"));
        optimizer.update_schedule("binance", FeeSchedule::flat(dec!(0.001), dec!(0.001), "USDT"));

        let routes = vec![
            route("kraken", dec!(1), dec!(100)),
            route("binance", dec!(1), dec!(100)),
        ];

        let (sorted, _) = optimizer.optimize(routes, Side::Buy);
        assert_eq!(sorted[0].venue, "binance");
    }
}
