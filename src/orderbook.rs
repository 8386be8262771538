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

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Side, Symbol, VenueId};

/// A single price level in an order book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Result of walking one side of a book for a target quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookWalk {
    /// Volume-weighted average price over the filled quantity
    pub avg_price: Decimal,
    /// Quantity the book could absorb, up to the requested amount
    pub filled_qty: Decimal,
}

/// Order book for one symbol at one venue.
///
/// Bids are ordered by price descending, asks ascending; both sides are
/// strictly monotonic and the book is never crossed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueBook {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    /// 24h traded volume reported by the venue, used for VWAP weighting
    pub volume_24h: Decimal,
    pub last_update: DateTime<Utc>,
}

impl VenueBook {
    pub fn new(
        venue: impl Into<VenueId>,
        symbol: impl Into<Symbol>,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Self {
        Self {
            venue: venue.into(),
            symbol: symbol.into(),
            bids,
            asks,
            volume_24h: Decimal::ZERO,
            last_update: Utc::now(),
        }
    }

    pub fn with_volume_24h(mut self, volume: Decimal) -> Self {
        self.volume_24h = volume;
        self
    }

    /// Check the book's structural invariants
    pub fn validate(&self) -> Result<(), String> {
        for level in self.bids.iter().chain(self.asks.iter()) {
            if level.price <= Decimal::ZERO {
                return Err(format!("non-positive price {}", level.price));
            }
            if level.quantity <= Decimal::ZERO {
                return Err(format!("non-positive quantity at {}", level.price));
            }
        }

        for pair in self.bids.windows(2) {
            if pair[0].price <= pair[1].price {
                return Err("bids are not strictly descending".to_string());
            }
        }
        for pair in self.asks.windows(2) {
            if pair[0].price >= pair[1].price {
                return Err("asks are not strictly ascending".to_string());
            }
        }

        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                return Err(format!("book is crossed: bid {} >= ask {}", bid, ask));
            }
        }

        Ok(())
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Spread relative to the mid price, in basis points
    pub fn spread_bps(&self) -> Option<Decimal> {
        let spread = self.spread()?;
        let mid = self.mid_price()?;
        if mid <= Decimal::ZERO {
            return None;
        }
        Some(spread / mid * Decimal::from(10_000))
    }

    /// Levels an order of the given side would consume: asks for a buy,
    /// bids for a sell
    pub fn opposing_levels(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        }
    }

    /// Total resting quantity an order of the given side could consume
    pub fn opposing_quantity(&self, side: Side) -> Decimal {
        self.opposing_levels(side).iter().map(|l| l.quantity).sum()
    }

    /// Walk the opposing side for a target quantity
    pub fn walk(&self, side: Side, quantity: Decimal) -> Option<BookWalk> {
        walk_levels(
            self.opposing_levels(side).iter().map(|l| (l.price, l.quantity)),
            quantity,
        )
    }

    /// Largest quantity fillable while the volume-weighted price stays within
    /// `max_bps` of the best opposing price.
    ///
    /// Whole levels are consumed; the best level is always admissible since
    /// it fills at reference price.
    pub fn max_quantity_within_bps(&self, side: Side, max_bps: Decimal) -> Decimal {
        let levels = self.opposing_levels(side);
        let reference = match levels.first() {
            Some(level) => level.price,
            None => return Decimal::ZERO,
        };

        let mut admitted = Decimal::ZERO;
        let mut notional = Decimal::ZERO;

        for level in levels {
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

/// One merged price level with its contributing venues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedLevel {
    pub price: Decimal,
    /// Sum of contributing venue quantities at this exact price
    pub quantity: Decimal,
    /// Contributing venues with their individual sizes, sorted by venue name
    pub venues: Vec<(VenueId, Decimal)>,
}

/// A depth view entry with running cumulative volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub cumulative: Decimal,
    pub venues: Vec<(VenueId, Decimal)>,
}

/// Union of per-venue books for one symbol, keyed by exact price.
///
/// Built atomically by the aggregator; readers always observe a fully merged
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedBook {
    pub symbol: Symbol,
    /// Merged bids, price descending
    pub bids: Vec<AggregatedLevel>,
    /// Merged asks, price ascending
    pub asks: Vec<AggregatedLevel>,
    /// The component books this snapshot was merged from
    pub venue_books: HashMap<VenueId, VenueBook>,
    /// Max of component book update times
    pub last_update: DateTime<Utc>,
}

impl AggregatedBook {
    /// Merge per-venue books into one aggregated view.
    ///
    /// Venues publishing identical prices aggregate additively; each merged
    /// level records the contributing venues and their sizes.
    pub fn merge(symbol: impl Into<Symbol>, books: Vec<VenueBook>) -> Self {
        let symbol = symbol.into();
        let mut bid_map: BTreeMap<Decimal, Vec<(VenueId, Decimal)>> = BTreeMap::new();
        let mut ask_map: BTreeMap<Decimal, Vec<(VenueId, Decimal)>> = BTreeMap::new();
        let mut last_update = DateTime::<Utc>::MIN_UTC;
        let mut venue_books = HashMap::with_capacity(books.len());

        for book in books {
            if book.last_update > last_update {
                last_update = book.last_update;
            }
            for level in &book.bids {
                bid_map
                    .entry(level.price)
                    .or_default()
                    .push((book.venue.clone(), level.quantity));
            }
            for level in &book.asks {
                ask_map
                    .entry(level.price)
                    .or_default()
                    .push((book.venue.clone(), level.quantity));
            }
            venue_books.insert(book.venue.clone(), book);
        }

        let collapse = |mut venues: Vec<(VenueId, Decimal)>, price: Decimal| {
            venues.sort_by(|a, b| a.0.cmp(&b.0));
            AggregatedLevel {
                price,
                quantity: venues.iter().map(|(_, q)| *q).sum(),
                venues,
            }
        };

        let bids: Vec<AggregatedLevel> = bid_map
            .into_iter()
            .rev()
            .map(|(price, venues)| collapse(venues, price))
            .collect();
        let asks: Vec<AggregatedLevel> = ask_map
            .into_iter()
            .map(|(price, venues)| collapse(venues, price))
            .collect();

        if last_update == DateTime::<Utc>::MIN_UTC {
            last_update = Utc::now();
        }

        Self {
            symbol,
            bids,
            asks,
            venue_books,
            last_update,
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Spread relative to the mid price, in basis points
    pub fn spread_bps(&self) -> Option<Decimal> {
        let spread = self.spread()?;
        let mid = self.mid_price()?;
        if mid <= Decimal::ZERO {
            return None;
        }
        Some(spread / mid * Decimal::from(10_000))
    }

    /// Merged levels for one side of the book
    pub fn side_levels(&self, side: Side) -> &[AggregatedLevel] {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Levels an order of the given side would consume
    pub fn opposing_levels(&self, side: Side) -> &[AggregatedLevel] {
        match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        }
    }

    /// Total quantity resting on one side
    pub fn side_quantity(&self, side: Side) -> Decimal {
        self.side_levels(side).iter().map(|l| l.quantity).sum()
    }

    /// Total quantity an order of the given side could consume
    pub fn opposing_quantity(&self, side: Side) -> Decimal {
        self.opposing_levels(side).iter().map(|l| l.quantity).sum()
    }

    /// Depth view of one side with cumulative volumes, top `levels` entries
    pub fn depth(&self, side: Side, levels: usize) -> Vec<DepthLevel> {
        let mut cumulative = Decimal::ZERO;
        self.side_levels(side)
            .iter()
            .take(levels)
            .map(|level| {
                cumulative += level.quantity;
                DepthLevel {
                    price: level.price,
                    quantity: level.quantity,
                    cumulative,
                    venues: level.venues.clone(),
                }
            })
            .collect()
    }

    /// Walk the opposing side for a target quantity
    pub fn walk(&self, side: Side, quantity: Decimal) -> Option<BookWalk> {
        walk_levels(
            self.opposing_levels(side).iter().map(|l| (l.price, l.quantity)),
            quantity,
        )
    }

    /// Average level size on the opposing side
    pub fn average_opposing_level_quantity(&self, side: Side) -> Option<Decimal> {
        let levels = self.opposing_levels(side);
        if levels.is_empty() {
            return None;
        }
        let total: Decimal = levels.iter().map(|l| l.quantity).sum();
        Some(total / Decimal::from(levels.len()))
    }

    /// Order book imbalance in [-1, 1]; positive means buy pressure
    pub fn imbalance(&self) -> Decimal {
        let bid_qty = self.side_quantity(Side::Buy);
        let ask_qty = self.side_quantity(Side::Sell);
        let total = bid_qty + ask_qty;
        if total == Decimal::ZERO {
            return Decimal::ZERO;
        }
        (bid_qty - ask_qty) / total
    }
}

/// Snapshot of market state for one symbol, handed to the routing pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConditions {
    pub symbol: Symbol,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    /// Spread over mid price, in basis points
    pub spread_bps: Option<Decimal>,
    /// Standard deviation of recent mid-price returns
    pub volatility: f64,
    pub bid_quantity: Decimal,
    pub ask_quantity: Decimal,
    /// (bid - ask) / (bid + ask) over total resting quantity
    pub imbalance: Decimal,
    /// The merged snapshot these conditions were derived from, including the
    /// per-venue component books
    #[serde(skip, default = "empty_book")]
    pub book: Arc<AggregatedBook>,
    pub last_update: DateTime<Utc>,
}

fn empty_book() -> Arc<AggregatedBook> {
    Arc::new(AggregatedBook::merge(String::new(), Vec::new()))
}

impl MarketConditions {
    /// Derive conditions from a merged snapshot and a volatility estimate
    pub fn from_book(book: Arc<AggregatedBook>, volatility: f64) -> Self {
        Self {
            symbol: book.symbol.clone(),
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            spread: book.spread(),
            spread_bps: book.spread_bps(),
            volatility,
            bid_quantity: book.side_quantity(Side::Buy),
            ask_quantity: book.side_quantity(Side::Sell),
            imbalance: book.imbalance(),
            last_update: book.last_update,
            book,
        }
    }
}

fn walk_levels(
    levels: impl Iterator<Item = (Decimal, Decimal)>,
    quantity: Decimal,
) -> Option<BookWalk> {
    if quantity <= Decimal::ZERO {
        return None;
    }

    let mut remaining = quantity;
    let mut notional = Decimal::ZERO;
    let mut filled = Decimal::ZERO;

    for (price, available) in levels {
        let take = available.min(remaining);
        notional += take * price;
        filled += take;
        remaining -= take;

        if remaining <= Decimal::ZERO {
            break;
        }
    }

    if filled <= Decimal::ZERO {
        return None;
    }

    Some(BookWalk {
        avg_price: notional / filled,
        filled_qty: filled,
    })
}
