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
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RouterResult;
use crate::fees::FeeSchedule;
use crate::orderbook::VenueBook;
use crate::types::{OrderType, RouteStatus, Side, Symbol, TimeInForce, VenueId};

/// Number of consecutive failures after which a venue is marked unavailable
const UNHEALTHY_FAILURE_THRESHOLD: u32 = 3;

/// Child order as sent to a venue client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueOrder {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

/// Venue response to an order placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    /// Exchange-assigned order id
    pub exchange_order_id: String,
    /// Terminal status reported by the venue
    pub status: RouteStatus,
    /// Executed quantity
    pub executed_qty: Decimal,
    /// Average fill price
    pub avg_price: Decimal,
    /// Fee charged
    pub fee: Decimal,
    /// Asset the fee was charged in
    pub fee_asset: String,
}

/// Account snapshot returned by a venue client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Free balances by asset
    pub balances: HashMap<String, Decimal>,
    /// Whether the account is permitted to trade
    pub can_trade: bool,
}

/// Capability the core consumes to talk to a venue.
///
/// The core never parses exchange wire formats; connectors implement this
/// trait and own all transport concerns. Every operation takes an explicit
/// deadline derived from the intent's urgency.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Fetch the current order book for a symbol
    async fn get_order_book(&self, symbol: &str, deadline: Duration) -> RouterResult<VenueBook>;

    /// Place an order and return the venue's terminal response
    async fn place_order(&self, order: &VenueOrder, deadline: Duration)
        -> RouterResult<PlacedOrder>;

    /// Cancel a previously placed order
    async fn cancel_order(&self, exchange_order_id: &str, deadline: Duration) -> RouterResult<()>;

    /// Lightweight account query, also used as a health probe
    async fn get_account(&self, deadline: Duration) -> RouterResult<AccountInfo>;

    /// Whether the connector currently holds a live connection
    fn is_connected(&self) -> bool;
}

/// Capability for resolving credentials; implemented by external collaborators
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, key: &str) -> RouterResult<String>;
}

/// Static venue metadata supplied at registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueInfo {
    pub name: VenueId,
    /// Fee schedule applied until updated through the fee optimizer
    pub fee_schedule: FeeSchedule,
}

/// Health state for one venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueState {
    pub available: bool,
    pub last_check: DateTime<Utc>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl Default for VenueState {
    fn default() -> Self {
        Self {
            available: true,
            last_check: Utc::now(),
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

/// Registry of venue clients and their health state.
///
/// Clients are shared read-only after registration; health transitions happen
/// on probe results and fetch failures.
pub struct VenueRegistry {
    clients: RwLock<HashMap<VenueId, Arc<dyn VenueClient>>>,
    states: DashMap<VenueId, VenueState>,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            states: DashMap::new(),
        }
    }

    /// Register a venue client. Idempotent: re-registering a name replaces
    /// the client and resets its health state.
    pub fn register(&self, name: impl Into<VenueId>, client: Arc<dyn VenueClient>) {
        let name = name.into();
        debug!("Registering venue {}", name);
        self.clients.write().insert(name.clone(), client);
        self.states.insert(name, VenueState::default());
    }

    /// Client for one venue, if registered
    pub fn client(&self, name: &str) -> Option<Arc<dyn VenueClient>> {
        self.clients.read().get(name).cloned()
    }

    /// Snapshot of all registered clients
    pub fn clients(&self) -> Vec<(VenueId, Arc<dyn VenueClient>)> {
        self.clients
            .read()
            .iter()
            .map(|(name, client)| (name.clone(), Arc::clone(client)))
            .collect()
    }

    /// Names of all registered venues
    pub fn venue_names(&self) -> Vec<VenueId> {
        self.clients.read().keys().cloned().collect()
    }

    /// Whether a venue is currently routable
    pub fn is_available(&self, name: &str) -> bool {
        self.states.get(name).map(|s| s.available).unwrap_or(false)
    }

    /// Names of venues currently routable
    pub fn available_venues(&self) -> Vec<VenueId> {
        self.venue_names()
            .into_iter()
            .filter(|name| self.is_available(name))
            .collect()
    }

    /// Health state snapshot for one venue
    pub fn state(&self, name: &str) -> Option<VenueState> {
        self.states.get(name).map(|s| s.clone())
    }

    /// Record a successful probe or fetch; restores availability
    pub fn record_success(&self, name: &str) {
        if let Some(mut state) = self.states.get_mut(name) {
            if !state.available {
                debug!("Venue {} recovered", name);
            }
            state.available = true;
            state.consecutive_failures = 0;
            state.last_error = None;
            state.last_check = Utc::now();
        }
    }

    /// Record a failed probe or fetch; after three consecutive failures the
    /// venue is excluded from routing until the next success.
    pub fn record_failure(&self, name: &str, error: impl Into<String>) -> u32 {
        let error = error.into();
        match self.states.get_mut(name) {
            Some(mut state) => {
                state.consecutive_failures += 1;
                state.last_error = Some(error.clone());
                state.last_check = Utc::now();

                if state.consecutive_failures >= UNHEALTHY_FAILURE_THRESHOLD && state.available {
                    warn!(
                        "Marking venue {} unavailable after {} consecutive failures: {}",
                        name, state.consecutive_failures, error
                    );
                    state.available = false;
                }
                state.consecutive_failures
            }
            None => 0,
        }
    }

    /// Force a venue's availability, used by the health monitor
    pub fn set_available(&self, name: &str, available: bool, error: Option<String>) {
        if let Some(mut state) = self.states.get_mut(name) {
            state.available = available;
            state.last_check = Utc::now();
            if let Some(err) = error {
                state.last_error = Some(err);
            } else if available {
                state.last_error = None;
                state.consecutive_failures = 0;
            }
        }
    }
}

impl Default for VenueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A TTL-bounded cache for venue account and ticker lookups.
///
/// Entries expire after the configured TTL and the map never grows past
/// `max_entries`; inserting into a full cache evicts expired entries first
/// and rejects the insert if none could be freed.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (V, Instant)>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock();
        entries.get(key).and_then(|(value, inserted)| {
            if inserted.elapsed() < self.ttl {
                Some(value.clone())
            } else {
                None
            }
        })
    }

    pub fn insert(&self, key: K, value: V) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
            if entries.len() >= self.max_entries {
                return false;
            }
        }
        entries.insert(key, (value, Instant::now()));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
