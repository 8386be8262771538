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

use thiserror::Error;

/// Errors that can occur while routing or executing orders
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid order intent: {0}")]
    InvalidIntent(String),

    #[error("No eligible venues for symbol: {0}")]
    NoEligibleVenues(String),

    #[error("Insufficient liquidity for {symbol}: requested {requested}, available {available}")]
    InsufficientLiquidity {
        symbol: String,
        requested: String,
        available: String,
    },

    #[error("Slippage protection triggered: {0}")]
    SlippageProtection(String),

    #[error("Venue unavailable: {0}")]
    VenueUnavailable(String),

    #[error("Venue call failed on {venue}: {message}")]
    VenueCallFailed { venue: String, message: String },

    #[error("Partial execution: {0}")]
    PartialExecution(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: order intake capacity exhausted")]
    RateLimited,

    #[error("No route plan found for request: {0}")]
    PlanNotFound(String),

    #[error("Invalid router state: {0}")]
    InvalidState(String),
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;
