//! External API integrations.
//!
//! This crate provides:
//! - The swap aggregator client (quoting and transaction building)

mod aggregator;

pub use aggregator::{AggregatorClient, QuoteRequest, SwapMode, SwapQuote};
