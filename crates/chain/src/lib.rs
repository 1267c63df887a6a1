//! Liquidator chain interaction layer.
//!
//! This crate provides:
//! - The core protocol data model (addresses, banks, balances, accounts)
//! - The `ProtocolClient` contract the engine drives the protocol through
//! - The gateway HTTP client implementing that contract
//! - A streaming feed of every margin account in the protocol
//! - Token metadata for human-readable logging

mod client;
mod feed;
mod gateway;
mod metadata;
mod types;

pub use client::ProtocolClient;
pub use feed::{apply_event, AccountFeed, FeedEvent};
pub use gateway::{AccountUpdates, GatewayClient};
pub use metadata::{MetadataRegistry, TokenMetadata};
pub use types::{
    Address, AddressParseError, Balance, BalanceQuantity, Bank, HealthComponents, MarginAccount,
    PriceBias, RequirementType, Signature,
};
