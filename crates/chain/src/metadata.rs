//! Token metadata registry.
//!
//! Human-readable symbols for log lines and reporting. Loaded at startup
//! and refreshed on a slow timer; a missing symbol falls back to the
//! shortened mint address so logging never blocks on metadata.

use anyhow::Result;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::gateway::GatewayClient;
use crate::types::Address;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenMetadata {
    pub mint: Address,
    pub symbol: String,
    pub decimals: u32,
}

/// Mint → metadata registry shared across components.
#[derive(Default)]
pub struct MetadataRegistry {
    tokens: DashMap<Address, TokenMetadata>,
}

impl MetadataRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the registry contents from the gateway's token list.
    pub async fn refresh(&self, gateway: &GatewayClient) -> Result<()> {
        let tokens: Vec<TokenMetadata> = gateway.token_metadata().await?;
        let count = tokens.len();

        for token in tokens {
            self.tokens.insert(token.mint, token);
        }

        debug!(token_count = count, "token metadata refreshed");
        Ok(())
    }

    pub fn get(&self, mint: &Address) -> Option<TokenMetadata> {
        self.tokens.get(mint).map(|t| t.value().clone())
    }

    /// Symbol for a mint, falling back to the shortened address.
    pub fn symbol(&self, mint: &Address) -> String {
        self.tokens
            .get(mint)
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| mint.short())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
