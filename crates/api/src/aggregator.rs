//! Swap aggregator client.
//!
//! Quotes routes across DEX venues and builds unsigned swap transactions
//! for the wallet to sign. Quotes are cached briefly so repeated sizing
//! probes within one cycle do not hammer the API.

use anyhow::Result;
use dashmap::DashMap;
use liqbot_chain::Address;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Quote direction: fix the input amount or the output amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapMode {
    ExactIn,
    ExactOut,
}

impl SwapMode {
    fn as_str(&self) -> &'static str {
        match self {
            SwapMode::ExactIn => "ExactIn",
            SwapMode::ExactOut => "ExactOut",
        }
    }
}

/// Parameters for a quote request.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub input_mint: Address,
    pub output_mint: Address,
    /// Token amount in UI units; input amount for `ExactIn`, output amount
    /// for `ExactOut`.
    pub amount: Decimal,
    pub slippage_bps: u16,
    pub swap_mode: SwapMode,
}

/// A priced route returned by the aggregator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub input_mint: Address,
    pub output_mint: Address,
    pub in_amount: Decimal,
    pub out_amount: Decimal,
    /// Worst acceptable counter-amount after slippage.
    pub other_amount_threshold: Decimal,
    pub swap_mode: SwapMode,
    pub slippage_bps: u16,
    #[serde(default)]
    pub price_impact_pct: Option<Decimal>,
    /// Opaque route payload echoed back when building the transaction.
    #[serde(default)]
    pub route: serde_json::Value,
}

#[derive(Clone)]
struct CachedQuote {
    quote: SwapQuote,
    cached_at: Instant,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    input_mint: Address,
    output_mint: Address,
    swap_mode: SwapMode,
    /// Bucketed amount (rounded to reduce cache misses)
    amount_bucket: u64,
}

/// Aggregator HTTP client with quote caching.
#[derive(Clone)]
pub struct AggregatorClient {
    client: reqwest::Client,
    base_url: String,
    /// Quote cache
    cache: Arc<DashMap<CacheKey, CachedQuote>>,
    /// Cache TTL (default: 5 seconds)
    cache_ttl: Duration,
}

impl std::fmt::Debug for AggregatorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorClient")
            .field("base_url", &self.base_url)
            .field("cache_size", &self.cache.len())
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl AggregatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            cache: Arc::new(DashMap::new()),
            cache_ttl: Duration::from_secs(5),
        }
    }

    /// Bucket amount by order of magnitude for cache efficiency.
    fn bucket_amount(amount: Decimal) -> u64 {
        let amount_f64 = amount.to_f64().unwrap_or(0.0);
        if amount_f64 <= 0.0 {
            return 0;
        }
        (amount_f64.log10() * 100.0) as u64
    }

    /// Fetch a fresh quote from the aggregator.
    #[instrument(skip(self), fields(input = %request.input_mint.short(), output = %request.output_mint.short()))]
    pub async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
        let url = format!("{}/v1/quote", self.base_url);

        debug!(
            amount = %request.amount,
            mode = request.swap_mode.as_str(),
            slippage_bps = request.slippage_bps,
            "requesting swap quote"
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("inputMint", request.input_mint.to_string()),
                ("outputMint", request.output_mint.to_string()),
                ("amount", request.amount.to_string()),
                ("slippageBps", request.slippage_bps.to_string()),
                ("swapMode", request.swap_mode.as_str().to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("aggregator quote error: {} - {}", status, body);
        }

        Ok(response.json().await?)
    }

    /// Quote with a short-lived cache in front.
    pub async fn quote_cached(&self, request: &QuoteRequest) -> Result<SwapQuote> {
        let cache_key = CacheKey {
            input_mint: request.input_mint,
            output_mint: request.output_mint,
            swap_mode: request.swap_mode,
            amount_bucket: Self::bucket_amount(request.amount),
        };

        if let Some(cached) = self.cache.get(&cache_key) {
            if cached.cached_at.elapsed() < self.cache_ttl {
                debug!(
                    cache_age_ms = cached.cached_at.elapsed().as_millis(),
                    "cache hit for swap quote"
                );
                return Ok(cached.quote.clone());
            }
        }

        let quote = self.quote(request).await?;
        // Expired entries are dropped on write, keeping the map bounded.
        self.cache
            .retain(|_, cached| cached.cached_at.elapsed() < self.cache_ttl);
        self.cache.insert(
            cache_key,
            CachedQuote {
                quote: quote.clone(),
                cached_at: Instant::now(),
            },
        );

        Ok(quote)
    }

    /// Build an unsigned swap transaction for a previously fetched quote.
    /// Returns the base64-encoded transaction.
    pub async fn swap_transaction(&self, quote: &SwapQuote, user: &Address) -> Result<String> {
        let url = format!("{}/v1/swap", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "userPublicKey": user,
                "quoteResponse": {
                    "inputMint": quote.input_mint,
                    "outputMint": quote.output_mint,
                    "inAmount": quote.in_amount,
                    "outAmount": quote.out_amount,
                    "otherAmountThreshold": quote.other_amount_threshold,
                    "swapMode": quote.swap_mode,
                    "slippageBps": quote.slippage_bps,
                    "route": quote.route,
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("aggregator swap error: {} - {}", status, body);
        }

        let built: SwapTransactionResponse = response.json().await?;
        Ok(built.swap_transaction)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapTransactionResponse {
    swap_transaction: String,
}
