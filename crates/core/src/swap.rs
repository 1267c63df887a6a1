//! Swap execution seam.
//!
//! The rebalancer talks to a `Swapper` trait so tests can observe swap
//! intents without an aggregator; the production implementation quotes
//! through the aggregator and submits through the protocol gateway.

use anyhow::{Context, Result};
use async_trait::async_trait;
use liqbot_api::{AggregatorClient, QuoteRequest, SwapMode};
use liqbot_chain::{Address, ProtocolClient, Signature};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};

/// Executes a token swap through whatever venue the implementation wires.
#[async_trait]
pub trait Swapper: Send + Sync {
    /// Swap `amount` (input amount for `ExactIn`, desired output amount for
    /// `ExactOut`) from `mint_in` to `mint_out`.
    async fn swap(
        &self,
        mint_in: Address,
        mint_out: Address,
        amount: Decimal,
        mode: SwapMode,
    ) -> Result<Signature>;
}

/// Production swapper: aggregator quote, unsigned transaction build,
/// gateway signing and submission.
pub struct SwapExecutor {
    aggregator: Arc<AggregatorClient>,
    protocol: Arc<dyn ProtocolClient>,
    slippage_bps: u16,
}

impl SwapExecutor {
    pub fn new(
        aggregator: Arc<AggregatorClient>,
        protocol: Arc<dyn ProtocolClient>,
        slippage_bps: u16,
    ) -> Self {
        Self {
            aggregator,
            protocol,
            slippage_bps,
        }
    }
}

#[async_trait]
impl Swapper for SwapExecutor {
    #[instrument(skip(self), fields(mint_in = %mint_in.short(), mint_out = %mint_out.short()))]
    async fn swap(
        &self,
        mint_in: Address,
        mint_out: Address,
        amount: Decimal,
        mode: SwapMode,
    ) -> Result<Signature> {
        let quote = self
            .aggregator
            .quote_cached(&QuoteRequest {
                input_mint: mint_in,
                output_mint: mint_out,
                amount,
                slippage_bps: self.slippage_bps,
                swap_mode: mode,
            })
            .await
            .context("swap quote failed")?;

        info!(
            in_amount = %quote.in_amount,
            out_amount = %quote.out_amount,
            price_impact = ?quote.price_impact_pct,
            "swap quoted"
        );

        let tx = self
            .aggregator
            .swap_transaction(&quote, &self.protocol.wallet_address())
            .await
            .context("swap transaction build failed")?;

        let signature = self.protocol.sign_and_submit(&tx).await?;
        info!(sig = %signature, "swap confirmed");
        Ok(signature)
    }
}
