//! Inventory rebalancing.
//!
//! Keeps the liquidator's own margin account denominated in the quote
//! asset: seized collateral is sold, borrowed legs are repaid, and the
//! proceeds are re-deposited as quote. Also sweeps stray wallet token
//! balances left behind by partial fills.
//!
//! Every stage re-reads on-chain state before acting and proceeds
//! position by position, so a failure mid-way leaves the account in a
//! state the next pass can pick up from.

use anyhow::{Context, Result};
use liqbot_api::SwapMode;
use liqbot_chain::{Address, MetadataRegistry, PriceBias, ProtocolClient};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::RebalanceConfig;
use crate::swap::Swapper;

pub struct Rebalancer {
    protocol: Arc<dyn ProtocolClient>,
    swapper: Arc<dyn Swapper>,
    metadata: Arc<MetadataRegistry>,
    quote_mint: Address,
    native_mint: Address,
    config: RebalanceConfig,
}

impl Rebalancer {
    pub fn new(
        protocol: Arc<dyn ProtocolClient>,
        swapper: Arc<dyn Swapper>,
        metadata: Arc<MetadataRegistry>,
        quote_mint: Address,
        native_mint: Address,
        config: RebalanceConfig,
    ) -> Self {
        Self {
            protocol,
            swapper,
            metadata,
            quote_mint,
            native_mint,
            config,
        }
    }

    /// Fraction of a deposit above which a withdrawal closes the whole
    /// position.
    fn whole_position_ratio() -> Decimal {
        Decimal::new(95, 2)
    }

    /// Smallest USD amount worth acquiring when covering a shortfall.
    fn min_acquire_usd() -> Decimal {
        Decimal::ONE
    }

    /// Whether the own account holds anything besides quote deposits.
    ///
    /// True when any non-quote deposit exceeds the dust threshold, or when
    /// any liability is outstanding at all. Debt is never dust: a fraction
    /// of a token can be worth a lot, and the stage-2 price clamp exists so
    /// even tiny debts stay repayable.
    pub async fn needs_rebalancing(&self) -> Result<bool> {
        self.protocol.reload_own_account().await?;
        let account = self.protocol.own_account();

        for balance in account.active_balances() {
            let Some(bank) = self.protocol.bank_by_pk(&balance.bank_pk) else {
                warn!(bank = %balance.bank_pk.short(), "balance references unknown bank");
                continue;
            };
            let qty = bank.quantity(balance);

            if bank.mint != self.quote_mint && qty.assets > self.config.dust_threshold_ui {
                return Ok(true);
            }
            if qty.liabilities > Decimal::ZERO {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// One full rebalancing pass: sell non-quote deposits, repay all
    /// liabilities, deposit the remaining quote.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        self.sell_non_quote_deposits().await?;
        self.repay_liabilities().await?;
        self.deposit_remaining_quote().await?;
        Ok(())
    }

    /// Stage 1: withdraw every non-quote deposit and sell the proceeds for
    /// quote.
    async fn sell_non_quote_deposits(&self) -> Result<()> {
        // Stuck banks are set aside so the rest of the pass still runs.
        let mut skipped: HashSet<Address> = HashSet::new();
        loop {
            self.protocol.reload_own_account().await?;
            let account = self.protocol.own_account();

            let target = account.active_balances().find_map(|balance| {
                let bank = self.protocol.bank_by_pk(&balance.bank_pk)?;
                if bank.mint == self.quote_mint || skipped.contains(&bank.address) {
                    return None;
                }
                let assets = bank.quantity(balance).assets;
                (assets > self.config.dust_threshold_ui).then_some((bank, assets))
            });

            let Some((bank, assets)) = target else {
                return Ok(());
            };

            let max_withdraw = self.protocol.max_withdraw(&bank).await?;
            let amount = assets.min(max_withdraw);
            if amount <= self.config.dust_threshold_ui {
                warn!(
                    token = %self.metadata.symbol(&bank.mint),
                    deposited = %assets,
                    max_withdraw = %max_withdraw,
                    "deposit cannot be withdrawn, leaving in place"
                );
                skipped.insert(bank.address);
                continue;
            }

            // Withdrawing nearly everything closes the position outright.
            let is_final = amount >= assets * Self::whole_position_ratio();

            info!(
                token = %self.metadata.symbol(&bank.mint),
                amount = %amount,
                is_final,
                "selling non-quote deposit"
            );
            self.protocol.withdraw(amount, &bank, is_final).await?;

            let proceeds = self.spendable_balance(&bank.mint, false).await?;
            if proceeds > self.config.dust_threshold_ui {
                self.swapper
                    .swap(bank.mint, self.quote_mint, proceeds, SwapMode::ExactIn)
                    .await
                    .context("failed to sell withdrawn deposit")?;
            }
        }
    }

    /// Stage 2: repay every non-quote liability. The quote cost of the
    /// full debt is priced with the high bias so funding covers the worst
    /// case; the wallet's quote funds it first, then the own quote
    /// position up to its borrow capacity.
    async fn repay_liabilities(&self) -> Result<()> {
        // Legs that cannot make progress this pass are set aside, not
        // allowed to stall the ones behind them.
        let mut skipped: HashSet<Address> = HashSet::new();
        loop {
            self.protocol.reload_own_account().await?;
            let account = self.protocol.own_account();

            let target = account.active_balances().find_map(|balance| {
                let bank = self.protocol.bank_by_pk(&balance.bank_pk)?;
                if bank.mint == self.quote_mint || skipped.contains(&bank.address) {
                    return None;
                }
                let outstanding = bank.quantity(balance).liabilities;
                (outstanding > Decimal::ZERO).then_some((bank, outstanding))
            });

            let Some((bank, outstanding)) = target else {
                return Ok(());
            };

            let price = self.protocol.oracle_price(&bank, PriceBias::High).await?;
            // Sub-dollar debts are clamped up so the swap stays routable.
            let cost = (outstanding * price).max(Self::min_acquire_usd());

            let quote_balance = self.spendable_balance(&self.quote_mint, false).await?;
            let mut available = quote_balance.min(cost);

            if available < cost {
                let quote_bank = self
                    .protocol
                    .bank_by_mint(&self.quote_mint)
                    .context("quote bank not found")?;
                let capacity = self.protocol.max_borrow(&quote_bank).await?;
                let withdraw_amount = (cost - available).min(capacity);

                if withdraw_amount > Decimal::ZERO {
                    debug!(
                        token = %self.metadata.symbol(&bank.mint),
                        cost = %cost,
                        withdraw_amount = %withdraw_amount,
                        "drawing on quote position to fund repay"
                    );
                    self.protocol
                        .withdraw(withdraw_amount, &quote_bank, false)
                        .await?;
                    // Re-read what actually landed rather than assuming
                    // the full amount did.
                    available = self
                        .spendable_balance(&self.quote_mint, false)
                        .await?
                        .min(cost);
                }
            }

            if available <= Decimal::ZERO {
                warn!(
                    token = %self.metadata.symbol(&bank.mint),
                    outstanding = %outstanding,
                    "no quote available to fund repay, skipping"
                );
                skipped.insert(bank.address);
                continue;
            }

            self.swapper
                .swap(self.quote_mint, bank.mint, available, SwapMode::ExactIn)
                .await
                .context("failed to buy debt asset")?;

            let acquired = self.spendable_balance(&bank.mint, false).await?;
            if acquired <= Decimal::ZERO {
                warn!(
                    token = %self.metadata.symbol(&bank.mint),
                    "swap yielded nothing to repay with"
                );
                skipped.insert(bank.address);
                continue;
            }

            let is_final = acquired >= outstanding;
            let amount = acquired.min(outstanding);

            info!(
                token = %self.metadata.symbol(&bank.mint),
                amount = %amount,
                outstanding = %outstanding,
                is_final,
                "repaying liability"
            );
            self.protocol.repay(amount, &bank, is_final).await?;

            if !is_final {
                // Out of capacity for this leg; move on, a later pass
                // retries it.
                skipped.insert(bank.address);
            }
        }
    }

    /// Stage 3: deposit whatever quote the wallet holds back into the
    /// quote bank.
    async fn deposit_remaining_quote(&self) -> Result<()> {
        let quote_bank = self
            .protocol
            .bank_by_mint(&self.quote_mint)
            .context("quote bank not found")?;

        let balance = self.spendable_balance(&self.quote_mint, false).await?;
        if balance <= self.config.dust_threshold_ui {
            return Ok(());
        }

        info!(amount = %balance, "depositing remaining quote");
        self.protocol.deposit(balance, &quote_bank).await?;
        Ok(())
    }

    /// Sweep stray wallet balances: repay same-asset liabilities first,
    /// sell the remainder for quote, then deposit the quote.
    #[instrument(skip(self))]
    pub async fn sweep_wallet(&self) -> Result<()> {
        self.protocol.reload_own_account().await?;
        let account = self.protocol.own_account();
        let mut swept_any = false;

        for bank in self.protocol.banks() {
            if bank.mint == self.quote_mint {
                continue;
            }

            let outstanding = account
                .balance_for_bank(&bank.address)
                .map(|b| bank.quantity(b).liabilities)
                .unwrap_or(Decimal::ZERO);

            if outstanding > Decimal::ZERO {
                // Repaying our own debt is worth dipping into half the
                // native fee reserve.
                let available = self.spendable_balance(&bank.mint, true).await?;
                if available > self.config.dust_threshold_ui {
                    let is_final = available >= outstanding;
                    let amount = available.min(outstanding);
                    info!(
                        token = %self.metadata.symbol(&bank.mint),
                        amount = %amount,
                        is_final,
                        "sweeping wallet balance into repay"
                    );
                    self.protocol.repay(amount, &bank, is_final).await?;
                    swept_any = true;
                }
            }

            let remainder = self.spendable_balance(&bank.mint, false).await?;
            if remainder > self.config.dust_threshold_ui {
                info!(
                    token = %self.metadata.symbol(&bank.mint),
                    amount = %remainder,
                    "sweeping wallet balance into quote"
                );
                self.swapper
                    .swap(bank.mint, self.quote_mint, remainder, SwapMode::ExactIn)
                    .await?;
                swept_any = true;
            }
        }

        if swept_any {
            self.deposit_remaining_quote().await?;
        }
        Ok(())
    }

    /// Wallet balance usable for trading. The native asset keeps a fee
    /// reserve; `half_reserve` relaxes it to half when repaying debt.
    async fn spendable_balance(&self, mint: &Address, half_reserve: bool) -> Result<Decimal> {
        if *mint == self.native_mint {
            let balance = self.protocol.native_balance().await?;
            let reserve = if half_reserve {
                self.config.min_native_reserve / Decimal::TWO
            } else {
                self.config.min_native_reserve
            };
            Ok((balance - reserve).max(Decimal::ZERO))
        } else {
            self.protocol.token_balance(mint).await
        }
    }
}
