//! Contract between the engine and the lending-protocol backend.
//!
//! The health/price/capacity math and transaction building live behind this
//! trait; the engine only decides when and what to trade, repay, withdraw
//! or liquidate.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{
    Address, Bank, HealthComponents, MarginAccount, PriceBias, RequirementType, Signature,
};

/// Lending-protocol client consumed by the engine.
///
/// Every mutating call is issued sequentially from the control thread, and
/// the engine re-reads account state between mutations. Implementations
/// must not retry a failed submission beyond their own bounded resend
/// policy.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Address of the liquidator's own margin account.
    fn own_address(&self) -> Address;

    /// Address of the wallet authority signing transactions.
    fn wallet_address(&self) -> Address;

    /// Latest snapshot of the liquidator's own margin account.
    fn own_account(&self) -> MarginAccount;

    /// Re-fetch the liquidator's own account state.
    async fn reload_own_account(&self) -> Result<()>;

    /// Re-fetch the bank set (slow cadence, minutes).
    async fn reload_banks(&self) -> Result<()>;

    /// All currently known banks.
    fn banks(&self) -> Vec<Bank>;

    /// Typed bank lookup by bank address.
    fn bank_by_pk(&self, bank_pk: &Address) -> Option<Bank>;

    /// Typed bank lookup by mint.
    fn bank_by_mint(&self, mint: &Address) -> Option<Bank>;

    /// Priced health components of an account under the given bias mode.
    async fn health_components(
        &self,
        account: &MarginAccount,
        requirement: RequirementType,
    ) -> Result<HealthComponents>;

    /// Oracle price for one token unit of the bank's mint, in USD.
    async fn oracle_price(&self, bank: &Bank, bias: PriceBias) -> Result<Decimal>;

    /// Maximum amount withdrawable from the own account for this bank.
    async fn max_withdraw(&self, bank: &Bank) -> Result<Decimal>;

    /// Maximum borrow headroom of the own account for this bank.
    async fn max_borrow(&self, bank: &Bank) -> Result<Decimal>;

    /// Protocol-imposed maximum collateral liquidatable on `target` for the
    /// given (collateral, liability) bank pair, independent of the
    /// liquidator's own capacity.
    async fn max_liquidatable(
        &self,
        target: &MarginAccount,
        collateral_bank: &Bank,
        liability_bank: &Bank,
    ) -> Result<Decimal>;

    /// Withdraw from the own account. `is_final` closes the position.
    async fn withdraw(&self, amount: Decimal, bank: &Bank, is_final: bool) -> Result<Signature>;

    /// Repay a liability on the own account. `is_final` extinguishes it.
    async fn repay(&self, amount: Decimal, bank: &Bank, is_final: bool) -> Result<Signature>;

    /// Deposit into the own account.
    async fn deposit(&self, amount: Decimal, bank: &Bank) -> Result<Signature>;

    /// Pay down `collateral_amount` worth of `liability_bank` debt on the
    /// target account, seizing `collateral_bank` collateral.
    async fn liquidate(
        &self,
        target: &MarginAccount,
        collateral_bank: &Bank,
        collateral_amount: Decimal,
        liability_bank: &Bank,
    ) -> Result<Signature>;

    /// Wallet token-account balance for a mint, in UI units.
    async fn token_balance(&self, mint: &Address) -> Result<Decimal>;

    /// Wallet native-asset balance, in UI units.
    async fn native_balance(&self) -> Result<Decimal>;

    /// Sign and submit a pre-built transaction, waiting (bounded) for
    /// confirmation.
    async fn sign_and_submit(&self, tx_base64: &str) -> Result<Signature>;
}
