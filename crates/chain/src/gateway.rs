//! HTTP client for the protocol gateway service.
//!
//! The gateway wraps the lending protocol's risk engine: it prices
//! accounts, computes withdraw/borrow/liquidation capacity, and builds,
//! signs and submits protocol transactions. This client keeps a local bank
//! cache and the latest own-account snapshot, and enforces the bounded
//! confirmation policy for submissions.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::client::ProtocolClient;
use crate::types::{
    Address, Bank, HealthComponents, MarginAccount, PriceBias, RequirementType, Signature,
};

/// Maximum number of times one logical submission is re-sent.
const MAX_RESENDS: u32 = 2;

/// How long to wait for one submission to confirm before re-sending.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for confirmation.
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Client for the protocol gateway service.
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    own_address: Address,
    wallet_address: Address,
    /// Bank cache, keyed by bank address.
    banks: DashMap<Address, Bank>,
    /// Mint → bank address index over the bank cache.
    banks_by_mint: DashMap<Address, Address>,
    /// Latest own-account snapshot.
    own_account: RwLock<MarginAccount>,
}

impl GatewayClient {
    /// Connect to the gateway and load the initial bank set and own-account
    /// snapshot.
    pub async fn connect(
        base_url: impl Into<String>,
        own_address: Address,
        wallet_address: Address,
    ) -> Result<Self> {
        let client = Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url: base_url.into(),
            own_address,
            wallet_address,
            banks: DashMap::new(),
            banks_by_mint: DashMap::new(),
            own_account: RwLock::new(MarginAccount {
                address: own_address,
                authority: wallet_address,
                balances: Vec::new(),
            }),
        };

        client.reload_banks().await?;
        client.reload_own_account().await?;
        Ok(client)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("gateway error: {} {} - {}", status, path, body);
        }

        Ok(response.json().await?)
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("gateway error: {} {} - {}", status, path, body);
        }

        Ok(response.json().await?)
    }

    /// Fetch any account snapshot by address.
    pub async fn fetch_account(&self, address: &Address) -> Result<MarginAccount> {
        let dto: AccountDto = self.get_json(&format!("/v1/accounts/{address}")).await?;
        Ok(dto.into())
    }

    /// Token metadata for every mint the gateway knows about.
    pub async fn token_metadata(&self) -> Result<Vec<crate::metadata::TokenMetadata>> {
        self.get_json("/v1/metadata/tokens").await
    }

    /// Bulk-fetch all protocol accounts plus the cursor to resume
    /// incremental polling from. Used by the account feed.
    pub async fn account_snapshot(&self) -> Result<(u64, Vec<MarginAccount>)> {
        let dto: AccountSnapshotDto = self.get_json("/v1/accounts").await?;
        Ok((dto.cursor, dto.accounts.into_iter().map(Into::into).collect()))
    }

    /// Fetch incremental account changes since `cursor`. Used by the
    /// account feed between bulk refreshes.
    pub async fn account_updates(&self, cursor: u64) -> Result<AccountUpdates> {
        let dto: AccountUpdatesDto = self
            .get_json(&format!("/v1/accounts/updates?since={cursor}"))
            .await?;
        Ok(AccountUpdates {
            cursor: dto.cursor,
            updated: dto.updated.into_iter().map(Into::into).collect(),
            removed: dto.removed,
        })
    }

    /// Submit one protocol mutation and wait for confirmation, re-sending
    /// at most [`MAX_RESENDS`] times. Never retries beyond that.
    async fn submit_and_confirm<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Signature> {
        let mut last_sig = None;

        for attempt in 0..=MAX_RESENDS {
            if attempt > 0 {
                warn!(path, attempt, "re-sending unconfirmed submission");
            }

            let submitted: SubmitResponse = self.post_json(path, body).await?;
            let signature = Signature(submitted.signature);
            debug!(path, sig = %signature, "submitted, awaiting confirmation");

            if self.await_confirmation(&signature).await? {
                return Ok(signature);
            }

            last_sig = Some(signature);
        }

        anyhow::bail!(
            "submission not confirmed after {} attempts (last signature {})",
            MAX_RESENDS + 1,
            last_sig.map(|s| s.0).unwrap_or_default()
        )
    }

    /// Poll confirmation status until confirmed or [`CONFIRM_TIMEOUT`].
    async fn await_confirmation(&self, signature: &Signature) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + CONFIRM_TIMEOUT;

        while tokio::time::Instant::now() < deadline {
            let status: TxStatus = self.get_json(&format!("/v1/tx/{signature}")).await?;
            if status.failed {
                anyhow::bail!("transaction {} failed: {}", signature, status.error.unwrap_or_default());
            }
            if status.confirmed {
                return Ok(true);
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }

        Ok(false)
    }
}

#[async_trait]
impl ProtocolClient for GatewayClient {
    fn own_address(&self) -> Address {
        self.own_address
    }

    fn wallet_address(&self) -> Address {
        self.wallet_address
    }

    fn own_account(&self) -> MarginAccount {
        self.own_account.read().clone()
    }

    async fn reload_own_account(&self) -> Result<()> {
        let account = self.fetch_account(&self.own_address).await?;
        *self.own_account.write() = account;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reload_banks(&self) -> Result<()> {
        let dtos: Vec<BankDto> = self.get_json("/v1/banks").await?;
        let count = dtos.len();

        for dto in dtos {
            let bank: Bank = dto.into();
            self.banks_by_mint.insert(bank.mint, bank.address);
            self.banks.insert(bank.address, bank);
        }

        debug!(bank_count = count, "bank cache refreshed");
        Ok(())
    }

    fn banks(&self) -> Vec<Bank> {
        self.banks.iter().map(|e| e.value().clone()).collect()
    }

    fn bank_by_pk(&self, bank_pk: &Address) -> Option<Bank> {
        self.banks.get(bank_pk).map(|b| b.value().clone())
    }

    fn bank_by_mint(&self, mint: &Address) -> Option<Bank> {
        let bank_pk = self.banks_by_mint.get(mint)?;
        self.bank_by_pk(&bank_pk)
    }

    async fn health_components(
        &self,
        account: &MarginAccount,
        requirement: RequirementType,
    ) -> Result<HealthComponents> {
        let mode = match requirement {
            RequirementType::Equity => "equity",
            RequirementType::Initial => "initial",
            RequirementType::Maintenance => "maintenance",
        };
        let dto: HealthDto = self
            .get_json(&format!(
                "/v1/accounts/{}/health?requirement={mode}",
                account.address
            ))
            .await?;
        Ok(HealthComponents {
            assets: dto.assets,
            liabilities: dto.liabilities,
        })
    }

    async fn oracle_price(&self, bank: &Bank, bias: PriceBias) -> Result<Decimal> {
        let bias = match bias {
            PriceBias::None => "none",
            PriceBias::Low => "low",
            PriceBias::High => "high",
        };
        let dto: PriceDto = self
            .get_json(&format!("/v1/banks/{}/price?bias={bias}", bank.address))
            .await?;
        Ok(dto.price)
    }

    async fn max_withdraw(&self, bank: &Bank) -> Result<Decimal> {
        let dto: AmountDto = self
            .get_json(&format!(
                "/v1/accounts/{}/max-withdraw/{}",
                self.own_address, bank.address
            ))
            .await?;
        Ok(dto.amount)
    }

    async fn max_borrow(&self, bank: &Bank) -> Result<Decimal> {
        let dto: AmountDto = self
            .get_json(&format!(
                "/v1/accounts/{}/max-borrow/{}",
                self.own_address, bank.address
            ))
            .await?;
        Ok(dto.amount)
    }

    async fn max_liquidatable(
        &self,
        target: &MarginAccount,
        collateral_bank: &Bank,
        liability_bank: &Bank,
    ) -> Result<Decimal> {
        let dto: AmountDto = self
            .get_json(&format!(
                "/v1/accounts/{}/max-liquidatable?collateral={}&liability={}",
                target.address, collateral_bank.address, liability_bank.address
            ))
            .await?;
        Ok(dto.amount)
    }

    #[instrument(skip(self, bank), fields(bank = %bank.address.short()))]
    async fn withdraw(&self, amount: Decimal, bank: &Bank, is_final: bool) -> Result<Signature> {
        self.submit_and_confirm(
            "/v1/tx/withdraw",
            &serde_json::json!({
                "account": self.own_address,
                "bank": bank.address,
                "amount": amount,
                "final": is_final,
            }),
        )
        .await
    }

    #[instrument(skip(self, bank), fields(bank = %bank.address.short()))]
    async fn repay(&self, amount: Decimal, bank: &Bank, is_final: bool) -> Result<Signature> {
        self.submit_and_confirm(
            "/v1/tx/repay",
            &serde_json::json!({
                "account": self.own_address,
                "bank": bank.address,
                "amount": amount,
                "final": is_final,
            }),
        )
        .await
    }

    #[instrument(skip(self, bank), fields(bank = %bank.address.short()))]
    async fn deposit(&self, amount: Decimal, bank: &Bank) -> Result<Signature> {
        self.submit_and_confirm(
            "/v1/tx/deposit",
            &serde_json::json!({
                "account": self.own_address,
                "bank": bank.address,
                "amount": amount,
            }),
        )
        .await
    }

    #[instrument(skip(self, target, collateral_bank, liability_bank), fields(target = %target.address.short()))]
    async fn liquidate(
        &self,
        target: &MarginAccount,
        collateral_bank: &Bank,
        collateral_amount: Decimal,
        liability_bank: &Bank,
    ) -> Result<Signature> {
        self.submit_and_confirm(
            "/v1/tx/liquidate",
            &serde_json::json!({
                "liquidator": self.own_address,
                "target": target.address,
                "collateralBank": collateral_bank.address,
                "collateralAmount": collateral_amount,
                "liabilityBank": liability_bank.address,
            }),
        )
        .await
    }

    async fn token_balance(&self, mint: &Address) -> Result<Decimal> {
        let dto: AmountDto = self
            .get_json(&format!(
                "/v1/wallet/{}/token/{mint}",
                self.wallet_address
            ))
            .await?;
        Ok(dto.amount)
    }

    async fn native_balance(&self) -> Result<Decimal> {
        let dto: AmountDto = self
            .get_json(&format!("/v1/wallet/{}/native", self.wallet_address))
            .await?;
        Ok(dto.amount)
    }

    async fn sign_and_submit(&self, tx_base64: &str) -> Result<Signature> {
        self.submit_and_confirm(
            "/v1/tx/submit",
            &serde_json::json!({ "transaction": tx_base64 }),
        )
        .await
    }
}

/// Incremental feed response: changed accounts plus a resume cursor.
#[derive(Debug, Clone)]
pub struct AccountUpdates {
    pub cursor: u64,
    pub updated: Vec<MarginAccount>,
    pub removed: Vec<Address>,
}

// Gateway response types

#[derive(Debug, Deserialize)]
struct BankDto {
    address: Address,
    mint: Address,
    #[serde(rename = "mintDecimals")]
    mint_decimals: u32,
    oracle: Address,
    isolated: bool,
    #[serde(rename = "assetShareValue")]
    asset_share_value: Decimal,
    #[serde(rename = "liabilityShareValue")]
    liability_share_value: Decimal,
    #[serde(rename = "depositLimit")]
    deposit_limit: Decimal,
    #[serde(rename = "borrowLimit")]
    borrow_limit: Decimal,
}

impl From<BankDto> for Bank {
    fn from(dto: BankDto) -> Self {
        Bank {
            address: dto.address,
            mint: dto.mint,
            mint_decimals: dto.mint_decimals,
            oracle: dto.oracle,
            isolated: dto.isolated,
            asset_share_value: dto.asset_share_value,
            liability_share_value: dto.liability_share_value,
            deposit_limit: dto.deposit_limit,
            borrow_limit: dto.borrow_limit,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BalanceDto {
    #[serde(rename = "bankPk")]
    bank_pk: Address,
    #[serde(rename = "assetShares")]
    asset_shares: Decimal,
    #[serde(rename = "liabilityShares")]
    liability_shares: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountDto {
    address: Address,
    authority: Address,
    balances: Vec<BalanceDto>,
}

impl From<AccountDto> for MarginAccount {
    fn from(dto: AccountDto) -> Self {
        MarginAccount {
            address: dto.address,
            authority: dto.authority,
            balances: dto
                .balances
                .into_iter()
                .map(|b| crate::types::Balance {
                    bank_pk: b.bank_pk,
                    asset_shares: b.asset_shares,
                    liability_shares: b.liability_shares,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccountSnapshotDto {
    cursor: u64,
    accounts: Vec<AccountDto>,
}

#[derive(Debug, Deserialize)]
struct AccountUpdatesDto {
    cursor: u64,
    updated: Vec<AccountDto>,
    #[serde(default)]
    removed: Vec<Address>,
}

#[derive(Debug, Deserialize)]
struct HealthDto {
    assets: Decimal,
    liabilities: Decimal,
}

#[derive(Debug, Deserialize)]
struct PriceDto {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct AmountDto {
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct TxStatus {
    confirmed: bool,
    #[serde(default)]
    failed: bool,
    #[serde(default)]
    error: Option<String>,
}
