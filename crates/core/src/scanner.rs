//! Liquidation scanning and execution.
//!
//! Walks the monitored account set, finds the first account that is both
//! unhealthy and worth liquidating, and executes against its largest
//! liability/collateral pair. A cycle stops at the first confirmed
//! liquidation so the proceeds can be rebalanced before scanning again.

use anyhow::Result;
use liqbot_chain::{
    Address, Bank, MarginAccount, MetadataRegistry, PriceBias, ProtocolClient, RequirementType,
    Signature,
};
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::ScannerConfig;
use crate::cooldown::CooldownTracker;

/// What happened to one candidate account.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Liquidated(Signature),
    Skipped(SkipReason),
    /// Execution was attempted and failed; the target is in cooldown.
    Failed,
}

/// Why a candidate was passed over. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OwnAccount,
    InCooldown,
    Healthy,
    NoLiabilityLeg,
    LiabilityBelowMinimum,
    NoCollateralLeg,
    CollateralBelowMinimum,
    SizeBelowMinimum,
}

/// Result of one full scan cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanResult {
    /// One liquidation confirmed; rebalance before scanning again.
    Liquidated {
        account: Address,
        signature: Signature,
    },
    /// Nothing was liquidatable this cycle.
    Idle,
}

pub struct Scanner {
    protocol: Arc<dyn ProtocolClient>,
    metadata: Arc<MetadataRegistry>,
    cooldown: Arc<CooldownTracker>,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(
        protocol: Arc<dyn ProtocolClient>,
        metadata: Arc<MetadataRegistry>,
        cooldown: Arc<CooldownTracker>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            protocol,
            metadata,
            cooldown,
            config,
        }
    }

    /// Fraction of the theoretical maximum actually liquidated, leaving
    /// room for prices moving between sizing and execution.
    fn haircut() -> Decimal {
        Decimal::new(9, 1)
    }

    /// One pass over the account cache. Stops at the first confirmed
    /// liquidation.
    #[instrument(skip_all, fields(candidates = accounts.len()))]
    pub async fn scan(&self, accounts: &HashMap<Address, MarginAccount>) -> Result<ScanResult> {
        self.cooldown.prune();
        let candidates = self.ordered_candidates(accounts).await?;

        for candidate in candidates {
            match self.process_account(&candidate).await? {
                Outcome::Liquidated(signature) => {
                    info!(
                        account = %candidate.address.short(),
                        sig = %signature,
                        "account liquidated"
                    );
                    return Ok(ScanResult::Liquidated {
                        account: candidate.address,
                        signature,
                    });
                }
                Outcome::Skipped(reason) => {
                    debug!(account = %candidate.address.short(), ?reason, "skipped");
                }
                Outcome::Failed => {
                    warn!(account = %candidate.address.short(), "not liquidated");
                }
            }
        }

        Ok(ScanResult::Idle)
    }

    /// Order candidates for the scan.
    ///
    /// Priority mode drops cooled-down accounts, then visits the most
    /// underwater first (ascending maintenance surplus). Random mode
    /// shuffles so repeated failures cannot pin the scan to one corner of
    /// the account set.
    async fn ordered_candidates(
        &self,
        accounts: &HashMap<Address, MarginAccount>,
    ) -> Result<Vec<MarginAccount>> {
        let eligible = accounts
            .values()
            .filter(|a| self.passes_account_filter(&a.address))
            .cloned();

        if self.config.priority_mode {
            let mut scored = Vec::new();
            for account in eligible {
                if self.cooldown.is_cooling(&account.address) {
                    continue;
                }
                let health = self
                    .protocol
                    .health_components(&account, RequirementType::Maintenance)
                    .await?;
                scored.push((health.surplus(), account));
            }
            scored.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(scored.into_iter().map(|(_, a)| a).collect())
        } else {
            let mut candidates: Vec<_> = eligible.collect();
            candidates.shuffle(&mut rand::thread_rng());
            Ok(candidates)
        }
    }

    fn passes_account_filter(&self, address: &Address) -> bool {
        if let Some(whitelist) = &self.config.account_whitelist {
            return whitelist.contains(address);
        }
        if let Some(blacklist) = &self.config.account_blacklist {
            return !blacklist.contains(address);
        }
        true
    }

    /// Evaluate one account and liquidate it if eligible.
    pub async fn process_account(&self, account: &MarginAccount) -> Result<Outcome> {
        if account.address == self.protocol.own_address() {
            return Ok(Outcome::Skipped(SkipReason::OwnAccount));
        }
        if self.cooldown.is_cooling(&account.address) {
            return Ok(Outcome::Skipped(SkipReason::InCooldown));
        }

        let health = self
            .protocol
            .health_components(account, RequirementType::Maintenance)
            .await?;
        if health.is_healthy() {
            return Ok(Outcome::Skipped(SkipReason::Healthy));
        }

        let Some((liability_bank, liability_value)) = self.largest_liability(account).await? else {
            return Ok(Outcome::Skipped(SkipReason::NoLiabilityLeg));
        };
        if liability_value < self.config.min_liquidation_usd {
            return Ok(Outcome::Skipped(SkipReason::LiabilityBelowMinimum));
        }

        let Some((collateral_bank, collateral_value)) = self.largest_collateral(account).await?
        else {
            return Ok(Outcome::Skipped(SkipReason::NoCollateralLeg));
        };
        if collateral_value < self.config.min_liquidation_usd {
            return Ok(Outcome::Skipped(SkipReason::CollateralBelowMinimum));
        }

        let (amount, value) = self
            .size_liquidation(account, &collateral_bank, &liability_bank)
            .await?;
        if value < self.config.min_liquidation_usd {
            return Ok(Outcome::Skipped(SkipReason::SizeBelowMinimum));
        }

        info!(
            account = %account.address.short(),
            assets = %health.assets,
            liabilities = %health.liabilities,
            collateral = %self.metadata.symbol(&collateral_bank.mint),
            liability = %self.metadata.symbol(&liability_bank.mint),
            amount = %amount,
            value_usd = %value,
            "liquidating"
        );

        match self
            .protocol
            .liquidate(account, &collateral_bank, amount, &liability_bank)
            .await
        {
            Ok(signature) => Ok(Outcome::Liquidated(signature)),
            Err(e) => {
                warn!(account = %account.address.short(), error = %e, "liquidation failed");
                self.cooldown.register(account.address);
                Ok(Outcome::Failed)
            }
        }
    }

    /// The account's most valuable liability leg, in USD.
    async fn largest_liability(&self, account: &MarginAccount) -> Result<Option<(Bank, Decimal)>> {
        let mut best: Option<(Bank, Decimal)> = None;

        for balance in account.active_balances() {
            let Some(bank) = self.protocol.bank_by_pk(&balance.bank_pk) else {
                continue;
            };
            if self.config.exclude_isolated_banks && bank.isolated {
                continue;
            }
            let liabilities = bank.quantity(balance).liabilities;
            if liabilities.is_zero() {
                continue;
            }
            let price = self.protocol.oracle_price(&bank, PriceBias::None).await?;
            let value = liabilities * price;
            if best.as_ref().map_or(true, |(_, v)| value > *v) {
                best = Some((bank, value));
            }
        }

        Ok(best)
    }

    /// The account's most valuable collateral leg, in USD.
    async fn largest_collateral(&self, account: &MarginAccount) -> Result<Option<(Bank, Decimal)>> {
        let mut best: Option<(Bank, Decimal)> = None;

        for balance in account.active_balances() {
            let Some(bank) = self.protocol.bank_by_pk(&balance.bank_pk) else {
                continue;
            };
            if self.config.exclude_isolated_banks && bank.isolated {
                continue;
            }
            let assets = bank.quantity(balance).assets;
            if assets.is_zero() {
                continue;
            }
            let price = self.protocol.oracle_price(&bank, PriceBias::None).await?;
            let value = assets * price;
            if best.as_ref().map_or(true, |(_, v)| value > *v) {
                best = Some((bank, value));
            }
        }

        Ok(best)
    }

    /// Size the liquidation in collateral tokens: the haircut applied to
    /// the smaller of the protocol's cap and what our own account can
    /// fund. Returns (amount, USD value).
    async fn size_liquidation(
        &self,
        target: &MarginAccount,
        collateral_bank: &Bank,
        liability_bank: &Bank,
    ) -> Result<(Decimal, Decimal)> {
        let protocol_cap = self
            .protocol
            .max_liquidatable(target, collateral_bank, liability_bank)
            .await?;

        // Our funding limit is in liability tokens; convert to collateral
        // tokens at oracle prices.
        let funding_cap = self.protocol.max_borrow(liability_bank).await?;
        let liability_price = self
            .protocol
            .oracle_price(liability_bank, PriceBias::None)
            .await?;
        let collateral_price = self
            .protocol
            .oracle_price(collateral_bank, PriceBias::None)
            .await?;
        if collateral_price.is_zero() {
            anyhow::bail!(
                "zero collateral price for bank {}",
                collateral_bank.address.short()
            );
        }
        let funding_cap_collateral = funding_cap * liability_price / collateral_price;

        let amount = (protocol_cap.min(funding_cap_collateral) * Self::haircut())
            .trunc_with_scale(collateral_bank.mint_decimals);
        let value = amount * collateral_price;

        debug!(
            protocol_cap = %protocol_cap,
            funding_cap_collateral = %funding_cap_collateral,
            amount = %amount,
            "liquidation sized"
        );
        Ok((amount, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{account, balance, bank, MockCall, MockProtocol};
    use liqbot_chain::HealthComponents;
    use std::time::Duration;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn unhealthy(assets: &str, liabilities: &str) -> HealthComponents {
        HealthComponents {
            assets: d(assets),
            liabilities: d(liabilities),
        }
    }

    /// Target 0x01 owes 100 TOKEN ($2) against 300 QUOTE ($1) collateral.
    fn setup(config: ScannerConfig) -> (Arc<MockProtocol>, Scanner, MarginAccount) {
        let protocol = MockProtocol::new();
        protocol.add_bank(bank(1, 0x10), Decimal::ONE); // quote
        protocol.add_bank(bank(2, 0x20), d("2")); // token
        protocol.set_own_account(account(0xEE, vec![]));

        let target = account(
            0x01,
            vec![
                balance(Address::repeat_byte(1), d("300"), Decimal::ZERO),
                balance(Address::repeat_byte(2), Decimal::ZERO, d("100")),
            ],
        );

        {
            let mut state = protocol.state.lock();
            state.health.insert(
                (target.address, RequirementType::Maintenance),
                unhealthy("280", "300"),
            );
            state.max_liquidatable.insert(
                (
                    target.address,
                    Address::repeat_byte(1),
                    Address::repeat_byte(2),
                ),
                d("250"),
            );
            state.max_borrow.insert(Address::repeat_byte(2), d("90"));
        }

        let scanner = Scanner::new(
            protocol.clone(),
            MetadataRegistry::new(),
            Arc::new(CooldownTracker::new(Duration::from_secs(60))),
            config,
        );
        (protocol, scanner, target)
    }

    #[tokio::test]
    async fn test_liquidates_with_haircut_on_smaller_cap() {
        let (protocol, scanner, target) = setup(ScannerConfig::default());

        let outcome = scanner.process_account(&target).await.unwrap();
        assert!(matches!(outcome, Outcome::Liquidated(_)));

        // funding cap: 90 TOKEN * $2 / $1 = 180 quote-collateral, below the
        // protocol cap of 250; 0.9 * 180 = 162
        assert_eq!(
            protocol.calls()[0],
            MockCall::Liquidate {
                target: target.address,
                collateral_bank: Address::repeat_byte(1),
                collateral_amount: d("162.000000"),
                liability_bank: Address::repeat_byte(2),
            }
        );
    }

    #[tokio::test]
    async fn test_protocol_cap_wins_when_smaller() {
        let (protocol, scanner, target) = setup(ScannerConfig::default());
        protocol.state.lock().max_liquidatable.insert(
            (
                target.address,
                Address::repeat_byte(1),
                Address::repeat_byte(2),
            ),
            d("100"),
        );

        scanner.process_account(&target).await.unwrap();
        assert!(matches!(
            protocol.calls()[0],
            MockCall::Liquidate { collateral_amount, .. } if collateral_amount == d("90.000000")
        ));
    }

    #[tokio::test]
    async fn test_healthy_account_is_skipped() {
        let (protocol, scanner, target) = setup(ScannerConfig::default());
        protocol.state.lock().health.insert(
            (target.address, RequirementType::Maintenance),
            unhealthy("300", "280"),
        );

        let outcome = scanner.process_account(&target).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::Healthy));
        assert!(protocol.calls().is_empty());
    }

    #[tokio::test]
    async fn test_own_account_is_skipped() {
        let (protocol, scanner, _) = setup(ScannerConfig::default());
        let own = protocol.own_account();

        let outcome = scanner.process_account(&own).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::OwnAccount));
    }

    #[tokio::test]
    async fn test_cooling_account_is_skipped() {
        let (_, scanner, target) = setup(ScannerConfig::default());
        scanner.cooldown.register(target.address);

        let outcome = scanner.process_account(&target).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::InCooldown));
    }

    #[tokio::test]
    async fn test_small_liability_leg_aborts() {
        let config = ScannerConfig {
            min_liquidation_usd: d("500"),
            ..Default::default()
        };
        let (protocol, scanner, target) = setup(config);

        let outcome = scanner.process_account(&target).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::LiabilityBelowMinimum));
        assert!(protocol.calls().is_empty());
    }

    #[tokio::test]
    async fn test_small_sized_amount_aborts() {
        let (protocol, scanner, target) = setup(ScannerConfig::default());
        // protocol allows almost nothing
        protocol.state.lock().max_liquidatable.insert(
            (
                target.address,
                Address::repeat_byte(1),
                Address::repeat_byte(2),
            ),
            d("0.05"),
        );

        let outcome = scanner.process_account(&target).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::SizeBelowMinimum));
        assert!(protocol.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_liquidation_enters_cooldown() {
        let (protocol, scanner, target) = setup(ScannerConfig::default());
        protocol.state.lock().failing_targets.push(target.address);

        let outcome = scanner.process_account(&target).await.unwrap();
        assert_eq!(outcome, Outcome::Failed);
        assert!(scanner.cooldown.is_cooling(&target.address));

        // immediately retrying skips without touching the protocol
        let retry = scanner.process_account(&target).await.unwrap();
        assert_eq!(retry, Outcome::Skipped(SkipReason::InCooldown));
    }

    #[tokio::test]
    async fn test_isolated_liability_excluded_when_configured() {
        let config = ScannerConfig {
            exclude_isolated_banks: true,
            ..Default::default()
        };
        let (protocol, scanner, _) = setup(config);

        let mut isolated_bank = bank(3, 0x30);
        isolated_bank.isolated = true;
        protocol.add_bank(isolated_bank, d("5"));

        let target = account(
            0x02,
            vec![
                balance(Address::repeat_byte(1), d("300"), Decimal::ZERO),
                balance(Address::repeat_byte(3), Decimal::ZERO, d("100")),
            ],
        );
        protocol.state.lock().health.insert(
            (target.address, RequirementType::Maintenance),
            unhealthy("280", "300"),
        );

        let outcome = scanner.process_account(&target).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::NoLiabilityLeg));
    }

    #[tokio::test]
    async fn test_scan_stops_at_first_liquidation() {
        let (protocol, scanner, target) = setup(ScannerConfig::default());

        let second = account(
            0x02,
            vec![
                balance(Address::repeat_byte(1), d("300"), Decimal::ZERO),
                balance(Address::repeat_byte(2), Decimal::ZERO, d("100")),
            ],
        );
        {
            let mut state = protocol.state.lock();
            state.health.insert(
                (second.address, RequirementType::Maintenance),
                unhealthy("280", "300"),
            );
            state.max_liquidatable.insert(
                (
                    second.address,
                    Address::repeat_byte(1),
                    Address::repeat_byte(2),
                ),
                d("250"),
            );
        }

        let mut accounts = HashMap::new();
        accounts.insert(target.address, target);
        accounts.insert(second.address, second);

        let result = scanner.scan(&accounts).await.unwrap();
        assert!(matches!(result, ScanResult::Liquidated { .. }));

        let liquidations = protocol
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Liquidate { .. }))
            .count();
        assert_eq!(liquidations, 1);
    }

    #[tokio::test]
    async fn test_priority_ordering_filters_cooldown_then_sorts() {
        let config = ScannerConfig {
            priority_mode: true,
            ..Default::default()
        };
        let (protocol, scanner, _) = setup(config);

        let deepest = account(0x02, vec![]);
        let shallow = account(0x03, vec![]);
        let cooling = account(0x04, vec![]);
        {
            let mut state = protocol.state.lock();
            state.health.insert(
                (deepest.address, RequirementType::Maintenance),
                unhealthy("100", "200"),
            );
            state.health.insert(
                (shallow.address, RequirementType::Maintenance),
                unhealthy("100", "105"),
            );
        }
        scanner.cooldown.register(cooling.address);

        let mut accounts = HashMap::new();
        for a in [&deepest, &shallow, &cooling] {
            accounts.insert(a.address, a.clone());
        }

        let ordered = scanner.ordered_candidates(&accounts).await.unwrap();
        let addresses: Vec<_> = ordered.iter().map(|a| a.address).collect();
        assert_eq!(addresses, vec![deepest.address, shallow.address]);
    }

    #[tokio::test]
    async fn test_shuffle_visits_every_candidate_once() {
        let (protocol, scanner, _) = setup(ScannerConfig::default());

        let mut accounts = HashMap::new();
        for byte in 1..=20u8 {
            let a = account(byte, vec![]);
            protocol.state.lock().health.insert(
                (a.address, RequirementType::Maintenance),
                unhealthy("100", "50"),
            );
            accounts.insert(a.address, a);
        }

        let ordered = scanner.ordered_candidates(&accounts).await.unwrap();
        assert_eq!(ordered.len(), 20);
        let mut addresses: Vec<_> = ordered.iter().map(|a| a.address).collect();
        addresses.sort();
        addresses.dedup();
        assert_eq!(addresses.len(), 20);
    }

    #[tokio::test]
    async fn test_whitelist_restricts_candidates() {
        let listed = Address::repeat_byte(0x02);
        let config = ScannerConfig {
            account_whitelist: Some(vec![listed]),
            ..Default::default()
        };
        let (_, scanner, target) = setup(config);

        let mut accounts = HashMap::new();
        accounts.insert(target.address, target);
        accounts.insert(listed, account(0x02, vec![]));

        let ordered = scanner.ordered_candidates(&accounts).await.unwrap();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].address, listed);
    }

    #[tokio::test]
    async fn test_blacklist_excludes_candidates() {
        let banned = Address::repeat_byte(0x01);
        let config = ScannerConfig {
            account_blacklist: Some(vec![banned]),
            ..Default::default()
        };
        let (_, scanner, target) = setup(config);

        let mut accounts = HashMap::new();
        accounts.insert(target.address, target);

        let ordered = scanner.ordered_candidates(&accounts).await.unwrap();
        assert!(ordered.is_empty());
    }
}
