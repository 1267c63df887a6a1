//! Configuration management with profile support.
//!
//! Centralized tuning for the rebalancer, scanner and timers, loadable
//! from TOML with per-field defaults and overridable via the BOT_PROFILE
//! environment variable.

use anyhow::Result;
use liqbot_chain::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure containing all bot parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidatorConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Mint of the quote asset all inventory is held in.
    pub quote_mint: Address,

    /// Mint of the chain's native asset (gas reserve handling).
    pub native_mint: Address,

    /// Rebalancing thresholds
    #[serde(default)]
    pub rebalance: RebalanceConfig,

    /// Liquidation scanning parameters
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Loop and refresh timing
    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Rebalancing and dust-sweep thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Token amounts at or below this UI quantity are treated as dust
    #[serde(default = "default_dust_threshold_ui")]
    pub dust_threshold_ui: Decimal,

    /// Native balance always left untouched in the wallet for fees
    #[serde(default = "default_min_native_reserve")]
    pub min_native_reserve: Decimal,

    /// Slippage tolerance for rebalancing swaps, in basis points
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
}

fn default_dust_threshold_ui() -> Decimal {
    Decimal::new(1, 1) // 0.1
}
fn default_min_native_reserve() -> Decimal {
    Decimal::new(1, 1) // 0.1
}
fn default_slippage_bps() -> u16 {
    10_000
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            dust_threshold_ui: default_dust_threshold_ui(),
            min_native_reserve: default_min_native_reserve(),
            slippage_bps: default_slippage_bps(),
        }
    }
}

/// Liquidation scanning and sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Minimum USD value of a liquidation leg worth executing
    #[serde(default = "default_min_liquidation_usd")]
    pub min_liquidation_usd: Decimal,

    /// Seconds a failed target is skipped before being retried
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Visit riskiest accounts first instead of shuffling
    #[serde(default)]
    pub priority_mode: bool,

    /// Never pick isolated banks as the liability leg
    #[serde(default)]
    pub exclude_isolated_banks: bool,

    /// Only these accounts are considered (mutually exclusive with blacklist)
    #[serde(default)]
    pub account_whitelist: Option<Vec<Address>>,

    /// These accounts are never considered (mutually exclusive with whitelist)
    #[serde(default)]
    pub account_blacklist: Option<Vec<Address>>,
}

fn default_min_liquidation_usd() -> Decimal {
    Decimal::new(1, 1) // 0.1
}
fn default_cooldown_secs() -> u64 {
    120
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_liquidation_usd: default_min_liquidation_usd(),
            cooldown_secs: default_cooldown_secs(),
            priority_mode: false,
            exclude_isolated_banks: false,
            account_whitelist: None,
            account_blacklist: None,
        }
    }
}

impl ScannerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Loop and refresh timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Sleep between idle main-loop cycles (seconds)
    #[serde(default = "default_sleep_interval")]
    pub sleep_interval_secs: u64,

    /// Token metadata refresh interval (seconds)
    #[serde(default = "default_metadata_refresh")]
    pub metadata_refresh_secs: u64,

    /// Own-equity value log interval (seconds)
    #[serde(default = "default_value_log")]
    pub value_log_secs: u64,

    /// Account feed full re-sync interval (seconds)
    #[serde(default = "default_feed_snapshot")]
    pub feed_snapshot_secs: u64,

    /// Account feed incremental poll interval (milliseconds)
    #[serde(default = "default_feed_poll")]
    pub feed_poll_ms: u64,
}

fn default_sleep_interval() -> u64 {
    10
}
fn default_metadata_refresh() -> u64 {
    600
}
fn default_value_log() -> u64 {
    30
}
fn default_feed_snapshot() -> u64 {
    300
}
fn default_feed_poll() -> u64 {
    1_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sleep_interval_secs: default_sleep_interval(),
            metadata_refresh_secs: default_metadata_refresh(),
            value_log_secs: default_value_log(),
            feed_snapshot_secs: default_feed_snapshot(),
            feed_poll_ms: default_feed_poll(),
        }
    }
}

impl TimingConfig {
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_interval_secs)
    }
    pub fn metadata_refresh(&self) -> Duration {
        Duration::from_secs(self.metadata_refresh_secs)
    }
    pub fn value_log_interval(&self) -> Duration {
        Duration::from_secs(self.value_log_secs)
    }
    pub fn feed_snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.feed_snapshot_secs)
    }
    pub fn feed_poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed_poll_ms)
    }
}

impl LiquidatorConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot be run safely.
    pub fn validate(&self) -> Result<()> {
        if self.quote_mint == Address::ZERO {
            anyhow::bail!("quote_mint must be set");
        }
        if self.native_mint == Address::ZERO {
            anyhow::bail!("native_mint must be set");
        }
        if self.scanner.account_whitelist.is_some() && self.scanner.account_blacklist.is_some() {
            anyhow::bail!("account_whitelist and account_blacklist are mutually exclusive");
        }
        if self.rebalance.slippage_bps == 0 {
            anyhow::bail!("slippage_bps must be positive");
        }
        Ok(())
    }

    /// Apply tuning overrides from the BOT_PROFILE environment variable.
    /// Supported values: testing, production
    pub fn with_profile_from_env(mut self) -> Self {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| self.profile.clone());
        match profile.to_lowercase().as_str() {
            "testing" | "test" => {
                self.profile = "testing".to_string();
                self.scanner.min_liquidation_usd = Decimal::new(1, 4); // $0.0001
                self.scanner.cooldown_secs = 15;
                self.timing.sleep_interval_secs = 2;
                self.timing.feed_snapshot_secs = 60;
            }
            "production" | "prod" => {
                self.profile = "production".to_string();
                self.scanner.min_liquidation_usd = Decimal::ONE;
                self.rebalance.slippage_bps = 500;
            }
            _ => {}
        }
        self
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "configuration loaded");
        tracing::info!(
            quote_mint = %self.quote_mint.short(),
            native_mint = %self.native_mint.short(),
            "asset configuration"
        );
        tracing::info!(
            dust_threshold_ui = %self.rebalance.dust_threshold_ui,
            min_native_reserve = %self.rebalance.min_native_reserve,
            slippage_bps = self.rebalance.slippage_bps,
            "rebalance thresholds"
        );
        tracing::info!(
            min_liquidation_usd = %self.scanner.min_liquidation_usd,
            cooldown_secs = self.scanner.cooldown_secs,
            priority_mode = self.scanner.priority_mode,
            exclude_isolated_banks = self.scanner.exclude_isolated_banks,
            whitelisted = self.scanner.account_whitelist.as_ref().map(|w| w.len()),
            blacklisted = self.scanner.account_blacklist.as_ref().map(|b| b.len()),
            "scanner parameters"
        );
    }
}
