//! Main loop orchestration.
//!
//! Startup loads metadata, drains any pre-existing imbalance on the own
//! account and starts the account feed. The steady loop then alternates
//! sweep, rebalance and scan; a confirmed liquidation or rebalance skips
//! the idle sleep so proceeds are handled immediately. Cycle failures are
//! reported and the loop resumes.

use anyhow::{Context, Result};
use liqbot_chain::{
    apply_event, AccountFeed, Address, FeedEvent, GatewayClient, MarginAccount, MetadataRegistry,
    ProtocolClient, RequirementType,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::TimingConfig;
use crate::rebalancer::Rebalancer;
use crate::scanner::{ScanResult, Scanner};
use crate::telemetry::ErrorReporter;

pub struct Engine {
    gateway: Arc<GatewayClient>,
    protocol: Arc<dyn ProtocolClient>,
    metadata: Arc<MetadataRegistry>,
    rebalancer: Arc<Rebalancer>,
    scanner: Arc<Scanner>,
    reporter: Arc<dyn ErrorReporter>,
    timing: TimingConfig,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<GatewayClient>,
        protocol: Arc<dyn ProtocolClient>,
        metadata: Arc<MetadataRegistry>,
        rebalancer: Arc<Rebalancer>,
        scanner: Arc<Scanner>,
        reporter: Arc<dyn ErrorReporter>,
        timing: TimingConfig,
    ) -> Self {
        Self {
            gateway,
            protocol,
            metadata,
            rebalancer,
            scanner,
            reporter,
            timing,
        }
    }

    /// Startup sequence. Errors here are fatal: metadata, background
    /// timers, initial rebalancing, then the account feed.
    pub async fn start(&self) -> Result<mpsc::Receiver<FeedEvent>> {
        self.metadata
            .refresh(&self.gateway)
            .await
            .context("initial metadata load failed")?;
        info!(tokens = self.metadata.len(), "token metadata loaded");

        self.spawn_metadata_refresh();
        self.spawn_value_logger();

        // Drain any inventory left over from a previous run before the
        // first scan.
        while self.rebalancer.needs_rebalancing().await? {
            info!("rebalancing own account before first scan");
            self.rebalancer.run().await?;
        }

        let feed = AccountFeed::new(
            self.gateway.clone(),
            self.timing.feed_snapshot_interval(),
            self.timing.feed_poll_interval(),
        );
        Ok(feed.start())
    }

    /// Steady-state loop. Never returns under normal operation.
    pub async fn run(&self, mut feed: mpsc::Receiver<FeedEvent>) -> Result<()> {
        let mut cache: HashMap<Address, MarginAccount> = HashMap::new();

        loop {
            if let Err(e) = self.cycle(&mut cache, &mut feed).await {
                self.reporter.report("main_loop", &e).await;
                tokio::time::sleep(self.timing.sleep_interval()).await;
            }
        }
    }

    async fn cycle(
        &self,
        cache: &mut HashMap<Address, MarginAccount>,
        feed: &mut mpsc::Receiver<FeedEvent>,
    ) -> Result<()> {
        self.drain_feed(cache, feed).await?;

        self.protocol.reload_own_account().await?;
        self.rebalancer.sweep_wallet().await?;

        if self.rebalancer.needs_rebalancing().await? {
            self.rebalancer.run().await?;
            // go straight back around; more legs may remain
            return Ok(());
        }

        match self.scanner.scan(cache).await? {
            ScanResult::Liquidated { account, .. } => {
                info!(account = %account.short(), "rebalancing liquidation proceeds");
                self.rebalancer.run().await?;
            }
            ScanResult::Idle => {
                tokio::time::sleep(self.timing.sleep_interval()).await;
            }
        }
        Ok(())
    }

    /// Fold pending feed events into the cache. Blocks only while the
    /// cache is still empty (before the first snapshot).
    async fn drain_feed(
        &self,
        cache: &mut HashMap<Address, MarginAccount>,
        feed: &mut mpsc::Receiver<FeedEvent>,
    ) -> Result<()> {
        if cache.is_empty() {
            match feed.recv().await {
                Some(event) => {
                    apply_event(cache, event);
                }
                None => anyhow::bail!("account feed closed"),
            }
        }

        while let Ok(event) = feed.try_recv() {
            apply_event(cache, event);
        }
        Ok(())
    }

    fn spawn_metadata_refresh(&self) {
        let gateway = self.gateway.clone();
        let metadata = self.metadata.clone();
        let mut interval = tokio::time::interval(self.timing.metadata_refresh());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                if let Err(e) = metadata.refresh(&gateway).await {
                    warn!(error = %e, "metadata refresh failed");
                }
                if let Err(e) = gateway.reload_banks().await {
                    warn!(error = %e, "bank refresh failed");
                }
            }
        });
    }

    /// Periodically logs the equity value of the own account.
    fn spawn_value_logger(&self) {
        let protocol = self.protocol.clone();
        let mut interval = tokio::time::interval(self.timing.value_log_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                interval.tick().await;
                let account = protocol.own_account();
                match protocol
                    .health_components(&account, RequirementType::Equity)
                    .await
                {
                    Ok(health) => {
                        info!(
                            assets_usd = %health.assets,
                            liabilities_usd = %health.liabilities,
                            equity_usd = %health.surplus(),
                            "own account value"
                        );
                    }
                    Err(e) => warn!(error = %e, "equity valuation failed"),
                }
            }
        });
    }
}
