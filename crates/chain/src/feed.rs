//! Streaming view of every margin account in the protocol.
//!
//! A producer task polls the gateway and pushes events over a channel; the
//! engine owns the consuming end and folds events into its local account
//! cache. Bulk snapshots re-sync the cache on a slow cadence, incremental
//! updates keep it fresh in between.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::gateway::GatewayClient;
use crate::types::{Address, MarginAccount};

/// Event emitted by the account feed.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Full re-sync: replaces the consumer's entire cache.
    Snapshot(HashMap<Address, MarginAccount>),
    /// One account changed.
    Update(MarginAccount),
    /// Account closed or no longer tracked.
    Removed(Address),
}

/// Producer half of the account feed.
pub struct AccountFeed {
    gateway: Arc<GatewayClient>,
    snapshot_interval: Duration,
    poll_interval: Duration,
}

impl AccountFeed {
    pub fn new(
        gateway: Arc<GatewayClient>,
        snapshot_interval: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            snapshot_interval,
            poll_interval,
        }
    }

    /// Spawn the producer task and return the consuming end.
    ///
    /// The first event is always a `Snapshot`; the task exits when the
    /// receiver is dropped.
    pub fn start(self) -> mpsc::Receiver<FeedEvent> {
        let (tx, rx) = mpsc::channel(1024);

        tokio::spawn(async move {
            if let Err(e) = self.run(tx).await {
                error!(error = %e, "account feed stopped");
            }
        });

        rx
    }

    async fn run(self, tx: mpsc::Sender<FeedEvent>) -> Result<()> {
        let mut cursor = self.send_snapshot(&tx).await?;
        let mut last_snapshot = tokio::time::Instant::now();
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            poll.tick().await;

            if last_snapshot.elapsed() >= self.snapshot_interval {
                match self.send_snapshot(&tx).await {
                    Ok(next_cursor) => {
                        cursor = next_cursor;
                        last_snapshot = tokio::time::Instant::now();
                    }
                    Err(e) => {
                        warn!(error = %e, "snapshot refresh failed, keeping incremental feed");
                    }
                }
                continue;
            }

            match self.gateway.account_updates(cursor).await {
                Ok(updates) => {
                    cursor = updates.cursor;
                    for account in updates.updated {
                        if tx.send(FeedEvent::Update(account)).await.is_err() {
                            return Ok(());
                        }
                    }
                    for address in updates.removed {
                        if tx.send(FeedEvent::Removed(address)).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "incremental poll failed");
                }
            }
        }
    }

    async fn send_snapshot(&self, tx: &mpsc::Sender<FeedEvent>) -> Result<u64> {
        let (cursor, accounts) = self.gateway.account_snapshot().await?;

        let map: HashMap<Address, MarginAccount> = accounts
            .into_iter()
            .map(|a| (a.address, a))
            .collect();

        info!(account_count = map.len(), "account snapshot loaded");
        if tx.send(FeedEvent::Snapshot(map)).await.is_err() {
            anyhow::bail!("feed receiver dropped");
        }
        Ok(cursor)
    }
}

/// Fold one feed event into an account cache. Returns how many accounts
/// the cache holds afterwards.
pub fn apply_event(cache: &mut HashMap<Address, MarginAccount>, event: FeedEvent) -> usize {
    match event {
        FeedEvent::Snapshot(accounts) => {
            *cache = accounts;
        }
        FeedEvent::Update(account) => {
            cache.insert(account.address, account);
        }
        FeedEvent::Removed(address) => {
            if cache.remove(&address).is_none() {
                debug!(account = %address.short(), "removal for unknown account");
            }
        }
    }
    cache.len()
}
