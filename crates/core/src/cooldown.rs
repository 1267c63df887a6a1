//! Cooldown tracking for failed liquidation targets.
//!
//! An account whose liquidation attempt failed is skipped for a fixed
//! window so one persistently failing target cannot starve the scan.

use dashmap::DashMap;
use liqbot_chain::Address;
use std::time::{Duration, Instant};

pub struct CooldownTracker {
    window: Duration,
    entries: DashMap<Address, Instant>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: DashMap::new(),
        }
    }

    /// Start (or restart) the cooldown window for an account.
    pub fn register(&self, account: Address) {
        self.entries.insert(account, Instant::now());
    }

    /// Whether the account is still inside its cooldown window.
    pub fn is_cooling(&self, account: &Address) -> bool {
        match self.entries.get(account) {
            Some(entry) => entry.elapsed() < self.window,
            None => false,
        }
    }

    /// Drop expired entries.
    pub fn prune(&self) {
        self.entries.retain(|_, started| started.elapsed() < self.window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
