//! Liquidator core logic.
//!
//! This crate provides the decision-making half of the bot:
//! - Configuration with profile support
//! - Inventory rebalancing into the quote asset
//! - Wallet dust sweeping
//! - Liquidation scanning, sizing and execution
//! - Cooldown tracking for failed targets
//! - Main-loop orchestration and error reporting

pub mod config;
mod cooldown;
mod engine;
mod rebalancer;
mod scanner;
mod swap;
mod telemetry;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::LiquidatorConfig;
pub use cooldown::CooldownTracker;
pub use engine::Engine;
pub use rebalancer::Rebalancer;
pub use scanner::{Outcome, ScanResult, Scanner, SkipReason};
pub use swap::{SwapExecutor, Swapper};
pub use telemetry::{ErrorReporter, LogReporter, WebhookReporter};
