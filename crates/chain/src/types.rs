//! Core protocol data model: addresses, banks, balances, margin accounts.

use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 32-byte on-chain identity (account, bank or mint).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);

    /// Deterministic test/fixture address.
    pub fn repeat_byte(b: u8) -> Self {
        Address([b; 32])
    }

    /// Short form for log lines (first and last 4 bytes).
    pub fn short(&self) -> String {
        let full = hex::encode(self.0);
        format!("{}..{}", &full[..8], &full[full.len() - 8..])
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid address: {0}")]
pub struct AddressParseError(String);

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| AddressParseError(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AddressParseError(format!("expected 32 bytes, got {}", raw.len() / 2)))?;
        Ok(Address(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Transaction signature returned by protocol mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub String);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Risk bias mode used when weighting health components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementType {
    /// Unweighted market values.
    Equity,
    /// Initial margin weights.
    Initial,
    /// Maintenance margin weights.
    Maintenance,
}

/// Oracle price bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceBias {
    None,
    Low,
    High,
}

/// A market for a single asset: deposits, borrows, price oracle, weights.
///
/// Immutable within one refresh cycle; the client re-fetches banks on a
/// slow cadence relative to account data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub address: Address,
    pub mint: Address,
    pub mint_decimals: u32,
    /// Oracle account feeding this bank's price.
    pub oracle: Address,
    /// Isolated-risk banks collateralize nothing outside their own market.
    pub isolated: bool,
    /// Value of one asset share in token units.
    pub asset_share_value: Decimal,
    /// Value of one liability share in token units.
    pub liability_share_value: Decimal,
    pub deposit_limit: Decimal,
    pub borrow_limit: Decimal,
}

impl Bank {
    /// Convert a balance's share amounts into token quantities, truncated
    /// to the mint's native precision.
    pub fn quantity(&self, balance: &Balance) -> BalanceQuantity {
        BalanceQuantity {
            assets: (balance.asset_shares * self.asset_share_value)
                .trunc_with_scale(self.mint_decimals),
            liabilities: (balance.liability_shares * self.liability_share_value)
                .trunc_with_scale(self.mint_decimals),
        }
    }
}

/// Per-bank share position held by a margin account.
///
/// Exactly one balance exists per (account, bank) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub bank_pk: Address,
    pub asset_shares: Decimal,
    pub liability_shares: Decimal,
}

impl Balance {
    pub fn is_active(&self) -> bool {
        !self.asset_shares.is_zero() || !self.liability_shares.is_zero()
    }
}

/// Token quantities derived from a balance's shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceQuantity {
    pub assets: Decimal,
    pub liabilities: Decimal,
}

/// Snapshot of a protocol account (the liquidator's own or a monitored one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginAccount {
    pub address: Address,
    pub authority: Address,
    pub balances: Vec<Balance>,
}

impl MarginAccount {
    pub fn active_balances(&self) -> impl Iterator<Item = &Balance> {
        self.balances.iter().filter(|b| b.is_active())
    }

    pub fn balance_for_bank(&self, bank_pk: &Address) -> Option<&Balance> {
        self.balances
            .iter()
            .find(|b| b.bank_pk == *bank_pk && b.is_active())
    }
}

/// Priced health components of an account under a given bias mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthComponents {
    pub assets: Decimal,
    pub liabilities: Decimal,
}

impl HealthComponents {
    pub fn is_healthy(&self) -> bool {
        self.assets >= self.liabilities
    }

    pub fn surplus(&self) -> Decimal {
        self.assets - self.liabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_address_roundtrip() {
        let addr = Address::repeat_byte(0xAB);
        let text = addr.to_string();
        assert_eq!(text.len(), 64);
        let parsed: Address = text.parse().unwrap();
        assert_eq!(parsed, addr);

        // 0x prefix accepted
        let prefixed: Address = format!("0x{text}").parse().unwrap();
        assert_eq!(prefixed, addr);
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        assert!("abcd".parse::<Address>().is_err());
        assert!("zz".repeat(32).parse::<Address>().is_err());
    }

    #[test]
    fn test_balance_activity() {
        let mut balance = Balance {
            bank_pk: Address::repeat_byte(1),
            asset_shares: Decimal::ZERO,
            liability_shares: Decimal::ZERO,
        };
        assert!(!balance.is_active());

        balance.liability_shares = d("0.001");
        assert!(balance.is_active());
    }

    #[test]
    fn test_quantity_truncates_to_mint_decimals() {
        let bank = Bank {
            address: Address::repeat_byte(1),
            mint: Address::repeat_byte(2),
            mint_decimals: 6,
            oracle: Address::repeat_byte(3),
            isolated: false,
            asset_share_value: d("1.0000037"),
            liability_share_value: d("1.0000041"),
            deposit_limit: d("1000000"),
            borrow_limit: d("1000000"),
        };
        let balance = Balance {
            bank_pk: bank.address,
            asset_shares: d("100"),
            liability_shares: d("50"),
        };

        let qty = bank.quantity(&balance);
        assert_eq!(qty.assets, d("100.000370"));
        assert_eq!(qty.liabilities, d("50.000205"));
    }

    #[test]
    fn test_health_components() {
        let healthy = HealthComponents {
            assets: d("120"),
            liabilities: d("100"),
        };
        assert!(healthy.is_healthy());
        assert_eq!(healthy.surplus(), d("20"));

        let underwater = HealthComponents {
            assets: d("100"),
            liabilities: d("120"),
        };
        assert!(!underwater.is_healthy());
        assert_eq!(underwater.surplus(), d("-20"));
    }
}
