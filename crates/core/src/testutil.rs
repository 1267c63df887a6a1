//! In-memory protocol and swapper mocks for unit tests.

use anyhow::Result;
use async_trait::async_trait;
use liqbot_api::SwapMode;
use liqbot_chain::{
    Address, Balance, Bank, HealthComponents, MarginAccount, PriceBias, ProtocolClient,
    RequirementType, Signature,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::swap::Swapper;

/// One recorded protocol mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Withdraw {
        bank: Address,
        amount: Decimal,
        is_final: bool,
    },
    Repay {
        bank: Address,
        amount: Decimal,
        is_final: bool,
    },
    Deposit {
        bank: Address,
        amount: Decimal,
    },
    Liquidate {
        target: Address,
        collateral_bank: Address,
        collateral_amount: Decimal,
        liability_bank: Address,
    },
}

#[derive(Default)]
pub struct MockState {
    pub own_account: Option<MarginAccount>,
    pub banks: Vec<Bank>,
    /// (bank, bias) -> price
    pub prices: HashMap<(Address, PriceBias), Decimal>,
    pub max_withdraw: HashMap<Address, Decimal>,
    pub max_borrow: HashMap<Address, Decimal>,
    /// (account, requirement) -> components
    pub health: HashMap<(Address, RequirementType), HealthComponents>,
    /// (target, collateral_bank, liability_bank) -> capacity
    pub max_liquidatable: HashMap<(Address, Address, Address), Decimal>,
    /// wallet balances by mint
    pub wallet: HashMap<Address, Decimal>,
    pub native_balance: Decimal,
    /// amount shaved off every withdrawal before it lands in the wallet
    pub withdraw_skim: Decimal,
    pub calls: Vec<MockCall>,
    /// targets whose liquidation calls fail
    pub failing_targets: Vec<Address>,
}

/// Mock protocol with share value 1, so shares equal token quantities.
/// Mutations move funds between the wallet map and the own account.
pub struct MockProtocol {
    pub own_address: Address,
    pub wallet_address: Address,
    pub state: Mutex<MockState>,
}

impl MockProtocol {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            own_address: Address::repeat_byte(0xEE),
            wallet_address: Address::repeat_byte(0xDD),
            state: Mutex::new(MockState::default()),
        })
    }

    pub fn add_bank(&self, bank: Bank, price: Decimal) {
        let mut state = self.state.lock();
        for bias in [PriceBias::None, PriceBias::Low, PriceBias::High] {
            state.prices.insert((bank.address, bias), price);
        }
        state.banks.push(bank);
    }

    pub fn set_own_account(&self, account: MarginAccount) {
        self.state.lock().own_account = Some(account);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    fn mint_of(&self, bank_pk: &Address) -> Address {
        let state = self.state.lock();
        state
            .banks
            .iter()
            .find(|b| b.address == *bank_pk)
            .map(|b| b.mint)
            .unwrap_or(Address::ZERO)
    }

    fn adjust_own_balance(&self, bank_pk: Address, assets_delta: Decimal, liabs_delta: Decimal) {
        let mut state = self.state.lock();
        let account = state.own_account.as_mut().unwrap();
        match account.balances.iter_mut().find(|b| b.bank_pk == bank_pk) {
            Some(balance) => {
                balance.asset_shares += assets_delta;
                balance.liability_shares += liabs_delta;
                if balance.asset_shares < Decimal::ZERO {
                    balance.asset_shares = Decimal::ZERO;
                }
                if balance.liability_shares < Decimal::ZERO {
                    balance.liability_shares = Decimal::ZERO;
                }
            }
            None => account.balances.push(Balance {
                bank_pk,
                asset_shares: assets_delta.max(Decimal::ZERO),
                liability_shares: liabs_delta.max(Decimal::ZERO),
            }),
        }
    }

    fn clear_own_liability(&self, bank_pk: Address) {
        let mut state = self.state.lock();
        let account = state.own_account.as_mut().unwrap();
        if let Some(balance) = account.balances.iter_mut().find(|b| b.bank_pk == bank_pk) {
            balance.liability_shares = Decimal::ZERO;
        }
    }

    pub fn credit_wallet(&self, mint: Address, amount: Decimal) {
        let mut state = self.state.lock();
        *state.wallet.entry(mint).or_default() += amount;
    }

    fn debit_wallet(&self, mint: Address, amount: Decimal) {
        let mut state = self.state.lock();
        let balance = state.wallet.entry(mint).or_default();
        *balance -= amount;
        if *balance < Decimal::ZERO {
            *balance = Decimal::ZERO;
        }
    }

    fn sig(label: &str) -> Signature {
        Signature(format!("mock-{label}"))
    }
}

#[async_trait]
impl ProtocolClient for MockProtocol {
    fn own_address(&self) -> Address {
        self.own_address
    }

    fn wallet_address(&self) -> Address {
        self.wallet_address
    }

    fn own_account(&self) -> MarginAccount {
        self.state.lock().own_account.clone().unwrap()
    }

    async fn reload_own_account(&self) -> Result<()> {
        Ok(())
    }

    async fn reload_banks(&self) -> Result<()> {
        Ok(())
    }

    fn banks(&self) -> Vec<Bank> {
        self.state.lock().banks.clone()
    }

    fn bank_by_pk(&self, bank_pk: &Address) -> Option<Bank> {
        self.state
            .lock()
            .banks
            .iter()
            .find(|b| b.address == *bank_pk)
            .cloned()
    }

    fn bank_by_mint(&self, mint: &Address) -> Option<Bank> {
        self.state
            .lock()
            .banks
            .iter()
            .find(|b| b.mint == *mint)
            .cloned()
    }

    async fn health_components(
        &self,
        account: &MarginAccount,
        requirement: RequirementType,
    ) -> Result<HealthComponents> {
        self.state
            .lock()
            .health
            .get(&(account.address, requirement))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no health fixture for {}", account.address.short()))
    }

    async fn oracle_price(&self, bank: &Bank, bias: PriceBias) -> Result<Decimal> {
        self.state
            .lock()
            .prices
            .get(&(bank.address, bias))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no price fixture for {}", bank.address.short()))
    }

    async fn max_withdraw(&self, bank: &Bank) -> Result<Decimal> {
        Ok(self
            .state
            .lock()
            .max_withdraw
            .get(&bank.address)
            .copied()
            .unwrap_or(Decimal::MAX))
    }

    async fn max_borrow(&self, bank: &Bank) -> Result<Decimal> {
        Ok(self
            .state
            .lock()
            .max_borrow
            .get(&bank.address)
            .copied()
            .unwrap_or(Decimal::MAX))
    }

    async fn max_liquidatable(
        &self,
        target: &MarginAccount,
        collateral_bank: &Bank,
        liability_bank: &Bank,
    ) -> Result<Decimal> {
        Ok(self
            .state
            .lock()
            .max_liquidatable
            .get(&(target.address, collateral_bank.address, liability_bank.address))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn withdraw(&self, amount: Decimal, bank: &Bank, is_final: bool) -> Result<Signature> {
        self.state.lock().calls.push(MockCall::Withdraw {
            bank: bank.address,
            amount,
            is_final,
        });
        self.adjust_own_balance(bank.address, -amount, Decimal::ZERO);
        let skim = self.state.lock().withdraw_skim;
        self.credit_wallet(self.mint_of(&bank.address), (amount - skim).max(Decimal::ZERO));
        Ok(Self::sig("withdraw"))
    }

    async fn repay(&self, amount: Decimal, bank: &Bank, is_final: bool) -> Result<Signature> {
        self.state.lock().calls.push(MockCall::Repay {
            bank: bank.address,
            amount,
            is_final,
        });
        if is_final {
            self.clear_own_liability(bank.address);
        } else {
            self.adjust_own_balance(bank.address, Decimal::ZERO, -amount);
        }
        self.debit_wallet(self.mint_of(&bank.address), amount);
        Ok(Self::sig("repay"))
    }

    async fn deposit(&self, amount: Decimal, bank: &Bank) -> Result<Signature> {
        self.state.lock().calls.push(MockCall::Deposit {
            bank: bank.address,
            amount,
        });
        self.adjust_own_balance(bank.address, amount, Decimal::ZERO);
        self.debit_wallet(self.mint_of(&bank.address), amount);
        Ok(Self::sig("deposit"))
    }

    async fn liquidate(
        &self,
        target: &MarginAccount,
        collateral_bank: &Bank,
        collateral_amount: Decimal,
        liability_bank: &Bank,
    ) -> Result<Signature> {
        let failing = self.state.lock().failing_targets.contains(&target.address);
        self.state.lock().calls.push(MockCall::Liquidate {
            target: target.address,
            collateral_bank: collateral_bank.address,
            collateral_amount,
            liability_bank: liability_bank.address,
        });
        if failing {
            anyhow::bail!("liquidation reverted");
        }
        Ok(Self::sig("liquidate"))
    }

    async fn token_balance(&self, mint: &Address) -> Result<Decimal> {
        Ok(self
            .state
            .lock()
            .wallet
            .get(mint)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn native_balance(&self) -> Result<Decimal> {
        Ok(self.state.lock().native_balance)
    }

    async fn sign_and_submit(&self, _tx_base64: &str) -> Result<Signature> {
        Ok(Self::sig("submit"))
    }
}

/// Swapper that settles instantly against the mock wallet at a fixed rate.
pub struct MockSwapper {
    protocol: Arc<MockProtocol>,
    /// output per input unit for ExactIn swaps
    pub rate: Decimal,
    pub swaps: Mutex<Vec<(Address, Address, Decimal, SwapMode)>>,
}

impl MockSwapper {
    pub fn new(protocol: Arc<MockProtocol>) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            rate: Decimal::ONE,
            swaps: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Swapper for MockSwapper {
    async fn swap(
        &self,
        mint_in: Address,
        mint_out: Address,
        amount: Decimal,
        mode: SwapMode,
    ) -> Result<Signature> {
        self.swaps.lock().push((mint_in, mint_out, amount, mode));
        match mode {
            SwapMode::ExactIn => {
                self.protocol.debit_wallet(mint_in, amount);
                self.protocol.credit_wallet(mint_out, amount * self.rate);
            }
            SwapMode::ExactOut => {
                self.protocol.debit_wallet(mint_in, amount / self.rate);
                self.protocol.credit_wallet(mint_out, amount);
            }
        }
        Ok(Signature("mock-swap".into()))
    }
}

/// Bank fixture with unit share values, so shares read as token amounts.
pub fn bank(byte: u8, mint_byte: u8) -> Bank {
    Bank {
        address: Address::repeat_byte(byte),
        mint: Address::repeat_byte(mint_byte),
        mint_decimals: 6,
        oracle: Address::repeat_byte(0xCC),
        isolated: false,
        asset_share_value: Decimal::ONE,
        liability_share_value: Decimal::ONE,
        deposit_limit: Decimal::new(1_000_000, 0),
        borrow_limit: Decimal::new(1_000_000, 0),
    }
}

pub fn balance(bank_pk: Address, assets: Decimal, liabilities: Decimal) -> Balance {
    Balance {
        bank_pk,
        asset_shares: assets,
        liability_shares: liabilities,
    }
}

pub fn account(byte: u8, balances: Vec<Balance>) -> MarginAccount {
    MarginAccount {
        address: Address::repeat_byte(byte),
        authority: Address::repeat_byte(0xDD),
        balances,
    }
}
