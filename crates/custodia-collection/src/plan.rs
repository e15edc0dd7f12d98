//! Collection plan and the three-phase gas estimate.
//!
//! ```text
//!   phase 1  treasury ──native──▶ wallet     (gas for each token transfer)
//!   phase 2  wallet   ──token───▶ treasury   (one transfer per holding)
//!   phase 3  wallet   ──native──▶ treasury   (leftover, net of its own gas)
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use custodia_types::{Address, UserId};
use rust_decimal::Decimal;
use serde::Serialize;

/// A non-dust contract token balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenHolding {
    pub symbol: String,
    pub amount: Decimal,
    pub usd_value: Decimal,
}

/// What one deposit wallet holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletHoldings {
    pub address: Address,
    pub user_id: UserId,
    /// Native balance before funding.
    pub native: Decimal,
    pub tokens: Vec<TokenHolding>,
}

/// Transactions and gas of one phase. `cost` is in native units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseEstimate {
    pub transactions: usize,
    pub gas_units: u64,
    pub cost: Decimal,
}

impl PhaseEstimate {
    fn add(&mut self, gas_units: u64, gas_price: Decimal) {
        self.transactions += 1;
        self.gas_units += gas_units;
        self.cost += Decimal::from(gas_units) * gas_price;
    }
}

/// Amount reaching the treasury for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenTotal {
    pub symbol: String,
    pub amount: Decimal,
    pub usd_value: Decimal,
    pub wallets: usize,
}

/// Pricing and gas inputs to [`CollectionPlan::build`].
#[derive(Debug, Clone)]
pub(crate) struct GasModel {
    pub gas_price: Decimal,
    pub native_transfer_gas: u64,
    pub token_transfer_gas: u64,
    pub native_symbol: String,
    pub native_price_usd: Option<Decimal>,
    pub dust_usd: Decimal,
    pub safety_margin: Decimal,
}

impl GasModel {
    fn native_transfer_cost(&self) -> Decimal {
        Decimal::from(self.native_transfer_gas) * self.gas_price
    }

    fn token_transfer_cost(&self) -> Decimal {
        Decimal::from(self.token_transfer_gas) * self.gas_price
    }

    /// Unpriced native is swept whenever it exceeds its own gas.
    fn worth_sweeping(&self, net_native: Decimal) -> bool {
        net_native > Decimal::ZERO
            && self
                .native_price_usd
                .is_none_or(|price| net_native * price >= self.dust_usd)
    }
}

/// Read-only consolidation plan.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionPlan {
    pub created_at: DateTime<Utc>,
    pub treasury: Address,
    /// Native units per gas unit at planning time.
    pub gas_price: Decimal,
    /// Wallets with something to collect, by address.
    pub wallets: Vec<WalletHoldings>,
    /// By symbol. The native entry is net of recovery gas.
    pub totals: Vec<TokenTotal>,
    pub total_usd: Decimal,
    pub funding: PhaseEstimate,
    /// Native sent to wallets in phase 1.
    pub funding_amount: Decimal,
    pub collection: PhaseEstimate,
    pub recovery: PhaseEstimate,
    /// `None` when the treasury balance query failed.
    pub treasury_balance: Option<Decimal>,
    /// Phase-1 outlay (funding plus its gas) times the safety margin.
    pub treasury_required: Decimal,
    pub can_execute: bool,
    /// Balance queries that failed; those wallets are not in the plan.
    pub failed_queries: usize,
    /// Tokens without a USD quote; their balances are not in the plan.
    pub unpriced_tokens: Vec<String>,
}

impl CollectionPlan {
    pub(crate) fn build(
        treasury: Address,
        scanned: Vec<WalletHoldings>,
        model: &GasModel,
        treasury_balance: Option<Decimal>,
        failed_queries: usize,
        unpriced_tokens: Vec<String>,
    ) -> Self {
        let token_cost = model.token_transfer_cost();
        let native_cost = model.native_transfer_cost();

        let mut funding = PhaseEstimate::default();
        let mut collection = PhaseEstimate::default();
        let mut recovery = PhaseEstimate::default();
        let mut funding_amount = Decimal::ZERO;
        let mut totals: BTreeMap<String, TokenTotal> = BTreeMap::new();
        let mut wallets = Vec::new();

        for wallet in scanned {
            let gas_needed = token_cost * Decimal::from(wallet.tokens.len());
            let shortfall = (gas_needed - wallet.native).max(Decimal::ZERO);
            if shortfall > Decimal::ZERO {
                funding.add(model.native_transfer_gas, model.gas_price);
                funding_amount += shortfall;
            }
            for holding in &wallet.tokens {
                collection.add(model.token_transfer_gas, model.gas_price);
                accumulate(&mut totals, &holding.symbol, holding.amount, holding.usd_value);
            }

            let sweep = wallet.native + shortfall - gas_needed - native_cost;
            let sweeps = model.worth_sweeping(sweep);
            if sweeps {
                recovery.add(model.native_transfer_gas, model.gas_price);
                let usd = model.native_price_usd.map_or(Decimal::ZERO, |p| sweep * p);
                accumulate(&mut totals, &model.native_symbol, sweep, usd);
            }

            if sweeps || !wallet.tokens.is_empty() {
                wallets.push(wallet);
            }
        }

        let treasury_required = (funding_amount + funding.cost) * model.safety_margin;
        let can_execute = treasury_balance.is_some_and(|balance| balance >= treasury_required);
        let totals: Vec<TokenTotal> = totals.into_values().collect();
        let total_usd = totals.iter().map(|t| t.usd_value).sum();

        Self {
            created_at: Utc::now(),
            treasury,
            gas_price: model.gas_price,
            wallets,
            totals,
            total_usd,
            funding,
            funding_amount,
            collection,
            recovery,
            treasury_balance,
            treasury_required,
            can_execute,
            failed_queries,
            unpriced_tokens,
        }
    }

    /// Gas paid across all phases, native units.
    #[must_use]
    pub fn total_gas_cost(&self) -> Decimal {
        self.funding.cost + self.collection.cost + self.recovery.cost
    }

    #[must_use]
    pub fn total_gas_units(&self) -> u64 {
        self.funding.gas_units + self.collection.gas_units + self.recovery.gas_units
    }

    #[must_use]
    pub fn total_transactions(&self) -> usize {
        self.funding.transactions + self.collection.transactions + self.recovery.transactions
    }

    /// Nothing worth collecting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Total for `symbol`, if anything of it is collected.
    #[must_use]
    pub fn total_for(&self, symbol: &str) -> Option<&TokenTotal> {
        self.totals.iter().find(|t| t.symbol == symbol)
    }
}

fn accumulate(totals: &mut BTreeMap<String, TokenTotal>, symbol: &str, amount: Decimal, usd: Decimal) {
    let entry = totals
        .entry(symbol.to_string())
        .or_insert_with(|| TokenTotal {
            symbol: symbol.to_string(),
            amount: Decimal::ZERO,
            usd_value: Decimal::ZERO,
            wallets: 0,
        });
    entry.amount += amount;
    entry.usd_value += usd;
    entry.wallets += 1;
}
