//! Configuration for the settlement core.
//!
//! [`PlatformConfig::load`] layers built-in defaults, an optional config
//! file, and `CUSTODIA__`-prefixed environment variables (double underscore
//! separates nesting, e.g. `CUSTODIA__WITHDRAWAL__FEE_USD=2`).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, RankTable, Result, TokenRegistry, constants};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Treasury wallet that pays settlements and receives collections.
    pub treasury_address: Address,
    pub tokens: TokenConfig,
    pub deposit: DepositConfig,
    pub withdrawal: WithdrawalConfig,
    pub rank: RankConfig,
    pub collection: CollectionConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            treasury_address: Address::from_normalized(
                "0x0000000000000000000000000000000000000000",
            ),
            tokens: TokenConfig::default(),
            deposit: DepositConfig::default(),
            withdrawal: WithdrawalConfig::default(),
            rank: RankConfig::default(),
            collection: CollectionConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// Load from defaults, `path` (any format the `config` crate detects by
    /// extension; missing file is allowed), `.env`, and the environment.
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();
        let layered = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(constants::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let cfg: Self = layered.try_deserialize()?;
        cfg.validate()?;
        tracing::info!(
            path,
            treasury = %cfg.treasury_address,
            listed_tokens = cfg.tokens.listed.len(),
            "Configuration loaded"
        );
        Ok(cfg)
    }

    /// Reject internally inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        use crate::CustodiaError::Configuration;

        TokenRegistry::from_config(&self.tokens)?;
        self.rank.table.validate()?;
        if self.deposit.network_depth == 0 {
            return Err(Configuration("deposit.network_depth must be > 0".into()));
        }
        if self.deposit.min_deposit.is_sign_negative() {
            return Err(Configuration("deposit.min_deposit must be >= 0".into()));
        }
        if self.withdrawal.fee_usd.is_sign_negative() {
            return Err(Configuration("withdrawal.fee_usd must be >= 0".into()));
        }
        if self.withdrawal.min_amount <= Decimal::ZERO {
            return Err(Configuration("withdrawal.min_amount must be > 0".into()));
        }
        if self.withdrawal.confirmation_timeout_secs == 0 {
            return Err(Configuration(
                "withdrawal.confirmation_timeout_secs must be > 0".into(),
            ));
        }
        if self.rank.grace_period_days < 0 {
            return Err(Configuration("rank.grace_period_days must be >= 0".into()));
        }
        if self.collection.concurrency == 0 {
            return Err(Configuration("collection.concurrency must be > 0".into()));
        }
        if self.collection.safety_margin < Decimal::ONE {
            return Err(Configuration("collection.safety_margin must be >= 1".into()));
        }
        Ok(())
    }
}

/// Token listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub native_symbol: String,
    pub native_decimals: u32,
    pub listed: Vec<ListedToken>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            native_symbol: "ETH".into(),
            native_decimals: 18,
            listed: vec![
                ListedToken {
                    symbol: "USDT".into(),
                    address: Address::from_normalized(
                        "0xdac17f958d2ee523a2206206994597c13d831ec7",
                    ),
                    decimals: 6,
                    qualifying: true,
                },
                ListedToken {
                    symbol: "USDC".into(),
                    address: Address::from_normalized(
                        "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                    ),
                    decimals: 6,
                    qualifying: true,
                },
            ],
        }
    }
}

/// One listed contract token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListedToken {
    pub symbol: String,
    pub address: Address,
    pub decimals: u32,
    /// Counts toward activation, network volume and rank blocking.
    pub qualifying: bool,
}

/// Deposit ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositConfig {
    /// Dust threshold in token units.
    pub min_deposit: Decimal,
    pub activation_threshold_usd: Decimal,
    /// Upline levels credited with network volume.
    pub network_depth: usize,
    /// Marks every recorded transaction as test data.
    pub test_mode: bool,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            min_deposit: constants::DEFAULT_MIN_DEPOSIT,
            activation_threshold_usd: constants::DEFAULT_ACTIVATION_THRESHOLD_USD,
            network_depth: constants::DEFAULT_NETWORK_DEPTH,
            test_mode: false,
        }
    }
}

/// Withdrawal admission and settlement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalConfig {
    /// Smallest single request, USD.
    pub min_amount: Decimal,
    /// Combined available + blocked value (USD) of the token needed to
    /// withdraw it at all.
    pub min_balance_to_withdraw: Decimal,
    /// Flat fee in USD.
    pub fee_usd: Decimal,
    pub required_confirmations: u64,
    pub confirmation_timeout_secs: u64,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            min_amount: constants::DEFAULT_MIN_WITHDRAWAL,
            min_balance_to_withdraw: constants::DEFAULT_MIN_BALANCE_TO_WITHDRAW,
            fee_usd: constants::DEFAULT_WITHDRAWAL_FEE_USD,
            required_confirmations: 1,
            confirmation_timeout_secs: constants::DEFAULT_CONFIRMATION_TIMEOUT_SECS,
        }
    }
}

/// Rank engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankConfig {
    pub table: RankTable,
    pub grace_period_days: i64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            table: RankTable::default(),
            grace_period_days: constants::DEFAULT_GRACE_PERIOD_DAYS,
        }
    }
}

/// Batch collection planner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Concurrent balance queries in flight.
    pub concurrency: usize,
    /// Balances below this USD value are left in place.
    pub dust_usd: Decimal,
    /// Treasury must cover funding cost times this factor.
    pub safety_margin: Decimal,
    pub native_transfer_gas: u64,
    pub token_transfer_gas: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            concurrency: constants::DEFAULT_COLLECTION_CONCURRENCY,
            dust_usd: constants::DEFAULT_COLLECTION_DUST_USD,
            safety_margin: constants::DEFAULT_GAS_SAFETY_MARGIN,
            native_transfer_gas: constants::NATIVE_TRANSFER_GAS,
            token_transfer_gas: constants::TOKEN_TRANSFER_GAS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PlatformConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut cfg = PlatformConfig::default();
        cfg.collection.concurrency = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn margin_below_one_rejected() {
        let mut cfg = PlatformConfig::default();
        cfg.collection.safety_margin = Decimal::new(9, 1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn serde_roundtrip_preserves_tables() {
        let cfg = PlatformConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PlatformConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rank.table, cfg.rank.table);
        assert_eq!(back.tokens.listed.len(), 2);
        assert_eq!(back.withdrawal.fee_usd, cfg.withdrawal.fee_usd);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let cfg = PlatformConfig::load("does-not-exist-custodia").unwrap();
        assert_eq!(cfg.tokens.native_symbol, "ETH");
        assert_eq!(cfg.deposit.network_depth, constants::DEFAULT_NETWORK_DEPTH);
    }
}
