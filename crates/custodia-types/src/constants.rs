//! System-wide constants for the Custodia settlement core.

use rust_decimal::Decimal;

/// Length of an EVM address in bytes (20 bytes, 40 hex chars after `0x`).
pub const ADDRESS_BYTES: usize = 20;

/// Length of a transaction hash in bytes.
pub const TX_HASH_BYTES: usize = 32;

/// Decimal scale cap imposed by `rust_decimal`.
pub const MAX_TOKEN_DECIMALS: u32 = 28;

/// Decimals assumed for an unrecognized token that arrives without a hint.
pub const DEFAULT_UNKNOWN_DECIMALS: u32 = 18;

/// Symbol prefix used for tokens whose contract address is not listed.
pub const UNKNOWN_TOKEN_PREFIX: &str = "UNKNOWN:";

/// Gas units of a plain native-asset transfer.
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// Gas units budgeted for an ERC20-style `transfer` call.
pub const TOKEN_TRANSFER_GAS: u64 = 65_000;

/// Cumulative qualifying deposits (USD) needed to activate an account.
pub const DEFAULT_ACTIVATION_THRESHOLD_USD: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Deposits below this amount (token units) are ignored as dust.
pub const DEFAULT_MIN_DEPOSIT: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// How many upline levels receive network volume from a deposit.
pub const DEFAULT_NETWORK_DEPTH: usize = 10;

/// Smallest single withdrawal accepted (USD).
pub const DEFAULT_MIN_WITHDRAWAL: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// A user needs at least this combined balance (USD) to withdraw at all.
pub const DEFAULT_MIN_BALANCE_TO_WITHDRAW: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

/// Flat withdrawal fee in USD, converted to token units at request time.
pub const DEFAULT_WITHDRAWAL_FEE_USD: Decimal = Decimal::from_parts(1, 0, 0, false, 0);

/// Seconds to wait for a settlement transfer to confirm.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120;

/// Length of the maintenance grace period, in days.
pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 7;

/// Maximum warnings on the maintenance ladder.
pub const MAX_WARNING_COUNT: u8 = 3;

/// Default number of concurrent balance queries during collection planning.
pub const DEFAULT_COLLECTION_CONCURRENCY: usize = 16;

/// Balances worth less than this (USD) are not collected.
pub const DEFAULT_COLLECTION_DUST_USD: Decimal = Decimal::from_parts(1, 0, 0, false, 0);

/// Treasury must hold estimated funding gas times this margin (1.2 = +20%).
pub const DEFAULT_GAS_SAFETY_MARGIN: Decimal = Decimal::from_parts(12, 0, 0, false, 1);

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "CUSTODIA";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
