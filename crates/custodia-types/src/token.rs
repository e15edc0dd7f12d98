//! Token identification.
//!
//! Inbound transfers may carry any token. Resolution never fails: a
//! contract address that is not listed maps to an explicit
//! [`TokenClass::Unrecognized`] token keyed by that address, so value that
//! physically arrived is always recorded and credited.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, CustodiaError, Result, TokenConfig, constants};

/// How the platform treats a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenClass {
    /// The chain's gas asset (no contract address).
    Native,
    /// Accepted USD-pegged deposit token: counts toward activation,
    /// network volume and rank blocking.
    Qualifying,
    /// Listed contract token that does not count toward rank.
    Listed,
    /// Contract address not present in the registry.
    Unrecognized,
}

impl std::fmt::Display for TokenClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "NATIVE"),
            Self::Qualifying => write!(f, "QUALIFYING"),
            Self::Listed => write!(f, "LISTED"),
            Self::Unrecognized => write!(f, "UNRECOGNIZED"),
        }
    }
}

/// A resolved token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub decimals: u32,
    /// Contract address; `None` for the native asset.
    pub address: Option<Address>,
    pub class: TokenClass,
}

impl Token {
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.class == TokenClass::Native
    }

    #[must_use]
    pub fn is_qualifying(&self) -> bool {
        self.class == TokenClass::Qualifying
    }

    /// Convert a raw integer amount into token units using `decimals`.
    ///
    /// # Errors
    /// Returns [`CustodiaError::AmountOverflow`] if the value does not fit
    /// the 96-bit decimal mantissa or the scale exceeds 28.
    pub fn amount_from_raw(&self, raw: u128) -> Result<Decimal> {
        amount_from_raw(raw, self.decimals)
    }
}

/// Convert a raw on-chain integer into a decimal amount.
///
/// # Errors
/// Returns [`CustodiaError::AmountOverflow`] when unrepresentable.
pub fn amount_from_raw(raw: u128, decimals: u32) -> Result<Decimal> {
    let overflow = || CustodiaError::AmountOverflow {
        raw: raw.to_string(),
        decimals,
    };
    if decimals > constants::MAX_TOKEN_DECIMALS {
        return Err(overflow());
    }
    let signed = i128::try_from(raw).map_err(|_| overflow())?;
    Decimal::try_from_i128_with_scale(signed, decimals)
        .map(|d| d.normalize())
        .map_err(|_| overflow())
}

/// Lookup table of the tokens the platform knows about.
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    native: Token,
    by_address: HashMap<Address, Token>,
    by_symbol: HashMap<String, Token>,
}

impl TokenRegistry {
    /// Build the registry from configuration.
    ///
    /// # Errors
    /// Returns [`CustodiaError::Configuration`] on duplicate symbols or
    /// addresses, or decimals beyond the supported scale.
    pub fn from_config(cfg: &TokenConfig) -> Result<Self> {
        let native = Token {
            symbol: cfg.native_symbol.clone(),
            decimals: cfg.native_decimals,
            address: None,
            class: TokenClass::Native,
        };
        let mut by_symbol = HashMap::new();
        let mut by_address = HashMap::new();
        by_symbol.insert(native.symbol.clone(), native.clone());

        for listed in &cfg.listed {
            if listed.decimals > constants::MAX_TOKEN_DECIMALS {
                return Err(CustodiaError::Configuration(format!(
                    "token {} has {} decimals",
                    listed.symbol, listed.decimals
                )));
            }
            let token = Token {
                symbol: listed.symbol.clone(),
                decimals: listed.decimals,
                address: Some(listed.address.clone()),
                class: if listed.qualifying {
                    TokenClass::Qualifying
                } else {
                    TokenClass::Listed
                },
            };
            if by_symbol.insert(token.symbol.clone(), token.clone()).is_some() {
                return Err(CustodiaError::Configuration(format!(
                    "duplicate token symbol {}",
                    listed.symbol
                )));
            }
            if by_address.insert(listed.address.clone(), token).is_some() {
                return Err(CustodiaError::Configuration(format!(
                    "duplicate token address {}",
                    listed.address
                )));
            }
        }

        Ok(Self {
            native,
            by_address,
            by_symbol,
        })
    }

    /// Resolve the token of an inbound transfer.
    ///
    /// No contract address means the native asset. An unlisted address
    /// resolves to an [`TokenClass::Unrecognized`] token whose symbol embeds
    /// the address, so distinct unknown contracts never share a ledger row.
    #[must_use]
    pub fn resolve(&self, token_address: Option<&Address>, decimals_hint: Option<u32>) -> Token {
        let Some(address) = token_address else {
            return self.native.clone();
        };
        if let Some(token) = self.by_address.get(address) {
            return token.clone();
        }
        Token {
            symbol: format!("{}{address}", constants::UNKNOWN_TOKEN_PREFIX),
            decimals: decimals_hint
                .filter(|d| *d <= constants::MAX_TOKEN_DECIMALS)
                .unwrap_or(constants::DEFAULT_UNKNOWN_DECIMALS),
            address: Some(address.clone()),
            class: TokenClass::Unrecognized,
        }
    }

    /// Look up a listed token (or the native asset) by symbol.
    #[must_use]
    pub fn by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.by_symbol.get(symbol)
    }

    #[must_use]
    pub fn native(&self) -> &Token {
        &self.native
    }

    #[must_use]
    pub fn is_qualifying(&self, symbol: &str) -> bool {
        self.by_symbol.get(symbol).is_some_and(Token::is_qualifying)
    }

    /// Symbols of all qualifying tokens, sorted.
    #[must_use]
    pub fn qualifying_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .by_symbol
            .values()
            .filter(|t| t.is_qualifying())
            .map(|t| t.symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// All listed contract tokens, sorted by symbol.
    #[must_use]
    pub fn contract_tokens(&self) -> Vec<Token> {
        let mut tokens: Vec<Token> = self.by_address.values().cloned().collect();
        tokens.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ListedToken;

    fn registry() -> TokenRegistry {
        TokenRegistry::from_config(&TokenConfig::default()).unwrap()
    }

    #[test]
    fn no_address_is_native() {
        let reg = registry();
        let token = reg.resolve(None, Some(6));
        assert!(token.is_native());
        assert_eq!(token.decimals, 18);
    }

    #[test]
    fn listed_address_resolves() {
        let reg = registry();
        let usdt = reg.by_symbol("USDT").unwrap().clone();
        let resolved = reg.resolve(usdt.address.as_ref(), None);
        assert_eq!(resolved, usdt);
        assert!(resolved.is_qualifying());
        assert!(reg.is_qualifying("USDC"));
        assert!(!reg.is_qualifying("ETH"));
    }

    #[test]
    fn unknown_address_is_unrecognized_not_dropped() {
        let reg = registry();
        let addr = Address::numbered(0xee);
        let token = reg.resolve(Some(&addr), Some(8));
        assert_eq!(token.class, TokenClass::Unrecognized);
        assert_eq!(token.decimals, 8);
        assert!(token.symbol.starts_with("UNKNOWN:0x"));
        assert!(token.symbol.ends_with("ee"));

        let fallback = reg.resolve(Some(&addr), Some(99));
        assert_eq!(fallback.decimals, 18);
    }

    #[test]
    fn raw_amount_conversion() {
        assert_eq!(amount_from_raw(100_000_000, 6).unwrap(), Decimal::new(100, 0));
        assert_eq!(
            amount_from_raw(1_500_000_000_000_000_000, 18).unwrap(),
            Decimal::new(15, 1)
        );
        assert!(amount_from_raw(u128::MAX, 18).is_err());
        assert!(amount_from_raw(1, 29).is_err());
    }

    #[test]
    fn duplicate_symbol_rejected() {
        let mut cfg = TokenConfig::default();
        cfg.listed.push(ListedToken {
            symbol: "USDT".into(),
            address: Address::numbered(0x99),
            decimals: 6,
            qualifying: true,
        });
        let err = TokenRegistry::from_config(&cfg).unwrap_err();
        assert!(matches!(err, CustodiaError::Configuration(_)));
    }

    #[test]
    fn qualifying_symbols_sorted() {
        assert_eq!(registry().qualifying_symbols(), vec!["USDC", "USDT"]);
    }
}
