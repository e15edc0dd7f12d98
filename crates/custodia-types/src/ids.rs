//! Identifiers used throughout Custodia.
//!
//! Internal entity IDs use UUIDv7 for time-ordered lexicographic sorting.
//! On-chain identities ([`Address`], [`TxHash`]) are normalised to
//! lowercase hex so that lookups never depend on checksum casing.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CustodiaError, Result, constants};

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Unique identifier for a platform user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// WithdrawalId
// ---------------------------------------------------------------------------

/// Unique identifier for a withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct WithdrawalId(pub Uuid);

impl WithdrawalId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WithdrawalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wd:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// WalletTxId
// ---------------------------------------------------------------------------

/// Internal identifier of a [`crate::WalletTransaction`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct WalletTxId(pub Uuid);

impl WalletTxId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WalletTxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WalletTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wtx:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A `0x`-prefixed 20-byte hex address, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalise an address.
    ///
    /// # Errors
    /// Returns [`CustodiaError::InvalidDestination`] unless the input is
    /// `0x` followed by exactly 40 hex characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| CustodiaError::InvalidDestination(raw.to_string()))?;
        if body.len() != constants::ADDRESS_BYTES * 2 || hex::decode(body).is_err() {
            return Err(CustodiaError::InvalidDestination(raw.to_string()));
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    /// Wrap a literal already in canonical lowercase form.
    pub(crate) fn from_normalized(canonical: &str) -> Self {
        debug_assert!(Self::parse(canonical).is_ok_and(|a| a.0 == canonical));
        Self(canonical.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 10 characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..10]
    }
}

impl TryFrom<String> for Address {
    type Error = CustodiaError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// TxHash
// ---------------------------------------------------------------------------

/// On-chain transaction hash. The global idempotency key of the
/// transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TxHash(String);

impl TxHash {
    /// Normalise a hash. Returns `None` for empty / whitespace input.
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_ascii_lowercase()))
        }
    }

    /// Strictly parse a `0x`-prefixed 32-byte hash.
    ///
    /// # Errors
    /// Returns [`CustodiaError::InvalidTxHash`] on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let body = raw
            .trim()
            .strip_prefix("0x")
            .ok_or_else(|| CustodiaError::InvalidTxHash(raw.to_string()))?;
        if body.len() != constants::TX_HASH_BYTES * 2 || hex::decode(body).is_err() {
            return Err(CustodiaError::InvalidTxHash(raw.to_string()));
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic hashes for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl TxHash {
    /// SHA-256 of `seed`, formatted as a `0x` hash.
    #[must_use]
    pub fn synthetic(seed: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"custodia:tx:");
        hasher.update(seed.as_bytes());
        Self(format!("0x{}", hex::encode(hasher.finalize())))
    }
}

/// Deterministic addresses for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Address {
    /// Address whose last byte is `n`, e.g. `Address::numbered(1)`.
    #[must_use]
    pub fn numbered(n: u8) -> Self {
        Self(format!("0x{}{n:02x}", "0".repeat(38)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_ordering() {
        let a = UserId::new();
        let b = UserId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn address_normalises_case() {
        let a = Address::parse("0xABCDEFabcdef0123456789ABCDEF0123456789ab").unwrap();
        assert_eq!(a.as_str(), "0xabcdefabcdef0123456789abcdef0123456789ab");
        assert_eq!(a.short(), "0xabcdefab");
    }

    #[test]
    fn address_rejects_bad_input() {
        for raw in [
            "",
            "abcdefabcdef0123456789abcdef0123456789ab",
            "0x1234",
            "0xzzcdefabcdef0123456789abcdef0123456789ab",
            "0xabcdefabcdef0123456789abcdef0123456789ab00",
        ] {
            let err = Address::parse(raw).unwrap_err();
            assert!(matches!(err, CustodiaError::InvalidDestination(_)), "{raw}");
        }
    }

    #[test]
    fn address_serde_validates() {
        let json = "\"0x00000000000000000000000000000000000000ff\"";
        let a: Address = serde_json::from_str(json).unwrap();
        assert_eq!(a, Address::numbered(255));
        assert!(serde_json::from_str::<Address>("\"0x12\"").is_err());
    }

    #[test]
    fn tx_hash_empty_is_none() {
        assert!(TxHash::new("").is_none());
        assert!(TxHash::new("   ").is_none());
        assert_eq!(TxHash::new("0xAB").unwrap().as_str(), "0xab");
    }

    #[test]
    fn tx_hash_strict_parse() {
        let synthetic = TxHash::synthetic("a");
        assert_eq!(TxHash::parse(synthetic.as_str()).unwrap(), synthetic);
        assert!(TxHash::parse("0x1234").is_err());
    }

    #[test]
    fn synthetic_hash_deterministic() {
        assert_eq!(TxHash::synthetic("x"), TxHash::synthetic("x"));
        assert_ne!(TxHash::synthetic("x"), TxHash::synthetic("y"));
    }
}
