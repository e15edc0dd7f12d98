//! In-memory collaborators for tests. **Never use in production.**
//!
//! Enabled by the `test-helpers` feature so that downstream crates can
//! drive settlement and collection flows without a chain.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{
    Address, ChainClient, ChainError, ChainErrorKind, CustodiaError, Notification,
    NotificationKind, NotificationSink, PriceProvider, Result, Token, TxHash,
};

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A transfer the mock chain accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransfer {
    pub tx_hash: TxHash,
    pub token_symbol: String,
    pub from: Address,
    pub to: Address,
    pub amount: Decimal,
}

/// Scriptable chain client.
#[derive(Debug, Default)]
pub struct MockChainClient {
    native_balances: Mutex<HashMap<Address, Decimal>>,
    token_balances: Mutex<HashMap<(String, Address), Decimal>>,
    failing_addresses: Mutex<HashSet<Address>>,
    gas_price: Mutex<Decimal>,
    next_send_error: Mutex<Option<ChainError>>,
    next_confirm_error: Mutex<Option<ChainError>>,
    hang_confirmations: AtomicBool,
    sends: Mutex<Vec<SentTransfer>>,
    counter: AtomicU64,
}

impl MockChainClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gas_price: Mutex::new(Decimal::new(5, 9)), // 5 gwei
            ..Self::default()
        }
    }

    pub fn set_native_balance(&self, address: &Address, amount: Decimal) {
        locked(&self.native_balances).insert(address.clone(), amount);
    }

    pub fn set_token_balance(&self, symbol: &str, address: &Address, amount: Decimal) {
        locked(&self.token_balances).insert((symbol.to_string(), address.clone()), amount);
    }

    pub fn set_gas_price(&self, price: Decimal) {
        *locked(&self.gas_price) = price;
    }

    /// Balance queries for `address` fail with an RPC error.
    pub fn fail_queries_for(&self, address: &Address) {
        locked(&self.failing_addresses).insert(address.clone());
    }

    /// The next send fails with `kind`.
    pub fn fail_next_send(&self, kind: ChainErrorKind) {
        *locked(&self.next_send_error) = Some(ChainError::new(kind, "scripted send failure"));
    }

    /// The next confirmation wait fails with `kind`.
    pub fn fail_next_confirmation(&self, kind: ChainErrorKind) {
        *locked(&self.next_confirm_error) =
            Some(ChainError::new(kind, "scripted confirmation failure"));
    }

    /// Confirmation waits never resolve.
    pub fn hang_confirmations(&self) {
        self.hang_confirmations.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn sends(&self) -> Vec<SentTransfer> {
        locked(&self.sends).clone()
    }

    fn record_send(
        &self,
        symbol: &str,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> std::result::Result<TxHash, ChainError> {
        if let Some(err) = locked(&self.next_send_error).take() {
            return Err(err);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let tx_hash = TxHash::synthetic(&format!("mock-send-{n}"));
        locked(&self.sends).push(SentTransfer {
            tx_hash: tx_hash.clone(),
            token_symbol: symbol.to_string(),
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(tx_hash)
    }

    fn check_query(&self, address: &Address) -> std::result::Result<(), ChainError> {
        if locked(&self.failing_addresses).contains(address) {
            return Err(ChainError::new(ChainErrorKind::Rpc, "scripted query failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn send_native(
        &self,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> std::result::Result<TxHash, ChainError> {
        self.record_send("NATIVE", from, to, amount)
    }

    async fn send_token(
        &self,
        token: &Token,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> std::result::Result<TxHash, ChainError> {
        self.record_send(&token.symbol, from, to, amount)
    }

    async fn wait_for_confirmation(
        &self,
        _tx: &TxHash,
        _confirmations: u64,
        _timeout: Duration,
    ) -> std::result::Result<(), ChainError> {
        if self.hang_confirmations.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        match locked(&self.next_confirm_error).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn native_balance(&self, address: &Address) -> std::result::Result<Decimal, ChainError> {
        self.check_query(address)?;
        Ok(locked(&self.native_balances)
            .get(address)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn token_balance(
        &self,
        token: &Token,
        address: &Address,
    ) -> std::result::Result<Decimal, ChainError> {
        self.check_query(address)?;
        Ok(locked(&self.token_balances)
            .get(&(token.symbol.clone(), address.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn gas_price(&self) -> std::result::Result<Decimal, ChainError> {
        Ok(*locked(&self.gas_price))
    }
}

/// Price feed with fixed quotes.
#[derive(Debug, Default)]
pub struct FixedPriceProvider {
    prices: HashMap<String, Decimal>,
}

impl FixedPriceProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, symbol: &str, price: Decimal) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }
}

#[async_trait]
impl PriceProvider for FixedPriceProvider {
    async fn price_usd(&self, symbol: &str) -> Result<Decimal> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| CustodiaError::PriceUnavailable(symbol.to_string()))
    }
}

/// Sink that keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    items: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        locked(&self.items).clone()
    }

    #[must_use]
    pub fn count(&self, kind: NotificationKind) -> usize {
        locked(&self.items).iter().filter(|n| n.kind == kind).count()
    }
}

impl NotificationSink for RecordingSink {
    fn enqueue(&self, notification: Notification) {
        locked(&self.items).push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;

    #[tokio::test]
    async fn mock_send_records_and_fails_once() {
        let chain = MockChainClient::new();
        let a = Address::numbered(1);
        let b = Address::numbered(2);

        chain.fail_next_send(ChainErrorKind::Rpc);
        let err = chain.send_native(&a, &b, Decimal::ONE).await.unwrap_err();
        assert_eq!(err.kind, ChainErrorKind::Rpc);

        let hash = chain.send_native(&a, &b, Decimal::ONE).await.unwrap();
        assert_eq!(chain.sends().len(), 1);
        assert_eq!(chain.sends()[0].tx_hash, hash);
    }

    #[tokio::test]
    async fn mock_balances_default_zero() {
        let chain = MockChainClient::new();
        let a = Address::numbered(3);
        assert_eq!(chain.native_balance(&a).await.unwrap(), Decimal::ZERO);
        chain.set_native_balance(&a, Decimal::TEN);
        assert_eq!(chain.native_balance(&a).await.unwrap(), Decimal::TEN);
        chain.fail_queries_for(&a);
        assert!(chain.native_balance(&a).await.is_err());
    }

    #[tokio::test]
    async fn fixed_prices() {
        let prices = FixedPriceProvider::new().with("ETH", Decimal::new(2000, 0));
        assert_eq!(prices.price_usd("ETH").await.unwrap(), Decimal::new(2000, 0));
        assert!(prices.price_usd("BTC").await.is_err());
    }

    #[test]
    fn recording_sink_counts() {
        let sink = RecordingSink::new();
        sink.enqueue(Notification::new(
            UserId::new(),
            NotificationKind::RankChanged,
            "t",
            "m",
            serde_json::json!({}),
        ));
        assert_eq!(sink.count(NotificationKind::RankChanged), 1);
        assert_eq!(sink.count(NotificationKind::DepositConfirmed), 0);
    }
}
