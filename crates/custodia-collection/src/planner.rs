//! Concurrent balance scan feeding [`CollectionPlan::build`].

use std::collections::HashMap;
use std::sync::Arc;

use custodia_ledger::AddressBook;
use custodia_types::{
    ChainClient, ChainError, CollectionConfig, CustodiaError, DepositAddress, PriceProvider,
    Result, TokenRegistry,
};
use futures::StreamExt;
use futures::stream;
use rust_decimal::Decimal;

use crate::plan::{CollectionPlan, GasModel, TokenHolding, WalletHoldings};

pub struct CollectionPlanner {
    config: CollectionConfig,
    registry: Arc<TokenRegistry>,
    addresses: Arc<AddressBook>,
    chain: Arc<dyn ChainClient>,
    prices: Arc<dyn PriceProvider>,
}

impl CollectionPlanner {
    #[must_use]
    pub fn new(
        config: CollectionConfig,
        registry: Arc<TokenRegistry>,
        addresses: Arc<AddressBook>,
        chain: Arc<dyn ChainClient>,
        prices: Arc<dyn PriceProvider>,
    ) -> Self {
        Self {
            config,
            registry,
            addresses,
            chain,
            prices,
        }
    }

    /// Scan every active deposit address and estimate the sweep.
    ///
    /// Per-wallet query failures are counted in the plan, not returned.
    ///
    /// # Errors
    /// `ChainQuery` if the gas price cannot be read.
    pub async fn plan(&self) -> Result<CollectionPlan> {
        let gas_price = self
            .chain
            .gas_price()
            .await
            .map_err(|e| CustodiaError::ChainQuery(e.to_string()))?;
        let (prices, unpriced) = self.quote_prices().await;
        let targets = self.addresses.active_addresses();
        let target_count = targets.len();

        let prices = &prices;
        let scanned: Vec<_> = stream::iter(targets)
            .map(|deposit| async move {
                let address = deposit.address.clone();
                (address, self.scan(deposit, prices).await)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut failed_queries = 0;
        let mut wallets = Vec::with_capacity(scanned.len());
        for (address, result) in scanned {
            match result {
                Ok(wallet) => wallets.push(wallet),
                Err(err) => {
                    failed_queries += 1;
                    tracing::warn!(%address, kind = %err.kind, error = %err, "Balance query failed, wallet skipped");
                }
            }
        }
        wallets.sort_by(|a, b| a.address.cmp(&b.address));

        let treasury = self.addresses.treasury().address.clone();
        let treasury_balance = match self.chain.native_balance(&treasury).await {
            Ok(balance) => Some(balance),
            Err(err) => {
                failed_queries += 1;
                tracing::warn!(address = %treasury, error = %err, "Treasury balance query failed");
                None
            }
        };

        let native = self.registry.native();
        let model = GasModel {
            gas_price,
            native_transfer_gas: self.config.native_transfer_gas,
            token_transfer_gas: self.config.token_transfer_gas,
            native_symbol: native.symbol.clone(),
            native_price_usd: prices.get(&native.symbol).copied(),
            dust_usd: self.config.dust_usd,
            safety_margin: self.config.safety_margin,
        };
        let plan = CollectionPlan::build(
            treasury,
            wallets,
            &model,
            treasury_balance,
            failed_queries,
            unpriced,
        );

        tracing::info!(
            scanned = target_count,
            wallets = plan.wallets.len(),
            failed = plan.failed_queries,
            total_usd = %plan.total_usd,
            gas_cost = %plan.total_gas_cost(),
            required = %plan.treasury_required,
            can_execute = plan.can_execute,
            "Collection plan ready"
        );
        Ok(plan)
    }

    /// USD quotes for the native asset and every listed contract token.
    /// Qualifying tokens are pegged at 1.
    async fn quote_prices(&self) -> (HashMap<String, Decimal>, Vec<String>) {
        let mut prices = HashMap::new();
        let mut unpriced = Vec::new();
        let tokens = std::iter::once(self.registry.native().clone())
            .chain(self.registry.contract_tokens());
        for token in tokens {
            if token.is_qualifying() {
                prices.insert(token.symbol, Decimal::ONE);
                continue;
            }
            match self.prices.price_usd(&token.symbol).await {
                Ok(price) if price > Decimal::ZERO => {
                    prices.insert(token.symbol, price);
                }
                _ => {
                    tracing::warn!(token = %token.symbol, "No USD quote, token excluded from plan");
                    unpriced.push(token.symbol);
                }
            }
        }
        (prices, unpriced)
    }

    async fn scan(
        &self,
        deposit: DepositAddress,
        prices: &HashMap<String, Decimal>,
    ) -> std::result::Result<WalletHoldings, ChainError> {
        let native = self.chain.native_balance(&deposit.address).await?;
        let mut tokens = Vec::new();
        for token in self.registry.contract_tokens() {
            let Some(price) = prices.get(&token.symbol) else {
                continue;
            };
            let amount = self.chain.token_balance(&token, &deposit.address).await?;
            let usd_value = amount * price;
            if amount > Decimal::ZERO && usd_value >= self.config.dust_usd {
                tokens.push(TokenHolding {
                    symbol: token.symbol,
                    amount,
                    usd_value,
                });
            }
        }
        Ok(WalletHoldings {
            address: deposit.address,
            user_id: deposit.user_id,
            native,
            tokens,
        })
    }
}
