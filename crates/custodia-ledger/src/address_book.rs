//! Deposit address directory and the treasury wallet.
//!
//! One active deposit address per user. Assigning a new address to a user
//! deactivates the previous one; deactivated addresses stay on record so
//! late deposits to them are recognised as unattributed rather than lost.

use chrono::Utc;
use custodia_types::{Address, CustodiaError, DepositAddress, GlobalWallet, Result, UserId};
use dashmap::DashMap;

#[derive(Debug)]
pub struct AddressBook {
    by_address: DashMap<Address, DepositAddress>,
    by_user: DashMap<UserId, Address>,
    treasury: GlobalWallet,
}

impl AddressBook {
    #[must_use]
    pub fn new(treasury: GlobalWallet) -> Self {
        Self {
            by_address: DashMap::new(),
            by_user: DashMap::new(),
            treasury,
        }
    }

    /// Give `user_id` a deposit address, retiring any previous one.
    ///
    /// # Errors
    /// Returns `InvalidDestination` if the address belongs to another user
    /// or is the treasury.
    pub fn assign(&self, user_id: UserId, address: Address) -> Result<DepositAddress> {
        if address == self.treasury.address {
            return Err(CustodiaError::InvalidDestination(format!(
                "{address} is the treasury wallet"
            )));
        }
        let owner = self.by_address.get(&address).map(|r| r.user_id);
        if owner.is_some_and(|owner| owner != user_id) {
            return Err(CustodiaError::InvalidDestination(format!(
                "{address} already assigned"
            )));
        }

        let record = DepositAddress {
            user_id,
            address: address.clone(),
            is_active: true,
            created_at: Utc::now(),
        };
        let previous = self.by_user.insert(user_id, address.clone());
        if let Some(previous) = previous.filter(|p| *p != address) {
            self.deactivate(&previous);
        }
        self.by_address.insert(address.clone(), record.clone());
        tracing::info!(user = %user_id, address = %address.short(), "Deposit address assigned");
        Ok(record)
    }

    /// Mark an address inactive. Returns `false` if unknown.
    pub fn deactivate(&self, address: &Address) -> bool {
        match self.by_address.get_mut(address) {
            Some(mut record) => {
                record.is_active = false;
                true
            }
            None => false,
        }
    }

    /// Owner of an active deposit address.
    #[must_use]
    pub fn lookup_active(&self, address: &Address) -> Option<UserId> {
        self.by_address
            .get(address)
            .filter(|r| r.is_active)
            .map(|r| r.user_id)
    }

    #[must_use]
    pub fn get(&self, address: &Address) -> Option<DepositAddress> {
        self.by_address.get(address).map(|r| r.clone())
    }

    #[must_use]
    pub fn address_of(&self, user_id: UserId) -> Option<Address> {
        self.by_user.get(&user_id).map(|a| a.clone())
    }

    /// Every active deposit address, sorted by address.
    #[must_use]
    pub fn active_addresses(&self) -> Vec<DepositAddress> {
        let mut active: Vec<DepositAddress> = self
            .by_address
            .iter()
            .filter(|r| r.is_active)
            .map(|r| r.clone())
            .collect();
        active.sort_by(|a, b| a.address.cmp(&b.address));
        active
    }

    #[must_use]
    pub fn treasury(&self) -> &GlobalWallet {
        &self.treasury
    }
}
