use crate::domain::crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Balance and replay counter for a single address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

impl Account {
    pub fn with_balance(balance: u64) -> Self {
        Self { balance, nonce: 0 }
    }

    /// Credits the account, saturating at `u64::MAX`.
    pub fn credit(&mut self, amount: u64) {
        self.balance = self.balance.saturating_add(amount);
    }

    /// Debits the account if it can cover `amount`. Returns `false` and
    /// leaves the balance untouched otherwise.
    pub fn debit(&mut self, amount: u64) -> bool {
        match self.balance.checked_sub(amount) {
            Some(rest) => {
                self.balance = rest;
                true
            }
            None => false,
        }
    }
}

/// Initial allocation shared by every node at construction.
///
/// Each node clones this into its own `AccountState`; nothing is shared
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub accounts: BTreeMap<Address, Account>,
}

impl Genesis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, address: Address, balance: u64) -> Self {
        self.accounts.insert(address, Account::with_balance(balance));
        self
    }

    pub fn total_supply(&self) -> u64 {
        self.accounts.values().map(|a| a.balance).sum()
    }
}

/// A node's private mapping from address to account record.
///
/// Records are created lazily on first reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountState {
    accounts: BTreeMap<Address, Account>,
}

impl AccountState {
    pub fn from_genesis(genesis: &Genesis) -> Self {
        Self {
            accounts: genesis.accounts.clone(),
        }
    }

    /// Read-only lookup; unknown addresses read as an empty account.
    pub fn get(&self, address: &Address) -> Account {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    pub fn get_mut(&mut self, address: Address) -> &mut Account {
        self.accounts.entry(address).or_default()
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.get(address).balance
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.get(address).nonce
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    pub fn total_supply(&self) -> u64 {
        self.accounts.values().map(|a| a.balance).sum()
    }

    /// Balances only, for convergence comparisons across nodes.
    pub fn balances(&self) -> BTreeMap<Address, u64> {
        self.accounts
            .iter()
            .filter(|(_, account)| account.balance > 0 || account.nonce > 0)
            .map(|(address, account)| (*address, account.balance))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::crypto::Identity;

    #[test]
    fn test_debit_refuses_overdraft() {
        let mut account = Account::with_balance(10);
        assert!(!account.debit(11));
        assert_eq!(account.balance, 10);
        assert!(account.debit(10));
        assert_eq!(account.balance, 0);
    }

    #[test]
    fn test_unknown_address_reads_empty() {
        let state = AccountState::default();
        let address = Identity::from_seed(1).address();
        assert_eq!(state.get(&address), Account::default());
    }

    #[test]
    fn test_get_mut_creates_record_lazily() {
        let mut state = AccountState::default();
        let address = Identity::from_seed(1).address();
        state.get_mut(address).credit(5);
        assert_eq!(state.balance(&address), 5);
        assert_eq!(state.nonce(&address), 0);
    }

    #[test]
    fn test_state_is_an_independent_copy_of_genesis() {
        let address = Identity::from_seed(1).address();
        let genesis = Genesis::new().with_account(address, 100);
        let mut a = AccountState::from_genesis(&genesis);
        let b = AccountState::from_genesis(&genesis);
        a.get_mut(address).debit(40);
        assert_eq!(a.balance(&address), 60);
        assert_eq!(b.balance(&address), 100);
        assert_eq!(genesis.total_supply(), 100);
    }
}
