//! Account registry
//!
//! Accounts, their live balances and rate-limit usage. The multi-account
//! aggregator pulls from here during refresh passes and admission.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use services_common::Account;

/// Live balance for one account
#[derive(Debug, Clone)]
pub struct AccountBalance {
    /// Total equity
    pub equity: Decimal,
    /// Equity available for new exposure
    pub available: Decimal,
    /// Last refresh timestamp
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Balance snapshot stamped now
    #[must_use]
    pub fn new(equity: Decimal, available: Decimal) -> Self {
        Self { equity, available, updated_at: Utc::now() }
    }
}

/// Registry of trading accounts
#[derive(Debug, Default)]
pub struct AccountManager {
    accounts: DashMap<String, Account>,
    balances: DashMap<String, AccountBalance>,
    rate_limit_used: DashMap<String, u32>,
}

impl AccountManager {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account
    pub fn upsert_account(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    /// Look an account up by id
    #[must_use]
    pub fn get_account(&self, id: &str) -> Option<Account> {
        self.accounts.get(id).map(|a| a.value().clone())
    }

    /// All accounts currently flagged active
    #[must_use]
    pub fn active_accounts(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .filter(|e| e.value().active)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Number of active accounts sharing a strategy tag
    #[must_use]
    pub fn accounts_in_strategy(&self, strategy: &str) -> u32 {
        self.accounts
            .iter()
            .filter(|e| e.value().active && e.value().strategy == strategy)
            .count() as u32
    }

    /// Flip an account's active flag
    pub fn set_active(&self, id: &str, active: bool) {
        if let Some(mut account) = self.accounts.get_mut(id) {
            account.active = active;
        }
    }

    /// Replace the live balance for an account
    pub fn update_balance(&self, id: &str, balance: AccountBalance) {
        self.balances.insert(id.to_string(), balance);
    }

    /// Live balance for an account
    #[must_use]
    pub fn get_balance(&self, id: &str) -> Option<AccountBalance> {
        self.balances.get(id).map(|b| b.value().clone())
    }

    /// Record rate-limit weight consumed in the current window
    pub fn set_rate_limit_used(&self, id: &str, used: u32) {
        self.rate_limit_used.insert(id.to_string(), used);
    }

    /// Rate-limit weight consumed in the current window
    #[must_use]
    pub fn rate_limit_used(&self, id: &str) -> u32 {
        self.rate_limit_used.get(id).map_or(0, |u| *u.value())
    }
}
