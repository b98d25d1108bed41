//! The ledger service: write-once referral graph, tiered commission accrual,
//! exactly-once claims and claim settlement.
//!
//! Mutations take per-address locks (ascending key order, bounded wait) and then
//! apply their changes through a single `LedgerStore::transact` call, so a
//! multi-account update is either fully visible or not at all.

mod accrual;
mod claim;
mod graph;
mod locks;

pub use accrual::{tier_commissions, Accrual, TierCredit};
pub use claim::{PayoutError, PayoutSink};
pub use graph::LinkOutcome;

use crate::account::{AccountRecord, AddressKey};
use crate::compute::{credit_profile, top_n, CreditProfile, Standing};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::store::{ClaimFilter, LedgerStore, StoreSnapshot};
use crate::ClaimRecord;
use locks::LockTable;
use std::sync::Arc;
use tracing::debug;

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    config: LedgerConfig,
    locks: LockTable,
}

/// Re-reads of an upline allowed when a link lands between read and lock.
const CHAIN_ATTEMPTS: usize = 3;

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        let locks = LockTable::new(config.lock_timeout());
        Self {
            store,
            config,
            locks,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Ensure an account exists for `address`, creating a zeroed one on first reference.
    pub async fn register(&self, address: &str) -> Result<AccountRecord, LedgerError> {
        let key = AddressKey::parse(address)?;
        if let Some(existing) = self.store.load(&key)? {
            return Ok(existing);
        }
        let _held = self.locks.acquire(std::slice::from_ref(&key)).await?;
        self.store.transact(std::slice::from_ref(&key), &mut |_| Ok(()))?;
        let created = self
            .store
            .load(&key)?
            .ok_or_else(|| LedgerError::StoreUnavailable(format!("{key} vanished after insert")))?;
        debug!(address = %key, seq = created.seq, "account registered");
        Ok(created)
    }

    /// Current record, or `None` if the address was never referenced.
    pub fn account(&self, address: &str) -> Result<Option<AccountRecord>, LedgerError> {
        let key = AddressKey::parse(address)?;
        Ok(self.store.load(&key)?)
    }

    /// Credit profile for `address`; unknown addresses get the baseline profile.
    pub fn credit_profile(&self, address: &str) -> Result<CreditProfile, LedgerError> {
        let key = AddressKey::parse(address)?;
        let account = self
            .store
            .load(&key)?
            .unwrap_or_else(|| AccountRecord::new(key, 0));
        Ok(credit_profile(&account, &self.config))
    }

    /// The `n` accounts with the highest credit score.
    pub fn leaderboard(&self, n: usize) -> Result<Vec<Standing>, LedgerError> {
        let accounts = self.store.accounts()?;
        Ok(top_n(&accounts, n, &self.config))
    }

    pub fn accounts(&self) -> Result<Vec<AccountRecord>, LedgerError> {
        Ok(self.store.accounts()?)
    }

    pub fn claims(&self, filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, LedgerError> {
        Ok(self.store.claims(filter)?)
    }

    /// Accounts and claims from a single consistent read.
    pub fn state(&self) -> Result<StoreSnapshot, LedgerError> {
        Ok(self.store.snapshot()?)
    }
}
