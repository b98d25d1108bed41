//! Persistence abstraction for the ledger: per-key reads plus atomic multi-key updates.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::account::{AccountRecord, AddressKey, Amount, ClaimRecord, ReferralCode};
use crate::error::LedgerError;
use std::collections::BTreeMap;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock poisoned: {0}")]
    Poisoned(String),
    #[error("store busy: {0}")]
    Busy(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Closure applied to staged accounts inside a store transaction.
pub type ApplyFn<'a> = dyn FnMut(&mut Batch) -> Result<(), LedgerError> + 'a;

/// Narrow storage interface. Implementations must make `transact` atomic across
/// every key it names and must never expose a partially applied batch to readers.
pub trait LedgerStore: Send + Sync {
    fn load(&self, address: &AddressKey) -> Result<Option<AccountRecord>, StoreError>;

    /// Accounts whose address starts with `code`, oldest first.
    fn find_by_code(&self, code: &ReferralCode) -> Result<Vec<AccountRecord>, StoreError>;

    /// Consistent snapshot of every account in creation order.
    fn accounts(&self) -> Result<Vec<AccountRecord>, StoreError>;

    /// Stage `keys` (missing ones as fresh zeroed accounts), run `apply`, then persist
    /// all staged accounts and claims together. Any error from `apply` discards the batch.
    fn transact(
        &self,
        keys: &[AddressKey],
        apply: &mut ApplyFn<'_>,
    ) -> Result<Vec<ClaimRecord>, LedgerError>;

    fn claims(&self, filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, StoreError>;

    /// Every account and claim from one read, so no batch is ever half visible.
    fn snapshot(&self) -> Result<StoreSnapshot, StoreError>;

    /// Mark a claim as paid out. Balances are untouched.
    fn settle_claim(
        &self,
        id: u64,
        settlement_ref: &str,
        at: OffsetDateTime,
    ) -> Result<ClaimRecord, LedgerError>;
}

/// Accounts in creation order and claims in id order, read together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreSnapshot {
    pub accounts: Vec<AccountRecord>,
    pub claims: Vec<ClaimRecord>,
}

#[derive(Clone, Debug, Default)]
pub struct ClaimFilter {
    pub address: Option<AddressKey>,
    pub unsettled_only: bool,
}

impl ClaimFilter {
    pub fn matches(&self, claim: &ClaimRecord) -> bool {
        if self.unsettled_only && claim.is_settled() {
            return false;
        }
        self.address.as_ref().is_none_or(|a| a == &claim.address)
    }
}

/// Claim to be appended alongside the account writes of a batch.
#[derive(Clone, Debug)]
pub struct NewClaim {
    pub address: AddressKey,
    pub amount: Amount,
}

/// Accounts staged for one atomic update.
pub struct Batch {
    accounts: BTreeMap<AddressKey, AccountRecord>,
    claims: Vec<NewClaim>,
    now: OffsetDateTime,
}

impl Batch {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            accounts: BTreeMap::new(),
            claims: Vec::new(),
            now,
        }
    }

    pub fn stage(&mut self, record: AccountRecord) {
        self.accounts.insert(record.address.clone(), record);
    }

    pub fn now(&self) -> OffsetDateTime {
        self.now
    }

    pub fn account(&self, address: &AddressKey) -> Result<&AccountRecord, LedgerError> {
        self.accounts
            .get(address)
            .ok_or_else(|| LedgerError::Unstaged(address.clone()))
    }

    pub fn account_mut(&mut self, address: &AddressKey) -> Result<&mut AccountRecord, LedgerError> {
        self.accounts
            .get_mut(address)
            .ok_or_else(|| LedgerError::Unstaged(address.clone()))
    }

    pub fn record_claim(&mut self, address: AddressKey, amount: Amount) {
        self.claims.push(NewClaim { address, amount });
    }

    pub fn into_parts(self) -> (Vec<AccountRecord>, Vec<NewClaim>) {
        (self.accounts.into_values().collect(), self.claims)
    }
}

/// Current time truncated to whole seconds, the resolution both stores persist.
pub(crate) fn now_utc_seconds() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}
