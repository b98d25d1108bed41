//! In-process store. Not durable; used for tests and throwaway servers.

use crate::account::{AccountRecord, AddressKey, ClaimRecord, ReferralCode};
use crate::error::LedgerError;
use crate::store::{
    now_utc_seconds, ApplyFn, Batch, ClaimFilter, LedgerStore, StoreError, StoreSnapshot,
};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;

#[derive(Default)]
struct MemoryState {
    accounts: BTreeMap<AddressKey, AccountRecord>,
    claims: Vec<ClaimRecord>,
    next_seq: u64,
}

/// Whole ledger behind one `RwLock`; a batch is applied under the write guard.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self, address: &AddressKey) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.read()?.accounts.get(address).cloned())
    }

    fn find_by_code(&self, code: &ReferralCode) -> Result<Vec<AccountRecord>, StoreError> {
        let state = self.read()?;
        let mut found: Vec<AccountRecord> = state
            .accounts
            .values()
            .filter(|a| &a.address.referral_code() == code)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.seq);
        Ok(found)
    }

    fn accounts(&self) -> Result<Vec<AccountRecord>, StoreError> {
        Ok(sorted_accounts(&*self.read()?))
    }

    fn transact(
        &self,
        keys: &[AddressKey],
        apply: &mut ApplyFn<'_>,
    ) -> Result<Vec<ClaimRecord>, LedgerError> {
        let mut state = self.write()?;
        let now = now_utc_seconds();
        let mut batch = Batch::new(now);
        for key in keys {
            let record = state
                .accounts
                .get(key)
                .cloned()
                .unwrap_or_else(|| AccountRecord::new(key.clone(), now.unix_timestamp()));
            batch.stage(record);
        }
        apply(&mut batch)?;

        let (accounts, new_claims) = batch.into_parts();
        for mut record in accounts {
            if !record.is_persisted() {
                state.next_seq += 1;
                record.seq = state.next_seq;
            }
            state.accounts.insert(record.address.clone(), record);
        }
        let mut written = Vec::with_capacity(new_claims.len());
        for claim in new_claims {
            let record = ClaimRecord {
                id: state.claims.len() as u64 + 1,
                address: claim.address,
                amount: claim.amount,
                claimed_at: now,
                settled_at: None,
                settlement_ref: None,
            };
            state.claims.push(record.clone());
            written.push(record);
        }
        Ok(written)
    }

    fn claims(&self, filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, StoreError> {
        Ok(self
            .read()?
            .claims
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let state = self.read()?;
        Ok(StoreSnapshot {
            accounts: sorted_accounts(&state),
            claims: state.claims.clone(),
        })
    }

    fn settle_claim(
        &self,
        id: u64,
        settlement_ref: &str,
        at: OffsetDateTime,
    ) -> Result<ClaimRecord, LedgerError> {
        let mut state = self.write()?;
        let claim = state
            .claims
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(LedgerError::UnknownClaim(id))?;
        if claim.is_settled() {
            return Err(LedgerError::ClaimAlreadySettled(id));
        }
        claim.settled_at = Some(at);
        claim.settlement_ref = Some(settlement_ref.to_string());
        Ok(claim.clone())
    }
}

fn sorted_accounts(state: &MemoryState) -> Vec<AccountRecord> {
    let mut all: Vec<AccountRecord> = state.accounts.values().cloned().collect();
    all.sort_by_key(|a| a.seq);
    all
}
