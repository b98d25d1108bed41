//! Claims: move pending commission into earned exactly once, then reconcile payouts.

use crate::account::{AddressKey, Amount, ClaimRecord};
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::store::now_utc_seconds;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
#[error("payout failed: {0}")]
pub struct PayoutError(pub String);

/// External fund transfer, run after the ledger has committed a claim.
/// Returns a settlement reference (e.g. a transaction hash).
pub trait PayoutSink: Send + Sync {
    fn transfer(&self, claim: &ClaimRecord) -> Result<String, PayoutError>;
}

impl Ledger {
    /// Zero the pending balance of `address`, add it to `total_earned`, and append
    /// an audit record, all in one transaction. Fails with `NothingToClaim` when the
    /// balance is zero, including for a second claim racing the first.
    pub async fn claim(&self, address: &str) -> Result<ClaimRecord, LedgerError> {
        let key = AddressKey::parse(address)?;
        let _held = self.locks.acquire(std::slice::from_ref(&key)).await?;

        let written = self.store.transact(std::slice::from_ref(&key), &mut |batch| {
            let account = batch.account_mut(&key)?;
            let amount = account.pending_commission;
            if amount.is_zero() {
                return Err(LedgerError::NothingToClaim(key.clone()));
            }
            account.total_earned = account
                .total_earned
                .checked_add(amount)
                .map_err(|_| LedgerError::AmountOverflow(key.clone()))?;
            account.pending_commission = Amount::ZERO;
            batch.record_claim(key.clone(), amount);
            Ok(())
        })?;

        let claim = written.into_iter().next().ok_or_else(|| {
            LedgerError::StoreUnavailable(format!("claim for {key} committed without a record"))
        })?;
        info!(
            claim_id = claim.id,
            address = %claim.address,
            amount = %claim.amount,
            claimed_at = %claim.claimed_at,
            "commission claimed; payout pending"
        );
        Ok(claim)
    }

    /// Run the external transfer for a committed claim. On success the claim is
    /// marked settled; on failure it stays unsettled for operator reconciliation.
    pub fn pay_out(
        &self,
        claim: ClaimRecord,
        sink: &dyn PayoutSink,
    ) -> Result<ClaimRecord, LedgerError> {
        match sink.transfer(&claim) {
            Ok(reference) => self.settle_claim(claim.id, &reference),
            Err(e) => {
                warn!(
                    claim_id = claim.id,
                    address = %claim.address,
                    amount = %claim.amount,
                    error = %e,
                    "payout failed; claim left unsettled"
                );
                Ok(claim)
            }
        }
    }

    /// Record that claim `id` was paid out under `settlement_ref`. Balances are untouched.
    pub fn settle_claim(&self, id: u64, settlement_ref: &str) -> Result<ClaimRecord, LedgerError> {
        let settled = self
            .store
            .settle_claim(id, settlement_ref, now_utc_seconds())?;
        info!(claim_id = id, settlement_ref, "claim settled");
        Ok(settled)
    }
}
