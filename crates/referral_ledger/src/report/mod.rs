//! Report data structure (HTML is generated in the referral_ledger_report crate).

use crate::account::{Amount, AmountError, ClaimRecord};
use crate::api::LeaderboardRow;
use crate::compute::top_n;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::snapshot::{snapshot_hash, LedgerSnapshot};
use crate::store::ClaimFilter;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub accounts: u64,
    pub linked_accounts: u64,
    pub total_volume_referred: Amount,
    pub pending_commission: Amount,
    pub total_earned: Amount,
}

/// Data passed to the HTML report generator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportData {
    pub generated_utc_rfc3339: String,
    pub totals: LedgerTotals,
    pub leaderboard: Vec<LeaderboardRow>,
    pub unsettled_claims: Vec<ClaimRecord>,
    pub snapshot_hash_sha256: String,
}

impl ReportData {
    /// Totals, leaderboard and claims all come from one snapshot.
    pub fn build(ledger: &Ledger) -> Result<Self, LedgerError> {
        let snapshot = LedgerSnapshot::capture(ledger)?;
        let snapshot_hash_sha256 = snapshot_hash(&snapshot)
            .map_err(|e| LedgerError::StoreUnavailable(format!("snapshot hash: {e}")))?;

        let mut totals = LedgerTotals::default();
        for account in &snapshot.accounts {
            totals.accounts += 1;
            if account.referrer.is_some() {
                totals.linked_accounts += 1;
            }
            let overflow = |_: AmountError| LedgerError::AmountOverflow(account.address.clone());
            totals.total_volume_referred = totals
                .total_volume_referred
                .checked_add(account.total_volume_referred)
                .map_err(overflow)?;
            totals.pending_commission = totals
                .pending_commission
                .checked_add(account.pending_commission)
                .map_err(overflow)?;
            totals.total_earned = totals
                .total_earned
                .checked_add(account.total_earned)
                .map_err(overflow)?;
        }

        let leaderboard = top_n(
            &snapshot.accounts,
            ledger.config().leaderboard_size,
            ledger.config(),
        )
        .into_iter()
        .map(LeaderboardRow::from)
        .collect();
        let filter = ClaimFilter {
            unsettled_only: true,
            ..Default::default()
        };
        let unsettled_claims = snapshot
            .claims
            .into_iter()
            .filter(|c| filter.matches(c))
            .collect();

        Ok(Self {
            generated_utc_rfc3339: snapshot.created_utc_rfc3339,
            totals,
            leaderboard,
            unsettled_claims,
            snapshot_hash_sha256,
        })
    }
}
