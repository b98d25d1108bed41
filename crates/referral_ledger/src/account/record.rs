//! Persisted ledger records.

use crate::account::{AddressKey, Amount};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One account per normalized address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub address: AddressKey,
    /// Write-once back-reference to the upstream partner.
    pub referrer: Option<AddressKey>,
    pub referral_count: u64,
    pub total_volume_referred: Amount,
    pub pending_commission: Amount,
    pub total_earned: Amount,
    /// Creation order, assigned by the store on first write (0 = not yet persisted).
    pub seq: u64,
    pub created_utc: i64,
}

impl AccountRecord {
    /// Fresh zeroed account with no referrer.
    pub fn new(address: AddressKey, created_utc: i64) -> Self {
        Self {
            address,
            referrer: None,
            referral_count: 0,
            total_volume_referred: Amount::ZERO,
            pending_commission: Amount::ZERO,
            total_earned: Amount::ZERO,
            seq: 0,
            created_utc,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.seq != 0
    }
}

/// Audit entry written in the same transaction that zeroes a pending balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRecord {
    pub id: u64,
    pub address: AddressKey,
    pub amount: Amount,
    #[serde(with = "time::serde::rfc3339")]
    pub claimed_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub settled_at: Option<OffsetDateTime>,
    /// External transfer reference (tx hash or operator note) once paid out.
    #[serde(default)]
    pub settlement_ref: Option<String>,
}

impl ClaimRecord {
    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }
}
