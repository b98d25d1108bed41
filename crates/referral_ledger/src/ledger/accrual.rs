//! Tiered commission accrual for volume events.

use crate::account::{AddressKey, Amount};
use crate::config::TierRates;
use crate::error::LedgerError;
use crate::ledger::{Ledger, CHAIN_ATTEMPTS};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Direct referrer and referrer-of-referrer.
pub const MAX_TIERS: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCredit {
    /// 1 = direct referrer, 2 = referrer of the referrer.
    pub tier: u8,
    pub beneficiary: AddressKey,
    pub commission: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accrual {
    pub subject: AddressKey,
    pub volume: Amount,
    pub credits: Vec<TierCredit>,
}

/// Commission owed to each ancestor in `upline` (nearest first) for `volume`.
pub fn tier_commissions(upline: &[AddressKey], volume: Amount, rates: &TierRates) -> Vec<TierCredit> {
    upline
        .iter()
        .zip(rates.by_tier())
        .enumerate()
        .map(|(i, (beneficiary, bps))| TierCredit {
            tier: i as u8 + 1,
            beneficiary: beneficiary.clone(),
            commission: volume.apply_bps(bps),
        })
        .collect()
}

impl Ledger {
    /// Credit tiered commissions for a volume event attributed to `address`.
    /// Both tiers are applied in one store transaction or not at all.
    pub async fn record_volume(&self, address: &str, volume: Amount) -> Result<Accrual, LedgerError> {
        let subject = AddressKey::parse(address)?;
        if volume.is_zero() {
            return Err(LedgerError::InvalidVolume(
                "volume must be greater than zero".into(),
            ));
        }

        for _ in 0..CHAIN_ATTEMPTS {
            let upline = self.upline(&subject, MAX_TIERS)?;
            let mut keys = Vec::with_capacity(upline.len() + 1);
            keys.push(subject.clone());
            keys.extend(upline.iter().cloned());

            let _held = self.locks.acquire(&keys).await?;
            // Links need the same locks, so the chain is stable from here on.
            if self.upline(&subject, MAX_TIERS)? != upline {
                debug!(address = %subject, "upline changed while locking; retrying");
                continue;
            }

            let credits = tier_commissions(&upline, volume, &self.config.tiers);
            self.store.transact(&keys, &mut |batch| {
                for credit in &credits {
                    let ancestor = batch.account_mut(&credit.beneficiary)?;
                    let overflow = || LedgerError::AmountOverflow(credit.beneficiary.clone());
                    ancestor.pending_commission = ancestor
                        .pending_commission
                        .checked_add(credit.commission)
                        .map_err(|_| overflow())?;
                    ancestor.total_volume_referred = ancestor
                        .total_volume_referred
                        .checked_add(volume)
                        .map_err(|_| overflow())?;
                }
                Ok(())
            })?;

            for credit in &credits {
                info!(
                    address = %subject,
                    tier = credit.tier,
                    beneficiary = %credit.beneficiary,
                    commission = %credit.commission,
                    "commission accrued"
                );
            }
            return Ok(Accrual {
                subject,
                volume,
                credits,
            });
        }
        Err(LedgerError::StoreUnavailable(format!(
            "upline of {subject} kept changing"
        )))
    }
}
