//! Credit score and multiplier derived from current account fields. Never persisted.

use crate::account::AccountRecord;
use crate::config::{CreditWeights, LedgerConfig, MultiplierSchedule};
use serde::{Deserialize, Serialize};

const BPS_PER_X: f64 = 10_000.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreditProfile {
    pub credit_score: u64,
    pub multiplier_bps: u32,
    pub tier: String,
}

impl CreditProfile {
    pub fn multiplier(&self) -> f64 {
        self.multiplier_bps as f64 / BPS_PER_X
    }
}

/// `volume / volume_unit + referral_count * referral_weight`.
pub fn credit_score(account: &AccountRecord, weights: &CreditWeights) -> u64 {
    account
        .total_volume_referred
        .units_of(weights.volume_unit)
        .saturating_add(account.referral_count.saturating_mul(weights.referral_weight))
}

/// Highest step whose threshold `referrals` reaches, else the base tier.
pub fn multiplier_for(referrals: u64, schedule: &MultiplierSchedule) -> (u32, &str) {
    schedule
        .steps
        .iter()
        .rev()
        .find(|s| referrals >= s.min_referrals)
        .map(|s| (s.multiplier_bps, s.tier.as_str()))
        .unwrap_or((schedule.base_bps, schedule.base_tier.as_str()))
}

pub fn credit_profile(account: &AccountRecord, config: &LedgerConfig) -> CreditProfile {
    let (multiplier_bps, tier) = multiplier_for(account.referral_count, &config.multipliers);
    CreditProfile {
        credit_score: credit_score(account, &config.credits),
        multiplier_bps,
        tier: tier.to_string(),
    }
}

/// Share of referred volume that turned into commission (earned plus pending).
/// 0.0 when nothing has been referred yet.
pub fn wealth_velocity(account: &AccountRecord) -> f64 {
    if account.total_volume_referred.is_zero() {
        return 0.0;
    }
    let accrued = account.total_earned.micros() as f64 + account.pending_commission.micros() as f64;
    accrued / account.total_volume_referred.micros() as f64
}
