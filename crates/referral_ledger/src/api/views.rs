//! Request and response payloads. Field names and string formats are consumed by
//! existing front ends and must stay stable.

use crate::account::{AccountRecord, AmountInput};
use crate::compute::{wealth_velocity, CreditProfile, Standing};
use crate::error::LedgerError;
use crate::ledger::{Accrual, LinkOutcome};
use serde::{Deserialize, Serialize};

const VOLUME_PLACES: u32 = 2;
const COMMISSION_PLACES: u32 = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralView {
    pub code: String,
    pub link: String,
    pub tier: String,
    pub referrals: u64,
    pub total_volume: String,
    pub pending_commissions: String,
    pub total_earned: String,
    pub wealth_velocity: String,
}

impl ReferralView {
    pub fn new(account: &AccountRecord, profile: &CreditProfile, link: String) -> Self {
        Self {
            code: account.address.referral_code().to_string(),
            link,
            tier: profile.tier.clone(),
            referrals: account.referral_count,
            total_volume: account.total_volume_referred.format_fixed(VOLUME_PLACES),
            pending_commissions: account.pending_commission.format_fixed(COMMISSION_PLACES),
            total_earned: account.total_earned.format_fixed(COMMISSION_PLACES),
            wealth_velocity: format!("{:.2}%", wealth_velocity(account) * 100.0),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkRequest {
    pub address: String,
    pub code: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    pub success: bool,
    pub referrer: String,
    pub already_linked: bool,
}

impl From<LinkOutcome> for LinkResponse {
    fn from(outcome: LinkOutcome) -> Self {
        Self {
            success: true,
            already_linked: !outcome.is_new(),
            referrer: outcome.referrer().to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub amount: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub address: String,
    pub credits: u64,
    pub multiplier: f64,
    pub referrals: u64,
}

impl From<Standing> for LeaderboardRow {
    fn from(s: Standing) -> Self {
        Self {
            address: s.address.to_string(),
            credits: s.credit_score,
            multiplier: s.multiplier_bps as f64 / 10_000.0,
            referrals: s.referral_count,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreditsView {
    pub address: String,
    pub credits: u64,
    pub multiplier: f64,
    pub tier: String,
    pub referrals: u64,
}

/// Volume as sent by producers: a decimal string or a JSON number.
pub type VolumeInput = AmountInput;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub address: String,
    pub volume: VolumeInput,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccruedRow {
    pub tier: u8,
    pub beneficiary: String,
    pub commission: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeResponse {
    pub success: bool,
    pub accrued: Vec<AccruedRow>,
}

impl From<Accrual> for VolumeResponse {
    fn from(accrual: Accrual) -> Self {
        Self {
            success: true,
            accrued: accrual
                .credits
                .into_iter()
                .map(|c| AccruedRow {
                    tier: c.tier,
                    beneficiary: c.beneficiary.to_string(),
                    commission: c.commission.format_fixed(COMMISSION_PLACES),
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub kind: String,
}

/// Error as reported to an HTTP caller.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiError {
    pub status: u16,
    pub body: ErrorBody,
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        Self {
            status: e.status_code(),
            body: ErrorBody {
                success: false,
                error: e.to_string(),
                kind: e.kind().to_string(),
            },
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            body: ErrorBody {
                success: false,
                error: message.into(),
                kind: "BadRequest".to_string(),
            },
        }
    }
}
