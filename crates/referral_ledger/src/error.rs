//! Ledger-level error kinds and their request-boundary classification.

use crate::account::{AddressError, AddressKey, AmountError};
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid address format: {0}")]
    InvalidAddressFormat(String),
    #[error("invalid referral code: {0}")]
    InvalidReferralCode(String),
    #[error("no account found for referral code {0}")]
    UnknownReferralCode(String),
    #[error("self-referral: {0} cannot refer itself")]
    SelfReferral(AddressKey),
    #[error("cyclic referral: {referrer} is already downstream of {address}")]
    CyclicReferral {
        address: AddressKey,
        referrer: AddressKey,
    },
    #[error("invalid volume: {0}")]
    InvalidVolume(String),
    #[error("nothing to claim for {0}")]
    NothingToClaim(AddressKey),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("amount overflow on {0}")]
    AmountOverflow(AddressKey),
    #[error("account {0} is not staged in this update")]
    Unstaged(AddressKey),
    #[error("unknown claim {0}")]
    UnknownClaim(u64),
    #[error("claim {0} is already settled")]
    ClaimAlreadySettled(u64),
}

impl LedgerError {
    /// Stable machine-readable name for API payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidAddressFormat(_) => "InvalidAddressFormat",
            LedgerError::InvalidReferralCode(_) => "InvalidReferralCode",
            LedgerError::UnknownReferralCode(_) => "UnknownReferralCode",
            LedgerError::SelfReferral(_) => "SelfReferral",
            LedgerError::CyclicReferral { .. } => "CyclicReferral",
            LedgerError::InvalidVolume(_) => "InvalidVolume",
            LedgerError::NothingToClaim(_) => "NothingToClaim",
            LedgerError::StoreUnavailable(_) => "StoreUnavailable",
            LedgerError::AmountOverflow(_) => "AmountOverflow",
            LedgerError::Unstaged(_) => "Internal",
            LedgerError::UnknownClaim(_) => "UnknownClaim",
            LedgerError::ClaimAlreadySettled(_) => "ClaimAlreadySettled",
        }
    }

    /// HTTP status the request boundary reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::InvalidAddressFormat(_)
            | LedgerError::InvalidReferralCode(_)
            | LedgerError::SelfReferral(_)
            | LedgerError::CyclicReferral { .. }
            | LedgerError::InvalidVolume(_)
            | LedgerError::NothingToClaim(_) => 400,
            LedgerError::UnknownReferralCode(_) | LedgerError::UnknownClaim(_) => 404,
            LedgerError::ClaimAlreadySettled(_) => 409,
            LedgerError::AmountOverflow(_) => 422,
            LedgerError::StoreUnavailable(_) => 503,
            LedgerError::Unstaged(_) => 500,
        }
    }

    /// Only persistence failures are worth retrying; validation errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        LedgerError::StoreUnavailable(e.to_string())
    }
}

impl From<AddressError> for LedgerError {
    fn from(e: AddressError) -> Self {
        match e {
            AddressError::InvalidAddress(s) => LedgerError::InvalidAddressFormat(s),
            AddressError::InvalidCode(s) => LedgerError::InvalidReferralCode(s),
        }
    }
}

/// Volume inputs that fail to parse are reported as `InvalidVolume`.
pub fn invalid_volume(e: AmountError) -> LedgerError {
    LedgerError::InvalidVolume(e.to_string())
}
