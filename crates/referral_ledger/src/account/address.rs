//! Canonical wallet address keys and the referral codes derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Hex digits in an EVM-style address body (without the `0x` prefix).
const ADDRESS_HEX_LEN: usize = 40;
/// Hex digits taken from the address body to form a referral code.
const CODE_LEN: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address format: {0}")]
    InvalidAddress(String),
    #[error("invalid referral code: {0}")]
    InvalidCode(String),
}

/// Normalized lookup key for an account: `0x` followed by 40 lowercase hex digits.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressKey(String);

impl AddressKey {
    /// Canonicalize any textual address. Accepts an optional `0x`/`0X` prefix and mixed case.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if body.len() != ADDRESS_HEX_LEN || hex::decode(body).is_err() {
            return Err(AddressError::InvalidAddress(raw.to_string()));
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upper-cased 8 hex characters immediately after the `0x` prefix.
    pub fn referral_code(&self) -> ReferralCode {
        ReferralCode(self.0[2..2 + CODE_LEN].to_ascii_uppercase())
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AddressKey {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AddressKey> for String {
    fn from(key: AddressKey) -> Self {
        key.0
    }
}

/// Shareable referral code, embedded in links as `?ref=<code>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferralCode(String);

impl ReferralCode {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let s = raw.trim();
        if s.len() != CODE_LEN || hex::decode(s).is_err() {
            return Err(AddressError::InvalidCode(raw.to_string()));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the referral code for a raw address.
pub fn generate_code(address: &str) -> Result<ReferralCode, AddressError> {
    Ok(AddressKey::parse(address)?.referral_code())
}
