//! Point-in-time ledger export and its SHA-256 reproducibility hash.

use crate::account::{AccountRecord, ClaimRecord};
use crate::error::LedgerError;
use crate::ledger::Ledger;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Every account and claim at one instant, in creation order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub created_utc_rfc3339: String,
    pub accounts: Vec<AccountRecord>,
    pub claims: Vec<ClaimRecord>,
}

const SNAPSHOT_VERSION: u32 = 1;

impl LedgerSnapshot {
    pub fn new(accounts: Vec<AccountRecord>, claims: Vec<ClaimRecord>) -> Self {
        let created_utc_rfc3339 = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        Self {
            version: SNAPSHOT_VERSION,
            created_utc_rfc3339,
            accounts,
            claims,
        }
    }

    pub fn capture(ledger: &Ledger) -> Result<Self, LedgerError> {
        let state = ledger.state()?;
        Ok(Self::new(state.accounts, state.claims))
    }

    pub fn load(path: &std::path::Path) -> Result<Self, SnapshotError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Normalize JSON for hashing: sorted keys, no whitespace.
pub fn normalize_for_hash(value: &serde_json::Value) -> Result<String, SnapshotError> {
    let sorted = sort_json_keys(value);
    Ok(serde_json::to_string(&sorted)?)
}

fn sort_json_keys(v: &serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(m) => {
            let out: std::collections::BTreeMap<String, serde_json::Value> = m
                .iter()
                .map(|(k, v)| (k.clone(), sort_json_keys(v)))
                .collect();
            serde_json::Value::Object(serde_json::Map::from_iter(out))
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_json_keys).collect())
        }
        other => other.clone(),
    }
}

pub fn snapshot_hash(snapshot: &LedgerSnapshot) -> Result<String, SnapshotError> {
    let json = serde_json::to_value(snapshot)?;
    let normalized = normalize_for_hash(&json)?;
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationResult {
    pub snapshot_hash: String,
    pub expected_hash: Option<String>,
    pub matches: bool,
}

/// Compare a snapshot against the content of its `.sha256` file.
pub fn verify_snapshot_hash(
    snapshot: &LedgerSnapshot,
    expected_hex: Option<&str>,
) -> Result<VerificationResult, SnapshotError> {
    let snapshot_hash = snapshot_hash(snapshot)?;
    let expected = expected_hex.map(|e| e.trim().to_lowercase());
    let matches = expected.as_deref() == Some(snapshot_hash.as_str());
    Ok(VerificationResult {
        snapshot_hash,
        expected_hash: expected,
        matches,
    })
}
