//! Ledger snapshots, reproducibility hashing, and verification.

mod bundle;

pub use bundle::normalize_for_hash;
pub use bundle::{
    snapshot_hash, verify_snapshot_hash, LedgerSnapshot, SnapshotError, VerificationResult,
};
