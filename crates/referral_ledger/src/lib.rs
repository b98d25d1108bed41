//! referral_ledger: multi-tier referral and credit ledger.
//!
//! Write-once referral links, two-tier commission accrual on referred volume,
//! exactly-once commission claims with an audit trail, and credit/leaderboard
//! projections over a pluggable store (SQLite or in-memory).

pub mod account;
pub mod api;
pub mod compute;
pub mod config;
pub mod error;
pub mod ledger;
pub mod report;
pub mod snapshot;
pub mod store;

pub use account::{generate_code, AccountRecord, AddressKey, Amount, ClaimRecord, ReferralCode};
pub use api::ReferralApi;
pub use compute::{CreditProfile, Standing};
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use ledger::{Accrual, Ledger, LinkOutcome, PayoutError, PayoutSink};
pub use report::{LedgerTotals, ReportData};
pub use snapshot::{snapshot_hash, LedgerSnapshot, VerificationResult};
pub use store::{ClaimFilter, LedgerStore, MemoryStore, SqliteStore, StoreError, StoreSnapshot};
