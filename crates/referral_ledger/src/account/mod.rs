//! Addresses, amounts, and the account/claim records kept by the ledger.

mod address;
mod amount;
mod record;

pub use address::{generate_code, AddressError, AddressKey, ReferralCode};
pub use amount::{decimal, Amount, AmountError, AmountInput};
pub use record::{AccountRecord, ClaimRecord};
