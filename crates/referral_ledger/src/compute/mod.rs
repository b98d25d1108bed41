//! Read-side derivations: credit score, multiplier, leaderboard.

mod credit;
mod leaderboard;

pub use credit::{credit_profile, credit_score, multiplier_for, wealth_velocity, CreditProfile};
pub use leaderboard::{top_n, Standing};
