//! Read-only leaderboard projection over an account snapshot.

use crate::account::{AccountRecord, AddressKey};
use crate::compute::credit::credit_profile;
use crate::config::LedgerConfig;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    /// 1-based position.
    pub rank: usize,
    pub address: AddressKey,
    pub credit_score: u64,
    pub multiplier_bps: u32,
    pub tier: String,
    pub referral_count: u64,
}

/// Highest credit first; equal scores go to the account created earlier.
fn rank_order(a: &(u64, u64, usize), b: &(u64, u64, usize)) -> Ordering {
    b.0.cmp(&a.0).then(a.1.cmp(&b.1))
}

/// Top `n` accounts by credit score. Linear scan plus partial sort.
pub fn top_n(accounts: &[AccountRecord], n: usize, config: &LedgerConfig) -> Vec<Standing> {
    if n == 0 || accounts.is_empty() {
        return Vec::new();
    }
    let mut keyed: Vec<(u64, u64, usize)> = accounts
        .iter()
        .enumerate()
        .map(|(i, a)| (credit_profile(a, config).credit_score, a.seq, i))
        .collect();
    if n < keyed.len() {
        keyed.select_nth_unstable_by(n - 1, rank_order);
        keyed.truncate(n);
    }
    keyed.sort_by(rank_order);

    keyed
        .into_iter()
        .enumerate()
        .map(|(pos, (_, _, i))| {
            let account = &accounts[i];
            let profile = credit_profile(account, config);
            Standing {
                rank: pos + 1,
                address: account.address.clone(),
                credit_score: profile.credit_score,
                multiplier_bps: profile.multiplier_bps,
                tier: profile.tier,
                referral_count: account.referral_count,
            }
        })
        .collect()
}
