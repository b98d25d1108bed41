//! Governance-tunable ledger settings: tier rates, credit weights, multiplier steps,
//! timeouts and retry policy.
//!
//! Load from: `--config <path>`, env `REFERRAL_LEDGER_CONFIG_PATH`,
//! `./config/referral_ledger.json`, or `./referral_ledger.json`; defaults otherwise.

use crate::account::Amount;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "REFERRAL_LEDGER_CONFIG_PATH";
const MAX_BPS: u32 = 10_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Commission rates for the two upstream tiers, in basis points of volume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierRates {
    pub tier1_bps: u32,
    pub tier2_bps: u32,
}

impl Default for TierRates {
    fn default() -> Self {
        Self {
            tier1_bps: 1_000,
            tier2_bps: 500,
        }
    }
}

impl TierRates {
    /// Rates ordered from the direct referrer upward.
    pub fn by_tier(&self) -> [u32; 2] {
        [self.tier1_bps, self.tier2_bps]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditWeights {
    /// Credits granted per direct referral.
    pub referral_weight: u64,
    /// Referred volume worth one credit, written as a decimal (`1.0`).
    #[serde(with = "crate::account::decimal")]
    pub volume_unit: Amount,
}

impl Default for CreditWeights {
    fn default() -> Self {
        Self {
            referral_weight: 100,
            volume_unit: Amount::from_micros(Amount::SCALE),
        }
    }
}

/// One breakpoint of the multiplier step function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplierStep {
    pub min_referrals: u64,
    pub multiplier_bps: u32,
    pub tier: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplierSchedule {
    pub base_tier: String,
    pub base_bps: u32,
    /// Ascending by `min_referrals`.
    pub steps: Vec<MultiplierStep>,
}

impl Default for MultiplierSchedule {
    fn default() -> Self {
        let step = |min_referrals, multiplier_bps, tier: &str| MultiplierStep {
            min_referrals,
            multiplier_bps,
            tier: tier.to_string(),
        };
        Self {
            base_tier: "Bronze".to_string(),
            base_bps: 10_000,
            steps: vec![
                step(5, 12_500, "Silver"),
                step(10, 15_000, "Gold"),
                step(25, 20_000, "Platinum"),
                step(50, 30_000, "Diamond"),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub tiers: TierRates,
    pub credits: CreditWeights,
    pub multipliers: MultiplierSchedule,
    /// Origin for shareable links: `<base>/terminal?ref=<code>`.
    pub referral_link_base: String,
    pub leaderboard_size: usize,
    /// Upper bound on waiting for per-account locks.
    pub lock_timeout_ms: u64,
    /// Upper bound on waiting for the database write lock.
    pub store_busy_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            tiers: TierRates::default(),
            credits: CreditWeights::default(),
            multipliers: MultiplierSchedule::default(),
            referral_link_base: "http://localhost:8080".to_string(),
            leaderboard_size: 10,
            lock_timeout_ms: 2_000,
            store_busy_timeout_ms: 2_000,
            max_retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl LedgerConfig {
    /// Load and validate config from `path`.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config: env REFERRAL_LEDGER_CONFIG_PATH, then ./config/referral_ledger.json,
    /// then ./referral_ledger.json. Falls back to defaults when none exists.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let p = Path::new(&path);
            if p.exists() {
                return Self::load_from_path(p);
            }
        }
        for candidate in [
            Path::new("./config/referral_ledger.json"),
            Path::new("./referral_ledger.json"),
        ] {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (tier, bps) in self.tiers.by_tier().into_iter().enumerate() {
            if bps > MAX_BPS {
                return Err(ConfigError::Invalid(format!(
                    "tier{} rate {} bps exceeds 100%",
                    tier + 1,
                    bps
                )));
            }
        }
        if self.credits.volume_unit.is_zero() {
            return Err(ConfigError::Invalid("credits.volume_unit must be > 0".into()));
        }
        if self.multipliers.base_bps < MAX_BPS {
            return Err(ConfigError::Invalid("multiplier base below 1.0x".into()));
        }
        let mut prev_min = 0;
        let mut prev_bps = self.multipliers.base_bps;
        for step in &self.multipliers.steps {
            if step.min_referrals <= prev_min || step.multiplier_bps < prev_bps {
                return Err(ConfigError::Invalid(format!(
                    "multiplier step '{}' out of order",
                    step.tier
                )));
            }
            prev_min = step.min_referrals;
            prev_bps = step.multiplier_bps;
        }
        if self.leaderboard_size == 0 {
            return Err(ConfigError::Invalid("leaderboard_size must be > 0".into()));
        }
        url::Url::parse(&self.referral_link_base)
            .map_err(|e| ConfigError::Invalid(format!("referral_link_base: {e}")))?;
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn store_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store_busy_timeout_ms)
    }
}
