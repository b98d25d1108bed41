//! Injectable ledger configuration.

mod settings;

pub use settings::{
    ConfigError, CreditWeights, LedgerConfig, MultiplierSchedule, MultiplierStep, TierRates,
    CONFIG_PATH_ENV,
};
