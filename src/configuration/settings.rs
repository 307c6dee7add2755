use crate::configuration::constants::common::ENV_PREFIX;
use crate::error::ConfigError;
use config::{Config, Environment};
use serde_derive::{Deserialize, Serialize};

/// How the ReadyChecks of one Test are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyCheckMode {
    /// One after another, in declaration order.
    #[default]
    Sequential,
    /// All at once; the first failure in declaration order is reported.
    Concurrent,
}

/// Run policy that may be set outside the configuration file.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct Overrides {
    pub parallelization: Option<usize>,
    pub fail_fast: Option<bool>,
    pub ready_check_mode: Option<ReadyCheckMode>,
}

impl Overrides {
    /// Reads `TESTAMINT_PARALLELIZATION`, `TESTAMINT_FAIL_FAST` and
    /// `TESTAMINT_READY_CHECK_MODE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(Environment::with_prefix(ENV_PREFIX))
    }

    fn from_source(source: Environment) -> Result<Self, ConfigError> {
        let overrides = Config::builder()
            .add_source(source.try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(overrides)
    }

    /// Values set in `other` win.
    pub fn merge(self, other: Overrides) -> Overrides {
        Overrides {
            parallelization: other.parallelization.or(self.parallelization),
            fail_fast: other.fail_fast.or(self.fail_fast),
            ready_check_mode: other.ready_check_mode.or(self.ready_check_mode),
        }
    }
}
