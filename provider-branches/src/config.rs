use config::{Config, Environment, File};
use logger_redacted::LoggerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{BranchError, BranchResult};
use crate::models::MAX_BRANCH_BATCH;

/// Environment prefix, e.g. `PROVIDER_BRANCHES__MAX_BATCH_SIZE=20`
pub const ENV_PREFIX: &str = "PROVIDER_BRANCHES";

/// Runtime configuration for the branch status and transfer services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchServiceConfig {
    /// PostgreSQL URL; without one the in-memory store is used
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// May lower the batch cap, never raise it above 50
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Reload-and-retry attempts after a concurrent modification
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,

    #[serde(default)]
    pub logging: LoggerConfig,
}

fn default_max_connections() -> u32 {
    10
}

fn default_max_batch_size() -> usize {
    MAX_BRANCH_BATCH
}

fn default_commit_retries() -> u32 {
    3
}

impl Default for BranchServiceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
            max_batch_size: default_max_batch_size(),
            commit_retries: default_commit_retries(),
            logging: LoggerConfig::default(),
        }
    }
}

impl BranchServiceConfig {
    /// Load defaults, then the optional file, then the environment.
    ///
    /// A `.env` file is read first when present. `DATABASE_URL` is used when
    /// no prefixed database URL is configured.
    pub fn load(path: Option<&str>) -> BranchResult<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| BranchError::Configuration(e.to_string()))?;

        let mut config: Self = settings
            .try_deserialize()
            .map_err(|e| BranchError::Configuration(e.to_string()))?;

        if config.database_url.is_none() {
            config.database_url = std::env::var("DATABASE_URL").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BranchResult<()> {
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BRANCH_BATCH {
            return Err(BranchError::Configuration(format!(
                "max_batch_size must be between 1 and {}, got {}",
                MAX_BRANCH_BATCH, self.max_batch_size
            )));
        }
        if self.max_connections == 0 {
            return Err(BranchError::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
