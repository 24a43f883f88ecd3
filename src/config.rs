//! Process-wide configuration for the authorization core.
//!
//! Loaded from built-in defaults, an optional config file, and environment
//! overrides (prefixed `WARDEN_`), following the layered `config`-crate
//! pattern; `.env` files are picked up via `dotenvy` before the environment
//! layer is read, matching how the runtime config elsewhere in this lineage
//! resolves its SQLite database name.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level configuration for a [`crate::commands::dispatcher::Dispatcher`]
/// and the components it owns.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub dispatcher: DispatcherConfig,
    pub evaluator: EvaluatorConfig,
    pub persistence: PersistenceConfig,
    pub resilience: ResilienceConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            evaluator: EvaluatorConfig::default(),
            persistence: PersistenceConfig::default(),
            resilience: ResilienceConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Capacity of the bounded command queue (§4.C default 1000).
    pub queue_capacity: usize,
    /// How long `shutdown` waits for the consumer to drain before forcing
    /// termination.
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Decision cache TTL (§4.B default 5 minutes).
    pub cache_ttl: Duration,
    /// Default conflict resolution strategy when a command doesn't specify one.
    pub default_conflict_strategy: crate::evaluator::conflict::ConflictStrategy,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5 * 60),
            default_conflict_strategy: crate::evaluator::conflict::ConflictStrategy::DenyOverrides,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// `sqlite://path` or `postgres://...`; `None` uses the in-memory port.
    pub database_url: Option<String>,
    pub dead_letter: DeadLetterConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            dead_letter: DeadLetterConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub expiry: Duration,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5 * 60),
            expiry: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub database: OperationClassConfig,
    pub external: OperationClassConfig,
    pub network: OperationClassConfig,
    pub rpc: OperationClassConfig,
    pub filesystem: OperationClassConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            database: OperationClassConfig {
                failure_threshold: 5,
                recovery_window: Duration::from_secs(30),
                timeout: Duration::from_secs(30),
            },
            external: OperationClassConfig {
                failure_threshold: 4,
                recovery_window: Duration::from_secs(30),
                timeout: Duration::from_secs(10),
            },
            network: OperationClassConfig {
                failure_threshold: 5,
                recovery_window: Duration::from_secs(30),
                timeout: Duration::from_secs(10),
            },
            rpc: OperationClassConfig {
                failure_threshold: 5,
                recovery_window: Duration::from_secs(30),
                timeout: Duration::from_secs(10),
            },
            filesystem: OperationClassConfig {
                failure_threshold: 5,
                recovery_window: Duration::from_secs(30),
                timeout: Duration::from_secs(5),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationClassConfig {
    pub failure_threshold: u32,
    pub recovery_window: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[source] config::ConfigError),
}

impl WardenConfig {
    /// Load configuration layered as defaults < `path` (if given and present)
    /// < environment variables prefixed `WARDEN_` (double-underscore nesting,
    /// e.g. `WARDEN_DISPATCHER__QUEUE_CAPACITY`).
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if std::path::Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WARDEN")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder.build().map_err(ConfigError::Load)?;
        built.try_deserialize().map_err(ConfigError::Deserialize)
    }
}
