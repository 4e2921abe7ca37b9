//! Worker configuration.
//!
//! Loaded from YAML files and environment variables. The flat variables the
//! worker has always accepted (`KAFKA_BROKERS`, `MONGO_URI`, ...) take the
//! highest precedence so existing deployments keep working.

mod messaging;
mod storage;

pub use messaging::KafkaConfig;
pub use storage::{redact_credentials, MongodbConfig};

use std::time::Duration;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "TRANSFORM_WORKER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "TRANSFORM_WORKER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "TRANSFORM_WORKER_LOG";
/// Fallback environment variable for the log level.
pub const LOG_LEVEL_ENV_VAR: &str = "LOG_LEVEL";
/// Environment variable selecting the log format (`json` for production).
pub const LOG_FORMAT_ENV_VAR: &str = "LOG_FORMAT";

/// Comma-separated Kafka brokers.
pub const KAFKA_BROKERS_ENV_VAR: &str = "KAFKA_BROKERS";
/// Kafka client identifier.
pub const KAFKA_CLIENT_ID_ENV_VAR: &str = "KAFKA_CLIENT_ID";
/// Kafka consumer group.
pub const KAFKA_GROUP_ID_ENV_VAR: &str = "KAFKA_GROUP_ID";
/// Workspace scope for transform definitions.
pub const WORKSPACE_ID_ENV_VAR: &str = "WORKSPACE_ID";
/// Global dead-letter topic.
pub const DLQ_TOPIC_ENV_VAR: &str = "DLQ_TOPIC";
/// MongoDB connection URI.
pub const MONGO_URI_ENV_VAR: &str = "MONGO_URI";
/// MongoDB database name.
pub const MONGO_DB_ENV_VAR: &str = "MONGO_DB";
/// Registry refresh interval in milliseconds.
pub const REFRESH_INTERVAL_ENV_VAR: &str = "REFRESH_INTERVAL_MS";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Worker behaviour settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Only load transforms belonging to this workspace.
    pub workspace_id: Option<String>,
    /// Dead-letter topic for every source topic. Unset means `{source}.dlq`.
    pub dlq_topic: Option<String>,
    /// How often the registry is reloaded, in milliseconds.
    pub refresh_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workspace_id: None,
            dlq_topic: None,
            refresh_interval_ms: 60_000,
        }
    }
}

impl WorkerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kafka configuration.
    pub kafka: KafkaConfig,
    /// MongoDB configuration.
    pub mongodb: MongodbConfig,
    /// Worker configuration.
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. Flat variables (`KAFKA_BROKERS`, `MONGO_URI`, ...)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Some(config_path) = env_value(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("kafka.brokers")
                .try_parsing(true),
        );

        let brokers = env_value(KAFKA_BROKERS_ENV_VAR)
            .map(|list| list.split(',').map(str::to_string).collect::<Vec<_>>());

        let config = builder
            .set_override_option("kafka.brokers", brokers)?
            .set_override_option("kafka.client_id", env_value(KAFKA_CLIENT_ID_ENV_VAR))?
            .set_override_option("kafka.group_id", env_value(KAFKA_GROUP_ID_ENV_VAR))?
            .set_override_option("worker.workspace_id", env_value(WORKSPACE_ID_ENV_VAR))?
            .set_override_option("worker.dlq_topic", env_value(DLQ_TOPIC_ENV_VAR))?
            .set_override_option(
                "worker.refresh_interval_ms",
                env_value(REFRESH_INTERVAL_ENV_VAR),
            )?
            .set_override_option("mongodb.uri", env_value(MONGO_URI_ENV_VAR))?
            .set_override_option("mongodb.database", env_value(MONGO_DB_ENV_VAR))?
            .build()?;

        let mut config: Config = config.try_deserialize()?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Trim values and treat blank optionals as unset.
    pub fn normalize(&mut self) {
        self.kafka.normalize();
        self.mongodb.normalize();
        blank_to_none(&mut self.worker.workspace_id);
        blank_to_none(&mut self.worker.dlq_topic);
    }

    /// Reject configurations the worker cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::Invalid("kafka.brokers is required".to_string()));
        }
        if self.kafka.client_id.is_empty() {
            return Err(ConfigError::Invalid("kafka.client_id is required".to_string()));
        }
        if self.kafka.group_id.is_empty() {
            return Err(ConfigError::Invalid("kafka.group_id is required".to_string()));
        }
        if self.mongodb.uri.is_empty() {
            return Err(ConfigError::Invalid("mongodb.uri is required".to_string()));
        }
        if self.mongodb.database.is_empty() {
            return Err(ConfigError::Invalid("mongodb.database is required".to_string()));
        }
        if self.worker.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "worker.refresh_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Non-blank environment variable value.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn blank_to_none(value: &mut Option<String>) {
    if let Some(v) = value.take() {
        let trimmed = v.trim();
        if !trimmed.is_empty() {
            *value = Some(trimmed.to_string());
        }
    }
}
