// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::errors::ValidationError;
use crate::models::{RetentionPolicy, TaskStatus};

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    #[serde(default)]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Pick a fresh random minute every time an existing schedule is re-asserted
    #[serde(default = "default_reassign_jitter")]
    pub reassign_jitter_on_update: bool,
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout_seconds: u64,
    #[serde(default)]
    pub policies: Vec<RetentionPolicyConfig>,
}

fn default_reassign_jitter() -> bool {
    true
}

fn default_registration_timeout() -> u64 {
    30
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            reassign_jitter_on_update: default_reassign_jitter(),
            registration_timeout_seconds: default_registration_timeout(),
            policies: Vec::new(),
        }
    }
}

impl RetentionConfig {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_seconds)
    }
}

/// One retention policy as written in configuration files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionPolicyConfig {
    #[serde(default)]
    pub queue_name: String,
    #[serde(default)]
    pub task_type: String,
    pub status: TaskStatus,
    pub age_minutes: u64,
}

impl RetentionPolicyConfig {
    /// Retention age; fails when `age_minutes` does not fit in seconds
    pub fn age(&self) -> Result<Duration, ValidationError> {
        self.age_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                invalid(
                    "retention.policies.age_minutes",
                    &format!("{} minutes overflows the retention age", self.age_minutes),
                )
            })
    }

    pub fn to_policy(&self) -> Result<RetentionPolicy, ValidationError> {
        Ok(RetentionPolicy::new(
            self.queue_name.clone(),
            self.task_type.clone(),
            self.status,
            self.age()?,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Retention policies to assert, in configuration order
    pub fn policies(&self) -> Result<Vec<RetentionPolicy>, ValidationError> {
        self.retention
            .policies
            .iter()
            .map(RetentionPolicyConfig::to_policy)
            .collect()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.database.url.is_empty() {
            return Err(ValidationError::MissingField("database.url".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(invalid(
                "database.max_connections",
                "must be greater than 0",
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(invalid(
                "database.min_connections",
                "must not exceed max_connections",
            ));
        }

        if self.retention.registration_timeout_seconds == 0 {
            return Err(invalid(
                "retention.registration_timeout_seconds",
                "must be greater than 0",
            ));
        }

        // Two entries with the same identity would overwrite each other's schedule.
        let mut seen = HashSet::new();
        for policy in self.policies()? {
            let identity = policy.identity();
            if !seen.insert(identity) {
                return Err(invalid(
                    "retention.policies",
                    &format!(
                        "duplicate policy for queue '{}', type '{}', status '{}'",
                        policy.queue_name, policy.task_type, policy.status
                    ),
                ));
            }
        }

        if self.observability.log_level.is_empty() {
            return Err(ValidationError::MissingField(
                "observability.log_level".to_string(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidFieldValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/queue".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
                run_migrations: false,
            },
            retention: RetentionConfig::default(),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: None,
                tracing_endpoint: None,
            },
        }
    }
}
