//! Engine configuration
//!
//! Defaults overridden from `PROCFLOW_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log level used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub json_logs: bool,

    /// Upper bound of steps one `start`/`resume` call drives forward
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_steps_per_run() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            max_steps_per_run: default_max_steps_per_run(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn load() -> CoreResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(log_level) = lookup("PROCFLOW_LOG_LEVEL") {
            config.log_level = log_level;
        }

        if let Some(json_logs) = lookup("PROCFLOW_JSON_LOGS") {
            match json_logs.to_lowercase().as_str() {
                "true" | "1" => config.json_logs = true,
                "false" | "0" => config.json_logs = false,
                _ => warn!("Invalid PROCFLOW_JSON_LOGS value: {}", json_logs),
            }
        }

        if let Some(max_steps) = lookup("PROCFLOW_MAX_STEPS_PER_RUN") {
            if let Ok(max_steps) = max_steps.parse::<usize>() {
                config.max_steps_per_run = max_steps;
            } else {
                warn!("Invalid PROCFLOW_MAX_STEPS_PER_RUN value: {}", max_steps);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_steps_per_run == 0 {
            return Err(CoreError::ConfigurationError(
                "max_steps_per_run must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Install the global tracing subscriber; a second call is a no-op
    pub fn init_tracing(&self) {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        let installed = if self.json_logs {
            fmt().json().with_env_filter(filter).with_target(true).try_init()
        } else {
            fmt().with_env_filter(filter).with_target(true).try_init()
        };

        if installed.is_err() {
            tracing::debug!("Tracing subscriber already installed");
        }
    }
}
