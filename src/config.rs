//! Layered runtime configuration.
//!
//! Sources, lowest precedence first: built-in defaults, `config/default.toml`,
//! `config/local.toml`, then `SMARTWILL__SECTION__KEY` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::api::DEFAULT_OVERRIDE_ATTEMPTS_PER_MINUTE;
use crate::credential::DEFAULT_ITERATIONS;
use crate::engine::EngineConfig;
use crate::executor::RetryPolicy;
use crate::telemetry::LogConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub max_cas_attempts: u32,
    pub pbkdf2_iterations: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_cas_attempts: 5,
            pbkdf2_iterations: DEFAULT_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub page_size: usize,
    pub retry_initial_secs: u64,
    pub retry_max_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            interval_secs: 60,
            page_size: 100,
            retry_initial_secs: retry.initial_delay_secs,
            retry_max_secs: retry.max_delay_secs,
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Events are only logged when unset.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistributionConfig {
    pub executor_url: String,
    #[serde(default = "default_distribution_timeout")]
    pub timeout_secs: u64,
}

fn default_distribution_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub override_attempts_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            override_attempts_per_minute: DEFAULT_OVERRIDE_ATTEMPTS_PER_MINUTE,
        }
    }
}

impl AppConfig {
    /// Load `.env`, the optional config files and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_sources(
            Config::builder()
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false)),
        )
    }

    fn from_sources(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        builder
            .add_source(
                Environment::with_prefix("SMARTWILL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_cas_attempts: self.engine.max_cas_attempts.max(1),
            pbkdf2_iterations: self.engine.pbkdf2_iterations,
            retry: RetryPolicy {
                initial_delay_secs: self.sweep.retry_initial_secs,
                max_delay_secs: self.sweep.retry_max_secs,
            },
        }
    }
}
