use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub orchestrator: OrchestratorConfig,
    /// Desired-state snapshot of the virtual host tree. The same shape is
    /// accepted by `Orchestrator::apply_origin_map` at runtime.
    pub virtual_hosts: Vec<HostConfig>,
}

impl Config {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// Environment variables use the `MEDIAHUB` prefix with `__` as the
    /// section separator, e.g. `MEDIAHUB__LOGGING__LEVEL=debug`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(Environment::with_prefix("MEDIAHUB").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Output format: "json" (production) or "pretty" (development)
    pub format: String,
    /// Optional log file path (appended)
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// First application id handed out by the allocator. Ids are unique
    /// and strictly increasing for the lifetime of the process.
    pub first_app_id: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { first_app_id: 1 }
    }
}

/// One virtual host: a named configuration root grouping domain patterns
/// and origin pull rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub name: String,
    /// Glob-style hostname patterns (`*` and `?` wildcards), in matching
    /// priority order.
    pub domains: Vec<String>,
    /// Origin pull rules, in declaration order.
    pub origins: Vec<OriginConfig>,
}

/// An origin rule binding a URL-path `location` to a list of upstream
/// media URLs sharing a scheme.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Path prefix, e.g. `/live`. The first segment doubles as the
    /// application name unless the embedded config overrides it.
    pub location: String,
    pub pass: PassConfig,
    /// Application config created for this rule.
    pub application: crate::models::ApplicationConfig,
}

impl OriginConfig {
    /// Application name for this rule: the explicit override, or the first
    /// path segment of `location`.
    #[must_use]
    pub fn app_name(&self) -> &str {
        if let Some(name) = &self.application.name {
            return name;
        }
        self.location
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    /// URL scheme shared by scheme-less entries of `urls` (e.g. `rtmp`).
    pub scheme: String,
    /// Ordered upstream URLs, stored raw; the scheme is prepended at
    /// dispatch time for entries that do not carry one.
    pub urls: Vec<String>,
}
