use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Application ID, allocated from a process-wide monotonically increasing
/// counter. The starting value comes from `OrchestratorConfig::first_app_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub u32);

impl AppId {
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-application configuration, embedded in an origin rule.
///
/// `name` overrides the application name derived from the origin location.
/// `settings` is an opaque passthrough for the modules that create the
/// application (decoder profiles, output options, ...); the orchestrator
/// never interprets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: Option<String>,
    pub settings: Value,
}

/// Runtime identity of an application, handed to every module callback.
///
/// The canonical `vhost#app` name is the engine-wide identity and shows up
/// in logs, REST responses and inter-module messages.
#[derive(Debug, Clone)]
pub struct ApplicationInfo {
    id: AppId,
    vhost: String,
    app: String,
    name: String,
    config: ApplicationConfig,
    created_at: DateTime<Utc>,
}

impl ApplicationInfo {
    #[must_use]
    pub fn new(id: AppId, vhost: &str, app: &str, config: ApplicationConfig) -> Self {
        Self {
            id,
            vhost: vhost.to_string(),
            app: app.to_string(),
            name: super::stream::resolve_application_name(vhost, app),
            config,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> AppId {
        self.id
    }

    #[must_use]
    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Canonical `vhost#app` name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl std::fmt::Display for ApplicationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (id {})", self.name, self.id)
    }
}
