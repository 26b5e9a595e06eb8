// mediahub-core - Orchestrator core of the MediaHub live-media engine
//
// The orchestrator owns the virtual-host configuration tree, reconciles
// desired snapshots against running state, coordinates the pluggable
// module kinds (providers, publishers, transcoders, the media router) and
// dispatches pull-stream requests by URL scheme. Media payloads never
// flow through here; this is a control-plane crate.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod module;
pub mod orchestrator;

pub use config::{Config, HostConfig, LoggingConfig, OrchestratorConfig, OriginConfig, PassConfig};
pub use error::{CreateResult, DeleteResult, Error, Result};
pub use models::{
    parse_vhost_app_name, resolve_application_name, AppId, ApplicationConfig, ApplicationInfo,
    StreamId, StreamInfo,
};
pub use module::{
    MediaRouter, Module, ModuleHandle, ModuleKind, ProviderType, PullProvider, StreamObserver,
};
pub use orchestrator::Orchestrator;
