use thiserror::Error;

use crate::models::AppId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no provider registered for scheme `{0}`")]
    SchemeUnsupported(String),

    #[error("unable to resolve `{0}` to a virtual host")]
    NameUnresolved(String),

    #[error("virtual host `{0}` not found")]
    VirtualHostNotFound(String),

    #[error("application `{0}` not found")]
    ApplicationNotFound(String),

    #[error("module `{module}` rejected application `{app}`; partial create rolled back")]
    ApplicationRejected { app: String, module: String },

    #[error("application `{app}` deleted, but {failures} module(s) failed to release it")]
    ApplicationDeleteFailed { app: String, failures: usize },

    #[error("module already registered")]
    ModuleAlreadyRegistered,

    #[error("module not found in registry")]
    ModuleNotFound,

    #[error("no upstream url matched for stream `{0}`")]
    NoRouteForStream(String),

    #[error("pull for `{stream}` failed: {reason}")]
    PullFailed { stream: String, reason: String },

    #[error("origin map applied with {0} failed application(s)")]
    ReconcileFailed(usize),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Outcome of a create request. `Exists` is an idempotency signal, not an
/// error: the application was already present and is untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateResult {
    Created(AppId),
    Exists(AppId),
}

impl CreateResult {
    #[must_use]
    pub const fn app_id(self) -> AppId {
        match self {
            Self::Created(id) | Self::Exists(id) => id,
        }
    }
}

/// Outcome of a delete request. `NotFound` mirrors `CreateResult::Exists`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    Deleted,
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
