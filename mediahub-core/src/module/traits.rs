// Module interfaces consumed by the orchestrator.
//
// Modules are foreign components with their own I/O threads; their
// callbacks return plain `bool` and may re-enter the orchestrator's
// name-resolution API on the calling thread.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::{AppId, ApplicationInfo, StreamInfo};

/// The four module kinds the orchestrator coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Unknown,
    Provider,
    MediaRouter,
    Transcoder,
    Publisher,
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Provider => "provider",
            Self::MediaRouter => "media_router",
            Self::Transcoder => "transcoder",
            Self::Publisher => "publisher",
        };
        f.write_str(name)
    }
}

/// Ingress kinds a provider can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Rtmp,
    RtspPull,
    Ovt,
    MpegTs,
    File,
    Scheduled,
}

impl ProviderType {
    /// Map a (lower-cased) URL scheme to the provider type that handles it.
    #[must_use]
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "rtmp" => Some(Self::Rtmp),
            "rtsp" => Some(Self::RtspPull),
            "ovt" => Some(Self::Ovt),
            "udp" | "mpegts" => Some(Self::MpegTs),
            "file" => Some(Self::File),
            "sch" | "scheduled" => Some(Self::Scheduled),
            _ => None,
        }
    }
}

/// Base interface every module implements.
pub trait Module: Send + Sync {
    fn kind(&self) -> ModuleKind;

    /// Returns false to veto the application; the orchestrator rolls the
    /// create back across all modules that already accepted it.
    fn on_create_application(&self, app: &ApplicationInfo) -> bool;

    /// Returns false on failure; deletes are best-effort and never revived.
    fn on_delete_application(&self, app: &ApplicationInfo) -> bool;

    /// Stable name for log lines. Defaults to the kind.
    fn name(&self) -> String {
        self.kind().to_string()
    }
}

/// Ingress module able to pull a stream from an upstream URL.
pub trait PullProvider: Module {
    fn provider_type(&self) -> ProviderType;

    /// Issue a pull. Blocking network I/O is expected here; the
    /// orchestrator accepts that cost for atomic dispatch.
    fn pull_stream(
        &self,
        app: &ApplicationInfo,
        stream_name: &str,
        url: &Url,
        offset_ms: u64,
    ) -> bool;
}

/// The intra-engine routing fabric. Reports stream birth and death back to
/// registered observers.
pub trait MediaRouter: Module {
    /// Register a per-application observer. The handle is weak: the router
    /// must tolerate the observer disappearing.
    fn register_observer(&self, app: &ApplicationInfo, observer: Weak<dyn StreamObserver>)
        -> bool;

    fn unregister_observer(&self, app_id: AppId) -> bool;
}

/// Stream lifecycle callbacks delivered by the media router.
///
/// Frame callbacks have default no-op bodies; the orchestrator is a
/// control-plane component and never looks at media payloads.
pub trait StreamObserver: Send + Sync {
    fn on_stream_created(&self, app: &ApplicationInfo, stream: &StreamInfo);

    fn on_stream_deleted(&self, app: &ApplicationInfo, stream: &StreamInfo);

    fn on_video_frame(&self, _app: &ApplicationInfo, _stream: &StreamInfo, _payload: &[u8]) {}

    fn on_audio_frame(&self, _app: &ApplicationInfo, _stream: &StreamInfo, _payload: &[u8]) {}
}

/// Tagged module handle. The variant carries the capability interface, so
/// no downcasting is ever needed to reach provider- or router-specific
/// operations.
#[derive(Clone)]
pub enum ModuleHandle {
    Provider(Arc<dyn PullProvider>),
    MediaRouter(Arc<dyn MediaRouter>),
    Transcoder(Arc<dyn Module>),
    Publisher(Arc<dyn Module>),
}

impl ModuleHandle {
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::Provider(_) => ModuleKind::Provider,
            Self::MediaRouter(_) => ModuleKind::MediaRouter,
            Self::Transcoder(_) => ModuleKind::Transcoder,
            Self::Publisher(_) => ModuleKind::Publisher,
        }
    }

    /// View the handle as the base module interface.
    #[must_use]
    pub fn as_module(&self) -> &dyn Module {
        match self {
            Self::Provider(m) => m.as_ref() as &dyn Module,
            Self::MediaRouter(m) => m.as_ref() as &dyn Module,
            Self::Transcoder(m) | Self::Publisher(m) => m.as_ref(),
        }
    }

    /// Identity is the data pointer of the underlying instance, so the same
    /// object registered under two kinds still counts as one module.
    #[must_use]
    pub fn data_ptr(&self) -> *const () {
        match self {
            Self::Provider(m) => Arc::as_ptr(m).cast(),
            Self::MediaRouter(m) => Arc::as_ptr(m).cast(),
            Self::Transcoder(m) | Self::Publisher(m) => Arc::as_ptr(m).cast(),
        }
    }

    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        std::ptr::eq(self.data_ptr(), other.data_ptr())
    }

    #[must_use]
    pub fn as_provider(&self) -> Option<&Arc<dyn PullProvider>> {
        match self {
            Self::Provider(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_media_router(&self) -> Option<&Arc<dyn MediaRouter>> {
        match self {
            Self::MediaRouter(r) => Some(r),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("kind", &self.kind())
            .field("name", &self.as_module().name())
            .finish()
    }
}
