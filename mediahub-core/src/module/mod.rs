pub mod registry;
pub mod traits;

pub use registry::ModuleRegistry;
pub use traits::{
    MediaRouter, Module, ModuleHandle, ModuleKind, ProviderType, PullProvider, StreamObserver,
};
