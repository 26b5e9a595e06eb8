pub mod application;
pub mod stream;

pub use application::{AppId, ApplicationConfig, ApplicationInfo};
pub use stream::{parse_vhost_app_name, resolve_application_name, StreamId, StreamInfo};
