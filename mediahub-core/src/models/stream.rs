use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stream ID as reported by the media router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u32);

impl StreamId {
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single live stream as seen by the media router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: StreamId,
    pub name: String,
}

impl StreamInfo {
    #[must_use]
    pub fn new(id: StreamId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

/// Build the canonical `vhost#app` application name. The `#` separator is
/// part of the external contract.
#[must_use]
pub fn resolve_application_name(vhost: &str, app: &str) -> String {
    format!("{vhost}#{app}")
}

/// Split a canonical `vhost#app` name at the first `#`.
pub fn parse_vhost_app_name(name: &str) -> Result<(&str, &str)> {
    name.split_once('#')
        .filter(|(vhost, app)| !vhost.is_empty() && !app.is_empty())
        .ok_or_else(|| Error::NameUnresolved(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_name_round_trip() {
        let name = resolve_application_name("default", "live");
        assert_eq!(name, "default#live");
        assert_eq!(parse_vhost_app_name(&name).unwrap(), ("default", "live"));
    }

    #[test]
    fn app_part_may_contain_separator() {
        // Only the first `#` splits; the rest belongs to the app name.
        assert_eq!(parse_vhost_app_name("v#a#b").unwrap(), ("v", "a#b"));
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(parse_vhost_app_name("no-separator").is_err());
        assert!(parse_vhost_app_name("#app").is_err());
        assert!(parse_vhost_app_name("vhost#").is_err());
    }
}
