// Virtual host tree: domains, origin rules, applications and the streams
// attributed to them, plus the per-item reconciliation lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use tracing::warn;

use crate::config::{HostConfig, OriginConfig};
use crate::models::{AppId, ApplicationInfo, StreamId, StreamInfo};
use crate::module::PullProvider;

/// Reconciliation lifecycle shared by virtual hosts, domains and origins.
///
/// `Unknown → New → Applied` on first apply; a fresh snapshot first marks
/// every live item `NeedToCheck`, the diff moves it to `NotChanged`,
/// `Changed` or `Delete`, and a finished apply returns survivors to
/// `Applied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Unknown,
    Applied,
    NeedToCheck,
    NotChanged,
    Changed,
    New,
    Delete,
}

/// A stream attributed to the origin or domain rule that caused its pull.
pub struct StreamRecord {
    pub info: StreamInfo,
    pub app_id: AppId,
    /// `vhost#app/stream`, the engine-wide stream identity.
    pub full_name: String,
    /// Provider that produced the stream. Strong handle: the record owns
    /// its side of the pull.
    pub provider: Option<Arc<dyn PullProvider>>,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for StreamRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRecord")
            .field("info", &self.info)
            .field("app_id", &self.app_id)
            .field("full_name", &self.full_name)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// The rule that caused a pull; resolved again when the media router
/// reports the stream's birth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOwner {
    Origin { location: String },
    Domain { pattern: String },
}

/// A glob-style hostname pattern selecting a virtual host.
pub struct Domain {
    pattern: String,
    /// Compiled matcher cache. `None` means the pattern failed to compile;
    /// such a domain can never match but does not abort reconciliation.
    regex: Option<Regex>,
    pub streams: HashMap<StreamId, StreamRecord>,
    pub state: ItemState,
}

impl Domain {
    #[must_use]
    pub fn new(pattern: &str, state: ItemState) -> Self {
        Self {
            pattern: pattern.to_string(),
            regex: compile_domain_pattern(pattern),
            streams: HashMap::new(),
            state,
        }
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn matches(&self, host: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(host))
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("pattern", &self.pattern)
            .field("valid", &self.regex.is_some())
            .field("streams", &self.streams.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Compile a glob pattern (`*`, `?`) into an anchored regex.
///
/// Metacharacters are escaped first, then the escaped wildcards are
/// rewritten, so only `*` and `?` from the original pattern are special.
#[must_use]
pub fn compile_domain_pattern(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".?");
    match Regex::new(&format!("^{escaped}$")) {
        Ok(re) => Some(re),
        Err(error) => {
            warn!(%pattern, %error, "domain pattern does not compile; it will never match");
            None
        }
    }
}

/// A pull rule binding a URL-path `location` to ordered upstream URLs
/// sharing a scheme.
pub struct Origin {
    location: String,
    scheme: String,
    /// Raw URLs exactly as configured; the scheme is prepended at dispatch
    /// time for entries without one.
    urls: Vec<String>,
    app_name: String,
    /// Original rule, kept for diffing and for embedders that need the
    /// untouched blob.
    config: OriginConfig,
    pub app_id: Option<AppId>,
    pub streams: HashMap<StreamId, StreamRecord>,
    pub state: ItemState,
}

impl Origin {
    #[must_use]
    pub fn from_config(config: &OriginConfig, state: ItemState) -> Self {
        Self {
            location: config.location.clone(),
            scheme: config.pass.scheme.clone(),
            urls: config.pass.urls.clone(),
            app_name: config.app_name().to_string(),
            config: config.clone(),
            app_id: None,
            streams: HashMap::new(),
            state,
        }
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[must_use]
    pub const fn config(&self) -> &OriginConfig {
        &self.config
    }

    /// True when the incoming rule keeps the same upstream definition
    /// (scheme and ordered url list).
    #[must_use]
    pub fn same_upstream(&self, incoming: &OriginConfig) -> bool {
        self.scheme == incoming.pass.scheme && self.urls == incoming.pass.urls
    }

    /// Replace the upstream definition from a changed rule.
    pub fn update_from(&mut self, incoming: &OriginConfig) {
        self.scheme = incoming.pass.scheme.clone();
        self.urls = incoming.pass.urls.clone();
        self.app_name = incoming.app_name().to_string();
        self.config = incoming.clone();
    }

    /// Expand the raw url list into concrete pull URLs: scheme-less entries
    /// get `scheme://` prepended, and the request-path remainder after the
    /// matched location is appended to each.
    #[must_use]
    pub fn resolve_urls(&self, remainder: &str) -> Vec<String> {
        self.urls
            .iter()
            .map(|raw| {
                let base = if raw.contains("://") {
                    raw.clone()
                } else {
                    format!("{}://{}", self.scheme, raw)
                };
                let base = base.trim_end_matches('/');
                if remainder.is_empty() {
                    base.to_string()
                } else {
                    format!("{base}{remainder}")
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Origin")
            .field("location", &self.location)
            .field("scheme", &self.scheme)
            .field("urls", &self.urls)
            .field("app_id", &self.app_id)
            .field("streams", &self.streams.len())
            .field("state", &self.state)
            .finish()
    }
}

/// True when `location` is a path-segment prefix of `path`.
#[must_use]
pub fn location_matches(location: &str, path: &str) -> bool {
    let location = location.trim_end_matches('/');
    if location.is_empty() {
        return true;
    }
    match path.strip_prefix(location) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// A named configuration root grouping domains, origins and applications.
pub struct VirtualHost {
    name: String,
    pub domains: Vec<Domain>,
    pub origins: Vec<Origin>,
    pub apps: IndexMap<AppId, ApplicationInfo>,
    pub state: ItemState,
}

impl VirtualHost {
    #[must_use]
    pub fn from_config(config: &HostConfig, state: ItemState) -> Self {
        Self {
            name: config.name.clone(),
            domains: config
                .domains
                .iter()
                .map(|pattern| Domain::new(pattern, state))
                .collect(),
            origins: config
                .origins
                .iter()
                .map(|origin| Origin::from_config(origin, state))
                .collect(),
            apps: IndexMap::new(),
            state,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn app_by_name(&self, app: &str) -> Option<&ApplicationInfo> {
        self.apps.values().find(|info| info.app() == app)
    }

    /// First domain whose pattern matches `host`, in declaration order.
    #[must_use]
    pub fn matching_domain(&self, host: &str) -> Option<&Domain> {
        self.domains.iter().find(|domain| domain.matches(host))
    }

    /// Longest-prefix origin match for a request path (`/{app}/{stream}`).
    /// Ties keep the first declared rule.
    #[must_use]
    pub fn find_pull_origin(&self, path: &str) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (index, origin) in self.origins.iter().enumerate() {
            if origin.state == ItemState::Delete || !location_matches(origin.location(), path) {
                continue;
            }
            let len = origin.location().trim_end_matches('/').len();
            if best.is_none_or(|(_, best_len)| len > best_len) {
                best = Some((index, len));
            }
        }
        best.map(|(index, _)| index)
    }

    /// Streams currently attributed to this host's rules.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.origins
            .iter()
            .map(|origin| origin.streams.len())
            .sum::<usize>()
            + self
                .domains
                .iter()
                .map(|domain| domain.streams.len())
                .sum::<usize>()
    }

    /// Drop every stream attributed to `app_id` across all rules.
    pub fn purge_app_streams(&mut self, app_id: AppId) {
        for origin in &mut self.origins {
            origin.streams.retain(|_, record| record.app_id != app_id);
        }
        for domain in &mut self.domains {
            domain.streams.retain(|_, record| record.app_id != app_id);
        }
    }

    /// True when another live origin (not deleted, not `skip`) still
    /// references the application name.
    #[must_use]
    pub fn app_shared_by_other_origin(&self, skip: usize, app_name: &str) -> bool {
        self.origins.iter().enumerate().any(|(index, origin)| {
            index != skip && origin.state != ItemState::Delete && origin.app_name() == app_name
        })
    }
}

impl std::fmt::Debug for VirtualHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualHost")
            .field("name", &self.name)
            .field("domains", &self.domains)
            .field("origins", &self.origins)
            .field("apps", &self.apps.len())
            .field("state", &self.state)
            .finish()
    }
}

/// A pull the orchestrator has issued but whose stream the media router has
/// not reported yet. Keyed by the stream's `full_name`.
pub struct PendingPull {
    pub owner: Option<StreamOwner>,
    pub provider: Arc<dyn PullProvider>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PassConfig;

    fn origin(location: &str, scheme: &str, urls: &[&str]) -> Origin {
        Origin::from_config(
            &OriginConfig {
                location: location.to_string(),
                pass: PassConfig {
                    scheme: scheme.to_string(),
                    urls: urls.iter().map(ToString::to_string).collect(),
                },
                application: Default::default(),
            },
            ItemState::New,
        )
    }

    #[test]
    fn glob_patterns_match_hostnames() {
        let domain = Domain::new("*.example.com", ItemState::New);
        assert!(domain.matches("a.example.com"));
        assert!(domain.matches("deep.sub.example.com"));
        assert!(!domain.matches("example.com"));
        assert!(!domain.matches("a.example.org"));

        let exact = Domain::new("stream.example.com", ItemState::New);
        assert!(exact.matches("stream.example.com"));
        // Escaped metacharacters stay literal: `.` must not match `x`.
        assert!(!exact.matches("streamxexample.com"));

        let single = Domain::new("cdn?.example.com", ItemState::New);
        assert!(single.matches("cdn1.example.com"));
        assert!(single.matches("cdn.example.com"));
        assert!(!single.matches("cdn10.example.com"));
    }

    #[test]
    fn location_matching_is_segment_aware() {
        assert!(location_matches("/live", "/live/stream1"));
        assert!(location_matches("/live", "/live"));
        assert!(location_matches("/live/", "/live/stream1"));
        assert!(!location_matches("/live", "/livestream/1"));
        assert!(!location_matches("/live/a", "/live"));
    }

    #[test]
    fn longest_prefix_wins() {
        let mut host = VirtualHost::from_config(
            &HostConfig {
                name: "h".to_string(),
                domains: vec![],
                origins: vec![],
            },
            ItemState::New,
        );
        host.origins.push(origin("/live", "rtmp", &["a/app"]));
        host.origins.push(origin("/live/vip", "rtsp", &["b/app"]));

        assert_eq!(host.find_pull_origin("/live/stream"), Some(0));
        assert_eq!(host.find_pull_origin("/live/vip/stream"), Some(1));
        assert_eq!(host.find_pull_origin("/vod/stream"), None);
    }

    #[test]
    fn raw_urls_get_scheme_and_remainder_at_resolve_time() {
        let origin = origin("/live", "rtmp", &["src/app", "ovt://backup/app"]);
        assert_eq!(
            origin.resolve_urls("/stream1"),
            vec!["rtmp://src/app/stream1", "ovt://backup/app/stream1"]
        );
        // Stored urls stay raw.
        assert!(origin.config().pass.urls.contains(&"src/app".to_string()));
    }

    #[test]
    fn upstream_comparison_covers_scheme_and_url_order() {
        let live = origin("/live", "rtmp", &["x/1", "y/2"]);
        let mut incoming = live.config().clone();
        assert!(live.same_upstream(&incoming));

        incoming.pass.urls.reverse();
        assert!(!live.same_upstream(&incoming));

        incoming = live.config().clone();
        incoming.pass.scheme = "rtsp".to_string();
        assert!(!live.same_upstream(&incoming));
    }
}
