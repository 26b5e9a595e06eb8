// Pull-stream dispatch: resolve names to candidate URLs, pick a provider
// by URL scheme, first success wins. No retry policy at this layer;
// callers are expected to back off.

use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::models::{parse_vhost_app_name, ApplicationInfo};
use crate::module::{ModuleHandle, ModuleKind, ProviderType, PullProvider};

use super::vhost::{PendingPull, StreamOwner};
use super::Orchestrator;

impl Orchestrator {
    /// First registered provider advertising the type that handles
    /// `scheme` (compared lower-cased).
    pub fn provider_for_scheme(&self, scheme: &str) -> Result<Arc<dyn PullProvider>> {
        let wanted = ProviderType::from_scheme(scheme)
            .ok_or_else(|| Error::SchemeUnsupported(scheme.to_ascii_lowercase()))?;
        self.modules_of_kind(ModuleKind::Provider)
            .iter()
            .filter_map(ModuleHandle::as_provider)
            .find(|provider| provider.provider_type() == wanted)
            .cloned()
            .ok_or_else(|| Error::SchemeUnsupported(scheme.to_ascii_lowercase()))
    }

    pub fn provider_for_url(&self, url: &Url) -> Result<Arc<dyn PullProvider>> {
        self.provider_for_scheme(url.scheme())
    }

    /// Candidate pull URLs for a location-routed stream: the request path
    /// `/{app}/{stream}` is matched against origin locations
    /// (longest-prefix) and the matched rule's url list is expanded in
    /// order. Also returns the matched location, the rule that will own
    /// the resulting stream.
    pub fn url_list_for_location(
        &self,
        vhost_app: &str,
        stream_name: &str,
    ) -> Result<(Vec<Url>, String)> {
        let (vhost, app) = parse_vhost_app_name(vhost_app)?;
        let guard = self.lock_vhosts();
        let state = guard.borrow();
        let host = state
            .hosts
            .get(vhost)
            .ok_or_else(|| Error::VirtualHostNotFound(vhost.to_string()))?;

        let path = format!("/{app}/{stream_name}");
        let index = host
            .find_pull_origin(&path)
            .ok_or_else(|| Error::NoRouteForStream(format!("{vhost_app}/{stream_name}")))?;
        let origin = &host.origins[index];
        let remainder = path[origin.location().trim_end_matches('/').len()..].to_string();

        let mut urls = Vec::new();
        for raw in origin.resolve_urls(&remainder) {
            match Url::parse(&raw) {
                Ok(url) => urls.push(url),
                Err(error) => {
                    warn!(url = %raw, %error, "skipping unparsable origin url")
                }
            }
        }
        Ok((urls, origin.location().to_string()))
    }

    /// Pull a stream through the origin rules.
    pub fn request_pull_stream(
        self: &Arc<Self>,
        vhost_app: &str,
        stream_name: &str,
        offset_ms: u64,
    ) -> Result<()> {
        let (vhost, app) = parse_vhost_app_name(vhost_app)?;
        let guard = self.lock_vhosts();

        let info = {
            let state = guard.borrow();
            let host = state
                .hosts
                .get(vhost)
                .ok_or_else(|| Error::VirtualHostNotFound(vhost.to_string()))?;
            host.app_by_name(app)
                .cloned()
                .ok_or_else(|| Error::ApplicationNotFound(vhost_app.to_string()))?
        };

        let (candidates, location) = self.url_list_for_location(vhost_app, stream_name)?;
        let owner = StreamOwner::Origin { location };
        self.pull_from_candidates(&info, stream_name, &candidates, Some(owner), offset_ms)
    }

    /// Pull a stream from an explicit URL (ad-hoc pulls). The stream is
    /// attributed to the vhost's first declared domain, the rule that
    /// admits the name; a vhost without domains leaves it unattributed.
    pub fn request_pull_stream_from_url(
        self: &Arc<Self>,
        vhost_app: &str,
        stream_name: &str,
        url: &str,
        offset_ms: u64,
    ) -> Result<()> {
        let (vhost, app) = parse_vhost_app_name(vhost_app)?;
        let url = Url::parse(url)?;
        let guard = self.lock_vhosts();

        let (info, owner) = {
            let state = guard.borrow();
            let host = state
                .hosts
                .get(vhost)
                .ok_or_else(|| Error::VirtualHostNotFound(vhost.to_string()))?;
            let info = host
                .app_by_name(app)
                .cloned()
                .ok_or_else(|| Error::ApplicationNotFound(vhost_app.to_string()))?;
            let owner = host.domains.first().map(|domain| StreamOwner::Domain {
                pattern: domain.pattern().to_string(),
            });
            (info, owner)
        };

        self.pull_from_candidates(&info, stream_name, std::slice::from_ref(&url), owner, offset_ms)
    }

    /// Shared tail of the two entry points: candidates in order, provider
    /// per scheme, first success wins. The pending attribution is recorded
    /// before the provider call so a synchronously reported stream already
    /// finds its owner.
    fn pull_from_candidates(
        self: &Arc<Self>,
        info: &ApplicationInfo,
        stream_name: &str,
        candidates: &[Url],
        owner: Option<StreamOwner>,
        offset_ms: u64,
    ) -> Result<()> {
        let full_name = format!("{}/{}", info.name(), stream_name);
        if candidates.is_empty() {
            return Err(Error::NoRouteForStream(full_name));
        }

        let guard = self.lock_vhosts();
        let mut scheme_error = None;
        let mut attempted = false;
        for url in candidates {
            let provider = match self.provider_for_url(url) {
                Ok(provider) => provider,
                Err(error) => {
                    debug!(url = %url, %error, "no provider for candidate url");
                    scheme_error = Some(error);
                    continue;
                }
            };
            attempted = true;

            {
                let mut state = guard.borrow_mut();
                state.pending_pulls.insert(
                    full_name.clone(),
                    PendingPull {
                        owner: owner.clone(),
                        provider: provider.clone(),
                    },
                );
            }

            if provider.pull_stream(info, stream_name, url, offset_ms) {
                info!(stream = %full_name, url = %url, "pull issued");
                return Ok(());
            }

            {
                let mut state = guard.borrow_mut();
                state.pending_pulls.remove(&full_name);
            }
            warn!(stream = %full_name, url = %url, "provider rejected pull; trying next candidate");
        }

        if !attempted {
            if let Some(error) = scheme_error {
                return Err(error);
            }
        }
        Err(Error::PullFailed {
            stream: full_name,
            reason: "no candidate url was accepted by a provider".to_string(),
        })
    }
}
