// Orchestrator: process-wide coordinator for the virtual-host tree, the
// module registry, configuration reconciliation and pull dispatch.
//
// Locking model: two re-entrant mutexes, virtual-host state first, module
// registry second. Module callbacks run while the virtual-host lock is
// held but never while a `RefCell` borrow is outstanding, so callbacks may
// re-enter name resolution on the calling thread. Callbacks must not
// (un)register modules from inside a fan-out.

pub mod apps;
pub mod dispatch;
pub mod reconcile;
pub mod vhost;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::models::{resolve_application_name, AppId, ApplicationInfo, StreamInfo};
use crate::module::{ModuleHandle, ModuleKind, ModuleRegistry, StreamObserver};

use vhost::{PendingPull, StreamOwner, StreamRecord, VirtualHost};

/// Everything guarded by the virtual-host lock.
pub(crate) struct VhostState {
    /// Virtual hosts in configuration order.
    pub hosts: IndexMap<String, VirtualHost>,
    /// Pulls issued but not yet reported back by the media router, keyed by
    /// the stream's `full_name`.
    pub pending_pulls: HashMap<String, PendingPull>,
}

/// The coordinator object. Explicitly constructed (no process singleton)
/// and shared as `Arc<Orchestrator>`; the media router only ever holds a
/// `Weak` observer handle back to it.
pub struct Orchestrator {
    pub(crate) vhosts: ReentrantMutex<RefCell<VhostState>>,
    pub(crate) modules: ReentrantMutex<RefCell<ModuleRegistry>>,
    next_app_id: AtomicU32,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: &OrchestratorConfig) -> Arc<Self> {
        Arc::new(Self {
            vhosts: ReentrantMutex::new(RefCell::new(VhostState {
                hosts: IndexMap::new(),
                pending_pulls: HashMap::new(),
            })),
            modules: ReentrantMutex::new(RefCell::new(ModuleRegistry::new())),
            next_app_id: AtomicU32::new(config.first_app_id),
        })
    }

    pub(crate) fn alloc_app_id(&self) -> AppId {
        AppId(self.next_app_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn lock_vhosts(&self) -> ReentrantMutexGuard<'_, RefCell<VhostState>> {
        self.vhosts.lock()
    }

    // ---- module registry ------------------------------------------------

    pub fn register_module(&self, module: ModuleHandle) -> Result<()> {
        let guard = self.modules.lock();
        let result = guard.borrow_mut().register(module);
        if result.is_ok() {
            info!(total = guard.borrow().len(), "module registered");
        }
        result
    }

    pub fn unregister_module(&self, module: &ModuleHandle) -> Result<()> {
        let guard = self.modules.lock();
        let result = guard.borrow_mut().unregister(module);
        result
    }

    #[must_use]
    pub fn modules_of_kind(&self, kind: ModuleKind) -> Vec<ModuleHandle> {
        let guard = self.modules.lock();
        let result = guard.borrow().of_kind(kind);
        result
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        let guard = self.modules.lock();
        let result = guard.borrow().len();
        result
    }

    /// Modules in create fan-out order: media routers first (downstream
    /// modules may subscribe to them during their own create), then
    /// providers, transcoders, publishers; registration order within each
    /// kind.
    pub(crate) fn modules_in_create_order(&self) -> Vec<ModuleHandle> {
        let guard = self.modules.lock();
        let registry = guard.borrow();
        let mut ordered = Vec::with_capacity(registry.len());
        for kind in [
            ModuleKind::MediaRouter,
            ModuleKind::Provider,
            ModuleKind::Transcoder,
            ModuleKind::Publisher,
        ] {
            ordered.extend(registry.of_kind(kind));
        }
        ordered
    }

    // ---- name resolution ------------------------------------------------

    /// Resolve a domain name to the owning virtual host: hosts in
    /// configuration order, domain patterns in declaration order, first
    /// match wins.
    #[must_use]
    pub fn vhost_name_from_domain(&self, domain: &str) -> Option<String> {
        let guard = self.lock_vhosts();
        let state = guard.borrow();
        let found = state
            .hosts
            .values()
            .find(|host| host.matching_domain(domain).is_some())
            .map(|host| host.name().to_string());
        found
    }

    /// Canonical `vhost#app` name with the vhost resolved from a domain.
    pub fn resolve_application_name_from_domain(&self, domain: &str, app: &str) -> Result<String> {
        let vhost = self
            .vhost_name_from_domain(domain)
            .ok_or_else(|| crate::error::Error::NameUnresolved(domain.to_string()))?;
        Ok(resolve_application_name(&vhost, app))
    }

    // ---- introspection --------------------------------------------------

    #[must_use]
    pub fn virtual_host_names(&self) -> Vec<String> {
        let guard = self.lock_vhosts();
        let state = guard.borrow();
        let names = state.hosts.keys().cloned().collect();
        names
    }

    /// Canonical names of the applications currently live in a vhost.
    #[must_use]
    pub fn application_names(&self, vhost: &str) -> Vec<String> {
        let guard = self.lock_vhosts();
        let state = guard.borrow();
        let names = state.hosts.get(vhost).map_or_else(Vec::new, |host| {
            host.apps.values().map(|app| app.name().to_string()).collect()
        });
        names
    }

    /// Streams currently attributed to a vhost's origin and domain rules.
    #[must_use]
    pub fn stream_count(&self, vhost: &str) -> usize {
        let guard = self.lock_vhosts();
        let state = guard.borrow();
        let count = state
            .hosts
            .get(vhost)
            .map_or(0, VirtualHost::stream_count);
        count
    }

    /// Names of the streams attributed to one origin rule.
    #[must_use]
    pub fn origin_stream_names(&self, vhost: &str, location: &str) -> Vec<String> {
        let guard = self.lock_vhosts();
        let state = guard.borrow();
        let names = state.hosts.get(vhost).map_or_else(Vec::new, |host| {
            host.origins
                .iter()
                .filter(|origin| origin.location() == location)
                .flat_map(|origin| origin.streams.values().map(|record| record.info.name.clone()))
                .collect()
        });
        names
    }

    /// Names of the streams attributed to one domain rule.
    #[must_use]
    pub fn domain_stream_names(&self, vhost: &str, pattern: &str) -> Vec<String> {
        let guard = self.lock_vhosts();
        let state = guard.borrow();
        let names = state.hosts.get(vhost).map_or_else(Vec::new, |host| {
            host.domains
                .iter()
                .filter(|domain| domain.pattern() == pattern)
                .flat_map(|domain| domain.streams.values().map(|record| record.info.name.clone()))
                .collect()
        });
        names
    }

    #[must_use]
    pub fn application_info(&self, vhost: &str, app: &str) -> Option<ApplicationInfo> {
        let guard = self.lock_vhosts();
        let state = guard.borrow();
        let info = state
            .hosts
            .get(vhost)
            .and_then(|host| host.app_by_name(app))
            .cloned();
        info
    }
}

// Stream lifecycle callbacks from the media router. Frames are ignored:
// the default no-op bodies of the observer trait stand.
impl StreamObserver for Orchestrator {
    fn on_stream_created(&self, app: &ApplicationInfo, stream: &StreamInfo) {
        let full_name = format!("{}/{}", app.name(), stream.name);
        let guard = self.lock_vhosts();
        let mut state = guard.borrow_mut();

        let Some(pending) = state.pending_pulls.remove(&full_name) else {
            // Pushed ingest or a pull this orchestrator did not issue.
            debug!(stream = %full_name, "stream created without a pending pull; not attributed");
            return;
        };

        let Some(host) = state.hosts.get_mut(app.vhost()) else {
            warn!(stream = %full_name, vhost = app.vhost(), "stream created for unknown vhost");
            return;
        };

        if !host.apps.contains_key(&app.id()) {
            warn!(stream = %full_name, app = %app.name(), "stream created for unknown application");
            return;
        }

        let record = StreamRecord {
            info: stream.clone(),
            app_id: app.id(),
            full_name: full_name.clone(),
            provider: Some(pending.provider),
            created_at: Utc::now(),
        };

        match pending.owner {
            Some(StreamOwner::Origin { ref location }) => {
                if let Some(origin) = host
                    .origins
                    .iter_mut()
                    .find(|origin| origin.location() == location)
                {
                    origin.streams.insert(stream.id, record);
                    info!(stream = %full_name, %location, "stream attributed to origin");
                } else {
                    warn!(stream = %full_name, %location, "owning origin disappeared before the stream arrived");
                }
            }
            Some(StreamOwner::Domain { ref pattern }) => {
                if let Some(domain) = host
                    .domains
                    .iter_mut()
                    .find(|domain| domain.pattern() == pattern)
                {
                    domain.streams.insert(stream.id, record);
                    info!(stream = %full_name, %pattern, "stream attributed to domain");
                } else {
                    warn!(stream = %full_name, %pattern, "owning domain disappeared before the stream arrived");
                }
            }
            None => {
                debug!(stream = %full_name, "pull had no owning rule; stream left unattributed");
            }
        }
    }

    fn on_stream_deleted(&self, app: &ApplicationInfo, stream: &StreamInfo) {
        let full_name = format!("{}/{}", app.name(), stream.name);
        let guard = self.lock_vhosts();
        let mut state = guard.borrow_mut();

        state.pending_pulls.remove(&full_name);

        let Some(host) = state.hosts.get_mut(app.vhost()) else {
            return;
        };
        let mut removed = false;
        for origin in &mut host.origins {
            removed |= origin.streams.remove(&stream.id).is_some();
        }
        for domain in &mut host.domains {
            removed |= domain.streams.remove(&stream.id).is_some();
        }
        if removed {
            info!(stream = %full_name, "stream removed");
        } else {
            debug!(stream = %full_name, "delete for a stream that was never attributed");
        }
    }
}
