// Application lifecycle: fan-out create with compensating rollback, and
// best-effort reverse fan-out delete.
//
// Create order is MediaRouter -> Providers -> Transcoders -> Publishers
// (registration order within a kind); downstream modules may subscribe to
// the media router during their own create. Deletes and rollbacks run in
// the exact reverse.

use std::sync::{Arc, Weak};

use tracing::{info, warn};

use crate::error::{CreateResult, DeleteResult, Error, Result};
use crate::models::{ApplicationConfig, ApplicationInfo};
use crate::module::StreamObserver;

use super::vhost::ItemState;
use super::Orchestrator;

impl Orchestrator {
    /// Create an application in every registered module, or in none.
    ///
    /// Returns `Exists` untouched when the vhost already has an application
    /// of that name. Any module veto triggers a reverse-order rollback
    /// across the modules that had already accepted.
    pub fn create_application(
        self: &Arc<Self>,
        vhost: &str,
        app: &str,
        config: &ApplicationConfig,
    ) -> Result<CreateResult> {
        let guard = self.lock_vhosts();

        {
            let state = guard.borrow();
            let host = state
                .hosts
                .get(vhost)
                .ok_or_else(|| Error::VirtualHostNotFound(vhost.to_string()))?;
            if let Some(existing) = host.app_by_name(app) {
                return Ok(CreateResult::Exists(existing.id()));
            }
        }

        let info = ApplicationInfo::new(self.alloc_app_id(), vhost, app, config.clone());
        let modules = self.modules_in_create_order();

        let mut accepted = Vec::with_capacity(modules.len());
        for module in &modules {
            if module.as_module().on_create_application(&info) {
                accepted.push(module.clone());
                continue;
            }

            warn!(
                app = %info.name(),
                module = %module.as_module().name(),
                "module rejected application create; rolling back"
            );
            for done in accepted.iter().rev() {
                if !done.as_module().on_delete_application(&info) {
                    warn!(
                        app = %info.name(),
                        module = %done.as_module().name(),
                        "rollback delete failed"
                    );
                }
            }
            return Err(Error::ApplicationRejected {
                app: info.name().to_string(),
                module: module.as_module().name(),
            });
        }

        // Observer registration happens last: by the time the router can
        // report a stream, the application is fully created everywhere.
        let observer_arc: Arc<dyn StreamObserver> = self.clone();
        let observer: Weak<dyn StreamObserver> = Arc::downgrade(&observer_arc);
        for module in &modules {
            if let Some(router) = module.as_media_router() {
                if !router.register_observer(&info, observer.clone()) {
                    warn!(app = %info.name(), "media router refused observer registration");
                }
            }
        }

        {
            let mut state = guard.borrow_mut();
            if let Some(host) = state.hosts.get_mut(vhost) {
                host.apps.insert(info.id(), info.clone());
            }
        }

        info!(app = %info.name(), id = %info.id(), modules = modules.len(), "application created");
        Ok(CreateResult::Created(info.id()))
    }

    /// Delete an application from every registered module, reverse fan-out.
    ///
    /// Module failures are logged and skipped; the application is removed
    /// from the vhost regardless (never revived) and the failure count is
    /// reported through `Error::ApplicationDeleteFailed`.
    pub fn delete_application(&self, vhost: &str, app: &str) -> Result<DeleteResult> {
        let guard = self.lock_vhosts();

        let info = {
            let state = guard.borrow();
            let host = state
                .hosts
                .get(vhost)
                .ok_or_else(|| Error::VirtualHostNotFound(vhost.to_string()))?;
            host.app_by_name(app).cloned()
        };
        let Some(info) = info else {
            return Ok(DeleteResult::NotFound);
        };

        let modules = self.modules_in_create_order();
        let mut failures = 0;
        for module in modules.iter().rev() {
            if !module.as_module().on_delete_application(&info) {
                failures += 1;
                warn!(
                    app = %info.name(),
                    module = %module.as_module().name(),
                    "module failed to delete application; continuing"
                );
            }
        }

        for module in &modules {
            if let Some(router) = module.as_media_router() {
                router.unregister_observer(info.id());
            }
        }

        {
            let mut state = guard.borrow_mut();
            let pending_prefix = format!("{}/", info.name());
            state
                .pending_pulls
                .retain(|name, _| !name.starts_with(&pending_prefix));
            if let Some(host) = state.hosts.get_mut(vhost) {
                host.apps.shift_remove(&info.id());
                host.purge_app_streams(info.id());
                for origin in &mut host.origins {
                    if origin.app_id == Some(info.id()) {
                        origin.app_id = None;
                    }
                }
            }
        }

        if failures > 0 {
            return Err(Error::ApplicationDeleteFailed {
                app: info.name().to_string(),
                failures,
            });
        }
        info!(app = %info.name(), id = %info.id(), "application deleted");
        Ok(DeleteResult::Deleted)
    }

    /// Link every live origin that references `app` to the application id
    /// it resolved to during apply.
    pub(super) fn link_origins(&self, vhost: &str, app: &str, result: CreateResult) {
        let guard = self.lock_vhosts();
        let mut state = guard.borrow_mut();
        if let Some(host) = state.hosts.get_mut(vhost) {
            for origin in &mut host.origins {
                if origin.state != ItemState::Delete && origin.app_name() == app {
                    origin.app_id = Some(result.app_id());
                }
            }
        }
    }
}
