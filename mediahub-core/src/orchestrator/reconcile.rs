// Origin-map reconciliation: three-way mark / diff / apply between a
// desired snapshot and the live virtual-host tree.
//
// Within one apply, deletions are observed by modules strictly before
// creations, so a rename (delete+create) never collides.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::models::ApplicationConfig;

use super::vhost::{Domain, ItemState, Origin, VirtualHost};
use super::Orchestrator;

/// Per-host application work derived from the diff.
struct HostPlan {
    vhost: String,
    /// Application names to delete, in origin declaration order.
    deletes: Vec<String>,
    /// Applications to create: `(app name, embedded config)`.
    creates: Vec<(String, ApplicationConfig)>,
}

impl Orchestrator {
    /// Reconcile the live tree against a desired snapshot.
    ///
    /// Hosts missing from the snapshot are torn down; new hosts are built
    /// up; changed origins are applied as delete + create. A failure in
    /// one host does not abort the others; the total failure count is
    /// reported as `Error::ReconcileFailed`.
    pub fn apply_origin_map(self: &Arc<Self>, snapshot: &[HostConfig]) -> Result<()> {
        let guard = self.lock_vhosts();

        let plans = {
            let mut state = guard.borrow_mut();

            // Mark phase: every live item is suspect until the diff clears it.
            for host in state.hosts.values_mut() {
                mark_tree(host, ItemState::NeedToCheck);
            }

            // Diff phase.
            for config in snapshot {
                match state.hosts.get_mut(&config.name) {
                    None => {
                        info!(vhost = %config.name, "new virtual host");
                        let host = VirtualHost::from_config(config, ItemState::New);
                        state.hosts.insert(config.name.clone(), host);
                    }
                    Some(live) => {
                        process_domain_list(live, config);
                        process_origin_list(live, config);
                        live.state = aggregate_state(live);
                    }
                }
            }

            // Anything the snapshot never mentioned goes away.
            for host in state.hosts.values_mut() {
                if host.state == ItemState::NeedToCheck {
                    info!(vhost = %host.name(), "virtual host absent from snapshot; tearing down");
                    mark_tree(host, ItemState::Delete);
                }
            }

            state.hosts.values().map(build_plan).collect::<Vec<_>>()
        };

        // Apply phase: all deletions strictly before all creations.
        let mut failures = 0;
        for plan in &plans {
            for app in &plan.deletes {
                match self.delete_application(&plan.vhost, app) {
                    Ok(_) => {}
                    Err(error) => {
                        failures += 1;
                        warn!(vhost = %plan.vhost, %app, %error, "reconcile delete failed");
                    }
                }
            }
        }
        for plan in &plans {
            for (app, config) in &plan.creates {
                match self.create_application(&plan.vhost, app, config) {
                    Ok(result) => self.link_origins(&plan.vhost, app, result),
                    Err(error) => {
                        failures += 1;
                        warn!(vhost = %plan.vhost, %app, %error, "reconcile create failed");
                    }
                }
            }
        }

        // Settle phase: drop deleted items, everything surviving is Applied.
        {
            let mut state = guard.borrow_mut();
            state.hosts.retain(|_, host| host.state != ItemState::Delete);
            for host in state.hosts.values_mut() {
                host.domains.retain(|domain| domain.state != ItemState::Delete);
                host.origins.retain(|origin| origin.state != ItemState::Delete);
                mark_tree(host, ItemState::Applied);
            }
        }

        if failures > 0 {
            return Err(Error::ReconcileFailed(failures));
        }
        Ok(())
    }
}

fn mark_tree(host: &mut VirtualHost, state: ItemState) {
    host.state = state;
    for domain in &mut host.domains {
        domain.state = state;
    }
    for origin in &mut host.origins {
        origin.state = state;
    }
}

/// Any child that is not `NotChanged` makes the parent `Changed`.
fn aggregate_state(host: &VirtualHost) -> ItemState {
    let settled = host
        .domains
        .iter()
        .map(|domain| domain.state)
        .chain(host.origins.iter().map(|origin| origin.state))
        .all(|state| state == ItemState::NotChanged);
    if settled {
        ItemState::NotChanged
    } else {
        ItemState::Changed
    }
}

/// Domain diff by pattern name. Domains have no mutable fields beyond the
/// pattern, so a present entry is always `NotChanged`. The rebuilt list
/// follows snapshot declaration order (matching priority); deleted entries
/// ride along until the settle phase.
fn process_domain_list(host: &mut VirtualHost, config: &HostConfig) {
    let mut old = std::mem::take(&mut host.domains);
    let mut next = Vec::with_capacity(config.domains.len() + old.len());

    for pattern in &config.domains {
        match old.iter().position(|domain| domain.pattern() == pattern) {
            Some(pos) => {
                let mut domain = old.remove(pos);
                domain.state = ItemState::NotChanged;
                next.push(domain);
            }
            None => {
                debug!(vhost = %host.name(), %pattern, "new domain");
                next.push(Domain::new(pattern, ItemState::New));
            }
        }
    }
    for mut domain in old {
        debug!(vhost = %host.name(), pattern = %domain.pattern(), "domain removed");
        domain.state = ItemState::Delete;
        next.push(domain);
    }

    host.domains = next;
}

/// Origin diff by location. A matching location with a different scheme or
/// url list is `Changed` and has its upstream definition replaced in place;
/// its application is recreated during apply.
fn process_origin_list(host: &mut VirtualHost, config: &HostConfig) {
    let mut old = std::mem::take(&mut host.origins);
    let mut next = Vec::with_capacity(config.origins.len() + old.len());

    for incoming in &config.origins {
        match old
            .iter()
            .position(|origin| origin.location() == incoming.location)
        {
            Some(pos) => {
                let mut origin = old.remove(pos);
                if origin.same_upstream(incoming) {
                    origin.state = ItemState::NotChanged;
                } else {
                    debug!(vhost = %host.name(), location = %origin.location(), "origin changed");
                    origin.update_from(incoming);
                    origin.state = ItemState::Changed;
                }
                next.push(origin);
            }
            None => {
                debug!(vhost = %host.name(), location = %incoming.location, "new origin");
                next.push(Origin::from_config(incoming, ItemState::New));
            }
        }
    }
    for mut origin in old {
        debug!(vhost = %host.name(), location = %origin.location(), "origin removed");
        origin.state = ItemState::Delete;
        next.push(origin);
    }

    host.origins = next;
}

/// Derive the application deletes and creates a host's diff calls for.
fn build_plan(host: &VirtualHost) -> HostPlan {
    let mut plan = HostPlan {
        vhost: host.name().to_string(),
        deletes: Vec::new(),
        creates: Vec::new(),
    };

    if host.state == ItemState::Delete {
        plan.deletes
            .extend(host.apps.values().map(|app| app.app().to_string()));
        return plan;
    }

    for (index, origin) in host.origins.iter().enumerate() {
        match origin.state {
            ItemState::Delete | ItemState::Changed => {
                // A changed origin still points at the application it
                // created last time; that one goes first.
                let doomed = origin
                    .app_id
                    .and_then(|id| host.apps.get(&id))
                    .map_or_else(|| origin.app_name().to_string(), |app| app.app().to_string());
                let shared = host.app_shared_by_other_origin(index, &doomed);
                if shared {
                    debug!(
                        vhost = %host.name(),
                        app = %doomed,
                        location = %origin.location(),
                        "application shared with another origin; skipping delete"
                    );
                } else if !plan.deletes.contains(&doomed) {
                    plan.deletes.push(doomed);
                }
            }
            _ => {}
        }
        match origin.state {
            ItemState::New | ItemState::Changed => {
                let app = origin.app_name().to_string();
                if !plan.creates.iter().any(|(name, _)| *name == app) {
                    plan.creates.push((app, origin.config().application.clone()));
                }
            }
            _ => {}
        }
    }

    plan
}
