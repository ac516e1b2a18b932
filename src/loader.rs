//! Configuration loader
//!
//! Turns a [`FleetConfig`] into the realm tree, the daemon links and the
//! configuration parts of one generation, then hands them to the
//! [`Dispatcher`].
//!
//! Hosts are grouped per realm into packs: a host and its parents always land
//! in the same part. Packs are then spread over as many parts as the realm has
//! master schedulers, the biggest pack first onto the smallest part.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    config::{FleetConfig, HostConfig},
    dispatcher::Dispatcher,
    error::{ConstructionError, DispatchResult},
    links::{DaemonLink, DaemonType, LinkArena, Transport},
    part::{ConfigurationPart, MonitoredHost, PartId},
    realm::{RealmId, Realms},
};

/// Build the dispatcher of a configuration generation
pub fn build_dispatcher(
    config: &FleetConfig,
    transport: Arc<dyn Transport>,
) -> DispatchResult<Dispatcher> {
    let realms = Realms::new(&config.realms)?;
    let links = build_links(config, &realms, transport)?;
    let parts = build_parts(config, &realms, &links)?;

    info!(
        "loaded configuration '{}': {} realm(s), {} daemon(s), {} host(s) in {} part(s)",
        config.arbiter.config_name,
        realms.len(),
        links.len(),
        config.hosts.len(),
        parts.len()
    );

    Dispatcher::new(
        links,
        realms,
        parts,
        &config.arbiter,
        Arc::new(config.clone()),
    )
}

/// One link per declared daemon, in declaration order
pub fn build_links(
    config: &FleetConfig,
    realms: &Realms,
    transport: Arc<dyn Transport>,
) -> Result<LinkArena, ConstructionError> {
    let mut links = LinkArena::new();
    for daemon in &config.daemons {
        let realm = realms.resolve(daemon.realm.as_deref())?;
        let link = DaemonLink::new(links.next_id(), daemon, realm, transport.clone());
        debug!(
            "declared {} '{}' at {} in realm '{}'",
            daemon.daemon_type,
            daemon.name,
            link.uri(),
            realms[realm].name()
        );
        links.push(link);
    }
    Ok(links)
}

/// Cut the hosts of every realm into parts.
///
/// Part ids are sequential across realms, in realm declaration order, so that
/// an unchanged configuration always yields the same ids. A realm without any
/// host gets no part.
pub fn build_parts(
    config: &FleetConfig,
    realms: &Realms,
    links: &LinkArena,
) -> Result<Vec<ConfigurationPart>, ConstructionError> {
    let mut seen = HashSet::new();
    let mut by_realm: BTreeMap<RealmId, Vec<&HostConfig>> = BTreeMap::new();
    for host in &config.hosts {
        if !seen.insert(host.name.as_str()) {
            return Err(ConstructionError::DuplicateHost(host.name.clone()));
        }
        let realm = realms.resolve(host.realm.as_deref())?;
        by_realm.entry(realm).or_default().push(host);
    }

    let mut parts = Vec::new();
    let mut next_id = 0;
    for realm_id in realms.ids() {
        let Some(hosts) = by_realm.remove(&realm_id) else {
            continue;
        };
        let realm = &realms[realm_id];

        let schedulers = realm
            .get_potential_satellites_by_type(links, DaemonType::Scheduler)
            .into_iter()
            .filter(|id| !links[*id].spare() && links[*id].active())
            .count();
        let nb_parts = schedulers.max(1);

        let mut buckets: Vec<Vec<MonitoredHost>> = vec![Vec::new(); nb_parts];
        for pack in create_packs(realm.name(), &hosts) {
            // ties go to the lowest index
            let Some(smallest) = buckets
                .iter_mut()
                .min_by_key(|bucket| bucket.len())
            else {
                continue;
            };
            smallest.extend(pack);
        }

        for bucket in buckets {
            let part = ConfigurationPart::new(PartId(next_id), realm_id, realm.name(), bucket);
            debug!(
                "part {} of realm '{}' holds {} host(s)",
                part.instance_id(),
                realm.name(),
                part.host_count()
            );
            parts.push(part);
            next_id += 1;
        }
    }

    Ok(parts)
}

/// Group hosts linked by a parent relation, biggest pack first.
///
/// Parents declared in another realm, or not declared at all, do not bind.
fn create_packs(realm: &str, hosts: &[&HostConfig]) -> Vec<Vec<MonitoredHost>> {
    let index: HashMap<&str, usize> = hosts
        .iter()
        .enumerate()
        .map(|(i, host)| (host.name.as_str(), i))
        .collect();

    let mut packs = UnionFind::new(hosts.len());
    for (i, host) in hosts.iter().enumerate() {
        for parent in &host.parents {
            match index.get(parent.as_str()) {
                Some(j) => packs.union(i, *j),
                None => warn!(
                    "host '{}' has parent '{parent}' outside of realm '{realm}', ignoring the relation",
                    host.name
                ),
            }
        }
    }

    let mut grouped: BTreeMap<usize, Vec<MonitoredHost>> = BTreeMap::new();
    for (i, host) in hosts.iter().enumerate() {
        grouped
            .entry(packs.find(i))
            .or_default()
            .push(monitored_host(host));
    }

    let mut packs: Vec<_> = grouped.into_values().collect();
    // stable: equal sizes keep declaration order
    packs.sort_by(|a, b| b.len().cmp(&a.len()));
    packs
}

fn monitored_host(host: &HostConfig) -> MonitoredHost {
    MonitoredHost {
        name: host.name.clone(),
        address: host.address.clone(),
        parents: host.parents.clone(),
        services: host.services.iter().cloned().collect(),
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            // the lowest index stays the root
            let (root, child) = if a < b { (a, b) } else { (b, a) };
            self.parent[child] = root;
        }
    }
}
