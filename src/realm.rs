//! Realms
//!
//! Realms form a tree of failure domains. A daemon declared in a realm serves
//! that realm, and every realm below it when it manages sub-realms. Realms only
//! hold [`LinkId`]s; the links themselves live in the [`LinkArena`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{MustHave, RealmConfig},
    error::ConstructionError,
    links::{DaemonType, LinkArena, LinkId, SATELLITES},
    part::{ConfigurationPart, PartId},
    payload::SchedulerPointer,
};

/// Name of the realm created when the configuration declares none
pub const DEFAULT_REALM_NAME: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RealmId(pub usize);

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "realm-{}", self.0)
    }
}

#[derive(Debug)]
pub struct Realm {
    id: RealmId,
    name: String,
    uuid: Uuid,
    default: bool,
    realm_members: Vec<RealmId>,
    all_sub_members: Vec<RealmId>,
    higher_realms: Vec<RealmId>,
    must_have: MustHave,
    nb_must_have: BTreeMap<DaemonType, usize>,

    pub(crate) parts: BTreeMap<PartId, ConfigurationPart>,
    pub(crate) to_satellites: BTreeMap<DaemonType, BTreeMap<PartId, SchedulerPointer>>,
    pub(crate) to_satellites_need_dispatch: BTreeMap<DaemonType, BTreeMap<PartId, bool>>,
    pub(crate) to_satellites_managed_by: BTreeMap<DaemonType, BTreeMap<PartId, Vec<LinkId>>>,
}

impl Realm {
    fn new(id: RealmId, config: &RealmConfig) -> Self {
        Self {
            id,
            name: config.name.clone(),
            uuid: Uuid::new_v4(),
            default: config.default,
            realm_members: Vec::new(),
            all_sub_members: Vec::new(),
            higher_realms: Vec::new(),
            must_have: config.must_have,
            nb_must_have: BTreeMap::new(),
            parts: BTreeMap::new(),
            to_satellites: BTreeMap::new(),
            to_satellites_need_dispatch: BTreeMap::new(),
            to_satellites_managed_by: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> RealmId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_default(&self) -> bool {
        self.default
    }

    /// Immediate sub-realms
    pub fn realm_members(&self) -> &[RealmId] {
        &self.realm_members
    }

    /// Every realm below this one
    pub fn all_sub_members(&self) -> &[RealmId] {
        &self.all_sub_members
    }

    /// Every realm above this one, closest first
    pub fn higher_realms(&self) -> &[RealmId] {
        &self.higher_realms
    }

    pub fn parts(&self) -> impl Iterator<Item = &ConfigurationPart> {
        self.parts.values()
    }

    pub fn part(&self, part_id: PartId) -> Option<&ConfigurationPart> {
        self.parts.get(&part_id)
    }

    pub(crate) fn add_part(&mut self, part: ConfigurationPart) {
        self.parts.insert(part.instance_id(), part);
    }

    /// Links of `daemon_type` able to serve this realm.
    ///
    /// A link qualifies when it is declared in this realm, or in a realm above
    /// it while managing sub-realms. Masters come before spares, then
    /// declaration order.
    pub fn get_potential_satellites_by_type(
        &self,
        links: &LinkArena,
        daemon_type: DaemonType,
    ) -> Vec<LinkId> {
        let mut potential: Vec<_> = links
            .of_type(daemon_type)
            .filter(|link| {
                link.realm() == self.id
                    || (link.manage_sub_realms() && self.higher_realms.contains(&link.realm()))
            })
            .map(|link| (link.spare(), link.id()))
            .collect();
        potential.sort();
        potential.into_iter().map(|(_, id)| id).collect()
    }

    /// Satellites of `daemon_type` the realm needs to be fully served
    pub fn get_nb_of_must_have_satellites(&self, daemon_type: DaemonType) -> usize {
        self.nb_must_have.get(&daemon_type).copied().unwrap_or(0)
    }

    fn refresh_must_have(&mut self, links: &LinkArena) {
        for daemon_type in SATELLITES {
            let count = self.must_have.get(daemon_type).unwrap_or_else(|| {
                self.get_potential_satellites_by_type(links, daemon_type)
                    .into_iter()
                    .filter(|id| !links[*id].spare())
                    .count()
            });
            self.nb_must_have.insert(daemon_type, count);
        }
    }

    pub fn need_dispatch(&self, daemon_type: DaemonType, part_id: PartId) -> bool {
        self.to_satellites_need_dispatch
            .get(&daemon_type)
            .and_then(|parts| parts.get(&part_id))
            .copied()
            .unwrap_or(false)
    }

    pub fn managed_by(&self, daemon_type: DaemonType, part_id: PartId) -> &[LinkId] {
        self.to_satellites_managed_by
            .get(&daemon_type)
            .and_then(|parts| parts.get(&part_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn scheduler_pointer(
        &self,
        daemon_type: DaemonType,
        part_id: PartId,
    ) -> Option<&SchedulerPointer> {
        self.to_satellites
            .get(&daemon_type)
            .and_then(|parts| parts.get(&part_id))
    }

    pub(crate) fn set_need_dispatch(&mut self, daemon_type: DaemonType, part_id: PartId, need: bool) {
        self.to_satellites_need_dispatch
            .entry(daemon_type)
            .or_default()
            .insert(part_id, need);
    }

    pub(crate) fn set_pointer(&mut self, daemon_type: DaemonType, pointer: SchedulerPointer) {
        self.to_satellites
            .entry(daemon_type)
            .or_default()
            .insert(pointer.part_id, pointer);
    }

    pub(crate) fn managed_by_mut(&mut self, daemon_type: DaemonType, part_id: PartId) -> &mut Vec<LinkId> {
        self.to_satellites_managed_by
            .entry(daemon_type)
            .or_default()
            .entry(part_id)
            .or_default()
    }
}

/// The realm tree of a configuration generation
#[derive(Debug)]
pub struct Realms {
    realms: Vec<Realm>,
    default_realm: RealmId,
}

impl Realms {
    /// Build the tree, validating names, membership and acyclicity.
    ///
    /// Without any declared realm a single default realm is created. Without a
    /// realm flagged as default the first one becomes the default.
    pub fn new(configs: &[RealmConfig]) -> Result<Self, ConstructionError> {
        let implicit;
        let configs = if configs.is_empty() {
            implicit = [RealmConfig {
                name: DEFAULT_REALM_NAME.to_string(),
                default: true,
                members: Vec::new(),
                must_have: MustHave::default(),
            }];
            &implicit[..]
        } else {
            configs
        };

        let mut by_name = HashMap::new();
        let mut realms = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            if by_name.insert(config.name.as_str(), RealmId(index)).is_some() {
                return Err(ConstructionError::DuplicateRealm(config.name.clone()));
            }
            realms.push(Realm::new(RealmId(index), config));
        }

        let mut parent: HashMap<RealmId, RealmId> = HashMap::new();
        for (index, config) in configs.iter().enumerate() {
            for member in &config.members {
                let member_id = *by_name
                    .get(member.as_str())
                    .ok_or_else(|| ConstructionError::UnknownRealm(member.clone()))?;
                if member_id == RealmId(index) {
                    return Err(ConstructionError::InvalidRealmTree(format!(
                        "realm '{member}' is a member of itself"
                    )));
                }
                if let Some(previous) = parent.insert(member_id, RealmId(index)) {
                    return Err(ConstructionError::InvalidRealmTree(format!(
                        "realm '{member}' is a member of both '{}' and '{}'",
                        configs[previous.0].name, config.name
                    )));
                }
                realms[index].realm_members.push(member_id);
            }
        }

        for realm in realms.iter_mut() {
            let mut current = realm.id;
            while let Some(up) = parent.get(&current).copied() {
                if up == realm.id || realm.higher_realms.contains(&up) {
                    return Err(ConstructionError::InvalidRealmTree(format!(
                        "realm '{}' is its own ancestor",
                        realm.name
                    )));
                }
                realm.higher_realms.push(up);
                current = up;
            }
        }

        let ancestors: Vec<Vec<RealmId>> = realms.iter().map(|r| r.higher_realms.clone()).collect();
        for realm in realms.iter_mut() {
            realm.all_sub_members = ancestors
                .iter()
                .enumerate()
                .filter(|(_, higher)| higher.contains(&realm.id))
                .map(|(index, _)| RealmId(index))
                .collect();
        }

        let defaults: Vec<_> = realms.iter().filter(|r| r.default).map(|r| r.id).collect();
        let default_realm = match defaults.as_slice() {
            [] => {
                realms[0].default = true;
                RealmId(0)
            }
            [single] => *single,
            [first, second, ..] => {
                return Err(ConstructionError::InvalidRealmTree(format!(
                    "realms '{}' and '{}' are both flagged as default",
                    realms[first.0].name, realms[second.0].name
                )));
            }
        };

        Ok(Self {
            realms,
            default_realm,
        })
    }

    pub fn default_realm(&self) -> RealmId {
        self.default_realm
    }

    pub fn by_name(&self, name: &str) -> Option<RealmId> {
        self.realms.iter().find(|r| r.name == name).map(|r| r.id)
    }

    /// Resolve an optional realm reference, falling back to the default realm
    pub fn resolve(&self, name: Option<&str>) -> Result<RealmId, ConstructionError> {
        match name {
            None => Ok(self.default_realm),
            Some(name) => self
                .by_name(name)
                .ok_or_else(|| ConstructionError::UnknownRealm(name.to_string())),
        }
    }

    pub fn get(&self, id: RealmId) -> Option<&Realm> {
        self.realms.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.realms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.realms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Realm> {
        self.realms.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = RealmId> + use<> {
        (0..self.realms.len()).map(RealmId)
    }

    /// Recompute every realm's must-have counts from the declared links
    pub fn refresh_must_have(&mut self, links: &LinkArena) {
        for realm in &mut self.realms {
            realm.refresh_must_have(links);
        }
    }

    pub fn parts(&self) -> impl Iterator<Item = &ConfigurationPart> {
        self.realms.iter().flat_map(|realm| realm.parts())
    }
}

impl std::ops::Index<RealmId> for Realms {
    type Output = Realm;

    fn index(&self, id: RealmId) -> &Self::Output {
        &self.realms[id.0]
    }
}

impl std::ops::IndexMut<RealmId> for Realms {
    fn index_mut(&mut self, id: RealmId) -> &mut Self::Output {
        &mut self.realms[id.0]
    }
}
