use super::{DaemonLink, DaemonType, LinkId};

/// Every daemon link of a configuration generation, indexed by [`LinkId`]
///
/// Ids are positions in declaration order; links are never removed, a reload
/// builds a new arena.
#[derive(Debug, Default)]
pub struct LinkArena {
    links: Vec<DaemonLink>,
}

impl LinkArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id handed out by [`LinkArena::push`]
    pub fn next_id(&self) -> LinkId {
        LinkId(self.links.len())
    }

    pub fn push(&mut self, link: DaemonLink) -> LinkId {
        let id = self.next_id();
        debug_assert_eq!(link.id(), id);
        self.links.push(link);
        id
    }

    pub fn get(&self, id: LinkId) -> Option<&DaemonLink> {
        self.links.get(id.0)
    }

    pub fn get_mut(&mut self, id: LinkId) -> Option<&mut DaemonLink> {
        self.links.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DaemonLink> {
        self.links.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DaemonLink> {
        self.links.iter_mut()
    }

    pub fn of_type(&self, daemon_type: DaemonType) -> impl Iterator<Item = &DaemonLink> {
        self.links
            .iter()
            .filter(move |link| link.daemon_type() == daemon_type)
    }

    pub fn find(&self, daemon_type: DaemonType, name: &str) -> Option<&DaemonLink> {
        self.of_type(daemon_type).find(|link| link.name() == name)
    }

    pub fn find_mut(&mut self, daemon_type: DaemonType, name: &str) -> Option<&mut DaemonLink> {
        self.links
            .iter_mut()
            .find(|link| link.daemon_type() == daemon_type && link.name() == name)
    }
}

impl std::ops::Index<LinkId> for LinkArena {
    type Output = DaemonLink;

    fn index(&self, id: LinkId) -> &Self::Output {
        &self.links[id.0]
    }
}

impl std::ops::IndexMut<LinkId> for LinkArena {
    fn index_mut(&mut self, id: LinkId) -> &mut Self::Output {
        &mut self.links[id.0]
    }
}
