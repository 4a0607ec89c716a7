use std::collections::HashMap;

use tracing::warn;

use crate::handle::{CapturedId, ObjectKind};

/// An object record that can be stored in a [`HandleTable`].
pub trait TrackedObject {
    fn captured_id(&self) -> CapturedId;
    fn kind(&self) -> ObjectKind;
    /// Raw live handle on the replay device, 0 when none exists (yet).
    fn live_handle(&self) -> u64;
    fn set_live_handle(&mut self, live: u64);
}

/// Owns every tracked object of a replay session, one bucket per
/// [`ObjectKind`], with two views:
/// - captured identity -> object (used when replaying recorded calls)
/// - live handle -> captured identities (used to resolve handles the driver
///   hands back)
///
/// Non-dispatchable handles may alias: a driver can return the same value
/// for two distinct objects created with identical parameters. The live
/// view keeps every alias in insertion order and lookups resolve to the
/// most recent one.
///
/// Both views are only mutated through `&mut self`, so a caller holding a
/// shared reference never observes one view updated without the other.
pub struct HandleTable<W> {
    by_id: Vec<HashMap<CapturedId, W>>,
    by_live: Vec<HashMap<u64, Vec<CapturedId>>>,
}

impl<W: TrackedObject> HandleTable<W> {
    pub fn new() -> Self {
        Self {
            by_id: (0..ObjectKind::COUNT).map(|_| HashMap::new()).collect(),
            by_live: (0..ObjectKind::COUNT).map(|_| HashMap::new()).collect(),
        }
    }

    /// Insert an object keyed by its captured identity.
    /// Returns false, leaving the existing entry in place, if the identity
    /// is already registered in that bucket.
    pub fn insert(&mut self, object: W) -> bool {
        let kind = object.kind();
        let id = object.captured_id();
        let live = object.live_handle();

        if self.by_id[kind.index()].contains_key(&id) {
            return false;
        }

        self.link_live(kind, id, live);
        self.by_id[kind.index()].insert(id, object);
        true
    }

    /// Remove an object. Returns true if an entry existed.
    pub fn remove(&mut self, kind: ObjectKind, id: CapturedId) -> bool {
        self.take(kind, id).is_some()
    }

    /// Remove an object and hand ownership back to the caller. Other
    /// objects sharing its live handle stay resolvable.
    pub fn take(&mut self, kind: ObjectKind, id: CapturedId) -> Option<W> {
        let object = self.by_id[kind.index()].remove(&id)?;
        self.unlink_live(kind, id, object.live_handle());
        Some(object)
    }

    pub fn get(&self, kind: ObjectKind, id: CapturedId) -> Option<&W> {
        self.by_id[kind.index()].get(&id)
    }

    /// Mutable access for metadata updates. The live handle must be changed
    /// through [`HandleTable::update_live`] so the live view stays in sync.
    pub fn get_mut(&mut self, kind: ObjectKind, id: CapturedId) -> Option<&mut W> {
        self.by_id[kind.index()].get_mut(&id)
    }

    pub fn contains(&self, kind: ObjectKind, id: CapturedId) -> bool {
        self.by_id[kind.index()].contains_key(&id)
    }

    /// Resolve a live handle back to its object.
    pub fn get_by_live(&self, kind: ObjectKind, live: u64) -> Option<&W> {
        let id = self.captured_for_live(kind, live)?;
        self.by_id[kind.index()].get(&id)
    }

    pub fn captured_for_live(&self, kind: ObjectKind, live: u64) -> Option<CapturedId> {
        self.aliases_for_live(kind, live).last().copied()
    }

    /// Every captured identity currently sharing `live`, oldest first.
    pub fn aliases_for_live(&self, kind: ObjectKind, live: u64) -> &[CapturedId] {
        self.by_live[kind.index()]
            .get(&live)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Re-point an object at a new live handle (object recreated on the
    /// replay device). Returns false if the object is unknown.
    pub fn update_live(&mut self, kind: ObjectKind, id: CapturedId, live: u64) -> bool {
        let Some(object) = self.by_id[kind.index()].get_mut(&id) else {
            return false;
        };
        let old = object.live_handle();
        object.set_live_handle(live);

        self.unlink_live(kind, id, old);
        self.link_live(kind, id, live);
        true
    }

    fn link_live(&mut self, kind: ObjectKind, id: CapturedId, live: u64) {
        if live == 0 {
            return;
        }
        let aliases = self.by_live[kind.index()].entry(live).or_default();
        if !aliases.is_empty() && kind.is_dispatchable() {
            warn!(
                "live {} handle {:#x} of {} already belongs to {:?}",
                kind, live, id, aliases
            );
        }
        aliases.push(id);
    }

    fn unlink_live(&mut self, kind: ObjectKind, id: CapturedId, live: u64) {
        if live == 0 {
            return;
        }
        let bucket = &mut self.by_live[kind.index()];
        if let Some(aliases) = bucket.get_mut(&live) {
            aliases.retain(|alias| *alias != id);
            if aliases.is_empty() {
                bucket.remove(&live);
            }
        }
    }

    /// Apply `visitor` to every object of one category. Order is unspecified.
    pub fn visit_all<F>(&self, kind: ObjectKind, mut visitor: F)
    where
        F: FnMut(&W),
    {
        for object in self.by_id[kind.index()].values() {
            visitor(object);
        }
    }

    pub fn len(&self, kind: ObjectKind) -> usize {
        self.by_id[kind.index()].len()
    }

    pub fn total_len(&self) -> usize {
        self.by_id.iter().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.iter().all(HashMap::is_empty)
    }
}

impl<W: TrackedObject> Default for HandleTable<W> {
    fn default() -> Self {
        Self::new()
    }
}
