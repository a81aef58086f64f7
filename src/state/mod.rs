// Replicated object store
// Flat mapping from object id to attribute bag with shallow-merge patch
// semantics: last writer per attribute key wins, no version checks. Any
// participant may patch any object; convergence is eventual, not linearizable.

pub mod object;

use std::collections::HashMap;

pub use object::{
    random_color, Attributes, GameObjectRecord, ObjectId, PlayerRecord, ReplicatedObject,
    OBJECT_PREFIX, PLAYER_PALETTE, PLAYER_PREFIX,
};

/// The shared store replicated across all peers of a session.
#[derive(Debug, Default)]
pub struct ReplicatedState {
    objects: HashMap<ObjectId, ReplicatedObject>,
}

impl ReplicatedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or fully replace an object from a complete attribute bag.
    pub fn set_object(&mut self, id: ObjectId, attrs: &Attributes) {
        let object = if id.is_player() {
            let mut player = PlayerRecord::placeholder(&id);
            player.apply_patch(attrs);
            ReplicatedObject::Player(player)
        } else {
            ReplicatedObject::Object(GameObjectRecord::from_attributes(attrs))
        };
        self.objects.insert(id, object);
    }

    /// Shallow-merge a partial attribute patch.
    ///
    /// Absent player-namespaced ids get a placeholder record first (default
    /// name, origin position, palette color), so a patch arriving before its
    /// creation message never fails; the creation's full patch later
    /// overwrites the placeholder fields. Absent object ids are created from
    /// exactly the patch.
    pub fn patch_object(&mut self, id: &ObjectId, patch: &Attributes) {
        match self.objects.get_mut(id) {
            Some(existing) => existing.apply_patch(patch),
            None => {
                self.set_object(id.clone(), patch);
            }
        }
    }

    pub fn get_object(&self, id: &ObjectId) -> Option<&ReplicatedObject> {
        self.objects.get(id)
    }

    /// Remove an object. Returns whether it existed.
    pub fn remove_object(&mut self, id: &ObjectId) -> bool {
        self.objects.remove(id).is_some()
    }

    /// Complete id → attribute-bag mapping, used for full-state resync.
    pub fn snapshot(&self) -> Vec<(ObjectId, Attributes)> {
        self.objects
            .iter()
            .map(|(id, object)| (id.clone(), object.to_attributes()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
