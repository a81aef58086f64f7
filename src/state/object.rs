// Replicated object records
// Two id namespaces by prefix: player entities (one per connected peer) and
// ephemeral game objects. Known fields are typed; everything else lands in
// an open extension map so gameplay-specific attributes replicate untouched.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::transport::PeerId;

pub const PLAYER_PREFIX: &str = "player_";
pub const OBJECT_PREFIX: &str = "obj_";

/// Cosmetic palette assigned to players at creation.
pub const PLAYER_PALETTE: &[&str] = &[
    "#FF5733", "#33FF57", "#3357FF", "#F3FF33", "#FF33F3", "#33FFF3", "#FF33A8", "#8A33FF",
    "#33FF8A", "#FF8A33",
];

/// Open attribute bag: the unit of replication on the wire.
pub type Attributes = Map<String, Value>;

/// Globally unique object identifier.
///
/// Uniqueness comes from construction: player ids embed the peer's transport
/// identity, game-object ids embed a millisecond timestamp plus a random
/// suffix. No two peers mint the same id independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    /// The player id owned by a given peer.
    pub fn for_peer(peer: &PeerId) -> Self {
        Self(format!("{PLAYER_PREFIX}{peer}"))
    }

    /// Mint a fresh game-object id.
    pub fn mint_object() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let mut rng = rand::thread_rng();
        let suffix: String = (0..5)
            .map(|_| char::from_digit(rng.gen_range(0..36), 36).unwrap_or('0'))
            .collect();
        Self(format!("{OBJECT_PREFIX}{millis}_{suffix}"))
    }

    pub fn is_player(&self) -> bool {
        self.0.starts_with(PLAYER_PREFIX)
    }

    /// Short id fragment used in placeholder display names. Remote peers
    /// control id contents, so truncation must respect char boundaries.
    pub fn short_suffix(&self) -> &str {
        let tail = self.0.strip_prefix(PLAYER_PREFIX).unwrap_or(&self.0);
        let end = tail
            .char_indices()
            .nth(5)
            .map(|(i, _)| i)
            .unwrap_or(tail.len());
        &tail[..end]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A player entity. `color` is assigned once at creation and carried forward
/// across patches that omit it, so position-only updates never flicker it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub extra: Attributes,
}

impl PlayerRecord {
    /// Default record synthesized when a patch arrives for an unknown player
    /// id (out-of-order delivery). The creation patch overwrites these
    /// fields when it lands.
    pub fn placeholder(id: &ObjectId) -> Self {
        Self {
            name: format!("Player {}", id.short_suffix()),
            x: 0.0,
            y: 0.0,
            color: random_color().to_string(),
            extra: Attributes::new(),
        }
    }

    pub fn apply_patch(&mut self, patch: &Attributes) {
        for (key, value) in patch {
            match key.as_str() {
                "name" => {
                    if let Some(name) = value.as_str() {
                        self.name = name.to_string();
                    }
                }
                "x" => {
                    if let Some(x) = value.as_f64() {
                        self.x = x;
                    }
                }
                "y" => {
                    if let Some(y) = value.as_f64() {
                        self.y = y;
                    }
                }
                "color" => {
                    if let Some(color) = value.as_str() {
                        self.color = color.to_string();
                    }
                }
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    pub fn to_attributes(&self) -> Attributes {
        let mut attrs = self.extra.clone();
        attrs.insert("name".into(), Value::from(self.name.clone()));
        attrs.insert("x".into(), Value::from(self.x));
        attrs.insert("y".into(), Value::from(self.y));
        attrs.insert("color".into(), Value::from(self.color.clone()));
        attrs
    }
}

/// An ephemeral game object (projectile, pickup, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct GameObjectRecord {
    /// Application-defined discriminant ("bullet", "food", ...).
    pub kind: String,
    /// Player id of the peer that created the object.
    pub owner_id: Option<ObjectId>,
    pub attrs: Attributes,
}

impl GameObjectRecord {
    pub fn from_attributes(attrs: &Attributes) -> Self {
        let mut record = Self {
            kind: String::new(),
            owner_id: None,
            attrs: Attributes::new(),
        };
        record.apply_patch(attrs);
        record
    }

    pub fn apply_patch(&mut self, patch: &Attributes) {
        for (key, value) in patch {
            match key.as_str() {
                "type" => {
                    if let Some(kind) = value.as_str() {
                        self.kind = kind.to_string();
                    }
                }
                "ownerId" => {
                    if let Some(owner) = value.as_str() {
                        self.owner_id = Some(ObjectId::from(owner));
                    }
                }
                _ => {
                    self.attrs.insert(key.clone(), value.clone());
                }
            }
        }
    }

    pub fn to_attributes(&self) -> Attributes {
        let mut attrs = self.attrs.clone();
        attrs.insert("type".into(), Value::from(self.kind.clone()));
        if let Some(owner) = &self.owner_id {
            attrs.insert("ownerId".into(), Value::from(owner.to_string()));
        }
        attrs
    }
}

/// Tagged union over the two id namespaces.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicatedObject {
    Player(PlayerRecord),
    Object(GameObjectRecord),
}

impl ReplicatedObject {
    pub fn apply_patch(&mut self, patch: &Attributes) {
        match self {
            Self::Player(p) => p.apply_patch(patch),
            Self::Object(o) => o.apply_patch(patch),
        }
    }

    pub fn to_attributes(&self) -> Attributes {
        match self {
            Self::Player(p) => p.to_attributes(),
            Self::Object(o) => o.to_attributes(),
        }
    }

    pub fn as_player(&self) -> Option<&PlayerRecord> {
        match self {
            Self::Player(p) => Some(p),
            Self::Object(_) => None,
        }
    }
}

pub fn random_color() -> &'static str {
    let mut rng = rand::thread_rng();
    PLAYER_PALETTE[rng.gen_range(0..PLAYER_PALETTE.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_object_id_namespaces() {
        let player = ObjectId::for_peer(&"room1".into());
        assert!(player.is_player());
        assert_eq!(player.as_str(), "player_room1");

        let obj = ObjectId::mint_object();
        assert!(!obj.is_player());
        assert!(obj.as_str().starts_with(OBJECT_PREFIX));
    }

    #[test]
    fn test_short_suffix_handles_multibyte_ids() {
        // Ids come from remote peers and may hold any valid JSON string.
        let id = ObjectId::from("player_ééé");
        assert_eq!(id.short_suffix(), "ééé");

        let long = ObjectId::from("player_日本語のなまえ");
        assert_eq!(long.short_suffix(), "日本語のな");

        let player = PlayerRecord::placeholder(&id);
        assert_eq!(player.name, "Player ééé");
    }

    #[test]
    fn test_player_patch_routes_known_and_unknown_keys() {
        let mut player = PlayerRecord::placeholder(&"player_abcdef".into());
        player.apply_patch(&attrs(json!({
            "name": "Ana", "x": 10.0, "y": 20.0, "hp": 3
        })));

        assert_eq!(player.name, "Ana");
        assert_eq!(player.x, 10.0);
        assert_eq!(player.y, 20.0);
        assert_eq!(player.extra["hp"], json!(3));
    }

    #[test]
    fn test_color_carries_forward_when_patch_omits_it() {
        let mut player = PlayerRecord::placeholder(&"player_abcdef".into());
        player.color = "#3357FF".to_string();

        player.apply_patch(&attrs(json!({"x": 1.0, "y": 2.0})));
        assert_eq!(player.color, "#3357FF");

        player.apply_patch(&attrs(json!({"color": "#FF5733"})));
        assert_eq!(player.color, "#FF5733");
    }

    #[test]
    fn test_game_object_round_trips_through_attributes() {
        let record = GameObjectRecord::from_attributes(&attrs(json!({
            "type": "bullet", "ownerId": "player_room1", "x": 5, "vx": -1.5
        })));
        assert_eq!(record.kind, "bullet");
        assert_eq!(record.owner_id, Some("player_room1".into()));

        let bag = record.to_attributes();
        assert_eq!(bag["type"], json!("bullet"));
        assert_eq!(bag["ownerId"], json!("player_room1"));
        assert_eq!(bag["vx"], json!(-1.5));
    }
}
