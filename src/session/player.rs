use rand::Rng;
use serde_json::Value;

use crate::state::{random_color, Attributes, ObjectId};
use crate::transport::PeerId;

/// Starting attributes for this peer's own avatar: a random spawn point
/// inside the default play area, a palette color and a name derived from the
/// peer id. Everything is overridable through `move_player` patches.
pub fn spawn_attributes(peer: &PeerId) -> Attributes {
    let mut rng = rand::thread_rng();
    let mut attrs = Attributes::new();
    attrs.insert("name".into(), Value::from(default_name(peer)));
    attrs.insert("x".into(), Value::from(rng.gen_range(0.0..500.0)));
    attrs.insert("y".into(), Value::from(rng.gen_range(0.0..500.0)));
    attrs.insert("color".into(), Value::from(random_color()));
    attrs
}

fn default_name(peer: &PeerId) -> String {
    let prefix: String = peer.as_str().chars().take(5).collect();
    format!("Player {prefix}")
}

/// The player object id owned by a given peer.
pub fn player_object_id(peer: &PeerId) -> ObjectId {
    ObjectId::for_peer(peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_attributes_cover_the_required_keys() {
        let attrs = spawn_attributes(&"abcdef123".into());
        assert_eq!(attrs["name"], "Player abcde");
        let x = attrs["x"].as_f64().unwrap();
        let y = attrs["y"].as_f64().unwrap();
        assert!((0.0..500.0).contains(&x));
        assert!((0.0..500.0).contains(&y));
        assert!(attrs["color"].as_str().unwrap().starts_with('#'));
    }

    #[test]
    fn test_player_object_id_is_prefixed() {
        let id = player_object_id(&"abc".into());
        assert_eq!(id.as_str(), "player_abc");
    }
}
