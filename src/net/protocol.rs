// Envelope exchanged over transport data channels
// Tagged JSON values; the transport owns wire serialization

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::matchmaking::RoomRecord;
use crate::state::{Attributes, ObjectId};

/// Messages exchanged between peers during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    /// Partial attribute patch for one replicated object
    #[serde(rename_all = "camelCase")]
    StateUpdate { object_id: ObjectId, data: Attributes },

    /// Application-level pub/sub event, re-triggered locally on receipt
    #[serde(rename_all = "camelCase")]
    CustomEvent { event_name: String, data: Value },

    /// Catch-up request from a freshly joined peer; the host answers
    /// immediately with one StateUpdate per object
    FullStateRequest,

    /// Networked delete for a replicated object
    #[serde(rename_all = "camelCase")]
    ObjectRemoval { object_id: ObjectId },

    /// Host-originated room record for the matchmaking directory
    RoomUpdate { room: RoomRecord },

    /// Host withdrew its room
    #[serde(rename_all = "camelCase")]
    RoomRemoval { room_id: String },
}

impl Envelope {
    /// Serialize for the transport's structured send primitive.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decode an inbound payload. `None` for unknown envelope tags or
    /// malformed shapes; forward compatibility over strictness.
    pub fn from_value(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_update_wire_shape() {
        let env = Envelope::StateUpdate {
            object_id: "player_room1".into(),
            data: json!({"x": 10.0, "y": 20.0}).as_object().unwrap().clone(),
        };
        let value = env.to_value();

        assert_eq!(value["type"], json!("stateUpdate"));
        assert_eq!(value["objectId"], json!("player_room1"));
        assert_eq!(value["data"]["x"], json!(10.0));

        match Envelope::from_value(&value) {
            Some(Envelope::StateUpdate { object_id, data }) => {
                assert_eq!(object_id.as_str(), "player_room1");
                assert_eq!(data["y"], json!(20.0));
            }
            other => panic!("didn't round-trip: {:?}", other),
        }
    }

    #[test]
    fn test_custom_event_wire_shape() {
        let env = Envelope::CustomEvent {
            event_name: "explosion".into(),
            data: json!({"x": 1, "y": 2}),
        };
        let value = env.to_value();
        assert_eq!(value["type"], json!("customEvent"));
        assert_eq!(value["eventName"], json!("explosion"));
    }

    #[test]
    fn test_control_tags() {
        assert_eq!(Envelope::FullStateRequest.to_value()["type"], json!("fullStateRequest"));
        let removal = Envelope::ObjectRemoval {
            object_id: "obj_1_abcde".into(),
        };
        assert_eq!(removal.to_value()["type"], json!("objectRemoval"));
        assert_eq!(removal.to_value()["objectId"], json!("obj_1_abcde"));
    }

    #[test]
    fn test_unknown_tag_is_dropped() {
        assert!(Envelope::from_value(&json!({"type": "futureThing", "data": 1})).is_none());
        assert!(Envelope::from_value(&json!("not an object")).is_none());
    }
}
