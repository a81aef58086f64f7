// Input broadcasting
// Maps raw key names to game actions and mirrors press/release edges to
// every peer as `keydown` / `keyup` custom events, so remote input feeds
// the same observer pipeline as local input.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::config::InputConfig;
use crate::events::{EventHandlers, HandlerId};
use crate::net::{ConnectionEvent, ConnectionManager, Envelope};
use crate::transport::PeerId;

const KEYDOWN_EVENT: &str = "keydown";
const KEYUP_EVENT: &str = "keyup";

/// A press or release edge for one player's bound action. Local and remote
/// edges are indistinguishable to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    pub player_id: PeerId,
    pub action: String,
    pub pressed: bool,
}

struct InputInner {
    conman: ConnectionManager,
    local: PeerId,
    bindings: HashMap<String, String>,
    pressed: Mutex<HashSet<(PeerId, String)>>,
    events: EventHandlers<InputEvent>,
    conn_handler: Mutex<Option<HandlerId>>,
}

#[derive(Clone)]
pub struct InputBroadcaster {
    inner: Arc<InputInner>,
}

impl InputBroadcaster {
    /// Configured bindings extend the standard arrow-key/space set; a
    /// configured binding for the same key wins.
    pub fn new(conman: ConnectionManager, local: PeerId, config: &InputConfig) -> Self {
        let mut bindings: HashMap<String, String> = [
            ("ArrowUp", "up"),
            ("ArrowDown", "down"),
            ("ArrowLeft", "left"),
            ("ArrowRight", "right"),
            (" ", "action"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for binding in &config.bindings {
            bindings.insert(binding.key.clone(), binding.action.clone());
        }

        let inner = Arc::new(InputInner {
            conman: conman.clone(),
            local,
            bindings,
            pressed: Mutex::new(HashSet::new()),
            events: EventHandlers::new(),
            conn_handler: Mutex::new(None),
        });

        let hook = inner.clone();
        let handler = conman.on(move |event| {
            if let ConnectionEvent::Data { remote, envelope } = event {
                if let Envelope::CustomEvent { event_name, data } = envelope {
                    match event_name.as_str() {
                        KEYDOWN_EVENT => hook.apply_remote(remote, data, true),
                        KEYUP_EVENT => hook.apply_remote(remote, data, false),
                        _ => {}
                    }
                }
            }
        });
        *inner.conn_handler.lock().expect("handler lock") = Some(handler);

        Self { inner }
    }

    /// Local key press. Unbound keys and auto-repeats are ignored.
    pub fn key_down(&self, key: &str) {
        self.edge(key, true);
    }

    /// Local key release.
    pub fn key_up(&self, key: &str) {
        self.edge(key, false);
    }

    /// Whether a player currently holds an action, local or remote.
    pub fn is_pressed(&self, player: &PeerId, action: &str) -> bool {
        self.inner
            .pressed
            .lock()
            .expect("pressed lock")
            .contains(&(player.clone(), action.to_string()))
    }

    pub fn on(&self, handler: impl Fn(&InputEvent) + Send + Sync + 'static) -> HandlerId {
        self.inner.events.on(handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn destroy(&self) {
        if let Some(handler) = self.inner.conn_handler.lock().expect("handler lock").take() {
            self.inner.conman.off(handler);
        }
    }

    fn edge(&self, key: &str, pressed: bool) {
        let Some(action) = self.inner.bindings.get(key).cloned() else {
            return;
        };
        let entry = (self.inner.local.clone(), action.clone());
        {
            let mut held = self.inner.pressed.lock().expect("pressed lock");
            let changed = if pressed {
                held.insert(entry)
            } else {
                held.remove(&entry)
            };
            if !changed {
                return; // auto-repeat or release without press
            }
        }

        let name = if pressed { KEYDOWN_EVENT } else { KEYUP_EVENT };
        self.inner.conman.broadcast(&Envelope::CustomEvent {
            event_name: name.to_string(),
            data: json!({ "playerId": self.inner.local, "action": action }),
        });
        self.inner.events.emit(&InputEvent {
            player_id: self.inner.local.clone(),
            action,
            pressed,
        });
    }
}

impl InputInner {
    fn apply_remote(&self, remote: &PeerId, data: &Value, pressed: bool) {
        let Some(action) = data.get("action").and_then(Value::as_str) else {
            debug!(%remote, "input event without action, dropping");
            return;
        };
        // The sender's claimed playerId is advisory; the connection identity
        // is authoritative.
        let entry = (remote.clone(), action.to_string());
        {
            let mut held = self.pressed.lock().expect("pressed lock");
            if pressed {
                held.insert(entry);
            } else {
                held.remove(&entry);
            }
        }
        self.events.emit(&InputEvent {
            player_id: remote.clone(),
            action: action.to_string(),
            pressed,
        });
    }
}
