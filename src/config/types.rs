// Session configuration types
// All settings with defaults matching the SDK's documented behavior

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub session: CoreConfig,
    #[serde(default)]
    pub matchmaking: MatchmakingConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub input: InputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    // Per-message debug logging (tracing subscriber setup stays the app's choice)
    pub debug: bool,

    // Host snapshot broadcasts per second
    pub tick_rate: u32,

    // Bounded wait for outbound connections, in seconds
    pub connect_timeout_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            debug: false,
            tick_rate: 20,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    // Whether hosting/joining wires up the room directory
    pub enabled: bool,

    // Staleness sweep interval in seconds
    pub heartbeat_interval_secs: u64,

    // Cached rooms older than this (since creation) are evicted by the sweep
    pub stale_after_secs: u64,

    // Defaults applied to room registration metadata
    pub default_max_players: u32,
    pub default_game_name: String,
    pub default_game_mode: String,

    // Region tag advertised in registered rooms
    pub region: String,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            heartbeat_interval_secs: 30,
            stale_after_secs: 300, // 5 minutes since room creation
            default_max_players: 8,
            default_game_name: "Untitled Game".to_string(),
            default_game_mode: "standard".to_string(),
            region: "global".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct VoiceConfig {
    // Whether hosting/joining wires up voice-chat signaling
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct InputConfig {
    // Whether hosting/joining wires up the input broadcaster
    pub enabled: bool,

    // Custom key bindings on top of the standard arrow/space set
    pub bindings: Vec<KeyBinding>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyBinding {
    // Raw key code as reported by the embedding application
    pub key: String,
    // Action name broadcast to peers
    pub action: String,
}
