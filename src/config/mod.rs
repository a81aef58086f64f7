// Configuration module for peerplay
// Handles loading and managing session configuration from TOML file

pub mod loader;
pub mod types;

pub use loader::{create_default_config, get_config_path, load_config};
pub use types::{
    CoreConfig, InputConfig, KeyBinding, MatchmakingConfig, SessionConfig, VoiceConfig,
};
