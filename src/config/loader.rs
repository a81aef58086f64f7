// Configuration file loading and creation

use super::types::SessionConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the path to the configuration file
pub fn get_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("peerplay");

    // Create config directory if it doesn't exist
    fs::create_dir_all(&path).ok();

    path.push("config.toml");
    path
}

/// Load configuration from file, or create default if it doesn't exist
pub fn load_config() -> Result<SessionConfig, io::Error> {
    let config_path = get_config_path();

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("failed to parse config file, using defaults: {}", e);
                Ok(SessionConfig::default())
            }
        }
    } else {
        // Create default config file
        create_default_config(&config_path)?;
        Ok(SessionConfig::default())
    }
}

/// Create a default configuration file with helpful comments
pub fn create_default_config(path: &Path) -> Result<(), io::Error> {
    let config = SessionConfig::default();
    let toml_string =
        toml::to_string_pretty(&config).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    // Add helpful header comments
    let commented_toml = format!(
        "# peerplay configuration file\n\
         # Edit this file to customize session behavior\n\
         #\n\
         # tick_rate: host snapshot broadcasts per second\n\
         # stale_after_secs: cached rooms older than this are swept\n\
         # input bindings: pairs of raw key code and broadcast action name\n\n\
         {}",
        toml_string
    );

    fs::write(path, commented_toml)?;
    tracing::info!("created default config file at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serialization() {
        let config = SessionConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        // Parsed values must match the original defaults
        let parsed: SessionConfig = toml::from_str(&toml_string).unwrap();

        assert_eq!(parsed.session.tick_rate, config.session.tick_rate);
        assert_eq!(
            parsed.matchmaking.heartbeat_interval_secs,
            config.matchmaking.heartbeat_interval_secs
        );
        assert_eq!(
            parsed.matchmaking.default_game_mode,
            config.matchmaking.default_game_mode
        );
        assert_eq!(parsed.voice.enabled, config.voice.enabled);
    }

    #[test]
    fn test_partial_config_with_defaults() {
        // Should be able to parse partial config with #[serde(default)]
        let partial_toml = r#"
            [session]
            debug = true
            tick_rate = 30
            connect_timeout_secs = 5
        "#;

        let config: SessionConfig = toml::from_str(partial_toml).unwrap();

        // Custom values
        assert!(config.session.debug);
        assert_eq!(config.session.tick_rate, 30);

        // Default values should still be there
        assert_eq!(config.matchmaking.stale_after_secs, 300);
        assert_eq!(config.matchmaking.default_max_players, 8);
        assert_eq!(config.matchmaking.region, "global");
    }
}
