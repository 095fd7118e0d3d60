//! Configuration loading and persistence.
//!
//! Reads `<config dir>/hookwire/config.json`, then applies `HOOKWIRE_*`
//! environment overrides. Missing files and missing fields fall back to
//! defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::constants::{SOCKET_INDEX_END, SOCKET_INDEX_START, WS_PORT_END, WS_PORT_START};
use crate::logging::{BadgeColor, DebugFilter, LoggerConfig, DEBUG_ENV_VAR};
use crate::negotiate::CandidateRange;

const CONFIG_FILE: &str = "config.json";

/// WebSocket transport settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Whether the transport is started.
    pub enabled: bool,
    /// First port tried.
    pub port_start: u16,
    /// Last port tried (inclusive).
    pub port_end: u16,
    /// Origins (exact or glob) allowed to connect.
    pub allowed_origins: Vec<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port_start: WS_PORT_START,
            port_end: WS_PORT_END,
            allowed_origins: Vec::new(),
        }
    }
}

/// Local socket transport settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SocketConfig {
    /// Whether the transport is started.
    pub enabled: bool,
    /// First socket index tried.
    pub index_start: u16,
    /// Last socket index tried (inclusive).
    pub index_end: u16,
    /// Socket directory; defaults to the runtime directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index_start: SOCKET_INDEX_START,
            index_end: SOCKET_INDEX_END,
            dir: None,
        }
    }
}

/// Logging settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Colored transport badges.
    pub color: bool,
    /// Debug filter spec (see [`DebugFilter::parse`]).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

/// Configuration for hookwire.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// WebSocket transport.
    pub websocket: WebSocketConfig,
    /// Local socket transport.
    pub socket: SocketConfig,
    /// Logging.
    pub log: LogConfig,
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `HOOKWIRE_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Some(dir) = std::env::var_os("HOOKWIRE_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("hookwire")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from the config directory, with environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads `config.json` from `dir`; defaults if the file does not exist.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Apply `HOOKWIRE_*` overrides read through `lookup`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ports) = lookup("HOOKWIRE_WS_PORTS") {
            match parse_range(&ports) {
                Some((start, end)) => {
                    self.websocket.port_start = start;
                    self.websocket.port_end = end;
                }
                None => log::warn!("Ignoring HOOKWIRE_WS_PORTS={ports:?} (expected start-end)"),
            }
        }

        if let Some(origins) = lookup("HOOKWIRE_ORIGINS") {
            self.websocket.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = lookup("HOOKWIRE_WEBSOCKET") {
            match parse_flag(&value) {
                Some(enabled) => self.websocket.enabled = enabled,
                None => log::warn!("Ignoring HOOKWIRE_WEBSOCKET={value:?}"),
            }
        }

        if let Some(value) = lookup("HOOKWIRE_SOCKET") {
            match parse_flag(&value) {
                Some(enabled) => self.socket.enabled = enabled,
                None => log::warn!("Ignoring HOOKWIRE_SOCKET={value:?}"),
            }
        }

        if let Some(dir) = lookup("HOOKWIRE_SOCKET_DIR").filter(|d| !d.is_empty()) {
            self.socket.dir = Some(PathBuf::from(dir));
        }

        if let Some(spec) = lookup(DEBUG_ENV_VAR) {
            self.log.debug = Some(spec);
        }
    }

    /// Persists the current configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Writes `config.json` into `dir`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Port range negotiated by the WebSocket transport.
    pub fn ws_ports(&self) -> CandidateRange {
        CandidateRange::new(self.websocket.port_start, self.websocket.port_end)
    }

    /// Index range negotiated by the socket transport.
    pub fn socket_indices(&self) -> CandidateRange {
        CandidateRange::new(self.socket.index_start, self.socket.index_end)
    }

    /// Logger configuration for a transport badge of `color`.
    pub fn logger_config(&self, color: BadgeColor) -> LoggerConfig {
        let mut logging = LoggerConfig::default();
        if self.log.color {
            logging = logging.with_color(color);
        }
        if let Some(spec) = &self.log.debug {
            logging = logging.with_debug(DebugFilter::parse(spec));
        }
        logging
    }
}

/// Parse `start-end` into an inclusive range.
fn parse_range(value: &str) -> Option<(u16, u16)> {
    let (start, end) = value.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

/// Parse a boolean flag: `1`/`true`/`yes`/`on` or `0`/`false`/`no`/`off`.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.websocket.enabled);
        assert_eq!(config.ws_ports(), CandidateRange::new(6463, 6472));
        assert!(config.websocket.allowed_origins.is_empty());
        assert!(config.socket.enabled);
        assert_eq!(config.socket_indices(), CandidateRange::new(0, 9));
        assert!(!config.log.color);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"websocket": {"allowed_origins": ["https://example.com"]}}"#).unwrap();
        assert_eq!(config.websocket.allowed_origins, vec!["https://example.com"]);
        assert_eq!(config.websocket.port_start, 6463);
        assert_eq!(config.socket, SocketConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert_eq!(Config::load_from(tmp.path()).unwrap(), Config::default());

        let mut config = Config::default();
        config.websocket.allowed_origins = vec!["https://*.example.com".into()];
        config.socket.dir = Some(PathBuf::from("/run/hookwire"));
        config.log.color = true;
        config.save_to(tmp.path()).unwrap();

        assert_eq!(Config::load_from(tmp.path()).unwrap(), config);

        #[cfg(unix)]
        {
            let mode = fs::metadata(tmp.path().join(CONFIG_FILE))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "{ not json").unwrap();
        assert!(Config::load_from(tmp.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(lookup(&[
            ("HOOKWIRE_WS_PORTS", "7000-7002"),
            ("HOOKWIRE_ORIGINS", "https://a.example, https://b.example ,"),
            ("HOOKWIRE_WEBSOCKET", "1"),
            ("HOOKWIRE_SOCKET", "0"),
            ("HOOKWIRE_SOCKET_DIR", "/tmp/ipc"),
            ("HOOKWIRE_DEBUG", "*,-socket"),
        ]));

        assert_eq!(config.ws_ports(), CandidateRange::new(7000, 7002));
        assert_eq!(
            config.websocket.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert!(config.websocket.enabled);
        assert!(!config.socket.enabled);
        assert_eq!(config.socket.dir, Some(PathBuf::from("/tmp/ipc")));
        assert_eq!(config.log.debug.as_deref(), Some("*,-socket"));
    }

    #[test]
    fn test_bad_env_values_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(lookup(&[
            ("HOOKWIRE_WS_PORTS", "lots"),
            ("HOOKWIRE_SOCKET", "maybe"),
        ]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_logger_config() {
        let mut config = Config::default();
        assert!(config.logger_config(BadgeColor::Blue).color.is_none());

        config.log.color = true;
        config.log.debug = Some("websocket".into());
        let logging = config.logger_config(BadgeColor::Blue);
        assert_eq!(logging.color, Some(BadgeColor::Blue));
        assert!(logging.debug.enabled_for("websocket"));
        assert!(!logging.debug.enabled_for("ipc-socket"));
    }
}
