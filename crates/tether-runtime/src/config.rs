//! Runtime configuration
//!
//! Loaded from JSON with durations in human form (`"250ms"`, `"2s"`), then
//! overlaid with `TETHER_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::{TetherError, TetherResult};

use crate::telemetry::LogFormat;

/// Discovery file location relative to a project root
pub const DEFAULT_DISCOVERY_PATH: &str = "Library/ProtocolInstance.json";

/// How the discovery file is observed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// OS notifications, falling back to polling when unavailable
    #[default]
    Native,
    Poll,
}

impl std::str::FromStr for WatchMode {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(WatchMode::Native),
            "poll" => Ok(WatchMode::Poll),
            other => Err(TetherError::Config(format!("unknown watch mode {other:?}"))),
        }
    }
}

/// Flat-map key names, one per bridged entity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeKeys {
    pub play: String,
    pub pause: String,
    pub step: String,
    pub refresh: String,
    pub session_initialized: String,
    pub log_entry: String,
    pub activate: String,
}

impl Default for BridgeKeys {
    fn default() -> Self {
        BridgeKeys {
            play: "UNITY_Play".into(),
            pause: "UNITY_Pause".into(),
            step: "UNITY_Step".into(),
            refresh: "UNITY_Refresh".into(),
            session_initialized: "UNITY_SessionInitialized".into(),
            log_entry: "UNITY_LogEntry".into(),
            activate: "UNITY_ActivateRider".into(),
        }
    }
}

/// tether runtime configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Discovery file written by the editor side
    pub discovery_path: PathBuf,
    pub watch_mode: WatchMode,
    /// Quiet period before a changed discovery file is read
    #[serde(with = "human_duration")]
    pub debounce: Duration,
    /// Poll period when polling is in use
    #[serde(with = "human_duration")]
    pub poll_interval: Duration,
    #[serde(with = "human_duration")]
    pub connect_timeout: Duration,
    /// Default timeout for calls
    #[serde(with = "human_duration")]
    pub call_timeout: Duration,
    /// Timeout of the reachability probe before opening a file
    #[serde(with = "human_duration")]
    pub probe_timeout: Duration,
    /// Version string published to the peer
    pub protocol_version: String,
    pub log_format: LogFormat,
    pub log_filter: String,
    pub bridge_keys: BridgeKeys,
}

impl Default for TetherConfig {
    fn default() -> Self {
        TetherConfig {
            discovery_path: PathBuf::from(DEFAULT_DISCOVERY_PATH),
            watch_mode: WatchMode::Native,
            debounce: Duration::from_millis(100),
            poll_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(200),
            protocol_version: env!("CARGO_PKG_VERSION").to_string(),
            log_format: LogFormat::Pretty,
            log_filter: "info".to_string(),
            bridge_keys: BridgeKeys::default(),
        }
    }
}

impl TetherConfig {
    /// Defaults with the discovery file under `project_root`
    pub fn for_project(project_root: &Path) -> Self {
        TetherConfig {
            discovery_path: project_root.join(DEFAULT_DISCOVERY_PATH),
            ..Default::default()
        }
    }

    pub fn from_json_str(text: &str) -> TetherResult<Self> {
        let config: TetherConfig =
            serde_json::from_str(text).map_err(|e| TetherError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> TetherResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TetherError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Overlay `TETHER_*` variables from the process environment
    pub fn apply_env(&mut self) -> TetherResult<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Overlay variables looked up through `lookup`
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> TetherResult<()> {
        if let Some(v) = lookup("TETHER_DISCOVERY_PATH") {
            self.discovery_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TETHER_WATCH_MODE") {
            self.watch_mode = v.parse()?;
        }
        for (name, slot) in [
            ("TETHER_DEBOUNCE", &mut self.debounce),
            ("TETHER_POLL_INTERVAL", &mut self.poll_interval),
            ("TETHER_CONNECT_TIMEOUT", &mut self.connect_timeout),
            ("TETHER_CALL_TIMEOUT", &mut self.call_timeout),
            ("TETHER_PROBE_TIMEOUT", &mut self.probe_timeout),
        ] {
            if let Some(v) = lookup(name) {
                *slot = humantime::parse_duration(v.trim())
                    .map_err(|e| TetherError::Config(format!("{name}: {e}")))?;
            }
        }
        if let Some(v) = lookup("TETHER_LOG_FORMAT") {
            self.log_format = v.parse()?;
        }
        if let Some(v) = lookup("TETHER_LOG") {
            self.log_filter = v;
        }
        self.validate()
    }

    pub fn validate(&self) -> TetherResult<()> {
        if self.discovery_path.as_os_str().is_empty() {
            return Err(TetherError::Config("discovery_path is empty".into()));
        }
        for (name, value) in [
            ("debounce", self.debounce),
            ("poll_interval", self.poll_interval),
            ("connect_timeout", self.connect_timeout),
            ("call_timeout", self.call_timeout),
            ("probe_timeout", self.probe_timeout),
        ] {
            if value.is_zero() {
                return Err(TetherError::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

mod human_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = TetherConfig::default();
        config.validate().unwrap();
        assert_eq!(config.probe_timeout, Duration::from_millis(200));
        assert_eq!(config.bridge_keys.play, "UNITY_Play");
    }

    #[test]
    fn test_json_with_human_durations() {
        let config = TetherConfig::from_json_str(
            r#"{ "debounce": "250ms", "call_timeout": "1s", "watch_mode": "poll" }"#,
        )
        .unwrap();
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.call_timeout, Duration::from_secs(1));
        assert_eq!(config.watch_mode, WatchMode::Poll);
        // Unspecified fields keep their defaults
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_serialized_form_reloads() {
        let config = TetherConfig::for_project(Path::new("/work/game"));
        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("\"100ms\""));
        assert_eq!(TetherConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn test_bad_duration_rejected() {
        assert!(matches!(
            TetherConfig::from_json_str(r#"{ "debounce": "soon" }"#),
            Err(TetherError::Config(_))
        ));
        assert!(TetherConfig::from_json_str(r#"{ "debounce": "0s" }"#).is_err());
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("TETHER_DISCOVERY_PATH", "/tmp/instance.json"),
            ("TETHER_CONNECT_TIMEOUT", "750ms"),
            ("TETHER_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = TetherConfig::default();
        config
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.discovery_path, PathBuf::from("/tmp/instance.json"));
        assert_eq!(config.connect_timeout, Duration::from_millis(750));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let mut config = TetherConfig::default();
        let err = config
            .apply_vars(|name| (name == "TETHER_WATCH_MODE").then(|| "inotify".to_string()))
            .unwrap_err();
        assert!(matches!(err, TetherError::Config(_)));
    }
}
