use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const MIN_TASK_INTERVAL_MS: u64 = 100;
const MIN_LOOP_TICK_MS: u64 = 10;
const MIN_LINK_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_id: String,
    pub sense_interval_ms: u64,
    pub sync_interval_ms: u64,
    pub override_timeout_ms: u64,
    pub expiry_check_interval_ms: u64,
    pub display_refresh_interval_ms: u64,
    pub loop_tick_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "envnode-1".to_string(),
            sense_interval_ms: 2_000,
            sync_interval_ms: 5_000,
            override_timeout_ms: 30_000,
            expiry_check_interval_ms: 1_000,
            display_refresh_interval_ms: 1_000,
            loop_tick_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub peer_addr: String,
    pub heartbeat_interval_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    /// When set, a connected channel with no inbound frame for this long is
    /// treated as closed. Unset keeps liveness purely close/error driven.
    pub liveness_timeout_ms: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            peer_addr: "192.168.4.1:8080".to_string(),
            heartbeat_interval_ms: 10_000,
            reconnect_backoff_ms: 3_000,
            connect_timeout_ms: 5_000,
            liveness_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub device: DeviceConfig,
    pub link: LinkConfig,
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    /// Reads `runtime.json`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read(path) {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn default_path() -> PathBuf {
        std::env::var("ENVNODE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.envnode"))
            .join("runtime.json")
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_HOST") {
            self.network.mqtt_host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
            self.network.mqtt_port = port;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.network.mqtt_user = user;
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.network.mqtt_pass = pass;
        }
        if let Some(id) = lookup("ENVNODE_DEVICE_ID") {
            self.device.device_id = id;
        }
        if let Some(addr) = lookup("ENVNODE_PEER_ADDR") {
            self.link.peer_addr = addr;
        }
        if let Some(port) =
            lookup("CONTROLLER_HTTP_PORT").and_then(|value| value.parse::<u16>().ok())
        {
            self.network.http_port = port;
        }
    }

    pub fn sanitize(&mut self) {
        self.device.sanitize();
        self.link.sanitize();
    }
}

impl DeviceConfig {
    pub fn sanitize(&mut self) {
        if self.device_id.trim().is_empty() {
            self.device_id = DeviceConfig::default().device_id;
        }
        self.sense_interval_ms = self.sense_interval_ms.max(MIN_TASK_INTERVAL_MS);
        self.sync_interval_ms = self.sync_interval_ms.max(MIN_TASK_INTERVAL_MS);
        self.override_timeout_ms = self.override_timeout_ms.max(MIN_TASK_INTERVAL_MS);
        self.expiry_check_interval_ms = self.expiry_check_interval_ms.max(MIN_TASK_INTERVAL_MS);
        self.display_refresh_interval_ms =
            self.display_refresh_interval_ms.max(MIN_TASK_INTERVAL_MS);
        self.loop_tick_ms = self.loop_tick_ms.max(MIN_LOOP_TICK_MS);
    }
}

impl LinkConfig {
    pub fn sanitize(&mut self) {
        self.heartbeat_interval_ms = self.heartbeat_interval_ms.max(MIN_LINK_INTERVAL_MS);
        self.reconnect_backoff_ms = self.reconnect_backoff_ms.max(MIN_LINK_INTERVAL_MS);
        self.connect_timeout_ms = self.connect_timeout_ms.max(MIN_LINK_INTERVAL_MS);
        self.liveness_timeout_ms = self
            .liveness_timeout_ms
            .filter(|&timeout| timeout > 0)
            .map(|timeout| timeout.max(self.heartbeat_interval_ms));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"device": {"device_id": "attic"}, "link": {}}"#).unwrap();

        assert_eq!(config.device.device_id, "attic");
        assert_eq!(config.device.sense_interval_ms, 2_000);
        assert_eq!(config.device.override_timeout_ms, 30_000);
        assert_eq!(config.link.reconnect_backoff_ms, 3_000);
        assert_eq!(config.link.liveness_timeout_ms, None);
        assert_eq!(config.network.mqtt_port, 1883);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("envnode-missing-dir/runtime.json");
        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.device.sync_interval_ms, 5_000);
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let dir = std::env::temp_dir().join(format!("envnode-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            RuntimeConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "not-a-port"),
            ("ENVNODE_DEVICE_ID", "garage"),
            ("ENVNODE_PEER_ADDR", "10.0.0.7:81"),
            ("CONTROLLER_HTTP_PORT", "9090"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config.apply_env(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.network.mqtt_host, "broker.local");
        assert_eq!(config.network.mqtt_port, 1883);
        assert_eq!(config.device.device_id, "garage");
        assert_eq!(config.link.peer_addr, "10.0.0.7:81");
        assert_eq!(config.network.http_port, 9090);
    }

    #[test]
    fn sanitize_rejects_zero_intervals() {
        let mut config = RuntimeConfig::default();
        config.device.device_id = "  ".to_string();
        config.device.sense_interval_ms = 0;
        config.device.loop_tick_ms = 0;
        config.link.reconnect_backoff_ms = 0;
        config.link.liveness_timeout_ms = Some(1_000);
        config.sanitize();

        assert_eq!(config.device.device_id, "envnode-1");
        assert_eq!(config.device.sense_interval_ms, MIN_TASK_INTERVAL_MS);
        assert_eq!(config.device.loop_tick_ms, MIN_LOOP_TICK_MS);
        assert_eq!(config.link.reconnect_backoff_ms, MIN_LINK_INTERVAL_MS);
        assert_eq!(config.link.liveness_timeout_ms, Some(10_000));

        config.link.liveness_timeout_ms = Some(0);
        config.sanitize();
        assert_eq!(config.link.liveness_timeout_ms, None);
    }
}
