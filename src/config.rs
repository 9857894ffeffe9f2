//! Platform configuration.
//!
//! Keys follow the host's JSON config (`http.basePath`, `mqtt.topicBase`,
//! `volumeCap`, ...). Files are merged with `NAD_BRIDGE_`-prefixed
//! environment variables, nested with `__` (e.g. `NAD_BRIDGE_MQTT__HOST`).

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};
use crate::types::{VolumePercent, MAX_VOLUME};

const ENV_PREFIX: &str = "NAD_BRIDGE_";

/// Top-level platform configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Requested volumes above this are clamped before they are written
    #[serde(default, alias = "volumecap")]
    pub volume_cap: Option<VolumePercent>,

    #[serde(default)]
    pub surfaces: SurfaceConfig,

    /// Repeat discovery at this interval when set
    #[serde(default, alias = "discoveryintervalsecs")]
    pub discovery_interval_secs: Option<u64>,

    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: None,
            http: HttpConfig::default(),
            mqtt: MqttConfig::default(),
            volume_cap: None,
            surfaces: SurfaceConfig::default(),
            discovery_interval_secs: None,
            manufacturer: default_manufacturer(),
        }
    }
}

/// Control API connection settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default, alias = "basepath")]
    pub base_path: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Event broker connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_topic_base", alias = "topicbase")]
    pub topic_base: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_mqtt_port(),
            topic_base: default_topic_base(),
            username: None,
            password: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Reconnect policy for the event channel
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_initial_backoff", alias = "initialbackoffsecs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff", alias = "maxbackoffsecs")]
    pub max_backoff_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

/// Which control surfaces accessories expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceConfig {
    #[serde(default = "default_true")]
    pub power: bool,
    #[serde(default = "default_true")]
    pub mute: bool,
    #[serde(default = "default_true")]
    pub volume: bool,
    #[serde(default = "default_true", alias = "levelmirror")]
    pub level_mirror: bool,
    #[serde(default = "default_true", alias = "sourceselector")]
    pub source_selector: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            power: true,
            mute: true,
            volume: true,
            level_mirror: true,
            source_selector: true,
        }
    }
}

fn default_manufacturer() -> String {
    "NAD".into()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_topic_base() -> String {
    "nad".into()
}
fn default_true() -> bool {
    true
}
fn default_initial_backoff() -> u64 {
    1
}
fn default_max_backoff() -> u64 {
    60
}

impl PlatformConfig {
    /// Load from a JSON file merged with environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::new()
            .merge(Json::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse the JSON block the host hands to the platform
    pub fn from_json(json: &str) -> Result<Self> {
        let config = Figment::new().merge(Json::string(json)).extract()?;
        Ok(config)
    }

    /// Reject configurations the platform cannot start with
    pub fn validate(&self) -> Result<()> {
        if is_blank(self.mqtt.host.as_deref()) {
            tracing::error!("No MQTT server has been configured.");
            return Err(AdapterError::Config("mqtt.host is required".into()));
        }
        if is_blank(self.http.base_path.as_deref()) {
            tracing::error!("No HTTP server has been configured.");
            return Err(AdapterError::Config("http.basePath is required".into()));
        }
        if let Some(cap) = self.volume_cap {
            if cap > MAX_VOLUME {
                return Err(AdapterError::Config(format!(
                    "volumeCap {cap} is above {MAX_VOLUME}"
                )));
            }
        }
        Ok(())
    }

    pub fn discovery_interval(&self) -> Option<Duration> {
        self.discovery_interval_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}
