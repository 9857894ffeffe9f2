use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Vendor-assigned amplifier identifier (e.g. `"m33"`)
pub type DeviceId = String;

/// Input position, sent over the wire and exposed to the host
pub type Position = i64;

/// Volume in percent, `0..=100`
pub type VolumePercent = u8;

/// Upper bound of the volume scale
pub const MAX_VOLUME: VolumePercent = 100;

/// One control axis of the amplifier
///
/// The snake-case name doubles as the HTTP path segment and the MQTT topic suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Power,
    Mute,
    #[serde(rename = "volume_percent")]
    Volume,
    Source,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::Power, Axis::Mute, Axis::Volume, Axis::Source];

    pub fn segment(self) -> &'static str {
        match self {
            Axis::Power => "power",
            Axis::Mute => "mute",
            Axis::Volume => "volume_percent",
            Axis::Source => "source",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

/// A physical amplifier as discovered from the control API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,

    /// Network identity; absent when the API did not report one
    pub mac_address: Option<String>,

    /// Selectable inputs, in the order the API listed them
    pub capabilities: Vec<InputSource>,

    /// Status snapshot taken at discovery
    pub status: AmplifierStatus,
}

impl Device {
    /// Look up an input by position
    pub fn input(&self, position: Position) -> Option<&InputSource> {
        self.capabilities.iter().find(|s| s.position == position)
    }
}

/// One selectable input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSource {
    pub name: String,
    pub position: Position,
    pub is_enabled: bool,
}

/// Raw amplifier status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AmplifierStatus {
    pub power: bool,
    pub mute: bool,
    pub volume_percent: VolumePercent,

    /// Selected input position, unknown until reported
    pub source: Option<Position>,
}

/// Entry of `GET /amplifiers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmplifierSummary {
    pub id: DeviceId,
}

/// Body of `GET /amplifiers/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmplifierDetail {
    pub id: DeviceId,
    #[serde(default)]
    pub mac_address: Option<String>,
    pub power: bool,
    pub mute: bool,
    pub volume_percent: i64,
    #[serde(default)]
    pub source: Option<Position>,
    #[serde(default)]
    pub sources: Vec<SourceDetail>,
}

/// Input entry inside an amplifier detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDetail {
    pub name: String,
    pub position: Position,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AmplifierDetail {
    /// Check the invariants the wire format cannot express and build a `Device`
    ///
    /// Returns the reason on failure; the caller attaches the URL.
    pub fn into_device(self) -> std::result::Result<Device, String> {
        let volume_percent = VolumePercent::try_from(self.volume_percent)
            .ok()
            .filter(|v| *v <= MAX_VOLUME)
            .ok_or_else(|| format!("volume_percent {} outside 0..=100", self.volume_percent))?;

        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if !seen.insert(source.position) {
                return Err(format!("duplicate source position {}", source.position));
            }
        }

        let capabilities = self
            .sources
            .into_iter()
            .map(|s| InputSource {
                name: s.name,
                position: s.position,
                is_enabled: s.is_enabled,
            })
            .collect();

        Ok(Device {
            id: self.id,
            mac_address: self.mac_address,
            capabilities,
            status: AmplifierStatus {
                power: self.power,
                mute: self.mute,
                volume_percent,
                source: self.source,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(json: serde_json::Value) -> AmplifierDetail {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_detail_into_device() {
        let device = detail(serde_json::json!({
            "id": "m33",
            "mac_address": "AA:BB",
            "power": true,
            "mute": false,
            "volume_percent": 42,
            "sources": [
                { "name": "Optical 1", "position": 2, "is_enabled": true },
                { "name": "Phono", "position": 7, "is_enabled": false }
            ]
        }))
        .into_device()
        .unwrap();

        assert_eq!(device.id, "m33");
        assert_eq!(device.mac_address.as_deref(), Some("AA:BB"));
        assert_eq!(device.status.volume_percent, 42);
        assert_eq!(device.status.source, None);
        assert_eq!(device.capabilities.len(), 2);
        assert_eq!(device.input(7).map(|s| s.is_enabled), Some(false));
    }

    #[test]
    fn test_detail_rejects_bad_volume() {
        let result = detail(serde_json::json!({
            "id": "m33", "power": true, "mute": false, "volume_percent": 140
        }))
        .into_device();
        assert!(result.is_err());
    }

    #[test]
    fn test_detail_rejects_duplicate_positions() {
        let result = detail(serde_json::json!({
            "id": "m33", "power": true, "mute": false, "volume_percent": 10,
            "sources": [
                { "name": "A", "position": 1 },
                { "name": "B", "position": 1 }
            ]
        }))
        .into_device();
        assert!(result.unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_axis_segments() {
        assert_eq!(Axis::Volume.to_string(), "volume_percent");
        assert_eq!(Axis::Source.segment(), "source");
    }
}
