//! Smart-home accessory adapter for NAD networked amplifiers
//!
//! This library exposes amplifiers reachable through an HTTP control API as
//! accessories of a home-automation host. It supports:
//!
//! - Discovery of amplifiers and their input sources
//! - Stable accessory identity across restarts (derived from the MAC address)
//! - Power, mute, volume and source control with acknowledged writes
//! - Live state updates from MQTT status topics
//! - Periodic rediscovery that adds, restores and retires accessories
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use nad_bridge::{MemoryRegistry, Platform, PlatformConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PlatformConfig::load("nad-bridge.json")?;
//!     let registry = Arc::new(MemoryRegistry::new());
//!     let platform = Arc::new(Platform::from_config(config, registry.clone())?);
//!
//!     let report = platform.discover_devices().await?;
//!     println!("Found {} amplifier(s)", report.created.len());
//!
//!     for accessory in platform.accessories().await {
//!         accessory.set_power(true).await?;
//!         accessory.set_volume(30).await?;
//!     }
//!
//!     platform.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Platform**: discovery cycles and accessory lifecycle
//! - **Catalog**: amplifier list and details over the control API
//! - **Identity**: tokens and create/restore/retire resolution
//! - **Projector**: control points derived from capabilities and state
//! - **Dispatcher**: host sets turned into control API writes
//! - **Events**: status topics decoded into cache updates
//! - **Host**: the registry and handle seam towards the home-automation host

use std::sync::{Mutex, MutexGuard, PoisonError};

mod accessory;
mod catalog;
mod config;
mod control_api;
mod dispatcher;
mod error;
mod event_channel;
mod events;
mod host;
mod identity;
mod platform;
mod projector;
mod state;
mod types;

// Public exports
pub use accessory::{AccessoryOptions, AmplifierAccessory};
pub use catalog::{list_devices, Catalog};
pub use config::{HttpConfig, MqttConfig, PlatformConfig, ReconnectConfig, SurfaceConfig};
pub use control_api::{ControlApi, HttpControlApi};
pub use dispatcher::{CommandDispatcher, VolumeStep};
pub use error::{AdapterError, ErrorKind, Result};
pub use event_channel::{
    EventChannel, EventReceiver, InboundEvent, MqttEventChannel, ReconnectPolicy,
};
pub use events::{apply_event, decode as decode_event, EventSynchronizer, TopicSet};
pub use host::{
    AccessoryHandle, AccessoryInformation, HostRegistry, MemoryHandle, MemoryRegistry,
};
pub use identity::{resolve, IdentityToken, Resolution, ResolvedDevice};
pub use platform::{DiscoveryReport, Platform};
pub use projector::{
    input_key, project, ControlPoint, ControlPointSet, PointKey, PointKind, PointValue,
    Projection, ReconcileReport,
};
pub use state::{AmplifierState, AmplifierStateCache, StateUpdate, UpdateOrigin};
pub use types::{
    AmplifierDetail, AmplifierStatus, AmplifierSummary, Axis, Device, DeviceId, InputSource,
    Position, SourceDetail, VolumePercent, MAX_VOLUME,
};

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
