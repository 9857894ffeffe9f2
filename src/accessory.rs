use std::sync::{Arc, Mutex};

use crate::config::{PlatformConfig, SurfaceConfig};
use crate::control_api::ControlApi;
use crate::dispatcher::{CommandDispatcher, VolumeStep};
use crate::error::{AdapterError, Result};
use crate::event_channel::EventChannel;
use crate::events::{EventSynchronizer, TopicSet};
use crate::host::{AccessoryHandle, AccessoryInformation};
use crate::identity::IdentityToken;
use crate::projector::{self, ControlPointSet, PointKey, PointValue, Projection, ReconcileReport};
use crate::state::{AmplifierState, AmplifierStateCache};
use crate::types::{Device, Position, VolumePercent};

/// Per-accessory settings taken from the platform config
#[derive(Debug, Clone)]
pub struct AccessoryOptions {
    pub surfaces: SurfaceConfig,
    pub volume_cap: Option<VolumePercent>,
    pub manufacturer: String,
}

impl Default for AccessoryOptions {
    fn default() -> Self {
        Self::from(&PlatformConfig::default())
    }
}

impl From<&PlatformConfig> for AccessoryOptions {
    fn from(config: &PlatformConfig) -> Self {
        Self {
            surfaces: config.surfaces,
            // A cap of 0 means no cap
            volume_cap: config.volume_cap.filter(|cap| *cap > 0),
            manufacturer: config.manufacturer.clone(),
        }
    }
}

/// One amplifier exposed to the host
///
/// Owns the state cache; host gets are answered from it, host sets go
/// through the command dispatcher and status events through the
/// synchronizer. Both write the cache and push to the same handle.
pub struct AmplifierAccessory<A> {
    token: IdentityToken,
    device: Mutex<Device>,
    cache: Arc<AmplifierStateCache>,
    dispatcher: CommandDispatcher<A>,
    synchronizer: tokio::sync::Mutex<Option<EventSynchronizer>>,
}

impl<A: ControlApi> AmplifierAccessory<A> {
    /// Seed the cache from the discovery snapshot and attach control points
    pub fn new(
        token: IdentityToken,
        device: Device,
        handle: Arc<dyn AccessoryHandle>,
        api: Arc<A>,
        options: &AccessoryOptions,
    ) -> Self {
        handle.set_information(&AccessoryInformation {
            manufacturer: options.manufacturer.clone(),
            model: device.id.clone(),
            serial_number: device.mac_address.clone().unwrap_or_default(),
        });

        let projection = Arc::new(Projection::new(handle, options.surfaces));
        let cache = Arc::new(AmplifierStateCache::new(
            AmplifierState::from(device.status),
            projection,
        ));
        let dispatcher = CommandDispatcher::new(
            api,
            device.id.clone(),
            device.capabilities.iter().map(|s| s.position),
            options.volume_cap,
            cache.clone(),
        );

        let accessory = Self {
            token,
            device: Mutex::new(device),
            cache,
            dispatcher,
            synchronizer: tokio::sync::Mutex::new(None),
        };
        let report = accessory.project();
        tracing::debug!("Attached {} control point(s) to {}", report.added, token);
        accessory
    }

    pub fn token(&self) -> IdentityToken {
        self.token
    }

    pub fn device(&self) -> Device {
        crate::lock(&self.device).clone()
    }

    pub fn device_id(&self) -> String {
        crate::lock(&self.device).id.clone()
    }

    pub fn state(&self) -> AmplifierState {
        self.cache.snapshot()
    }

    pub fn handle(&self) -> &Arc<dyn AccessoryHandle> {
        self.cache.projection().handle()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<A> {
        &self.dispatcher
    }

    /// Control points as they should currently look
    pub fn control_points(&self) -> ControlPointSet {
        let device = crate::lock(&self.device);
        projector::project(
            &self.token,
            &device,
            &self.cache.snapshot(),
            self.cache.projection().surfaces(),
        )
    }

    /// Re-project onto the handle
    pub fn project(&self) -> ReconcileReport {
        let device = crate::lock(&self.device);
        let surfaces = self.cache.projection().surfaces();
        self.cache
            .reproject(|state| projector::project(&self.token, &device, state, surfaces))
    }

    /// Take a newer capability description from a later discovery cycle
    ///
    /// Status is not re-seeded; events own it once the accessory is live.
    pub fn refresh(&self, device: Device) -> ReconcileReport {
        self.dispatcher
            .set_known_positions(device.capabilities.iter().map(|s| s.position));
        *crate::lock(&self.device) = device;
        self.project()
    }

    /// Subscribe to this amplifier's status topics
    pub async fn start_events<C: EventChannel>(&self, channel: &C, topic_base: &str) -> Result<()> {
        let topics = TopicSet::new(topic_base, &self.device_id());
        let synchronizer = EventSynchronizer::start(channel, topics, self.cache.clone()).await?;
        if let Some(previous) = self.synchronizer.lock().await.replace(synchronizer) {
            previous.stop();
        }
        Ok(())
    }

    pub async fn events_running(&self) -> bool {
        self.synchronizer
            .lock()
            .await
            .as_ref()
            .is_some_and(EventSynchronizer::is_running)
    }

    /// Host get: the last confirmed value of a point
    pub fn get(&self, key: &PointKey) -> Option<PointValue> {
        let value = self.control_points().get(key).map(|p| p.value);
        tracing::debug!("GET {:?} on {}: {:?}", key, self.token, value);
        value
    }

    /// Host set: route a requested value to the matching command
    pub async fn set(&self, key: &PointKey, value: PointValue) -> Result<()> {
        tracing::debug!("SET {:?} on {}: {:?}", key, self.token, value);
        if self.control_points().get(key).is_none() {
            return Err(AdapterError::Validation(format!("{key:?} is not exposed")));
        }

        match (key, value) {
            (PointKey::Power, PointValue::Bool(on)) => self.set_power(on).await,
            (PointKey::Mute, PointValue::Bool(muted)) => self.set_mute(muted).await,
            (PointKey::Volume | PointKey::VolumeLevel, PointValue::Level(v)) => {
                self.set_volume(i64::from(v)).await.map(|_| ())
            }
            (PointKey::Source, PointValue::Identifier(position)) => self.set_source(position).await,
            _ => Err(AdapterError::Validation(format!(
                "{key:?} does not accept {value:?}"
            ))),
        }
    }

    pub async fn set_power(&self, on: bool) -> Result<()> {
        self.dispatcher.set_power(on).await
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        self.dispatcher.set_mute(muted).await
    }

    pub async fn set_volume(&self, volume: i64) -> Result<VolumePercent> {
        self.dispatcher.set_volume(volume).await
    }

    pub async fn step_volume(&self, step: VolumeStep) -> Result<VolumePercent> {
        self.dispatcher.step_volume(step).await
    }

    pub async fn set_source(&self, position: Position) -> Result<()> {
        self.dispatcher.set_source(position).await
    }

    /// Stop applying events
    pub async fn shutdown(&self) {
        if let Some(synchronizer) = self.synchronizer.lock().await.take() {
            synchronizer.stop();
        }
    }
}
