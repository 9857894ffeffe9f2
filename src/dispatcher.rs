use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::control_api::ControlApi;
use crate::error::{AdapterError, Result};
use crate::state::{AmplifierStateCache, StateUpdate};
use crate::types::{Axis, DeviceId, Position, VolumePercent, MAX_VOLUME};

/// Relative volume change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStep {
    Up,
    Down,
}

/// Turns host-initiated changes into control API writes
///
/// The cache (and therefore the host) only sees a value after the amplifier
/// acknowledged it. Writes on one axis are issued one at a time so their
/// acknowledgments land in issue order; they are not deduplicated.
pub struct CommandDispatcher<A> {
    api: Arc<A>,
    device_id: DeviceId,
    volume_cap: Option<VolumePercent>,
    positions: RwLock<BTreeSet<Position>>,
    cache: Arc<AmplifierStateCache>,
    lanes: [Mutex<()>; 4],
}

impl<A: ControlApi> CommandDispatcher<A> {
    pub fn new(
        api: Arc<A>,
        device_id: DeviceId,
        positions: impl IntoIterator<Item = Position>,
        volume_cap: Option<VolumePercent>,
        cache: Arc<AmplifierStateCache>,
    ) -> Self {
        Self {
            api,
            device_id,
            volume_cap,
            positions: RwLock::new(positions.into_iter().collect()),
            cache,
            lanes: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    /// Replace the input positions `set_source` accepts
    pub fn set_known_positions(&self, positions: impl IntoIterator<Item = Position>) {
        *self
            .positions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = positions.into_iter().collect();
    }

    pub async fn set_power(&self, on: bool) -> Result<()> {
        self.write(StateUpdate::Power(on), on.to_string()).await
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        self.write(StateUpdate::Mute(muted), muted.to_string()).await
    }

    /// Set the absolute volume, returning the value actually written
    ///
    /// Values outside `0..=100` are rejected without a call. Values above the
    /// configured cap are clamped to it.
    pub async fn set_volume(&self, requested: i64) -> Result<VolumePercent> {
        let volume = VolumePercent::try_from(requested)
            .ok()
            .filter(|v| *v <= MAX_VOLUME)
            .ok_or_else(|| {
                AdapterError::Validation(format!("volume {requested} outside 0..={MAX_VOLUME}"))
            })?;

        let volume = match self.volume_cap {
            Some(cap) if volume > cap => {
                tracing::warn!(
                    "Volume for {} is capped at {}% (requested {}%). Adjust with config \"volumeCap\".",
                    self.device_id,
                    cap,
                    volume
                );
                cap
            }
            _ => volume,
        };

        self.write(StateUpdate::Volume(volume), volume.to_string())
            .await?;
        Ok(volume)
    }

    /// Nudge the volume by one percent from the cached value
    pub async fn step_volume(&self, step: VolumeStep) -> Result<VolumePercent> {
        let current = self.cache.snapshot().volume_percent;
        let target = match step {
            VolumeStep::Up => current.saturating_add(1).min(MAX_VOLUME),
            VolumeStep::Down => current.saturating_sub(1),
        };
        self.set_volume(i64::from(target)).await
    }

    pub async fn set_source(&self, position: Position) -> Result<()> {
        let known = self
            .positions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(&position);
        if !known {
            return Err(AdapterError::Validation(format!(
                "{} has no input at position {}",
                self.device_id, position
            )));
        }

        self.write(StateUpdate::Source(position), position.to_string())
            .await
    }

    async fn write(&self, update: StateUpdate, body: String) -> Result<()> {
        let axis = update.axis();
        let _lane = self.lanes[lane(axis)].lock().await;
        tracing::debug!("Writing {} = {} to {}", axis, body, self.device_id);

        if let Err(e) = self.api.write(&self.device_id, axis, body).await {
            tracing::warn!("{} command for {} failed: {}", axis, self.device_id, e);
            return Err(AdapterError::Command {
                device_id: self.device_id.clone(),
                axis,
                reason: e.to_string(),
            });
        }

        self.cache.apply_command_result(update);
        Ok(())
    }
}

fn lane(axis: Axis) -> usize {
    match axis {
        Axis::Power => 0,
        Axis::Mute => 1,
        Axis::Volume => 2,
        Axis::Source => 3,
    }
}
