use std::sync::{Arc, Mutex};

use crate::projector::{ControlPointSet, PointValue, Projection, ReconcileReport};
use crate::types::{AmplifierStatus, Axis, Position, VolumePercent};

/// Locally mirrored amplifier state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AmplifierState {
    pub power: bool,
    pub mute: bool,
    pub volume_percent: VolumePercent,
    pub source: Option<Position>,
}

impl From<AmplifierStatus> for AmplifierState {
    fn from(status: AmplifierStatus) -> Self {
        Self {
            power: status.power,
            mute: status.mute,
            volume_percent: status.volume_percent,
            source: status.source,
        }
    }
}

impl AmplifierState {
    /// Current value of an axis as a control-point value
    pub fn value_of(&self, axis: Axis) -> PointValue {
        match axis {
            Axis::Power => PointValue::Bool(self.power),
            Axis::Mute => PointValue::Bool(self.mute),
            Axis::Volume => PointValue::Level(self.volume_percent),
            Axis::Source => self.source.map_or(PointValue::Unset, PointValue::Identifier),
        }
    }
}

/// A confirmed value for one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    Power(bool),
    Mute(bool),
    Volume(VolumePercent),
    Source(Position),
}

impl StateUpdate {
    pub fn axis(&self) -> Axis {
        match self {
            StateUpdate::Power(_) => Axis::Power,
            StateUpdate::Mute(_) => Axis::Mute,
            StateUpdate::Volume(_) => Axis::Volume,
            StateUpdate::Source(_) => Axis::Source,
        }
    }

    pub fn point_value(&self) -> PointValue {
        match *self {
            StateUpdate::Power(on) | StateUpdate::Mute(on) => PointValue::Bool(on),
            StateUpdate::Volume(v) => PointValue::Level(v),
            StateUpdate::Source(p) => PointValue::Identifier(p),
        }
    }

    fn apply_to(&self, state: &mut AmplifierState) -> bool {
        let before = *state;
        match *self {
            StateUpdate::Power(on) => state.power = on,
            StateUpdate::Mute(on) => state.mute = on,
            StateUpdate::Volume(v) => state.volume_percent = v,
            StateUpdate::Source(p) => state.source = Some(p),
        }
        before != *state
    }
}

/// Where a confirmed value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// Acknowledged outbound write
    Command,
    /// Inbound status event
    Event,
}

/// Per-accessory state mirror, reflected onto the projected control points
///
/// The only way to change state is [`apply_command_result`](Self::apply_command_result)
/// or [`apply_event`](Self::apply_event). Each update is stored and pushed to
/// the host under one lock, so the host sees updates in the order the cache
/// applied them.
pub struct AmplifierStateCache {
    state: Mutex<AmplifierState>,
    projection: Arc<Projection>,
}

impl AmplifierStateCache {
    pub fn new(initial: AmplifierState, projection: Arc<Projection>) -> Self {
        Self {
            state: Mutex::new(initial),
            projection,
        }
    }

    /// Snapshot of the current state
    pub fn snapshot(&self) -> AmplifierState {
        *crate::lock(&self.state)
    }

    pub fn projection(&self) -> &Arc<Projection> {
        &self.projection
    }

    /// Record a value the amplifier acknowledged
    pub fn apply_command_result(&self, update: StateUpdate) {
        self.apply(UpdateOrigin::Command, update);
    }

    /// Record a value reported by the event channel
    pub fn apply_event(&self, update: StateUpdate) {
        self.apply(UpdateOrigin::Event, update);
    }

    /// Reconcile the handle with a point set built from the current state
    ///
    /// Holds the state lock throughout, so no confirmed value can land between
    /// building the set and writing it to the handle.
    pub fn reproject(
        &self,
        build: impl FnOnce(&AmplifierState) -> ControlPointSet,
    ) -> ReconcileReport {
        let state = crate::lock(&self.state);
        let set = build(&state);
        self.projection.reconcile(&set)
    }

    fn apply(&self, origin: UpdateOrigin, update: StateUpdate) {
        let mut state = crate::lock(&self.state);
        let changed = update.apply_to(&mut state);
        tracing::debug!("{:?} update {:?} (changed: {})", origin, update, changed);
        self.projection.push(&update);
    }
}
