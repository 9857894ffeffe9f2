//! Accessory State Projector
//!
//! Derives the control points an amplifier exposes from its capability list
//! and the cached state, and keeps a host handle in line with that shape.
//! Input sub-points are keyed by a UUID derived from the accessory token and
//! the input name, so re-projecting never duplicates an unchanged input.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SurfaceConfig;
use crate::host::AccessoryHandle;
use crate::identity::IdentityToken;
use crate::state::{AmplifierState, StateUpdate};
use crate::types::{Axis, Device, Position, VolumePercent};

/// Key of one exposed control point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PointKey {
    Power,
    Mute,
    Volume,
    /// Level-style surface mirroring volume
    VolumeLevel,
    /// Source selector; its value is the active input position
    Source,
    /// One input of the source selector
    Input(Uuid),
}

/// Shape of a control point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointKind {
    Switch,
    Level,
    Selector,
    Input,
}

/// Value carried by a control point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointValue {
    Bool(bool),
    Level(VolumePercent),
    Identifier(Position),
    /// Nothing confirmed yet
    Unset,
}

/// One exposed control point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPoint {
    pub key: PointKey,
    pub kind: PointKind,
    pub name: String,
    pub value: PointValue,
    /// Externally visible identifier (input position)
    pub identifier: Option<Position>,
    pub visible: bool,
}

/// Every control point of one accessory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPointSet {
    pub points: Vec<ControlPoint>,
    /// Input keys sorted by position
    pub input_order: Vec<PointKey>,
}

impl ControlPointSet {
    pub fn get(&self, key: &PointKey) -> Option<&ControlPoint> {
        self.points.iter().find(|p| p.key == *key)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ControlPoint> {
        self.points.iter().filter(|p| p.kind == PointKind::Input)
    }

    pub fn input_at(&self, position: Position) -> Option<&ControlPoint> {
        self.inputs().find(|p| p.identifier == Some(position))
    }
}

/// Sub-point key of an input, stable for a given accessory and input name
pub fn input_key(token: &IdentityToken, name: &str) -> PointKey {
    PointKey::Input(Uuid::new_v5(token.as_uuid(), name.as_bytes()))
}

/// Build the control-point set for a device
pub fn project(
    token: &IdentityToken,
    device: &Device,
    state: &AmplifierState,
    surfaces: SurfaceConfig,
) -> ControlPointSet {
    let mut points = Vec::new();

    if surfaces.power {
        points.push(simple(PointKey::Power, PointKind::Switch, "Power", state.value_of(Axis::Power)));
    }
    if surfaces.mute {
        points.push(simple(PointKey::Mute, PointKind::Switch, "Mute", state.value_of(Axis::Mute)));
    }
    if surfaces.volume {
        points.push(simple(PointKey::Volume, PointKind::Level, "Volume", state.value_of(Axis::Volume)));
        if surfaces.level_mirror {
            points.push(simple(
                PointKey::VolumeLevel,
                PointKind::Level,
                "Volume Level",
                state.value_of(Axis::Volume),
            ));
        }
    }

    let mut input_order = Vec::new();
    if surfaces.source_selector {
        points.push(simple(PointKey::Source, PointKind::Selector, "Input", state.value_of(Axis::Source)));

        let mut name_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for input in &device.capabilities {
            *name_counts.entry(input.name.as_str()).or_default() += 1;
        }

        let mut by_position = BTreeMap::new();
        for input in &device.capabilities {
            let key = if name_counts[input.name.as_str()] > 1 {
                tracing::warn!(
                    "Amplifier {} lists input name {:?} more than once",
                    device.id,
                    input.name
                );
                input_key(token, &format!("{}#{}", input.name, input.position))
            } else {
                input_key(token, &input.name)
            };

            by_position.insert(input.position, key);
            points.push(ControlPoint {
                key,
                kind: PointKind::Input,
                name: input.name.clone(),
                value: PointValue::Identifier(input.position),
                identifier: Some(input.position),
                visible: input.is_enabled,
            });
        }
        input_order = by_position.into_values().collect();
    }

    ControlPointSet { points, input_order }
}

fn simple(key: PointKey, kind: PointKind, name: &str, value: PointValue) -> ControlPoint {
    ControlPoint {
        key,
        kind,
        name: name.into(),
        value,
        identifier: None,
        visible: true,
    }
}

/// Changes applied to a handle by [`Projection::reconcile`]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// A projected shape bound to a live host handle
pub struct Projection {
    handle: Arc<dyn AccessoryHandle>,
    surfaces: SurfaceConfig,
}

impl Projection {
    pub fn new(handle: Arc<dyn AccessoryHandle>, surfaces: SurfaceConfig) -> Self {
        Self { handle, surfaces }
    }

    pub fn handle(&self) -> &Arc<dyn AccessoryHandle> {
        &self.handle
    }

    pub fn surfaces(&self) -> SurfaceConfig {
        self.surfaces
    }

    /// Bring the handle's points in line with `set`
    ///
    /// Existing points are updated in place (visibility, name, value); only
    /// points that disappeared are removed and only new ones are added.
    pub fn reconcile(&self, set: &ControlPointSet) -> ReconcileReport {
        let existing: BTreeSet<PointKey> = self.handle.point_keys().into_iter().collect();
        let wanted: BTreeSet<PointKey> = set.points.iter().map(|p| p.key).collect();
        let mut report = ReconcileReport::default();

        for point in &set.points {
            if existing.contains(&point.key) {
                self.handle.update_point(point);
                report.updated += 1;
            } else {
                self.handle.add_point(point);
                report.added += 1;
            }
        }

        for stale in existing.difference(&wanted) {
            self.handle.remove_point(stale);
            report.removed += 1;
        }

        self.handle.set_display_order(&set.input_order);
        report
    }

    /// Control points that reflect an axis under this configuration
    pub fn points_for(&self, axis: Axis) -> Vec<PointKey> {
        let s = self.surfaces;
        match axis {
            Axis::Power if s.power => vec![PointKey::Power],
            Axis::Mute if s.mute => vec![PointKey::Mute],
            Axis::Volume if s.volume && s.level_mirror => {
                vec![PointKey::Volume, PointKey::VolumeLevel]
            }
            Axis::Volume if s.volume => vec![PointKey::Volume],
            Axis::Source if s.source_selector => vec![PointKey::Source],
            _ => vec![],
        }
    }

    /// Push a confirmed value to every point that reflects it
    pub fn push(&self, update: &StateUpdate) {
        let value = update.point_value();
        for key in self.points_for(update.axis()) {
            self.handle.push_update(&key, value);
        }
    }
}
