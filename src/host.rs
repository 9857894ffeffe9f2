//! Host-facing seam.
//!
//! The home-automation host owns accessory storage. The bridge only needs to
//! create, restore and retire handles keyed by [`IdentityToken`], attach
//! control points to them and push confirmed values. Adapters for a concrete
//! host SDK implement [`HostRegistry`] and [`AccessoryHandle`];
//! [`MemoryRegistry`] is a self-contained implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::identity::IdentityToken;
use crate::projector::{ControlPoint, PointKey, PointValue};

/// Descriptive labels shown by the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessoryInformation {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

/// A persistent host-side registration for one amplifier
pub trait AccessoryHandle: Send + Sync {
    fn token(&self) -> IdentityToken;
    fn display_name(&self) -> String;
    fn set_information(&self, info: &AccessoryInformation);

    fn point_keys(&self) -> Vec<PointKey>;
    fn add_point(&self, point: &ControlPoint);
    /// Update an existing point in place, keeping any host-side references to it
    fn update_point(&self, point: &ControlPoint);
    fn remove_point(&self, key: &PointKey);
    fn set_display_order(&self, order: &[PointKey]);

    /// Show a confirmed value on a point
    fn push_update(&self, key: &PointKey, value: PointValue);
}

/// The host's accessory registry
pub trait HostRegistry: Send + Sync {
    /// Tokens of every handle the host holds, restored or registered
    fn cached_tokens(&self) -> Vec<IdentityToken>;
    fn restore(&self, token: &IdentityToken) -> Option<Arc<dyn AccessoryHandle>>;
    fn register(&self, token: IdentityToken, display_name: &str) -> Arc<dyn AccessoryHandle>;
    fn unregister(&self, token: &IdentityToken);
}

#[derive(Default)]
struct HandleState {
    info: AccessoryInformation,
    points: BTreeMap<PointKey, ControlPoint>,
    order: Vec<PointKey>,
    pushes: Vec<(PointKey, PointValue)>,
}

/// In-memory accessory handle
pub struct MemoryHandle {
    token: IdentityToken,
    display_name: String,
    state: Mutex<HandleState>,
}

impl MemoryHandle {
    fn new(token: IdentityToken, display_name: &str) -> Self {
        Self {
            token,
            display_name: display_name.to_owned(),
            state: Mutex::new(HandleState::default()),
        }
    }

    pub fn point(&self, key: &PointKey) -> Option<ControlPoint> {
        crate::lock(&self.state).points.get(key).cloned()
    }

    /// Value the host currently displays for a point
    pub fn value(&self, key: &PointKey) -> Option<PointValue> {
        self.point(key).map(|p| p.value)
    }

    pub fn points(&self) -> Vec<ControlPoint> {
        crate::lock(&self.state).points.values().cloned().collect()
    }

    pub fn display_order(&self) -> Vec<PointKey> {
        crate::lock(&self.state).order.clone()
    }

    pub fn information(&self) -> AccessoryInformation {
        crate::lock(&self.state).info.clone()
    }

    /// Every pushed value, oldest first
    pub fn pushes(&self) -> Vec<(PointKey, PointValue)> {
        crate::lock(&self.state).pushes.clone()
    }
}

impl AccessoryHandle for MemoryHandle {
    fn token(&self) -> IdentityToken {
        self.token
    }

    fn display_name(&self) -> String {
        self.display_name.clone()
    }

    fn set_information(&self, info: &AccessoryInformation) {
        crate::lock(&self.state).info = info.clone();
    }

    fn point_keys(&self) -> Vec<PointKey> {
        crate::lock(&self.state).points.keys().copied().collect()
    }

    fn add_point(&self, point: &ControlPoint) {
        crate::lock(&self.state).points.insert(point.key, point.clone());
    }

    fn update_point(&self, point: &ControlPoint) {
        if let Some(existing) = crate::lock(&self.state).points.get_mut(&point.key) {
            existing.name.clone_from(&point.name);
            existing.value = point.value;
            existing.identifier = point.identifier;
            existing.visible = point.visible;
        }
    }

    fn remove_point(&self, key: &PointKey) {
        crate::lock(&self.state).points.remove(key);
    }

    fn set_display_order(&self, order: &[PointKey]) {
        crate::lock(&self.state).order = order.to_vec();
    }

    fn push_update(&self, key: &PointKey, value: PointValue) {
        let mut state = crate::lock(&self.state);
        if let Some(point) = state.points.get_mut(key) {
            point.value = value;
        }
        state.pushes.push((*key, value));
    }
}

/// In-memory accessory registry
#[derive(Default)]
pub struct MemoryRegistry {
    handles: Mutex<BTreeMap<IdentityToken, Arc<MemoryHandle>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated as if the host had restored these handles
    pub fn with_cached(tokens: impl IntoIterator<Item = IdentityToken>) -> Self {
        let registry = Self::new();
        {
            let mut handles = crate::lock(&registry.handles);
            for token in tokens {
                handles.insert(token, Arc::new(MemoryHandle::new(token, &token.to_string())));
            }
        }
        registry
    }

    pub fn handle(&self, token: &IdentityToken) -> Option<Arc<MemoryHandle>> {
        crate::lock(&self.handles).get(token).cloned()
    }

    pub fn len(&self) -> usize {
        crate::lock(&self.handles).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HostRegistry for MemoryRegistry {
    fn cached_tokens(&self) -> Vec<IdentityToken> {
        crate::lock(&self.handles).keys().copied().collect()
    }

    fn restore(&self, token: &IdentityToken) -> Option<Arc<dyn AccessoryHandle>> {
        self.handle(token).map(|h| h as Arc<dyn AccessoryHandle>)
    }

    fn register(&self, token: IdentityToken, display_name: &str) -> Arc<dyn AccessoryHandle> {
        let handle = Arc::new(MemoryHandle::new(token, display_name));
        crate::lock(&self.handles).insert(token, handle.clone());
        handle
    }

    fn unregister(&self, token: &IdentityToken) {
        crate::lock(&self.handles).remove(token);
    }
}
