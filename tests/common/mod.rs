// Shared fakes for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use nad_bridge::{
    AccessoryOptions, AdapterError, AmplifierAccessory, AmplifierDetail, AmplifierSummary, Axis,
    ControlApi, EventChannel, EventReceiver, IdentityToken, InboundEvent, MemoryHandle,
    MemoryRegistry, HostRegistry, Result,
};

// ── Control API ─────────────────────────────────────────────────────

/// In-memory control API that records every write
#[derive(Default)]
pub struct FakeApi {
    order: Mutex<Vec<String>>,
    details: Mutex<BTreeMap<String, AmplifierDetail>>,
    writes: Mutex<Vec<(String, Axis, String)>>,
    failing: Mutex<Vec<Axis>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// List an amplifier; a `None` detail makes its detail call fail
    pub fn add(&self, id: &str, detail: Option<AmplifierDetail>) {
        self.order.lock().unwrap().push(id.to_owned());
        if let Some(detail) = detail {
            self.details.lock().unwrap().insert(id.to_owned(), detail);
        }
    }

    pub fn replace(&self, detail: AmplifierDetail) {
        self.details.lock().unwrap().insert(detail.id.clone(), detail);
    }

    pub fn remove(&self, id: &str) {
        self.order.lock().unwrap().retain(|i| i != id);
        self.details.lock().unwrap().remove(id);
    }

    /// Make the detail call of a listed amplifier fail
    pub fn break_detail(&self, id: &str) {
        self.details.lock().unwrap().remove(id);
    }

    pub fn fail_writes(&self, axis: Axis) {
        self.failing.lock().unwrap().push(axis);
    }

    pub fn writes(&self) -> Vec<(String, Axis, String)> {
        self.writes.lock().unwrap().clone()
    }
}

impl ControlApi for FakeApi {
    async fn list_amplifiers(&self) -> Result<Vec<AmplifierSummary>> {
        Ok(self
            .order
            .lock()
            .unwrap()
            .iter()
            .map(|id| AmplifierSummary { id: id.clone() })
            .collect())
    }

    async fn get_amplifier(&self, id: &str) -> Result<AmplifierDetail> {
        self.details
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AdapterError::UnexpectedStatus {
                status: 500,
                url: format!("amplifiers/{id}"),
            })
    }

    async fn write(&self, id: &str, axis: Axis, body: String) -> Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((id.to_owned(), axis, body));
        if self.failing.lock().unwrap().contains(&axis) {
            return Err(AdapterError::UnexpectedStatus {
                status: 500,
                url: format!("amplifiers/{id}/{}", axis.segment()),
            });
        }
        Ok(())
    }
}

// ── Event channel ───────────────────────────────────────────────────

/// Event channel fed directly by the test
pub struct FakeChannel {
    tx: broadcast::Sender<InboundEvent>,
    subscribed: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            tx,
            subscribed: Mutex::new(Vec::new()),
        }
    }

    pub fn publish(&self, topic: &str, payload: &[u8]) {
        // No receivers is fine for tests that publish before subscribing
        let _ = self.tx.send(InboundEvent {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
        });
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().clone()
    }
}

impl EventChannel for FakeChannel {
    async fn subscribe(&self, topics: &[String]) -> Result<EventReceiver> {
        self.subscribed.lock().unwrap().extend(topics.iter().cloned());
        Ok(EventReceiver::new(self.tx.subscribe()))
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn detail(id: &str, mac: Option<&str>, sources: &[(&str, i64, bool)]) -> AmplifierDetail {
    let sources: Vec<_> = sources
        .iter()
        .map(|(name, position, enabled)| {
            json!({ "name": name, "position": position, "is_enabled": enabled })
        })
        .collect();
    serde_json::from_value(json!({
        "id": id,
        "mac_address": mac,
        "power": false,
        "mute": false,
        "volume_percent": 35,
        "source": 2,
        "sources": sources,
    }))
    .unwrap()
}

pub fn m33() -> AmplifierDetail {
    detail("m33", Some("AA:BB"), &[("Optical 1", 2, true), ("Phono", 5, true)])
}

/// A live accessory for `m33` on a fresh registry
pub fn accessory(
    api: Arc<FakeApi>,
    options: &AccessoryOptions,
) -> (AmplifierAccessory<FakeApi>, Arc<MemoryHandle>) {
    let registry = MemoryRegistry::new();
    let token = IdentityToken::from_mac("AA:BB").unwrap();
    let handle = registry.register(token, "m33");
    let device = m33().into_device().unwrap();
    let accessory = AmplifierAccessory::new(token, device, handle, api, options);
    (accessory, registry.handle(&token).unwrap())
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
