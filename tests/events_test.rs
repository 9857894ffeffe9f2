#![allow(clippy::unwrap_used)]
// Status events flowing from the event channel into accessory state.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{accessory, detail, eventually, m33, FakeApi, FakeChannel};
use nad_bridge::{
    AccessoryHandle, AccessoryInformation, AccessoryOptions, AmplifierAccessory, ControlPoint,
    HostRegistry, IdentityToken, MemoryHandle, MemoryRegistry, PointKey, PointValue,
};

async fn live() -> (
    Arc<FakeChannel>,
    nad_bridge::AmplifierAccessory<FakeApi>,
    Arc<nad_bridge::MemoryHandle>,
) {
    let channel = Arc::new(FakeChannel::new());
    let (accessory, handle) = accessory(Arc::new(FakeApi::new()), &AccessoryOptions::default());
    accessory.start_events(channel.as_ref(), "nad").await.unwrap();
    (channel, accessory, handle)
}

#[tokio::test]
async fn test_subscribes_to_every_status_topic() {
    let (channel, accessory, _handle) = live().await;

    assert_eq!(
        channel.subscribed(),
        vec!["nad/m33/power", "nad/m33/mute", "nad/m33/volume_percent", "nad/m33/source"]
    );
    assert!(accessory.events_running().await);
}

#[tokio::test]
async fn test_events_update_state_and_host() {
    let (channel, accessory, handle) = live().await;

    channel.publish("nad/m33/power", b"On");
    channel.publish("nad/m33/mute", b"Off");
    channel.publish("nad/m33/volume_percent", b"37");
    channel.publish("nad/m33/source", b"5");

    assert!(eventually(|| accessory.state().source == Some(5)).await);
    let state = accessory.state();
    assert!(state.power);
    assert!(!state.mute);
    assert_eq!(state.volume_percent, 37);

    assert_eq!(handle.value(&PointKey::Power), Some(PointValue::Bool(true)));
    assert_eq!(handle.value(&PointKey::Volume), Some(PointValue::Level(37)));
    assert_eq!(handle.value(&PointKey::VolumeLevel), Some(PointValue::Level(37)));
    assert_eq!(handle.value(&PointKey::Source), Some(PointValue::Identifier(5)));
}

#[tokio::test]
async fn test_malformed_event_is_ignored() {
    let (channel, accessory, _handle) = live().await;

    channel.publish("nad/m33/volume_percent", b"loud");
    channel.publish("nad/m33/volume_percent", b"250");
    channel.publish("nad/m33/mute", b"On");

    assert!(eventually(|| accessory.state().mute).await);
    assert_eq!(accessory.state().volume_percent, 35);
    assert!(accessory.events_running().await);

    channel.publish("nad/m33/volume_percent", b"12");
    assert!(eventually(|| accessory.state().volume_percent == 12).await);
}

#[tokio::test]
async fn test_foreign_topics_are_ignored() {
    let (channel, accessory, handle) = live().await;

    channel.publish("nad/m10/power", b"On");
    channel.publish("nad/m33/bass", b"On");
    channel.publish("nad/m33/power", b"Off");

    assert!(eventually(|| handle.pushes().len() == 1).await);
    assert!(!accessory.state().power);
}

#[tokio::test]
async fn test_lowercase_on_is_off() {
    let (channel, accessory, _handle) = live().await;

    channel.publish("nad/m33/power", b"On");
    assert!(eventually(|| accessory.state().power).await);

    channel.publish("nad/m33/power", b"on");
    assert!(eventually(|| !accessory.state().power).await);
}

#[tokio::test]
async fn test_shutdown_stops_applying_events() {
    let (channel, accessory, _handle) = live().await;
    accessory.shutdown().await;

    assert!(!accessory.events_running().await);
    channel.publish("nad/m33/volume_percent", b"80");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(accessory.state().volume_percent, 35);
}

#[tokio::test]
async fn test_command_and_event_share_one_view() {
    let api = Arc::new(FakeApi::new());
    let channel = Arc::new(FakeChannel::new());
    let (accessory, handle) = accessory(api, &AccessoryOptions::default());
    accessory.start_events(channel.as_ref(), "nad").await.unwrap();

    accessory.set_volume(50).await.unwrap();
    channel.publish("nad/m33/volume_percent", b"45");

    assert!(eventually(|| accessory.state().volume_percent == 45).await);
    assert_eq!(handle.value(&PointKey::Volume), Some(PointValue::Level(45)));
}

/// Handle that delivers a power event while the power point is being updated
struct RacingHandle {
    inner: Arc<MemoryHandle>,
    channel: Arc<FakeChannel>,
    armed: AtomicBool,
}

impl AccessoryHandle for RacingHandle {
    fn token(&self) -> IdentityToken {
        self.inner.token()
    }
    fn display_name(&self) -> String {
        self.inner.display_name()
    }
    fn set_information(&self, info: &AccessoryInformation) {
        self.inner.set_information(info)
    }
    fn point_keys(&self) -> Vec<PointKey> {
        self.inner.point_keys()
    }
    fn add_point(&self, point: &ControlPoint) {
        self.inner.add_point(point)
    }
    fn update_point(&self, point: &ControlPoint) {
        if point.key == PointKey::Power && self.armed.swap(false, Ordering::SeqCst) {
            self.channel.publish("nad/m33/power", b"On");
            std::thread::sleep(Duration::from_millis(100));
        }
        self.inner.update_point(point)
    }
    fn remove_point(&self, key: &PointKey) {
        self.inner.remove_point(key)
    }
    fn set_display_order(&self, order: &[PointKey]) {
        self.inner.set_display_order(order)
    }
    fn push_update(&self, key: &PointKey, value: PointValue) {
        self.inner.push_update(key, value)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_during_refresh_is_not_overwritten() {
    let registry = MemoryRegistry::new();
    let token = IdentityToken::from_mac("AA:BB").unwrap();
    registry.register(token, "m33");
    let inner = registry.handle(&token).unwrap();
    let channel = Arc::new(FakeChannel::new());
    let handle = Arc::new(RacingHandle {
        inner: inner.clone(),
        channel: channel.clone(),
        armed: AtomicBool::new(false),
    });

    let accessory = AmplifierAccessory::new(
        token,
        m33().into_device().unwrap(),
        handle.clone(),
        Arc::new(FakeApi::new()),
        &AccessoryOptions::default(),
    );
    accessory.start_events(channel.as_ref(), "nad").await.unwrap();
    assert!(!accessory.state().power);

    handle.armed.store(true, Ordering::SeqCst);
    let device = detail("m33", Some("AA:BB"), &[("Optical 1", 2, false), ("Phono", 5, true)])
        .into_device()
        .unwrap();
    accessory.refresh(device);

    assert!(eventually(|| accessory.state().power).await);
    assert!(eventually(|| inner.value(&PointKey::Power) == Some(PointValue::Bool(true))).await);
}
