//! Event Synchronizer
//!
//! Status topics are `{topicBase}/{deviceId}/{power|mute|volume_percent|source}`.
//! Each topic has its own decoder; a payload that does not decode leaves the
//! cached value alone and is logged, it never ends the subscription.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::{AdapterError, Result};
use crate::event_channel::{EventChannel, EventReceiver, InboundEvent};
use crate::state::{AmplifierStateCache, StateUpdate};
use crate::types::{Axis, Position, VolumePercent, MAX_VOLUME};

/// Status topics of one amplifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    topics: Vec<(Axis, String)>,
}

impl TopicSet {
    pub fn new(topic_base: &str, device_id: &str) -> Self {
        let base = topic_base.trim_end_matches('/');
        let topics = Axis::ALL
            .iter()
            .map(|axis| (*axis, format!("{}/{}/{}", base, device_id, axis.segment())))
            .collect();
        Self { topics }
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn topic(&self, axis: Axis) -> Option<&str> {
        self.topics
            .iter()
            .find(|(a, _)| *a == axis)
            .map(|(_, t)| t.as_str())
    }

    /// Axis a topic reports, `None` for foreign topics
    pub fn classify(&self, topic: &str) -> Option<Axis> {
        self.topics
            .iter()
            .find(|(_, t)| t == topic)
            .map(|(axis, _)| *axis)
    }
}

/// Decode a payload received on `topic`, which reports `axis`
pub fn decode(axis: Axis, topic: &str, payload: &[u8]) -> Result<StateUpdate> {
    let malformed = |reason: String| AdapterError::MalformedEvent {
        topic: topic.to_owned(),
        payload: String::from_utf8_lossy(payload).into_owned(),
        reason,
    };

    match axis {
        Axis::Power => Ok(StateUpdate::Power(decode_switch(payload))),
        Axis::Mute => Ok(StateUpdate::Mute(decode_switch(payload))),
        Axis::Volume => decode_text(payload)
            .and_then(decode_volume)
            .map(StateUpdate::Volume)
            .map_err(malformed),
        Axis::Source => decode_text(payload)
            .and_then(decode_position)
            .map(StateUpdate::Source)
            .map_err(malformed),
    }
}

fn decode_text(payload: &[u8]) -> std::result::Result<&str, String> {
    std::str::from_utf8(payload).map_err(|e| e.to_string())
}

/// `"On"` is on, anything else (including non-text) is off
fn decode_switch(payload: &[u8]) -> bool {
    payload == b"On"
}

fn decode_volume(text: &str) -> std::result::Result<VolumePercent, String> {
    let value: i64 = text
        .trim()
        .parse()
        .map_err(|e| format!("not an integer: {e}"))?;
    VolumePercent::try_from(value)
        .ok()
        .filter(|v| *v <= MAX_VOLUME)
        .ok_or_else(|| format!("volume {value} outside 0..={MAX_VOLUME}"))
}

fn decode_position(text: &str) -> std::result::Result<Position, String> {
    text.trim()
        .parse()
        .map_err(|e| format!("not an integer: {e}"))
}

/// Keeps one accessory's cache in line with its status topics
pub struct EventSynchronizer {
    topics: TopicSet,
    task: JoinHandle<()>,
}

impl EventSynchronizer {
    /// Subscribe to every status topic and start applying events
    pub async fn start<C: EventChannel>(
        channel: &C,
        topics: TopicSet,
        cache: Arc<AmplifierStateCache>,
    ) -> Result<Self> {
        let receiver = channel.subscribe(&topics.topics()).await?;
        let task = tokio::spawn(run(receiver, topics.clone(), cache));
        Ok(Self { topics, task })
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for EventSynchronizer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(mut receiver: EventReceiver, topics: TopicSet, cache: Arc<AmplifierStateCache>) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                if let Err(e) = apply_event(&topics, &cache, &event) {
                    tracing::warn!("Ignoring event: {}", e);
                }
            }
            Err(AdapterError::ConnectionClosed) => {
                tracing::info!("Event channel closed, stopping synchronizer");
                break;
            }
            Err(e) => tracing::warn!("Event channel: {}", e),
        }
    }
}

/// Decode and apply one event; foreign topics are ignored
pub fn apply_event(
    topics: &TopicSet,
    cache: &AmplifierStateCache,
    event: &InboundEvent,
) -> Result<Option<StateUpdate>> {
    let Some(axis) = topics.classify(&event.topic) else {
        return Ok(None);
    };

    tracing::debug!(
        "Received message on topic {}: {}",
        event.topic,
        String::from_utf8_lossy(&event.payload)
    );
    let update = decode(axis, &event.topic, &event.payload)?;
    cache.apply_event(update);
    Ok(Some(update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const TOPIC: &str = "nad/m33/x";

    #[test]
    fn test_topic_layout() {
        let topics = TopicSet::new("nad/", "m33");
        assert_eq!(
            topics.topics(),
            vec![
                "nad/m33/power",
                "nad/m33/mute",
                "nad/m33/volume_percent",
                "nad/m33/source"
            ]
        );
        assert_eq!(topics.classify("nad/m33/volume_percent"), Some(Axis::Volume));
        assert_eq!(topics.classify("nad/m10/power"), None);
    }

    #[test]
    fn test_decode_power_and_mute() {
        assert_eq!(decode(Axis::Power, TOPIC, b"On").unwrap(), StateUpdate::Power(true));
        assert_eq!(decode(Axis::Power, TOPIC, b"Off").unwrap(), StateUpdate::Power(false));
        assert_eq!(decode(Axis::Power, TOPIC, b"on").unwrap(), StateUpdate::Power(false));
        assert_eq!(decode(Axis::Mute, TOPIC, b"On").unwrap(), StateUpdate::Mute(true));
        assert_eq!(decode(Axis::Mute, TOPIC, b"").unwrap(), StateUpdate::Mute(false));
    }

    #[test]
    fn test_decode_volume() {
        assert_eq!(decode(Axis::Volume, TOPIC, b"37").unwrap(), StateUpdate::Volume(37));
        assert_eq!(decode(Axis::Volume, TOPIC, b" 0\n").unwrap(), StateUpdate::Volume(0));

        for bad in [&b"loud"[..], &b"101"[..], &b"-3"[..], &b"12.5"[..]] {
            let err = decode(Axis::Volume, TOPIC, bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedEvent);
        }
    }

    #[test]
    fn test_decode_source() {
        assert_eq!(decode(Axis::Source, TOPIC, b"4").unwrap(), StateUpdate::Source(4));
        assert!(decode(Axis::Source, TOPIC, b"tv").is_err());
    }

    #[test]
    fn test_non_utf8_payload() {
        assert_eq!(decode(Axis::Power, TOPIC, &[0xff, 0xfe]).unwrap(), StateUpdate::Power(false));
        assert_eq!(decode(Axis::Mute, TOPIC, &[0xc3]).unwrap(), StateUpdate::Mute(false));

        let err = decode(Axis::Volume, TOPIC, &[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEvent);
        let err = decode(Axis::Source, TOPIC, &[0xff]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEvent);
    }
}
