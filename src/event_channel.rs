use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::{MqttConfig, ReconnectConfig};
use crate::error::{AdapterError, Result};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Receiver for inbound events
pub struct EventReceiver {
    rx: broadcast::Receiver<InboundEvent>,
}

impl EventReceiver {
    pub fn new(rx: broadcast::Receiver<InboundEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with `ConnectionClosed` once the channel is gone, and with
    /// `ChannelError` when this receiver fell behind and missed events.
    pub async fn recv(&mut self) -> Result<InboundEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => AdapterError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                AdapterError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }
}

/// Topic-addressed publish/subscribe feed
pub trait EventChannel: Send + Sync {
    /// Subscribe to `topics`; the receiver yields events of every topic
    /// subscribed on this channel, callers filter by topic.
    fn subscribe(&self, topics: &[String]) -> impl Future<Output = Result<EventReceiver>> + Send;
}

/// How the channel behaves after a transport error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Backoff after `current`: initial, then doubling up to the maximum
    pub fn next_backoff(&self, current: Duration) -> Duration {
        if current.is_zero() {
            self.initial_backoff.min(self.max_backoff)
        } else {
            (current * 2).min(self.max_backoff)
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            enabled: config.enabled,
            initial_backoff: Duration::from_secs(config.initial_backoff_secs.max(1)),
            max_backoff: Duration::from_secs(config.max_backoff_secs.max(1)),
        }
    }
}

/// MQTT-backed event channel
///
/// One broker connection shared by every accessory. Subscribed topics are
/// remembered and re-subscribed after each reconnect.
pub struct MqttEventChannel {
    client: AsyncClient,
    /// Cleared once the connection is gone for good
    events_tx: Arc<Mutex<Option<broadcast::Sender<InboundEvent>>>>,
    topics: Arc<Mutex<BTreeSet<String>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MqttEventChannel {
    /// Start the broker connection in the background
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| AdapterError::Config("mqtt.host is required".into()))?;

        let client_id = format!("nad-bridge-{}", Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, host.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let topics = Arc::new(Mutex::new(BTreeSet::new()));
        let shared_tx = Arc::new(Mutex::new(Some(events_tx.clone())));
        let policy = ReconnectPolicy::from(&config.reconnect);

        tracing::info!("Connecting to MQTT broker {}:{}", host, config.port);
        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            topics.clone(),
            events_tx,
            shared_tx.clone(),
            policy,
        ));

        Ok(Self {
            client,
            events_tx: shared_tx,
            topics,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    /// Disconnect from the broker and stop the background task
    pub async fn close(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(e) = self.client.disconnect().await {
                tracing::debug!("MQTT disconnect request failed: {}", e);
            }
            handle.abort();
            crate::lock(&self.events_tx).take();
            tracing::info!("MQTT event channel closed");
        }
    }
}

impl EventChannel for MqttEventChannel {
    async fn subscribe(&self, topics: &[String]) -> Result<EventReceiver> {
        let _lifecycle = self.task.lock().await;

        // Receiver first, so nothing published after the SUBSCRIBE is missed.
        let receiver = crate::lock(&self.events_tx)
            .as_ref()
            .map(|tx| EventReceiver::new(tx.subscribe()))
            .ok_or(AdapterError::ConnectionClosed)?;
        for topic in topics {
            crate::lock(&self.topics).insert(topic.clone());
            self.client.subscribe(topic.clone(), QoS::AtLeastOnce).await?;
            tracing::info!("Subscribed to topic {}", topic);
        }
        Ok(receiver)
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Arc<Mutex<BTreeSet<String>>>,
    events_tx: broadcast::Sender<InboundEvent>,
    shared_tx: Arc<Mutex<Option<broadcast::Sender<InboundEvent>>>>,
    policy: ReconnectPolicy,
) {
    let mut backoff = Duration::ZERO;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("Connected to MQTT broker");
                backoff = Duration::ZERO;

                let topics: Vec<String> = crate::lock(&topics).iter().cloned().collect();
                for topic in topics {
                    if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                        tracing::error!("Error subscribing to topic {}: {}", topic, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!("Received message on topic {}", publish.topic);
                // No receivers yet is fine
                let _ = events_tx.send(InboundEvent {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("MQTT error: {}", e);
                if !policy.enabled {
                    tracing::warn!("MQTT reconnect disabled, event channel stopped");
                    // Dropping the last senders ends every receiver
                    crate::lock(&shared_tx).take();
                    break;
                }

                backoff = policy.next_backoff(backoff);
                tracing::info!("Reconnecting to MQTT broker in {:?}", backoff);
                sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let policy = ReconnectPolicy {
            enabled: true,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        };
        let mut backoff = Duration::ZERO;
        let mut seen = Vec::new();
        for _ in 0..5 {
            backoff = policy.next_backoff(backoff);
            seen.push(backoff.as_secs());
        }
        assert_eq!(seen, vec![1, 2, 4, 5, 5]);
    }

    #[tokio::test]
    async fn test_receiver_reports_closed_channel() {
        let (tx, rx) = broadcast::channel(4);
        let mut receiver = EventReceiver::new(rx);
        tx.send(InboundEvent {
            topic: "nad/m33/power".into(),
            payload: b"On".to_vec(),
        })
        .unwrap();
        drop(tx);

        assert_eq!(receiver.recv().await.unwrap().payload, b"On".to_vec());
        assert!(matches!(receiver.recv().await, Err(AdapterError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_receiver_reports_lag() {
        let (tx, rx) = broadcast::channel(1);
        let mut receiver = EventReceiver::new(rx);

        for payload in [b"1", b"2"] {
            tx.send(InboundEvent {
                topic: "nad/m33/source".into(),
                payload: payload.to_vec(),
            })
            .unwrap();
        }

        assert!(matches!(receiver.recv().await, Err(AdapterError::ChannelError(_))));
        assert_eq!(receiver.recv().await.unwrap().payload, b"2".to_vec());
    }

    #[tokio::test]
    async fn test_stopped_event_loop_closes_receivers() {
        let config = MqttConfig {
            host: Some("127.0.0.1".into()),
            port: 1,
            reconnect: ReconnectConfig {
                enabled: false,
                ..ReconnectConfig::default()
            },
            ..MqttConfig::default()
        };
        let channel = MqttEventChannel::connect(&config).unwrap();
        let mut receiver = channel.subscribe(&[]).await.unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(10), receiver.recv())
            .await
            .unwrap();
        assert!(matches!(closed, Err(AdapterError::ConnectionClosed)));
        assert!(matches!(
            channel.subscribe(&[]).await,
            Err(AdapterError::ConnectionClosed)
        ));
    }
}
