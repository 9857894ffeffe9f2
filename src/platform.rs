use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::accessory::{AccessoryOptions, AmplifierAccessory};
use crate::catalog::list_devices;
use crate::config::PlatformConfig;
use crate::control_api::{ControlApi, HttpControlApi};
use crate::error::{AdapterError, Result};
use crate::event_channel::{EventChannel, MqttEventChannel};
use crate::host::{AccessoryHandle, HostRegistry};
use crate::identity::{self, IdentityToken, ResolvedDevice};
use crate::types::{Device, DeviceId};

const STOP_GRACE: Duration = Duration::from_millis(500);

/// Outcome of one discovery cycle
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub created: Vec<IdentityToken>,
    pub restored: Vec<IdentityToken>,
    pub retired: Vec<IdentityToken>,
    /// Amplifiers left out of this cycle and why
    pub failed: Vec<(DeviceId, AdapterError)>,
}

struct DiscoveryLoop {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Discovers amplifiers and keeps the host's accessories in line with them
///
/// Each cycle fetches the catalog, resolves identities against the handles
/// the host holds, then registers new accessories, restores or refreshes
/// existing ones and deregisters those whose amplifier disappeared.
pub struct Platform<A, C> {
    config: PlatformConfig,
    api: Arc<A>,
    channel: Arc<C>,
    registry: Arc<dyn HostRegistry>,
    accessories: tokio::sync::Mutex<BTreeMap<IdentityToken, Arc<AmplifierAccessory<A>>>>,
    discovery: Mutex<Option<DiscoveryLoop>>,
}

impl Platform<HttpControlApi, MqttEventChannel> {
    /// Validate the config and connect the HTTP and MQTT sides
    ///
    /// Fails when `mqtt.host` or `http.basePath` is missing; the caller
    /// should then leave the platform inert.
    pub fn from_config(config: PlatformConfig, registry: Arc<dyn HostRegistry>) -> Result<Self> {
        config.validate()?;
        let api = HttpControlApi::from_config(&config.http)?;
        let channel = MqttEventChannel::connect(&config.mqtt)?;
        Ok(Self::new(config, Arc::new(api), Arc::new(channel), registry))
    }

    /// Shut down and disconnect from the broker
    pub async fn close(&self) {
        self.shutdown().await;
        self.channel.close().await;
    }
}

impl<A, C> Platform<A, C>
where
    A: ControlApi,
    C: EventChannel + 'static,
{
    pub fn new(
        config: PlatformConfig,
        api: Arc<A>,
        channel: Arc<C>,
        registry: Arc<dyn HostRegistry>,
    ) -> Self {
        tracing::debug!(
            "Finished initializing platform: {}",
            config.name.as_deref().unwrap_or("NAD")
        );
        Self {
            config,
            api,
            channel,
            registry,
            accessories: tokio::sync::Mutex::new(BTreeMap::new()),
            discovery: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub async fn accessory(&self, token: &IdentityToken) -> Option<Arc<AmplifierAccessory<A>>> {
        self.accessories.lock().await.get(token).cloned()
    }

    pub async fn accessories(&self) -> Vec<Arc<AmplifierAccessory<A>>> {
        self.accessories.lock().await.values().cloned().collect()
    }

    /// Run one discovery cycle
    ///
    /// Fails only when the amplifier list itself cannot be fetched. Per-device
    /// problems are logged and returned in [`DiscoveryReport::failed`]. Nothing
    /// is retired in a cycle where any listed amplifier's details failed.
    pub async fn discover_devices(&self) -> Result<DiscoveryReport> {
        let catalog = match list_devices(self.api.as_ref()).await {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::error!("Device discovery failed: {}", e);
                return Err(e);
            }
        };
        tracing::debug!("Discovered {} amplifier(s)", catalog.devices.len());

        let mut report = DiscoveryReport::default();
        let unreachable: BTreeSet<DeviceId> =
            catalog.failures.iter().map(|(id, _)| id.clone()).collect();
        report.failed.extend(catalog.failures);

        let known = self.registry.cached_tokens();
        let resolution = identity::resolve(catalog.devices, &known);
        report.failed.extend(resolution.rejected);

        let mut accessories = self.accessories.lock().await;

        for ResolvedDevice { token, device } in resolution.to_create {
            tracing::info!("Adding new accessory: {}", device.id);
            let handle = self.registry.register(token, &device.id);
            let accessory = self.attach(token, device, handle).await;
            accessories.insert(token, accessory);
            report.created.push(token);
        }

        for ResolvedDevice { token, device } in resolution.to_restore {
            if let Some(existing) = accessories.get(&token) {
                let changes = existing.refresh(device);
                tracing::debug!("Refreshed accessory {}: {:?}", token, changes);
            } else {
                let handle = match self.registry.restore(&token) {
                    Some(handle) => {
                        tracing::info!(
                            "Restoring existing accessory from cache: {}",
                            handle.display_name()
                        );
                        handle
                    }
                    None => self.registry.register(token, &device.id),
                };
                let accessory = self.attach(token, device, handle).await;
                accessories.insert(token, accessory);
            }
            report.restored.push(token);
        }

        // A listed amplifier whose detail call failed has no token this cycle,
        // so it cannot be told apart from one that is really gone.
        if !unreachable.is_empty() && !resolution.to_retire.is_empty() {
            tracing::warn!(
                "Keeping {} accessory(ies) until {} unavailable amplifier(s) respond",
                resolution.to_retire.len(),
                unreachable.len()
            );
            return Ok(report);
        }

        for token in resolution.to_retire {
            tracing::info!("Removing existing accessory from cache: {}", token);
            if let Some(accessory) = accessories.remove(&token) {
                accessory.shutdown().await;
            }
            self.registry.unregister(&token);
            report.retired.push(token);
        }

        Ok(report)
    }

    async fn attach(
        &self,
        token: IdentityToken,
        device: Device,
        handle: Arc<dyn AccessoryHandle>,
    ) -> Arc<AmplifierAccessory<A>> {
        let options = AccessoryOptions::from(&self.config);
        let accessory = Arc::new(AmplifierAccessory::new(
            token,
            device,
            handle,
            self.api.clone(),
            &options,
        ));

        if let Err(e) = accessory
            .start_events(self.channel.as_ref(), &self.config.mqtt.topic_base)
            .await
        {
            tracing::error!("Error subscribing to status topics for {}: {}", token, e);
        }
        accessory
    }

    /// Repeat discovery in the background
    ///
    /// Restarts the loop if one is already running.
    pub fn spawn_discovery(self: &Arc<Self>, interval: Duration) {
        self.stop_discovery_loop();

        let (stop_tx, _) = broadcast::channel(1);
        let mut stop_rx = stop_tx.subscribe();
        let platform = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Discovery stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match platform.discover_devices().await {
                            Ok(report) => tracing::info!(
                                "Discovery cycle: {} new, {} restored, {} retired, {} failed",
                                report.created.len(),
                                report.restored.len(),
                                report.retired.len(),
                                report.failed.len()
                            ),
                            Err(e) => tracing::error!("Discovery cycle failed: {}", e),
                        }
                    }
                }
            }
        });

        *crate::lock(&self.discovery) = Some(DiscoveryLoop { stop_tx, handle });
    }

    fn stop_discovery_loop(&self) -> Option<JoinHandle<()>> {
        let discovery = crate::lock(&self.discovery).take()?;
        // Receiver may already be gone
        let _ = discovery.stop_tx.send(());
        Some(discovery.handle)
    }

    /// Stop rediscovery and every accessory's event synchronizer
    pub async fn shutdown(&self) {
        if let Some(handle) = self.stop_discovery_loop() {
            if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
                tracing::warn!("Discovery loop did not stop in time");
            }
        }

        let accessories = self.accessories.lock().await;
        for accessory in accessories.values() {
            accessory.shutdown().await;
        }
    }
}
