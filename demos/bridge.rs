//! Run the bridge against a real control API and broker, with an in-memory host.
//!
//! ```text
//! cargo run --example bridge -- nad-bridge.json
//! RUST_LOG=nad_bridge=debug cargo run --example bridge -- nad-bridge.json
//! ```

use std::sync::Arc;

use nad_bridge::{MemoryRegistry, Platform, PlatformConfig, PointKey};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nad_bridge=info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "nad-bridge.json".to_string());
    let config = PlatformConfig::load(&path)?;
    let interval = config.discovery_interval();

    let registry = Arc::new(MemoryRegistry::new());
    let platform = Arc::new(Platform::from_config(config, registry.clone())?);

    let report = platform.discover_devices().await?;
    for (id, err) in &report.failed {
        eprintln!("skipped {id}: {err}");
    }

    for accessory in platform.accessories().await {
        let device = accessory.device();
        println!("{} ({})", device.id, accessory.token());
        for input in &device.capabilities {
            let marker = if input.is_enabled { " " } else { "-" };
            println!("  {marker} [{}] {}", input.position, input.name);
        }
        println!("  volume: {:?}", accessory.get(&PointKey::Volume));
    }

    if let Some(interval) = interval {
        platform.spawn_discovery(interval);
    }

    println!("Watching for status events, Ctrl-C to quit");
    tokio::signal::ctrl_c().await?;

    platform.close().await;
    Ok(())
}
