use futures_util::future::join_all;

use crate::control_api::ControlApi;
use crate::error::{AdapterError, Result};
use crate::types::{Device, DeviceId};

/// Result of one catalog listing
#[derive(Debug, Default)]
pub struct Catalog {
    /// Fully populated devices, in the order the API listed them
    pub devices: Vec<Device>,

    /// Devices whose detail call failed; they are absent from `devices`
    pub failures: Vec<(DeviceId, AdapterError)>,
}

/// Resolve every controllable amplifier and its capabilities
///
/// Issues one list call, then one detail call per amplifier concurrently.
/// A failing list call fails the whole listing; a failing detail call only
/// excludes that amplifier and is recorded in [`Catalog::failures`].
pub async fn list_devices<A: ControlApi>(api: &A) -> Result<Catalog> {
    let summaries = api.list_amplifiers().await?;
    tracing::debug!("Control API listed {} amplifier(s)", summaries.len());

    let details = join_all(summaries.iter().map(|s| fetch_device(api, &s.id))).await;

    let mut catalog = Catalog::default();
    for (summary, detail) in summaries.into_iter().zip(details) {
        match detail {
            Ok(device) => catalog.devices.push(device),
            Err(e) => {
                tracing::warn!("Excluding amplifier {}: {}", summary.id, e);
                catalog.failures.push((summary.id, e));
            }
        }
    }

    Ok(catalog)
}

async fn fetch_device<A: ControlApi>(api: &A, id: &str) -> Result<Device> {
    let detail = api.get_amplifier(id).await?;
    if detail.id != id {
        return Err(AdapterError::MalformedResponse {
            url: format!("amplifiers/{id}"),
            reason: format!("detail reports id {:?}", detail.id),
        });
    }

    detail
        .into_device()
        .map_err(|reason| AdapterError::MalformedResponse {
            url: format!("amplifiers/{id}"),
            reason,
        })
}
