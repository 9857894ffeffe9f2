use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{AdapterError, Result};
use crate::types::{Device, DeviceId};

/// Namespace for amplifier identity tokens
const IDENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6e61_6462_7269_4467_8e00_616d_705f_6964);

/// Stable key of an amplifier's host-side handle
///
/// A UUIDv5 over the normalized MAC address: the same amplifier yields the
/// same token on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityToken(Uuid);

impl IdentityToken {
    pub fn from_mac(mac_address: &str) -> Option<Self> {
        let normalized = mac_address.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return None;
        }
        Some(Self(Uuid::new_v5(&IDENTITY_NAMESPACE, normalized.as_bytes())))
    }

    /// Token for a device, failing when it has no network identity
    pub fn for_device(device: &Device) -> Result<Self> {
        device
            .mac_address
            .as_deref()
            .and_then(Self::from_mac)
            .ok_or_else(|| AdapterError::Identity {
                device_id: device.id.clone(),
                reason: "missing mac_address".into(),
            })
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A fetched device paired with its token
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    pub token: IdentityToken,
    pub device: Device,
}

/// Fetched devices reconciled against previously known handles
#[derive(Debug, Default)]
pub struct Resolution {
    /// New devices, in fetch order
    pub to_create: Vec<ResolvedDevice>,
    /// Devices with an existing handle, in fetch order
    pub to_restore: Vec<ResolvedDevice>,
    /// Known handles whose device was not fetched
    pub to_retire: Vec<IdentityToken>,
    /// Devices without a usable identity
    pub rejected: Vec<(DeviceId, AdapterError)>,
}

/// Partition a fresh fetch into create / restore / retire sets
pub fn resolve(devices: Vec<Device>, known: &[IdentityToken]) -> Resolution {
    let known_set: BTreeSet<IdentityToken> = known.iter().copied().collect();
    let mut fresh = BTreeSet::new();
    let mut resolution = Resolution::default();

    for device in devices {
        let token = match IdentityToken::for_device(&device) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Skipping amplifier {}: {}", device.id, e);
                resolution.rejected.push((device.id, e));
                continue;
            }
        };

        if !fresh.insert(token) {
            let e = AdapterError::Identity {
                device_id: device.id.clone(),
                reason: format!("mac_address collides with another amplifier ({token})"),
            };
            tracing::warn!("Skipping amplifier {}: {}", device.id, e);
            resolution.rejected.push((device.id, e));
            continue;
        }

        let resolved = ResolvedDevice { token, device };
        if known_set.contains(&token) {
            resolution.to_restore.push(resolved);
        } else {
            resolution.to_create.push(resolved);
        }
    }

    resolution.to_retire = known
        .iter()
        .filter(|t| !fresh.contains(*t))
        .copied()
        .collect();

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AmplifierStatus;

    fn device(id: &str, mac: Option<&str>) -> Device {
        Device {
            id: id.into(),
            mac_address: mac.map(Into::into),
            capabilities: vec![],
            status: AmplifierStatus::default(),
        }
    }

    fn token(mac: &str) -> IdentityToken {
        IdentityToken::from_mac(mac).unwrap()
    }

    #[test]
    fn test_token_is_deterministic_and_normalized() {
        assert_eq!(token("AA:BB"), token("AA:BB"));
        assert_eq!(token("aa:bb "), token("AA:BB"));
        assert_ne!(token("AA:BB"), token("AA:BC"));
        assert!(IdentityToken::from_mac("  ").is_none());
    }

    #[test]
    fn test_missing_mac_is_identity_error() {
        let err = IdentityToken::for_device(&device("m33", None)).unwrap_err();
        assert!(matches!(err, AdapterError::Identity { .. }));
        let err = IdentityToken::for_device(&device("m33", Some(""))).unwrap_err();
        assert!(matches!(err, AdapterError::Identity { .. }));
    }

    #[test]
    fn test_reconcile_create_restore_retire() {
        let a = token("AA:AA");
        let b = token("BB:BB");
        let c = token("CC:CC");

        let resolution = resolve(
            vec![device("b", Some("BB:BB")), device("c", Some("CC:CC"))],
            &[a, b],
        );

        let created: Vec<_> = resolution.to_create.iter().map(|d| d.token).collect();
        let restored: Vec<_> = resolution.to_restore.iter().map(|d| d.token).collect();
        assert_eq!(created, vec![c]);
        assert_eq!(restored, vec![b]);
        assert_eq!(resolution.to_retire, vec![a]);
        assert!(resolution.rejected.is_empty());
    }

    #[test]
    fn test_duplicate_mac_rejected() {
        let resolution = resolve(
            vec![device("m33", Some("AA:BB")), device("m10", Some("aa:bb"))],
            &[],
        );
        assert_eq!(resolution.to_create.len(), 1);
        assert_eq!(resolution.to_create[0].device.id, "m33");
        assert_eq!(resolution.rejected.len(), 1);
        assert_eq!(resolution.rejected[0].0, "m10");
    }

    #[test]
    fn test_rejected_device_does_not_block_others() {
        let resolution = resolve(vec![device("x", None), device("m33", Some("AA:BB"))], &[]);
        assert_eq!(resolution.to_create.len(), 1);
        assert_eq!(resolution.rejected.len(), 1);
    }
}
