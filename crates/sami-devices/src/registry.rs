//! Device registry.
//!
//! Holds the configuration of every known device. Entries are stored as
//! `Arc<DeviceConfig>` so workers can take a cheap snapshot at the start of
//! each poll cycle; updates replace the whole entry.

use parking_lot::RwLock;
use sami_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{DeviceConfig, DeviceConfigUpdate, DeviceKind};

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<String, Arc<DeviceConfig>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of configurations, failing on the first
    /// invalid or duplicate entry.
    pub fn from_configs(configs: impl IntoIterator<Item = DeviceConfig>) -> Result<Self> {
        let registry = Self::new();
        for config in configs {
            registry.register(config)?;
        }
        Ok(registry)
    }

    /// Register a new device.
    pub fn register(&self, config: DeviceConfig) -> Result<()> {
        config.validate()?;
        let mut devices = self.devices.write();
        if devices.contains_key(&config.device_id) {
            return Err(Error::Configuration(format!(
                "device {} is already registered",
                config.device_id
            )));
        }
        tracing::debug!(device_id = %config.device_id, kind = %config.kind(), "Registered device");
        devices.insert(config.device_id.clone(), Arc::new(config));
        Ok(())
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceConfig>> {
        self.devices.read().get(device_id).cloned()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.read().contains_key(device_id)
    }

    /// All devices, ordered by id.
    pub fn list(&self) -> Vec<Arc<DeviceConfig>> {
        self.devices.read().values().cloned().collect()
    }

    pub fn list_by_kind(&self, kind: DeviceKind) -> Vec<Arc<DeviceConfig>> {
        self.devices
            .read()
            .values()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    /// Validate and apply a partial update. The previous entry stays in place
    /// if validation fails.
    pub fn update(&self, device_id: &str, update: &DeviceConfigUpdate) -> Result<Arc<DeviceConfig>> {
        let mut devices = self.devices.write();
        let current = devices
            .get(device_id)
            .ok_or_else(|| Error::NotFound(format!("device {}", device_id)))?;
        let next = Arc::new(current.apply(update)?);
        devices.insert(device_id.to_string(), next.clone());
        Ok(next)
    }

    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceConfig>> {
        self.devices.write().remove(device_id)
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpsProvider;

    fn gps(id: &str) -> DeviceConfig {
        DeviceConfig::gps(id, "Truck tracker", GpsProvider::Cellular { endpoint: None })
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = DeviceRegistry::new();
        registry.register(gps("gps_2")).unwrap();
        registry
            .register(DeviceConfig::rfid("reader_1", "Gate", "/dev/ttyUSB0", "Gate"))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("gps_2"));
        assert_eq!(registry.list_by_kind(DeviceKind::GpsDevice).len(), 1);
        assert_eq!(
            registry.list().iter().map(|c| c.device_id.as_str()).collect::<Vec<_>>(),
            vec!["gps_2", "reader_1"]
        );
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let registry = DeviceRegistry::from_configs(vec![gps("gps_1")]).unwrap();
        assert!(matches!(registry.register(gps("gps_1")), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_failed_update_keeps_previous_config() {
        let registry = DeviceRegistry::from_configs(vec![gps("gps_1")]).unwrap();
        let bad = DeviceConfigUpdate {
            poll_interval_ms: Some(0),
            ..Default::default()
        };
        assert!(registry.update("gps_1", &bad).is_err());
        assert_eq!(registry.get("gps_1").unwrap().poll_interval_ms, None);

        assert!(matches!(
            registry.update("missing", &DeviceConfigUpdate::default()),
            Err(Error::NotFound(_))
        ));
    }
}
