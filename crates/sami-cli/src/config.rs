//! Application configuration.
//!
//! Loaded from a TOML file, then adjusted by `SAMI_*` environment variables.

use anyhow::{bail, Context, Result};
use sami_core::config::{defaults, env_vars};
use sami_devices::{
    AlertThresholds, ClassifierSettings, DeviceConfig, DeviceKind, EntityRef, GpsProvider, SupervisorSettings,
    TagDirectory, Vehicle, ConnectionConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One tag assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagEntry {
    pub tag_id: String,
    #[serde(default)]
    pub employee: Option<EntityRef>,
    #[serde(default)]
    pub asset: Option<EntityRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root for the event database and snapshots.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub thresholds: AlertThresholds,
    #[serde(default)]
    pub classifier: ClassifierSettings,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub tags: Vec<TagEntry>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `SAMI_*` overrides. `lookup` is usually `std::env::var`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(env_vars::DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(key) = lookup(env_vars::SATELLITE_API_KEY).filter(|k| !k.is_empty()) {
            for device in &mut self.devices {
                if let ConnectionConfig::GpsDevice(gps) = &mut device.connection {
                    if let GpsProvider::Satellite { api_key, .. } = &mut gps.provider {
                        if api_key.is_none() {
                            *api_key = Some(key.clone());
                        }
                    }
                }
            }
        }

        if let Some(raw) = lookup(env_vars::GPS_UPDATE_INTERVAL) {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds, got {:?}", env_vars::GPS_UPDATE_INTERVAL, raw))?;
            if secs == 0 {
                bail!("{} must be positive", env_vars::GPS_UPDATE_INTERVAL);
            }
            for device in &mut self.devices {
                if device.kind() == DeviceKind::GpsDevice && device.poll_interval_ms.is_none() {
                    device.poll_interval_ms = Some(secs * 1000);
                }
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !ids.insert(device.device_id.as_str()) {
                bail!("duplicate device id {}", device.device_id);
            }
        }

        for vehicle in &self.vehicles {
            let tracker = self.devices.iter().find(|d| d.device_id == vehicle.gps_device_id);
            match tracker {
                Some(d) if d.kind() == DeviceKind::GpsDevice => {}
                Some(_) => bail!(
                    "vehicle {} points at {}, which is not a GPS device",
                    vehicle.vehicle_id,
                    vehicle.gps_device_id
                ),
                None => bail!(
                    "vehicle {} points at unknown device {}",
                    vehicle.vehicle_id,
                    vehicle.gps_device_id
                ),
            }
        }

        for tag in &self.tags {
            if tag.tag_id.trim().is_empty() {
                bail!("tag entries need a tag_id");
            }
            if tag.employee.is_none() && tag.asset.is_none() {
                bail!("tag {} is bound to neither an employee nor an asset", tag.tag_id);
            }
        }

        if !(self.thresholds.max_speed_kmh > 0.0) {
            bail!("max_speed_kmh must be positive");
        }
        if !(0.0..=1.0).contains(&self.thresholds.min_signal_strength) {
            bail!("min_signal_strength must be within 0..=1");
        }
        for fence in &self.classifier.geofences {
            if !fence.center.is_valid() || !(fence.radius_km > 0.0) {
                bail!("geofence {} has an invalid center or radius", fence.name);
            }
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(defaults::DATA_DIR))
    }

    pub fn tag_directory(&self) -> TagDirectory {
        let directory = TagDirectory::new();
        for tag in &self.tags {
            let tag_id = tag.tag_id.trim();
            if let Some(employee) = &tag.employee {
                directory.bind_employee(tag_id, employee.clone());
            }
            if let Some(asset) = &tag.asset {
                directory.bind_asset(tag_id, asset.clone());
            }
        }
        directory
    }
}

/// Annotated starting point for a config file.
pub const SAMPLE_CONFIG: &str = r#"# SAMI device pipeline configuration
data_dir = "./data"

[supervisor]
stop_grace_ms = 5000
retry_budget = 3
retry_backoff_ms = 1000
read_timeout_ms = 1000

[thresholds]
max_speed_kmh = 80.0
min_signal_strength = 0.5

[classifier]
object_confidence_threshold = 0.7

[[classifier.geofences]]
name = "yard"
center = { latitude = -34.6037, longitude = -58.3816 }
radius_km = 2.0
rule = "stay_inside"

[[devices]]
device_id = "camera_1"
name = "Main gate camera"
poll_interval_ms = 100

[devices.connection]
kind = "camera"
fps = 15
analyze_every = 10
source = { type = "snapshot", url = "http://192.168.1.100/snapshot.jpg" }

[[devices]]
device_id = "reader_1"
name = "Main entrance reader"
poll_interval_ms = 100

[devices.connection]
kind = "rfid_reader"
port = "/dev/ttyUSB0"
baud_rate = 9600
location = "Main entrance"

[[devices]]
device_id = "gps_1"
name = "Truck 1 tracker"
restricted = false

[devices.connection]
kind = "gps_device"
provider = { type = "simulated", latitude = -34.6037, longitude = -58.3816, jitter_degrees = 0.01 }

[[vehicles]]
vehicle_id = "truck_1"
name = "Truck 1"
license_plate = "AB123CD"
gps_device_id = "gps_1"

[[tags]]
tag_id = "TAG001"
employee = { id = 1, name = "Ana Torres" }

[[tags]]
tag_id = "TAG100"
asset = { id = 10, name = "Generator" }
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = AppConfig::parse(SAMPLE_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.devices.len(), 3);
        assert_eq!(config.vehicles[0].gps_device_id, "gps_1");
        assert!(!config.devices[2].restricted);
        assert_eq!(config.classifier.geofences.len(), 1);

        let tags = config.tag_directory();
        assert_eq!(tags.resolve("TAG001").unwrap().employee.unwrap().id, 1);
        assert!(tags.resolve("TAG100").unwrap().employee.is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.supervisor, SupervisorSettings::default());
        assert_eq!(config.thresholds.max_speed_kmh, 80.0);
        assert_eq!(config.data_dir(), PathBuf::from("./data"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::parse(
            r#"
[[devices]]
device_id = "gps_sat"
name = "Satellite tracker"
[devices.connection]
kind = "gps_device"
provider = { type = "satellite", endpoint = "https://tracking.example.com" }

[[devices]]
device_id = "gps_fixed"
name = "Fixed interval"
poll_interval_ms = 5000
[devices.connection]
kind = "gps_device"
provider = { type = "cellular" }
"#,
        )
        .unwrap();

        config
            .apply_env_overrides(env(&[
                ("SAMI_DATA_DIR", "/var/lib/sami"),
                ("SAMI_SATELLITE_API_KEY", "secret"),
                ("SAMI_GPS_UPDATE_INTERVAL", "60"),
            ]))
            .unwrap();

        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/sami"));
        match &config.devices[0].connection {
            ConnectionConfig::GpsDevice(gps) => assert_eq!(
                gps.provider,
                GpsProvider::Satellite {
                    endpoint: "https://tracking.example.com".to_string(),
                    api_key: Some("secret".to_string()),
                }
            ),
            other => panic!("unexpected connection {:?}", other),
        }
        assert_eq!(config.devices[0].poll_interval_ms, Some(60_000));
        assert_eq!(config.devices[1].poll_interval_ms, Some(5_000));
    }

    #[test]
    fn test_bad_interval_override() {
        let mut config = AppConfig::default();
        assert!(config
            .apply_env_overrides(env(&[("SAMI_GPS_UPDATE_INTERVAL", "soon")]))
            .is_err());
        assert!(config
            .apply_env_overrides(env(&[("SAMI_GPS_UPDATE_INTERVAL", "0")]))
            .is_err());
    }

    #[test]
    fn test_vehicle_must_reference_gps_device() {
        let mut config = AppConfig::parse(SAMPLE_CONFIG).unwrap();
        config.vehicles[0].gps_device_id = "reader_1".to_string();
        assert!(config.validate().is_err());

        config.vehicles[0].gps_device_id = "gps_404".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_devices_rejected() {
        let mut config = AppConfig::parse(SAMPLE_CONFIG).unwrap();
        let copy = config.devices[0].clone();
        config.devices.push(copy);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
