//! Device configuration.
//!
//! Every device is described by a [`DeviceConfig`] whose `connection` field is
//! tagged by device kind, so camera, RFID and GPS parameters cannot be mixed.
//! Partial updates go through [`DeviceConfigUpdate`], which rejects unknown
//! fields and is validated before it is applied.
//!
//! ```toml
//! [[devices]]
//! device_id = "reader_1"
//! name = "Main entrance reader"
//! poll_interval_ms = 100
//!
//! [devices.connection]
//! kind = "rfid_reader"
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! location = "Main entrance"
//! ```

use sami_core::config::{defaults, simulation};
use sami_core::{Error, GeoPoint, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of polled input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Camera,
    RfidReader,
    GpsDevice,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::RfidReader => "rfid_reader",
            Self::GpsDevice => "gps_device",
        }
    }

    /// Default polling cadence for this kind.
    pub fn default_poll_interval(&self) -> Duration {
        Duration::from_millis(match self {
            Self::Camera => defaults::CAMERA_POLL_MS,
            Self::RfidReader => defaults::RFID_POLL_MS,
            Self::GpsDevice => defaults::GPS_POLL_MS,
        })
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame size requested from a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Where camera frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CameraSource {
    /// RTSP stream, decoded by an external stream decoder.
    Rtsp { url: String },
    /// Local capture device by index, decoded by an external stream decoder.
    Usb { index: u32 },
    /// HTTP endpoint returning one JPEG per request.
    Snapshot {
        url: String,
        #[serde(default = "default_snapshot_timeout")]
        timeout_secs: u64,
    },
}

impl CameraSource {
    pub fn describe(&self) -> String {
        match self {
            Self::Rtsp { url } => url.clone(),
            Self::Usb { index } => format!("usb:{}", index),
            Self::Snapshot { url, .. } => url.clone(),
        }
    }
}

fn default_snapshot_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConnection {
    pub source: CameraSource,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Hand every Nth frame to the classifier.
    #[serde(default = "default_analyze_every")]
    pub analyze_every: u32,
}

fn default_fps() -> u32 {
    15
}

fn default_analyze_every() -> u32 {
    defaults::CAMERA_ANALYZE_EVERY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfidConnection {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Physical location of the reader, copied into every tag event.
    #[serde(default)]
    pub location: String,
}

fn default_baud_rate() -> u32 {
    defaults::RFID_BAUD_RATE
}

/// Location provider behind a GPS device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GpsProvider {
    /// Satellite tracking API. Without an API key the simulator is used.
    Satellite {
        endpoint: String,
        #[serde(default)]
        api_key: Option<String>,
    },
    /// Cellular tracking. Served by the simulator.
    Cellular {
        #[serde(default)]
        endpoint: Option<String>,
    },
    /// Synthetic fixes around a base point.
    Simulated {
        #[serde(default = "default_base_latitude")]
        latitude: f64,
        #[serde(default = "default_base_longitude")]
        longitude: f64,
        #[serde(default = "default_jitter")]
        jitter_degrees: f64,
    },
}

fn default_base_latitude() -> f64 {
    simulation::BASE_LATITUDE
}

fn default_base_longitude() -> f64 {
    simulation::BASE_LONGITUDE
}

fn default_jitter() -> f64 {
    simulation::JITTER_DEGREES
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsConnection {
    pub provider: GpsProvider,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    defaults::GPS_REQUEST_TIMEOUT_SECS
}

/// Kind-specific connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionConfig {
    Camera(CameraConnection),
    RfidReader(RfidConnection),
    GpsDevice(GpsConnection),
}

impl ConnectionConfig {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Camera(_) => DeviceKind::Camera,
            Self::RfidReader(_) => DeviceKind::RfidReader,
            Self::GpsDevice(_) => DeviceKind::GpsDevice,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::Camera(cam) => {
                match &cam.source {
                    CameraSource::Rtsp { url } if !url.starts_with("rtsp://") => {
                        return Err(format!("RTSP url must start with rtsp://: {}", url));
                    }
                    CameraSource::Snapshot { url, .. }
                        if !(url.starts_with("http://") || url.starts_with("https://")) =>
                    {
                        return Err(format!("snapshot url must be http(s): {}", url));
                    }
                    _ => {}
                }
                if cam.fps == 0 {
                    return Err("camera fps must be positive".to_string());
                }
                if cam.analyze_every == 0 {
                    return Err("analyze_every must be positive".to_string());
                }
            }
            Self::RfidReader(rfid) => {
                if rfid.port.trim().is_empty() {
                    return Err("RFID port must not be empty".to_string());
                }
                if rfid.baud_rate == 0 {
                    return Err("baud rate must be positive".to_string());
                }
            }
            Self::GpsDevice(gps) => {
                match &gps.provider {
                    GpsProvider::Satellite { endpoint, .. } if endpoint.trim().is_empty() => {
                        return Err("satellite endpoint must not be empty".to_string());
                    }
                    GpsProvider::Simulated {
                        latitude,
                        longitude,
                        jitter_degrees,
                    } => {
                        if !GeoPoint::new(*latitude, *longitude).is_valid() {
                            return Err(format!(
                                "simulated base point out of range: ({}, {})",
                                latitude, longitude
                            ));
                        }
                        if !jitter_degrees.is_finite() || *jitter_degrees < 0.0 {
                            return Err("jitter must be a non-negative number".to_string());
                        }
                    }
                    _ => {}
                }
                if gps.request_timeout_secs == 0 {
                    return Err("request timeout must be positive".to_string());
                }
            }
        }
        Ok(())
    }
}

/// One configured input source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    pub name: String,
    pub connection: ConnectionConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Polling cadence. Falls back to the kind's default.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub ai_enabled: bool,
    #[serde(default = "default_true")]
    pub event_detection_enabled: bool,
    /// Access-controlled point: unresolved identities raise alerts.
    #[serde(default = "default_true")]
    pub restricted: bool,
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    pub fn new(
        device_id: impl Into<String>,
        name: impl Into<String>,
        connection: ConnectionConfig,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            connection,
            enabled: true,
            poll_interval_ms: None,
            ai_enabled: true,
            event_detection_enabled: true,
            restricted: true,
        }
    }

    pub fn camera(device_id: impl Into<String>, name: impl Into<String>, source: CameraSource) -> Self {
        Self::new(
            device_id,
            name,
            ConnectionConfig::Camera(CameraConnection {
                source,
                resolution: Resolution::default(),
                fps: default_fps(),
                analyze_every: default_analyze_every(),
            }),
        )
    }

    pub fn rfid(
        device_id: impl Into<String>,
        name: impl Into<String>,
        port: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self::new(
            device_id,
            name,
            ConnectionConfig::RfidReader(RfidConnection {
                port: port.into(),
                baud_rate: default_baud_rate(),
                location: location.into(),
            }),
        )
    }

    pub fn gps(device_id: impl Into<String>, name: impl Into<String>, provider: GpsProvider) -> Self {
        Self::new(
            device_id,
            name,
            ConnectionConfig::GpsDevice(GpsConnection {
                provider,
                request_timeout_secs: default_request_timeout(),
            }),
        )
    }

    pub fn with_poll_interval(mut self, millis: u64) -> Self {
        self.poll_interval_ms = Some(millis);
        self
    }

    pub fn with_restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }

    pub fn with_ai(mut self, enabled: bool) -> Self {
        self.ai_enabled = enabled;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn kind(&self) -> DeviceKind {
        self.connection.kind()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.kind().default_poll_interval())
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(Error::Configuration("device_id must not be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "device {} has an empty name",
                self.device_id
            )));
        }
        if self.poll_interval_ms == Some(0) {
            return Err(Error::Configuration(format!(
                "device {}: poll interval must be positive",
                self.device_id
            )));
        }
        self.connection
            .validate()
            .map_err(|e| Error::Configuration(format!("device {}: {}", self.device_id, e)))
    }

    /// Produce the updated configuration. `self` is left untouched.
    pub fn apply(&self, update: &DeviceConfigUpdate) -> Result<DeviceConfig> {
        let mut next = self.clone();
        if let Some(name) = &update.name {
            next.name = name.clone();
        }
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
        }
        if let Some(interval) = update.poll_interval_ms {
            next.poll_interval_ms = Some(interval);
        }
        if let Some(ai) = update.ai_enabled {
            next.ai_enabled = ai;
        }
        if let Some(detection) = update.event_detection_enabled {
            next.event_detection_enabled = detection;
        }
        if let Some(restricted) = update.restricted {
            next.restricted = restricted;
        }
        if let Some(connection) = &update.connection {
            if connection.kind() != self.kind() {
                return Err(Error::Configuration(format!(
                    "device {} is a {}, cannot switch to {}",
                    self.device_id,
                    self.kind(),
                    connection.kind()
                )));
            }
            next.connection = connection.clone();
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial configuration update. Unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfigUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub ai_enabled: Option<bool>,
    #[serde(default)]
    pub event_detection_enabled: Option<bool>,
    #[serde(default)]
    pub restricted: Option<bool>,
    #[serde(default)]
    pub connection: Option<ConnectionConfig>,
}

impl DeviceConfigUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
