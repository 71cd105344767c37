//! Device adapter contract.
//!
//! An adapter wraps one physical input source. It is owned by exactly one
//! worker, so its methods take `&mut self` and the trait only requires `Send`.
//!
//! `read_next` distinguishes a miss (`Ok(None)`: nothing arrived within the
//! timeout) from a failure (`Err`): only failures count against the worker's
//! retry budget.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sami_core::GeoPoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::DeviceConfig;

/// Adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Transport could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transport failed while reading.
    #[error("Device error: {0}")]
    Device(String),

    /// Configuration cannot be served by this adapter.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Read attempted before `open` or after `close`.
    #[error("Adapter is not open")]
    NotOpen,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AdapterError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameEncoding {
    Jpeg,
    Png,
    /// Packed 8-bit RGB.
    Rgb8,
}

impl FrameEncoding {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Rgb8 => "rgb",
        }
    }
}

/// One captured image.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub encoding: FrameEncoding,
    pub data: Vec<u8>,
}

/// Position reported by a GPS provider.
///
/// Field names follow the provider JSON; everything except the coordinates is
/// optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub signal_strength: Option<f64>,
    #[serde(default)]
    pub satellite_count: Option<u32>,
    #[serde(default)]
    pub simulated: bool,
}

impl LocationFix {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            speed: None,
            heading: None,
            signal_strength: None,
            satellite_count: None,
            simulated: false,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SamplePayload {
    Frame(Frame),
    /// A tag line from an RFID reader. `tag_id` is trimmed, `raw` is not.
    Tag { tag_id: String, raw: String },
    Fix(LocationFix),
}

/// Raw reading from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub device_id: String,
    pub captured_at: DateTime<Utc>,
    pub payload: SamplePayload,
}

impl Sample {
    pub fn new(device_id: impl Into<String>, payload: SamplePayload) -> Self {
        Self {
            device_id: device_id.into(),
            captured_at: Utc::now(),
            payload,
        }
    }

    pub fn frame(device_id: impl Into<String>, frame: Frame) -> Self {
        Self::new(device_id, SamplePayload::Frame(frame))
    }

    pub fn tag(device_id: impl Into<String>, tag_id: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::new(
            device_id,
            SamplePayload::Tag {
                tag_id: tag_id.into(),
                raw: raw.into(),
            },
        )
    }

    pub fn fix(device_id: impl Into<String>, fix: LocationFix) -> Self {
        Self::new(device_id, SamplePayload::Fix(fix))
    }

    pub fn kind_name(&self) -> &'static str {
        match self.payload {
            SamplePayload::Frame(_) => "frame",
            SamplePayload::Tag { .. } => "tag",
            SamplePayload::Fix(_) => "fix",
        }
    }
}

/// Uniform interface over cameras, RFID readers and GPS providers.
#[async_trait]
pub trait DeviceAdapter: Send {
    fn device_id(&self) -> &str;

    /// Acquire the transport. Fails with [`AdapterError::Connection`] if it
    /// cannot be reached.
    async fn open(&mut self) -> AdapterResult<()>;

    /// Wait up to `timeout` for the next sample.
    async fn read_next(&mut self, timeout: Duration) -> AdapterResult<Option<Sample>>;

    /// Take a single sample on demand, ignoring any sampling cadence the
    /// adapter applies to `read_next`.
    async fn capture(&mut self, timeout: Duration) -> AdapterResult<Option<Sample>> {
        self.read_next(timeout).await
    }

    /// Release the transport. Safe to call repeatedly.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Builds adapters from device configuration.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, config: &DeviceConfig) -> AdapterResult<Box<dyn DeviceAdapter>>;
}
