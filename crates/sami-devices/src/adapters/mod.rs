//! Built-in device adapters.

pub mod camera;
pub mod gps;
pub mod rfid;

pub use camera::{CameraAdapter, FrameGrabber, SnapshotGrabber, StreamDecoder};
pub use gps::{GpsAdapter, LocationSimulator};
pub use rfid::RfidAdapter;

use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{AdapterFactory, AdapterResult, DeviceAdapter};
use crate::config::{CameraSource, ConnectionConfig, DeviceConfig};

/// Adapter factory for the built-in device kinds.
#[derive(Default, Clone)]
pub struct DefaultAdapterFactory {
    decoder: Option<Arc<dyn StreamDecoder>>,
}

impl DefaultAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder used for RTSP and USB camera sources.
    pub fn with_stream_decoder(mut self, decoder: Arc<dyn StreamDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn create(&self, config: &DeviceConfig) -> AdapterResult<Box<dyn DeviceAdapter>> {
        let adapter: Box<dyn DeviceAdapter> = match &config.connection {
            ConnectionConfig::Camera(camera) => {
                let grabber: Option<Box<dyn FrameGrabber>> = match &camera.source {
                    CameraSource::Snapshot { url, timeout_secs } => Some(Box::new(SnapshotGrabber::new(
                        url.clone(),
                        Duration::from_secs((*timeout_secs).max(1)),
                        camera.resolution.width,
                        camera.resolution.height,
                    ))),
                    source => match &self.decoder {
                        Some(decoder) => Some(decoder.open(source, camera)?),
                        None => None,
                    },
                };
                Box::new(CameraAdapter::new(config.device_id.clone(), camera.clone(), grabber))
            }
            ConnectionConfig::RfidReader(rfid) => {
                Box::new(RfidAdapter::new(config.device_id.clone(), rfid))
            }
            ConnectionConfig::GpsDevice(gps) => Box::new(GpsAdapter::new(config.device_id.clone(), gps)),
        };
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpsProvider;

    #[tokio::test]
    async fn test_factory_builds_matching_adapter() {
        let factory = DefaultAdapterFactory::new();
        let config = DeviceConfig::gps("gps_1", "Truck", GpsProvider::Cellular { endpoint: None });
        let mut adapter = factory.create(&config).unwrap();
        assert_eq!(adapter.device_id(), "gps_1");
        adapter.open().await.unwrap();
        assert!(adapter.read_next(Duration::from_millis(10)).await.unwrap().is_some());
        adapter.close().await;
        assert!(!adapter.is_open());
    }

    #[tokio::test]
    async fn test_rtsp_without_decoder_cannot_open() {
        let factory = DefaultAdapterFactory::new();
        let config = DeviceConfig::camera(
            "camera_1",
            "Gate camera",
            CameraSource::Rtsp {
                url: "rtsp://192.168.1.100:554/stream".to_string(),
            },
        );
        let mut adapter = factory.create(&config).unwrap();
        assert!(adapter.open().await.unwrap_err().is_connection());
    }
}
