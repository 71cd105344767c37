//! Sample classification.
//!
//! Turns a raw [`Sample`] into zero or more [`DetectionEvent`]s. Classification
//! is a pure function of the sample, the device configuration and the current
//! identity tables; the only side effect is the optional snapshot written for
//! camera events that need review.
//!
//! Camera frames go through an external [`Recognizer`]. When no recognizer is
//! configured, or it reports that its model is unavailable, classification
//! fails with [`ClassificationError::ModelUnavailable`]. Any other recognizer
//! failure is logged and the frame yields no events.

use async_trait::async_trait;
use sami_core::config::defaults;
use sami_core::{DetectionEvent, EventType, EventValue, GeoPoint};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapter::{Frame, LocationFix, Sample, SamplePayload};
use crate::config::{ConnectionConfig, DeviceConfig};
use crate::directory::TagDirectory;

/// Face bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

/// One face found in a frame. `employee_id` is `None` for unknown faces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub employee_id: Option<i64>,
    pub employee_name: Option<String>,
    pub confidence: f64,
    pub region: FaceRegion,
}

/// One object found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub object_type: String,
    pub confidence: f64,
    /// `[x, y, width, height]`
    pub bbox: [u32; 4],
}

impl ObjectDetection {
    pub fn area(&self) -> u64 {
        u64::from(self.bbox[2]) * u64::from(self.bbox[3])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecognizerError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Recognition failed: {0}")]
    Failed(String),
}

/// Face and object recognition backend.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize_faces(&self, frame: &Frame) -> Result<Vec<FaceMatch>, RecognizerError>;

    async fn detect_objects(&self, frame: &Frame) -> Result<Vec<ObjectDetection>, RecognizerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("Recognizer unavailable: {0}")]
    ModelUnavailable(String),
}

/// Zone rule checked against every location fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceRule {
    /// Violation when the fix is outside the zone.
    #[default]
    StayInside,
    /// Violation when the fix is inside the zone.
    KeepOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub name: String,
    pub center: GeoPoint,
    pub radius_km: f64,
    #[serde(default)]
    pub rule: GeofenceRule,
    /// Devices the zone applies to. Empty means every GPS device.
    #[serde(default)]
    pub devices: Vec<String>,
}

impl Geofence {
    pub fn applies_to(&self, device_id: &str) -> bool {
        self.devices.is_empty() || self.devices.iter().any(|d| d == device_id)
    }

    /// Distance from the center if `point` violates the zone.
    pub fn violation(&self, point: &GeoPoint) -> Option<f64> {
        let distance = self.center.distance_km(point);
        let inside = distance <= self.radius_km;
        match (self.rule, inside) {
            (GeofenceRule::StayInside, false) | (GeofenceRule::KeepOut, true) => Some(distance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSettings {
    #[serde(default = "default_object_threshold")]
    pub object_confidence_threshold: f64,
    /// Where camera snapshots are written. Nothing is written when unset.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default)]
    pub geofences: Vec<Geofence>,
}

fn default_object_threshold() -> f64 {
    defaults::OBJECT_CONFIDENCE_THRESHOLD
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            object_confidence_threshold: default_object_threshold(),
            snapshot_dir: None,
            geofences: Vec::new(),
        }
    }
}

pub struct SampleClassifier {
    settings: ClassifierSettings,
    tags: Arc<TagDirectory>,
    recognizer: Option<Arc<dyn Recognizer>>,
}

impl SampleClassifier {
    pub fn new(settings: ClassifierSettings, tags: Arc<TagDirectory>) -> Self {
        Self {
            settings,
            tags,
            recognizer: None,
        }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    pub fn tags(&self) -> &Arc<TagDirectory> {
        &self.tags
    }

    pub async fn classify(
        &self,
        config: &DeviceConfig,
        sample: &Sample,
    ) -> Result<Vec<DetectionEvent>, ClassificationError> {
        match (&sample.payload, &config.connection) {
            (SamplePayload::Frame(frame), ConnectionConfig::Camera(_)) => {
                self.classify_frame(config, sample, frame).await
            }
            (SamplePayload::Tag { tag_id, raw }, ConnectionConfig::RfidReader(rfid)) => {
                Ok(self.classify_tag(sample, tag_id, raw, &rfid.location))
            }
            (SamplePayload::Fix(fix), ConnectionConfig::GpsDevice(_)) => {
                Ok(self.classify_fix(sample, fix))
            }
            _ => {
                tracing::warn!(
                    device_id = %config.device_id,
                    kind = %config.kind(),
                    sample = sample.kind_name(),
                    "Sample does not match device kind, ignoring"
                );
                Ok(Vec::new())
            }
        }
    }

    async fn classify_frame(
        &self,
        config: &DeviceConfig,
        sample: &Sample,
        frame: &Frame,
    ) -> Result<Vec<DetectionEvent>, ClassificationError> {
        if !config.ai_enabled {
            return Ok(Vec::new());
        }
        let recognizer = self.recognizer.as_ref().ok_or_else(|| {
            ClassificationError::ModelUnavailable("no recognizer configured".to_string())
        })?;

        let mut events = Vec::new();
        if !config.event_detection_enabled {
            return Ok(events);
        }

        let faces = recognition_result(&sample.device_id, "faces", recognizer.recognize_faces(frame).await)?;
        for face in faces {
            let (event_type, name) = match face.employee_id {
                Some(_) => (EventType::EmployeeDetected, face.employee_name.clone()),
                None => (EventType::UnauthorizedPerson, Some("Unknown".to_string())),
            };
            let event = DetectionEvent::new(sample.device_id.clone(), event_type, face.confidence)
                .occurred_at(sample.captured_at)
                .with_data("employee_id", face.employee_id)
                .with_data("employee_name", name)
                .with_data("face_location", face.region);
            events.push(event);
        }

        let objects = recognition_result(&sample.device_id, "objects", recognizer.detect_objects(frame).await)?;
        for object in objects
            .into_iter()
            .filter(|o| o.confidence > self.settings.object_confidence_threshold)
        {
            let area = object.area() as i64;
            let event = DetectionEvent::new(sample.device_id.clone(), EventType::ObjectDetected, object.confidence)
                .occurred_at(sample.captured_at)
                .with_data("object_type", object.object_type)
                .with_data("bbox", object.bbox.iter().map(|v| i64::from(*v)).collect::<Vec<_>>())
                .with_data("area", area);
            events.push(event);
        }

        if let Some(dir) = &self.settings.snapshot_dir {
            for event in events.iter_mut().filter(|e| needs_snapshot(&e.event_type)) {
                if let Some(path) = save_snapshot(dir, event, frame).await {
                    event.artifact_path = Some(path);
                }
            }
        }

        Ok(events)
    }

    fn classify_tag(&self, sample: &Sample, tag_id: &str, raw: &str, location: &str) -> Vec<DetectionEvent> {
        let binding = self.tags.resolve(tag_id).unwrap_or_default();

        let (event_type, transaction) = if binding.employee.is_some() {
            (EventType::EmployeeCheckIn, "check_in")
        } else if binding.asset.is_some() {
            (EventType::AssetCheckout, "checkout")
        } else {
            (EventType::Unknown, "unknown")
        };

        let employee = binding.employee.as_ref();
        let asset = if binding.employee.is_none() {
            binding.asset.as_ref()
        } else {
            None
        };

        vec![DetectionEvent::new(sample.device_id.clone(), event_type, 1.0)
            .occurred_at(sample.captured_at)
            .with_data("tag_id", tag_id)
            .with_data("raw", raw)
            .with_data("location", location)
            .with_data("employee_id", employee.map(|e| e.id))
            .with_data("employee_name", employee.map(|e| e.name.clone()))
            .with_data("asset_id", asset.map(|a| a.id))
            .with_data("asset_name", asset.map(|a| a.name.clone()))
            .with_data("transaction_type", transaction)]
    }

    fn classify_fix(&self, sample: &Sample, fix: &LocationFix) -> Vec<DetectionEvent> {
        let mut events = vec![DetectionEvent::new(sample.device_id.clone(), EventType::LocationUpdate, 1.0)
            .occurred_at(sample.captured_at)
            .with_data("lat", fix.latitude)
            .with_data("lng", fix.longitude)
            .with_data("altitude", fix.altitude)
            .with_data("accuracy", fix.accuracy)
            .with_data("speed", fix.speed)
            .with_data("heading", fix.heading)
            .with_data("signal_strength", fix.signal_strength)
            .with_data("satellite_count", fix.satellite_count)
            .with_data("simulated", fix.simulated)];

        let point = fix.point();
        for fence in self
            .settings
            .geofences
            .iter()
            .filter(|f| f.applies_to(&sample.device_id))
        {
            if let Some(distance) = fence.violation(&point) {
                events.push(
                    DetectionEvent::new(sample.device_id.clone(), EventType::GeofenceViolation, 1.0)
                        .occurred_at(sample.captured_at)
                        .with_data("geofence", fence.name.clone())
                        .with_data(
                            "rule",
                            match fence.rule {
                                GeofenceRule::StayInside => "stay_inside",
                                GeofenceRule::KeepOut => "keep_out",
                            },
                        )
                        .with_data("lat", fix.latitude)
                        .with_data("lng", fix.longitude)
                        .with_data("distance_km", distance),
                );
            }
        }

        events
    }
}

fn recognition_result<T>(
    device_id: &str,
    what: &str,
    result: Result<Vec<T>, RecognizerError>,
) -> Result<Vec<T>, ClassificationError> {
    match result {
        Ok(found) => Ok(found),
        Err(RecognizerError::ModelUnavailable(reason)) => Err(ClassificationError::ModelUnavailable(reason)),
        Err(RecognizerError::Failed(reason)) => {
            tracing::warn!(device_id = %device_id, what, error = %reason, "Recognition failed");
            Ok(Vec::new())
        }
    }
}

fn needs_snapshot(event_type: &EventType) -> bool {
    matches!(event_type, EventType::UnauthorizedPerson | EventType::ObjectDetected)
}

/// `{dir}/events/{device}_{type}_{%Y%m%d_%H%M%S}_{id}.{ext}`
async fn save_snapshot(dir: &std::path::Path, event: &DetectionEvent, frame: &Frame) -> Option<PathBuf> {
    let events_dir = dir.join("events");
    let file_name = format!(
        "{}_{}_{}_{}.{}",
        event.device_id,
        event.event_type,
        event.occurred_at.format("%Y%m%d_%H%M%S"),
        event.id.simple(),
        frame.encoding.extension()
    );
    let path = events_dir.join(file_name);

    let written = async {
        tokio::fs::create_dir_all(&events_dir).await?;
        tokio::fs::write(&path, &frame.data).await
    }
    .await;

    match written {
        Ok(()) => Some(path),
        Err(e) => {
            tracing::warn!(device_id = %event.device_id, path = %path.display(), error = %e, "Failed to save snapshot");
            None
        }
    }
}

impl From<FaceRegion> for EventValue {
    fn from(region: FaceRegion) -> Self {
        EventValue::List(vec![
            i64::from(region.top).into(),
            i64::from(region.right).into(),
            i64::from(region.bottom).into(),
            i64::from(region.left).into(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::FrameEncoding;
    use crate::config::{CameraSource, GpsProvider};
    use crate::directory::EntityRef;

    struct FixedRecognizer {
        faces: Vec<FaceMatch>,
        objects: Vec<ObjectDetection>,
    }

    #[async_trait]
    impl Recognizer for FixedRecognizer {
        async fn recognize_faces(&self, _frame: &Frame) -> Result<Vec<FaceMatch>, RecognizerError> {
            Ok(self.faces.clone())
        }

        async fn detect_objects(&self, _frame: &Frame) -> Result<Vec<ObjectDetection>, RecognizerError> {
            Ok(self.objects.clone())
        }
    }

    fn frame() -> Frame {
        Frame {
            width: 4,
            height: 4,
            encoding: FrameEncoding::Jpeg,
            data: vec![0xFF, 0xD8, 0xFF, 0xD9],
        }
    }

    fn face(employee: Option<(i64, &str)>) -> FaceMatch {
        FaceMatch {
            employee_id: employee.map(|(id, _)| id),
            employee_name: employee.map(|(_, name)| name.to_string()),
            confidence: 0.9,
            region: FaceRegion {
                top: 1,
                right: 2,
                bottom: 3,
                left: 0,
            },
        }
    }

    fn camera() -> DeviceConfig {
        DeviceConfig::camera("camera_1", "Gate", CameraSource::Usb { index: 0 })
    }

    #[tokio::test]
    async fn test_faces_and_objects() {
        let recognizer = FixedRecognizer {
            faces: vec![face(Some((7, "Ana"))), face(None)],
            objects: vec![
                ObjectDetection {
                    object_type: "truck".to_string(),
                    confidence: 0.95,
                    bbox: [0, 0, 10, 5],
                },
                ObjectDetection {
                    object_type: "person".to_string(),
                    confidence: 0.7,
                    bbox: [0, 0, 1, 1],
                },
            ],
        };
        let classifier = SampleClassifier::new(ClassifierSettings::default(), Arc::new(TagDirectory::new()))
            .with_recognizer(Arc::new(recognizer));

        let events = classifier
            .classify(&camera(), &Sample::frame("camera_1", frame()))
            .await
            .unwrap();

        let types: Vec<_> = events.iter().map(|e| e.event_type.clone()).collect();
        assert_eq!(
            types,
            vec![
                EventType::EmployeeDetected,
                EventType::UnauthorizedPerson,
                EventType::ObjectDetected
            ]
        );
        assert_eq!(events[1].get("employee_name").and_then(|v| v.as_str()), Some("Unknown"));
        assert_eq!(events[2].get("area").and_then(|v| v.as_i64()), Some(50));
        assert!(events.iter().all(|e| e.artifact_path.is_none()));
    }

    #[tokio::test]
    async fn test_missing_recognizer_is_an_error() {
        let classifier = SampleClassifier::new(ClassifierSettings::default(), Arc::new(TagDirectory::new()));
        let result = classifier.classify(&camera(), &Sample::frame("camera_1", frame())).await;
        assert!(matches!(result, Err(ClassificationError::ModelUnavailable(_))));

        // AI disabled short-circuits before the recognizer is needed.
        let events = classifier
            .classify(&camera().with_ai(false), &Sample::frame("camera_1", frame()))
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_snapshots_for_review_events() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ClassifierSettings {
            snapshot_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let recognizer = FixedRecognizer {
            faces: vec![face(Some((7, "Ana"))), face(None)],
            objects: Vec::new(),
        };
        let classifier =
            SampleClassifier::new(settings, Arc::new(TagDirectory::new())).with_recognizer(Arc::new(recognizer));

        let events = classifier
            .classify(&camera(), &Sample::frame("camera_1", frame()))
            .await
            .unwrap();

        assert!(events[0].artifact_path.is_none());
        let path = events[1].artifact_path.clone().unwrap();
        assert!(path.starts_with(dir.path().join("events")));
        assert_eq!(std::fs::read(path).unwrap(), frame().data);
    }

    #[tokio::test]
    async fn test_tag_precedence() {
        let tags = Arc::new(TagDirectory::new());
        tags.bind_employee("TAG001", EntityRef::new(7, "Ana"));
        tags.bind_asset("TAG001", EntityRef::new(3, "Drill"));
        tags.bind_asset("TAG002", EntityRef::new(4, "Generator"));
        let classifier = SampleClassifier::new(ClassifierSettings::default(), tags);
        let reader = DeviceConfig::rfid("reader_1", "Gate", "/dev/ttyUSB0", "Main gate");

        let classify = |tag: &str| {
            let sample = Sample::tag("reader_1", tag, tag);
            let classifier = &classifier;
            let reader = &reader;
            async move { classifier.classify(reader, &sample).await.unwrap().remove(0) }
        };

        let both = classify("TAG001").await;
        assert_eq!(both.event_type, EventType::EmployeeCheckIn);
        assert!(both.get("asset_id").unwrap().is_null());

        let asset = classify("TAG002").await;
        assert_eq!(asset.event_type, EventType::AssetCheckout);
        assert_eq!(asset.get("asset_name").and_then(|v| v.as_str()), Some("Generator"));
        assert_eq!(asset.get("location").and_then(|v| v.as_str()), Some("Main gate"));

        let unknown = classify("TAG999").await;
        assert_eq!(unknown.event_type, EventType::Unknown);
        assert_eq!(unknown.get("transaction_type").and_then(|v| v.as_str()), Some("unknown"));
    }

    #[tokio::test]
    async fn test_location_and_geofence() {
        let settings = ClassifierSettings {
            geofences: vec![Geofence {
                name: "yard".to_string(),
                center: GeoPoint::new(-34.6037, -58.3816),
                radius_km: 1.0,
                rule: GeofenceRule::StayInside,
                devices: Vec::new(),
            }],
            ..Default::default()
        };
        let classifier = SampleClassifier::new(settings, Arc::new(TagDirectory::new()));
        let gps = DeviceConfig::gps("gps_1", "Truck", GpsProvider::Cellular { endpoint: None });

        let inside = classifier
            .classify(&gps, &Sample::fix("gps_1", LocationFix::at(-34.6037, -58.3816)))
            .await
            .unwrap();
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].get_f64("lat"), Some(-34.6037));

        let outside = classifier
            .classify(&gps, &Sample::fix("gps_1", LocationFix::at(-34.7, -58.3816)))
            .await
            .unwrap();
        assert_eq!(outside.len(), 2);
        assert_eq!(outside[1].event_type, EventType::GeofenceViolation);
        assert!(outside[1].get_f64("distance_km").unwrap() > 10.0);
    }

    #[tokio::test]
    async fn test_mismatched_sample_is_ignored() {
        let classifier = SampleClassifier::new(ClassifierSettings::default(), Arc::new(TagDirectory::new()));
        let events = classifier
            .classify(&camera(), &Sample::tag("camera_1", "TAG001", "TAG001"))
            .await
            .unwrap();
        assert!(events.is_empty());
    }
}
