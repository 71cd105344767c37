//! Event model for the device pipeline.
//!
//! A [`DetectionEvent`] is the classified outcome of one device sample. An
//! [`Alert`] is a detection flagged for human attention; it keeps a shared,
//! read-only reference to the event that triggered it. Both travel through the
//! router wrapped in a [`PipelineEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Typed value carried in an event's data map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<EventValue>),
}

impl EventValue {
    /// Numeric view of the value. Integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for EventValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for EventValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for EventValue {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<u32> for EventValue {
    fn from(v: u32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for EventValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for EventValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for EventValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<EventValue>> From<Option<T>> for EventValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl<T: Into<EventValue>> From<Vec<T>> for EventValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Event payload, keyed by field name. Shape depends on the event type.
pub type EventData = BTreeMap<String, EventValue>;

/// Kind of detection. Open-ended: unknown names round-trip through `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    EmployeeDetected,
    UnauthorizedPerson,
    ObjectDetected,
    EmployeeCheckIn,
    AssetCheckout,
    Unknown,
    TagRead,
    LocationUpdate,
    GeofenceViolation,
    ExcessiveSpeed,
    WeakSignal,
    UnauthorizedAccess,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EmployeeDetected => "employee_detected",
            Self::UnauthorizedPerson => "unauthorized_person",
            Self::ObjectDetected => "object_detected",
            Self::EmployeeCheckIn => "employee_check_in",
            Self::AssetCheckout => "asset_checkout",
            Self::Unknown => "unknown",
            Self::TagRead => "tag_read",
            Self::LocationUpdate => "location_update",
            Self::GeofenceViolation => "geofence_violation",
            Self::ExcessiveSpeed => "excessive_speed",
            Self::WeakSignal => "weak_signal",
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::Custom(name) => name,
        }
    }

    /// Parse a type name. Never fails; unrecognized names become `Custom`.
    pub fn parse(name: &str) -> Self {
        match name {
            "employee_detected" => Self::EmployeeDetected,
            "unauthorized_person" => Self::UnauthorizedPerson,
            "object_detected" => Self::ObjectDetected,
            "employee_check_in" => Self::EmployeeCheckIn,
            "asset_checkout" => Self::AssetCheckout,
            "unknown" => Self::Unknown,
            "tag_read" => Self::TagRead,
            "location_update" => Self::LocationUpdate,
            "geofence_violation" => Self::GeofenceViolation,
            "excessive_speed" => Self::ExcessiveSpeed,
            "weak_signal" => Self::WeakSignal,
            "unauthorized_access" => Self::UnauthorizedAccess,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Event types describing a subject whose identity could not be resolved.
    pub fn is_unresolved_identity(&self) -> bool {
        matches!(self, Self::UnauthorizedPerson | Self::Unknown)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// Probability that a classification is correct, always within `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    /// Clamp into range. NaN collapses to zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    /// Confidence of a fixed fact, such as a raw location fix.
    pub const fn certain() -> Self {
        Self(1.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl From<f64> for Confidence {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

/// Classified outcome of a device sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub id: Uuid,
    pub device_id: String,
    pub event_type: EventType,
    pub confidence: Confidence,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub data: EventData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
}

impl DetectionEvent {
    pub fn new(device_id: impl Into<String>, event_type: EventType, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            event_type,
            confidence: Confidence::new(confidence),
            occurred_at: Utc::now(),
            data: EventData::new(),
            artifact_path: None,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<EventValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    pub fn get(&self, key: &str) -> Option<&EventValue> {
        self.data.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(EventValue::as_f64)
    }
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric level (0-3).
    pub fn level(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detection that requires human attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// The alert's own event record (type, device, time, data).
    pub event: DetectionEvent,
    pub severity: Severity,
    pub message: String,
    /// Event that triggered this alert.
    pub source_event: Arc<DetectionEvent>,
}

impl Alert {
    /// Build an alert for `source`. Device and confidence are inherited.
    pub fn new(
        source: Arc<DetectionEvent>,
        event_type: EventType,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        let mut event = DetectionEvent::new(
            source.device_id.clone(),
            event_type,
            source.confidence.value(),
        );
        event.data.insert(
            "source_event_id".to_string(),
            EventValue::String(source.id.to_string()),
        );
        Self {
            event,
            severity,
            message: message.into(),
            source_event: source,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<EventValue>) -> Self {
        self.event.data.insert(key.into(), value.into());
        self
    }
}

/// Unit of work carried by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    Detection(Arc<DetectionEvent>),
    Alert(Arc<Alert>),
}

impl PipelineEvent {
    /// The detection record, for either variant.
    pub fn detection(&self) -> &DetectionEvent {
        match self {
            Self::Detection(event) => event,
            Self::Alert(alert) => &alert.event,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.detection().device_id
    }

    pub fn event_type(&self) -> &EventType {
        &self.detection().event_type
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, Self::Alert(_))
    }

    pub fn as_alert(&self) -> Option<&Alert> {
        match self {
            Self::Alert(alert) => Some(alert),
            Self::Detection(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Detection(_) => "Detection",
            Self::Alert(_) => "Alert",
        }
    }
}

impl From<DetectionEvent> for PipelineEvent {
    fn from(event: DetectionEvent) -> Self {
        Self::Detection(Arc::new(event))
    }
}

impl From<Alert> for PipelineEvent {
    fn from(alert: Alert) -> Self {
        Self::Alert(Arc::new(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(Confidence::new(1.7).value(), 1.0);
        assert_eq!(Confidence::new(-0.2).value(), 0.0);
        assert_eq!(Confidence::new(f64::NAN).value(), 0.0);
        assert_eq!(Confidence::new(0.42).value(), 0.42);

        let event = DetectionEvent::new("camera_1", EventType::EmployeeDetected, 3.0);
        assert_eq!(event.confidence.value(), 1.0);
    }

    #[test]
    fn test_confidence_clamped_on_deserialize() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "device_id": "camera_1",
            "event_type": "object_detected",
            "confidence": 12.5,
            "occurred_at": Utc::now(),
        });
        let event: DetectionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.confidence.value(), 1.0);
        assert!(event.data.is_empty());
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(EventType::parse("unauthorized_person"), EventType::UnauthorizedPerson);
        assert_eq!(
            EventType::parse("fuel_theft"),
            EventType::Custom("fuel_theft".to_string())
        );
        assert_eq!(EventType::GeofenceViolation.to_string(), "geofence_violation");
        assert!(EventType::Unknown.is_unresolved_identity());
        assert!(!EventType::EmployeeCheckIn.is_unresolved_identity());
    }

    #[test]
    fn test_event_value_conversions() {
        let event = DetectionEvent::new("gps_1", EventType::LocationUpdate, 1.0)
            .with_data("speed", 42.5)
            .with_data("satellite_count", 9)
            .with_data("employee_id", Option::<i64>::None)
            .with_data("bbox", vec![1i64, 2, 3, 4]);

        assert_eq!(event.get_f64("speed"), Some(42.5));
        assert_eq!(event.get_f64("satellite_count"), Some(9.0));
        assert!(event.get("employee_id").unwrap().is_null());
        assert!(matches!(event.get("bbox"), Some(EventValue::List(v)) if v.len() == 4));
    }

    #[test]
    fn test_alert_keeps_source_reference() {
        let source = Arc::new(
            DetectionEvent::new("reader_1", EventType::Unknown, 1.0).with_data("tag_id", "A1B2"),
        );
        let alert = Alert::new(
            source.clone(),
            EventType::UnauthorizedAccess,
            Severity::High,
            "unauthorized access with tag A1B2",
        );

        assert_eq!(alert.event.device_id, "reader_1");
        assert!(Arc::ptr_eq(&alert.source_event, &source));
        assert_eq!(
            alert.event.get("source_event_id").and_then(EventValue::as_str),
            Some(source.id.to_string().as_str())
        );

        let wrapped = PipelineEvent::from(alert);
        assert!(wrapped.is_alert());
        assert_eq!(wrapped.event_type(), &EventType::UnauthorizedAccess);
        assert_eq!(wrapped.device_id(), "reader_1");
    }

    #[test]
    fn test_pipeline_event_json_shape() {
        let event = PipelineEvent::from(
            DetectionEvent::new("camera_2", EventType::ObjectDetected, 0.8)
                .with_data("object_type", "object"),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "detection");
        assert_eq!(json["event_type"], "object_detected");

        let back: PipelineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::High.level(), 2);
        assert_eq!(serde_json::to_string(&Severity::Medium).unwrap(), "\"medium\"");
    }
}
