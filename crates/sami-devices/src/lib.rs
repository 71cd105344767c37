//! Device polling for the SAMI pipeline.
//!
//! Cameras, RFID readers and GPS trackers are wrapped in [`DeviceAdapter`]s,
//! polled by per-device workers owned by the [`DeviceSupervisor`], and their
//! samples are turned into detection events by the [`SampleClassifier`].
//! Events flow into the shared [`sami_core::EventRouter`], where the
//! [`AlertEvaluator`] and [`FleetTracker`] are ordinary callbacks.

pub mod adapter;
pub mod adapters;
pub mod alerts;
pub mod classifier;
pub mod config;
pub mod directory;
pub mod fleet;
pub mod registry;
pub mod supervisor;

pub use adapter::{
    AdapterError, AdapterFactory, AdapterResult, DeviceAdapter, Frame, FrameEncoding, LocationFix, Sample,
    SamplePayload,
};
pub use adapters::{
    CameraAdapter, DefaultAdapterFactory, FrameGrabber, GpsAdapter, LocationSimulator, RfidAdapter,
    SnapshotGrabber, StreamDecoder,
};
pub use alerts::{AlertEvaluator, AlertThresholds};
pub use classifier::{
    ClassificationError, ClassifierSettings, FaceMatch, FaceRegion, Geofence, GeofenceRule, ObjectDetection,
    Recognizer, RecognizerError, SampleClassifier,
};
pub use config::{
    CameraConnection, CameraSource, ConnectionConfig, DeviceConfig, DeviceConfigUpdate, DeviceKind,
    GpsConnection, GpsProvider, Resolution, RfidConnection,
};
pub use directory::{EntityRef, SnapshotTable, TagBinding, TagDirectory};
pub use fleet::{FleetTracker, Vehicle, VehicleLocation};
pub use registry::DeviceRegistry;
pub use supervisor::{
    ConnectionTest, DeviceStatus, DeviceSupervisor, StartOutcome, StopOutcome, SupervisorError, SupervisorSettings,
    SupervisorStatus, WorkerState,
};
