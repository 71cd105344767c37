//! Shared configuration constants.
//!
//! Default values and environment variable names live here so the device,
//! storage and CLI crates do not each define their own copies.

/// Pipeline defaults.
pub mod defaults {
    /// Grace period granted to a worker after a stop request, in milliseconds.
    pub const STOP_GRACE_MS: u64 = 5_000;
    /// Consecutive device failures tolerated before a device enters the error state.
    pub const RETRY_BUDGET: u32 = 3;
    /// Pause before reopening an adapter after a device failure, in milliseconds.
    pub const RETRY_BACKOFF_MS: u64 = 1_000;
    /// Upper bound for a single `read_next` call, in milliseconds.
    pub const READ_TIMEOUT_MS: u64 = 1_000;
    /// Capacity of each per-device dispatch lane.
    pub const LANE_CAPACITY: usize = 256;
    /// Capacity of the router's broadcast channel for observers.
    pub const BROADCAST_CAPACITY: usize = 1_000;

    /// Camera polling cadence (one frame per tick), in milliseconds.
    pub const CAMERA_POLL_MS: u64 = 100;
    /// Only every Nth camera frame is handed to the classifier.
    pub const CAMERA_ANALYZE_EVERY: u32 = 10;
    /// Minimum confidence for an object detection to become an event.
    pub const OBJECT_CONFIDENCE_THRESHOLD: f64 = 0.7;

    /// RFID serial polling cadence, in milliseconds.
    pub const RFID_POLL_MS: u64 = 100;
    /// Default serial baud rate for RFID readers.
    pub const RFID_BAUD_RATE: u32 = 9_600;

    /// GPS update interval, in milliseconds.
    pub const GPS_POLL_MS: u64 = 30_000;
    /// Timeout for GPS provider HTTP requests, in seconds.
    pub const GPS_REQUEST_TIMEOUT_SECS: u64 = 10;

    /// Speed above which a vehicle is reported, in km/h.
    pub const MAX_SPEED_KMH: f64 = 80.0;
    /// Signal strength (0..1) below which a GPS fix is reported.
    pub const MIN_SIGNAL_STRENGTH: f64 = 0.5;
    /// Default search radius for nearby vehicles, in kilometres.
    pub const NEARBY_RADIUS_KM: f64 = 5.0;

    /// Default data directory.
    pub const DATA_DIR: &str = "./data";
}

/// Environment variable names.
pub mod env_vars {
    pub const DATA_DIR: &str = "SAMI_DATA_DIR";
    pub const SATELLITE_API_KEY: &str = "SAMI_SATELLITE_API_KEY";
    pub const GPS_UPDATE_INTERVAL: &str = "SAMI_GPS_UPDATE_INTERVAL";
    pub const LOG_JSON: &str = "SAMI_LOG_JSON";
}

/// Simulated GPS base point (Buenos Aires), used when no provider is reachable.
pub mod simulation {
    pub const BASE_LATITUDE: f64 = -34.6037;
    pub const BASE_LONGITUDE: f64 = -58.3816;
    pub const JITTER_DEGREES: f64 = 0.01;
}
