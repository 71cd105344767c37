//! Core types for the SAMI device pipeline.
//!
//! This crate defines the event model, the event router and the shared
//! configuration constants used by the device, storage and CLI crates.

pub mod config;
pub mod error;
pub mod event;
pub mod geo;
pub mod history;
pub mod router;
pub mod sinks;

// Event exports
pub use event::{
    Alert, Confidence, DetectionEvent, EventData, EventType, EventValue, PipelineEvent, Severity,
};

// Router exports
pub use router::{
    callback_fn, CallbackError, CallbackResult, DispatchContext, DispatchLane, DispatchReport,
    EventCallback, EventRouter, RouterReceiver, RouterStats, SharedEventRouter,
};

pub use error::{Error, Result};
pub use geo::{calculate_distance, GeoPoint};
pub use history::EventHistory;
pub use sinks::{LoggingCallback, MemoryCallback};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars};
    pub use crate::error::{Error, Result};
    pub use crate::event::{Alert, DetectionEvent, EventType, EventValue, PipelineEvent, Severity};
    pub use crate::router::{CallbackResult, DispatchContext, EventCallback, EventRouter};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
