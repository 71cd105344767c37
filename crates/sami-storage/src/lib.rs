//! Persistence for the SAMI pipeline.
//!
//! [`EventStore`] keeps an append-only log of detections and alerts in redb.
//! [`StoreCallback`] plugs it into the event router.

pub mod error;
pub mod events;
pub mod sink;

pub use error::{Error, Result};
pub use events::{EventQuery, EventStore};
pub use sink::StoreCallback;
