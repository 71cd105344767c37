//! Read access to persisted pipeline events.
//!
//! Implemented by the storage crate. Consumers such as the fleet tracker only
//! depend on this trait.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::PipelineEvent;

pub trait EventHistory: Send + Sync {
    /// Events of `device_id` that occurred in `[start, end]`, oldest first.
    fn device_events(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PipelineEvent>>;
}
