//! Persistent event log backed by redb.
//!
//! Every dispatched [`PipelineEvent`] is stored as JSON under a time-ordered
//! key (`{millis:020}-{uuid}`). A secondary table indexes events by device so
//! per-device history queries do not scan the whole log.

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use sami_core::{EventHistory, EventType, PipelineEvent};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Time-ordered key -> event JSON.
const EVENTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("events");

/// `{device_id}\0{time key}` -> time key.
const DEVICE_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("events_by_device");

const DEVICE_SEPARATOR: char = '\0';

fn time_prefix(at: &DateTime<Utc>) -> String {
    format!("{:020}", at.timestamp_millis().max(0))
}

fn event_key(event: &PipelineEvent) -> String {
    let detection = event.detection();
    format!("{}-{}", time_prefix(&detection.occurred_at), detection.id)
}

fn device_key(device_id: &str, key: &str) -> String {
    format!("{}{}{}", device_id, DEVICE_SEPARATOR, key)
}

/// Filter for [`EventStore::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    pub device_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub alerts_only: bool,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Default::default()
        }
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn of_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn alerts(mut self) -> Self {
        self.alerts_only = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &PipelineEvent) -> bool {
        if self.alerts_only && !event.is_alert() {
            return false;
        }
        if let Some(event_type) = &self.event_type {
            if event.event_type() != event_type {
                return false;
            }
        }
        true
    }

    fn key_bounds(&self) -> (String, String) {
        let start = self
            .start
            .as_ref()
            .map(time_prefix)
            .unwrap_or_else(|| format!("{:020}", 0));
        // '~' sorts after '-', so every key with the end prefix is included.
        let end = self
            .end
            .as_ref()
            .map(|end| format!("{}~", time_prefix(end)))
            .unwrap_or_else(|| "~".to_string());
        (start, end)
    }
}

/// Event log.
#[derive(Clone)]
pub struct EventStore {
    db: Arc<Database>,
}

impl EventStore {
    /// Open or create `events.redb` inside `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let db = Database::create(dir.join("events.redb"))
            .map_err(|e| Error::Storage(format!("Failed to open event database: {}", e)))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| Error::Storage(format!("Failed to begin write: {}", e)))?;
        {
            write_txn
                .open_table(EVENTS_TABLE)
                .map_err(|e| Error::Storage(format!("Failed to open events table: {}", e)))?;
            write_txn
                .open_table(DEVICE_INDEX_TABLE)
                .map_err(|e| Error::Storage(format!("Failed to open device index: {}", e)))?;
        }
        write_txn
            .commit()
            .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))?;

        tracing::debug!(path = %dir.display(), "Opened event store");
        Ok(Self { db: Arc::new(db) })
    }

    pub fn insert(&self, event: &PipelineEvent) -> Result<()> {
        let device_id = event.device_id();
        if device_id.contains(DEVICE_SEPARATOR) {
            return Err(Error::InvalidInput(format!("device id contains NUL: {:?}", device_id)));
        }

        let key = event_key(event);
        let json = serde_json::to_string(event)?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(format!("Failed to begin write: {}", e)))?;
        {
            let mut events = write_txn
                .open_table(EVENTS_TABLE)
                .map_err(|e| Error::Storage(format!("Failed to open events table: {}", e)))?;
            events
                .insert(key.as_str(), json.as_str())
                .map_err(|e| Error::Storage(format!("Failed to insert event: {}", e)))?;

            let mut index = write_txn
                .open_table(DEVICE_INDEX_TABLE)
                .map_err(|e| Error::Storage(format!("Failed to open device index: {}", e)))?;
            index
                .insert(device_key(device_id, &key).as_str(), key.as_str())
                .map_err(|e| Error::Storage(format!("Failed to index event: {}", e)))?;
        }
        write_txn
            .commit()
            .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))?;
        Ok(())
    }

    /// Matching events, oldest first.
    pub fn query(&self, query: &EventQuery) -> Result<Vec<PipelineEvent>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| Error::Storage(format!("Failed to begin read: {}", e)))?;
        let events = read_txn
            .open_table(EVENTS_TABLE)
            .map_err(|e| Error::Storage(format!("Failed to open events table: {}", e)))?;

        let (start, end) = query.key_bounds();
        let mut keys: Vec<String> = Vec::new();
        let mut found = Vec::new();

        match &query.device_id {
            Some(device_id) => {
                let index = read_txn
                    .open_table(DEVICE_INDEX_TABLE)
                    .map_err(|e| Error::Storage(format!("Failed to open device index: {}", e)))?;
                let from = device_key(device_id, &start);
                let to = device_key(device_id, &end);
                for entry in index
                    .range(from.as_str()..to.as_str())
                    .map_err(|e| Error::Storage(format!("Failed to scan device index: {}", e)))?
                {
                    let (_, key) = entry.map_err(|e| Error::Storage(format!("Failed to read index: {}", e)))?;
                    keys.push(key.value().to_string());
                }
            }
            None => {
                for entry in events
                    .range(start.as_str()..end.as_str())
                    .map_err(|e| Error::Storage(format!("Failed to scan events: {}", e)))?
                {
                    let (_, json) = entry.map_err(|e| Error::Storage(format!("Failed to read event: {}", e)))?;
                    let event: PipelineEvent = serde_json::from_str(json.value())?;
                    if query.matches(&event) {
                        found.push(event);
                    }
                }
            }
        }

        for key in keys {
            let Some(json) = events
                .get(key.as_str())
                .map_err(|e| Error::Storage(format!("Failed to read event: {}", e)))?
            else {
                tracing::warn!(key = %key, "Device index points at a missing event");
                continue;
            };
            let event: PipelineEvent = serde_json::from_str(json.value())?;
            if query.matches(&event) {
                found.push(event);
            }
        }

        if let Some(limit) = query.limit {
            let skip = found.len().saturating_sub(limit);
            found.drain(..skip);
        }
        Ok(found)
    }

    /// Newest `limit` events of one device, oldest first.
    pub fn list_by_device(&self, device_id: &str, limit: usize) -> Result<Vec<PipelineEvent>> {
        self.query(&EventQuery::device(device_id).limit(limit))
    }

    pub fn query_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<PipelineEvent>> {
        self.query(&EventQuery::default().between(start, end))
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<PipelineEvent>> {
        self.query(&EventQuery::default().alerts().limit(limit))
    }

    pub fn count(&self) -> Result<u64> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| Error::Storage(format!("Failed to begin read: {}", e)))?;
        let events = read_txn
            .open_table(EVENTS_TABLE)
            .map_err(|e| Error::Storage(format!("Failed to open events table: {}", e)))?;
        events
            .len()
            .map_err(|e| Error::Storage(format!("Failed to count events: {}", e)))
    }

    /// Delete events that occurred before `cutoff`. Returns how many were removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let end = time_prefix(&cutoff);
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(format!("Failed to begin write: {}", e)))?;
        let removed;
        {
            let mut events = write_txn
                .open_table(EVENTS_TABLE)
                .map_err(|e| Error::Storage(format!("Failed to open events table: {}", e)))?;
            let mut index = write_txn
                .open_table(DEVICE_INDEX_TABLE)
                .map_err(|e| Error::Storage(format!("Failed to open device index: {}", e)))?;

            let mut doomed: Vec<(String, String)> = Vec::new();
            for entry in events
                .range(..end.as_str())
                .map_err(|e| Error::Storage(format!("Failed to scan events: {}", e)))?
            {
                let (key, json) = entry.map_err(|e| Error::Storage(format!("Failed to read event: {}", e)))?;
                let event: PipelineEvent = serde_json::from_str(json.value())?;
                doomed.push((key.value().to_string(), event.device_id().to_string()));
            }

            for (key, device_id) in &doomed {
                events
                    .remove(key.as_str())
                    .map_err(|e| Error::Storage(format!("Failed to remove event: {}", e)))?;
                index
                    .remove(device_key(device_id, key).as_str())
                    .map_err(|e| Error::Storage(format!("Failed to remove index entry: {}", e)))?;
            }
            removed = doomed.len();
        }
        write_txn
            .commit()
            .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))?;

        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "Pruned old events");
        }
        Ok(removed)
    }
}

impl EventHistory for EventStore {
    fn device_events(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> sami_core::Result<Vec<PipelineEvent>> {
        Ok(self.query(&EventQuery::device(device_id).between(start, end))?)
    }
}
