//! Built-in event sinks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::event::PipelineEvent;
use crate::router::{CallbackResult, DispatchContext, EventCallback};

/// Writes every event to the tracing log.
///
/// Alerts are logged at warn, detections at debug.
#[derive(Debug, Clone)]
pub struct LoggingCallback {
    name: String,
}

impl LoggingCallback {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LoggingCallback {
    fn default() -> Self {
        Self::new("log")
    }
}

#[async_trait]
impl EventCallback for LoggingCallback {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: &PipelineEvent, _ctx: &mut DispatchContext) -> CallbackResult {
        match event {
            PipelineEvent::Alert(alert) => tracing::warn!(
                device_id = %alert.event.device_id,
                alert_type = %alert.event.event_type,
                severity = %alert.severity,
                source_event = %alert.source_event.id,
                "{}",
                alert.message
            ),
            PipelineEvent::Detection(detection) => tracing::debug!(
                device_id = %detection.device_id,
                event_type = %detection.event_type,
                confidence = detection.confidence.value(),
                "Detection event"
            ),
        }
        Ok(())
    }
}

/// Keeps the most recent events in memory.
///
/// Useful for tests and for status pages that show recent activity.
#[derive(Debug, Clone)]
pub struct MemoryCallback {
    name: String,
    capacity: usize,
    events: Arc<Mutex<VecDeque<PipelineEvent>>>,
}

impl MemoryCallback {
    /// Create a sink that retains at most `capacity` events.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            events: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn detections(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| !e.is_alert())
            .cloned()
            .collect()
    }

    pub fn alerts(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.is_alert())
            .cloned()
            .collect()
    }

    pub fn events_for(&self, device_id: &str) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.device_id() == device_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventCallback for MemoryCallback {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: &PipelineEvent, _ctx: &mut DispatchContext) -> CallbackResult {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Alert, DetectionEvent, EventType, Severity};
    use crate::router::EventRouter;

    #[tokio::test]
    async fn test_memory_callback_capacity() {
        let sink = MemoryCallback::new("memory", 2);
        let router = EventRouter::new();
        router.register(Arc::new(sink.clone()));

        for i in 0..3 {
            router
                .dispatch(DetectionEvent::new("gps_1", EventType::LocationUpdate, 1.0)
                    .with_data("seq", i as i64)
                    .into())
                .await;
        }

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].detection().get("seq").and_then(|v| v.as_i64()), Some(1));
    }

    #[tokio::test]
    async fn test_memory_callback_filters() {
        let sink = MemoryCallback::new("memory", 10);
        let router = EventRouter::new();
        router.register(Arc::new(LoggingCallback::default()));
        router.register(Arc::new(sink.clone()));

        let source = Arc::new(DetectionEvent::new("reader_1", EventType::Unknown, 1.0));
        router.dispatch(PipelineEvent::Detection(source.clone())).await;
        router
            .dispatch(
                Alert::new(source, EventType::UnauthorizedAccess, Severity::High, "tag").into(),
            )
            .await;
        router
            .dispatch(DetectionEvent::new("gps_1", EventType::LocationUpdate, 1.0).into())
            .await;

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.alerts().len(), 1);
        assert_eq!(sink.detections().len(), 2);
        assert_eq!(sink.events_for("reader_1").len(), 2);

        sink.clear();
        assert!(sink.is_empty());
    }
}
