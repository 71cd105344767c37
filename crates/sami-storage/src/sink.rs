//! Router callback persisting every event.

use async_trait::async_trait;
use sami_core::{CallbackError, CallbackResult, DispatchContext, EventCallback, PipelineEvent};

use crate::events::EventStore;

/// Writes each dispatched event to an [`EventStore`].
///
/// Writes run on the blocking pool so the dispatch lane is not stalled by
/// disk I/O. A failed write is reported to the router, which logs it and
/// carries on with the next callback.
#[derive(Clone)]
pub struct StoreCallback {
    store: EventStore,
}

impl StoreCallback {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }
}

#[async_trait]
impl EventCallback for StoreCallback {
    fn name(&self) -> &str {
        "event_store"
    }

    async fn on_event(&self, event: &PipelineEvent, _ctx: &mut DispatchContext) -> CallbackResult {
        let store = self.store.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || store.insert(&event))
            .await
            .map_err(|e| CallbackError::Delivery(format!("store task failed: {}", e)))?
            .map_err(|e| CallbackError::Delivery(e.to_string()))
    }
}
