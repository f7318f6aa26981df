//! Event lifecycle service with a read-through cache mirror.

use metrics::counter;
use std::sync::Arc;
use tracing::{info, warn};
use turnout_core::{
    CacheMirror, Event, EventCancellation, EventChanges, EventDraft, EventFilter, EventId,
    EventStore, EventUpdate, Result, UserId,
};

/// Event lifecycle operations fronted by the cache mirror.
///
/// Mutations go straight to the store; the mirror is invalidated after
/// the commit so the next read repopulates from authoritative state.
#[derive(Clone)]
pub struct EventService {
    store: Arc<dyn EventStore>,
    cache: Arc<dyn CacheMirror>,
}

impl EventService {
    /// Create an event service.
    pub fn new(store: Arc<dyn EventStore>, cache: Arc<dyn CacheMirror>) -> Self {
        Self { store, cache }
    }

    /// Create a new draft event.
    pub async fn create_event(&self, draft: EventDraft) -> Result<Event> {
        let event = self.store.create_event(draft).await?;
        counter!("turnout_events_total", "operation" => "created").increment(1);
        info!(event_id = %event.id, title = %event.title, "Event created");
        self.invalidate_after_mutation(event.id).await;
        Ok(event)
    }

    /// Fetch a single event, cache first.
    pub async fn get_event(&self, id: EventId) -> Result<Option<Event>> {
        match self.cache.get_event(id).await {
            Ok(Some(event)) => {
                counter!("turnout_cache_hits_total", "kind" => "event").increment(1);
                return Ok(Some(event));
            }
            Ok(None) => {
                counter!("turnout_cache_misses_total", "kind" => "event").increment(1);
            }
            Err(e) => {
                counter!("turnout_cache_failures_total").increment(1);
                warn!(event_id = %id, error = %e, "Cache read failed, falling back to store");
            }
        }

        let event = self.store.get_event(id).await?;
        if let Some(ref event) = event {
            if let Err(e) = self.cache.put_event(event).await {
                warn!(event_id = %id, error = %e, "Cache populate failed");
            }
        }
        Ok(event)
    }

    /// List events matching a filter, cache first.
    pub async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>> {
        let signature = filter.signature();
        match self.cache.get_list(&signature).await {
            Ok(Some(events)) => {
                counter!("turnout_cache_hits_total", "kind" => "list").increment(1);
                return Ok(events);
            }
            Ok(None) => {
                counter!("turnout_cache_misses_total", "kind" => "list").increment(1);
            }
            Err(e) => {
                counter!("turnout_cache_failures_total").increment(1);
                warn!(signature, error = %e, "Cache read failed, falling back to store");
            }
        }

        let events = self.store.list_events(filter).await?;
        if let Err(e) = self.cache.put_list(&signature, &events).await {
            warn!(signature, error = %e, "Cache populate failed");
        }
        Ok(events)
    }

    /// Publish a draft event.
    pub async fn publish_event(&self, id: EventId, organizer: UserId) -> Result<Event> {
        let event = self.store.publish_event(id, organizer).await?;
        counter!("turnout_events_total", "operation" => "published").increment(1);
        info!(event_id = %id, "Event published");
        self.invalidate_after_mutation(id).await;
        Ok(event)
    }

    /// Apply a partial update, returning any promoted registrations.
    pub async fn update_event(
        &self,
        id: EventId,
        organizer: UserId,
        changes: EventChanges,
    ) -> Result<EventUpdate> {
        let update = self.store.update_event(id, organizer, changes).await?;
        counter!("turnout_events_total", "operation" => "updated").increment(1);
        info!(
            event_id = %id,
            promoted = update.promoted.len(),
            "Event updated"
        );
        self.invalidate_after_mutation(id).await;
        for promoted in &update.promoted {
            self.invalidate_flag(id, promoted.user_id).await;
        }
        Ok(update)
    }

    /// Cancel an event, cascading to its registrations.
    pub async fn cancel_event(&self, id: EventId, organizer: UserId) -> Result<EventCancellation> {
        let cancellation = self.store.cancel_event(id, organizer).await?;
        counter!("turnout_events_total", "operation" => "cancelled").increment(1);
        info!(
            event_id = %id,
            cascaded = cancellation.cancelled.len(),
            "Event cancelled"
        );
        self.invalidate_after_mutation(id).await;
        for registration in &cancellation.cancelled {
            self.invalidate_flag(id, registration.user_id).await;
        }
        Ok(cancellation)
    }

    /// Mark a published event as completed.
    pub async fn complete_event(&self, id: EventId, organizer: UserId) -> Result<Event> {
        let event = self.store.complete_event(id, organizer).await?;
        counter!("turnout_events_total", "operation" => "completed").increment(1);
        info!(event_id = %id, "Event completed");
        self.invalidate_after_mutation(id).await;
        Ok(event)
    }

    /// Drop the single-event entry and bump the list generation after a
    /// committed mutation.
    async fn invalidate_after_mutation(&self, id: EventId) {
        if let Err(e) = self.cache.invalidate_event(id).await {
            counter!("turnout_cache_failures_total").increment(1);
            warn!(event_id = %id, error = %e, "Event cache invalidation failed");
        }
        if let Err(e) = self.cache.invalidate_lists().await {
            counter!("turnout_cache_failures_total").increment(1);
            warn!(event_id = %id, error = %e, "List cache invalidation failed");
        }
    }

    async fn invalidate_flag(&self, event_id: EventId, user_id: UserId) {
        if let Err(e) = self.cache.invalidate_registered_flag(event_id, user_id).await {
            warn!(event_id = %event_id, user_id = %user_id, error = %e, "Flag invalidation failed");
        }
    }
}
