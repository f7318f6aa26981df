//! In-memory cache mirror for tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use turnout_core::{BoxFuture, CacheError, CacheMirror, CacheResult, Event, EventId, UserId};

/// Cache mirror backed by hash maps, with an injectable failure switch.
///
/// No TTLs: tests that need expiry drop entries explicitly. The
/// failure switch makes every operation return
/// [`CacheError::Unavailable`], for asserting that the service layer
/// degrades to direct store reads.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCacheMirror {
    events: Arc<Mutex<HashMap<EventId, Event>>>,
    lists: Arc<Mutex<HashMap<String, Vec<Event>>>>,
    flags: Arc<Mutex<HashMap<(EventId, UserId), bool>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryCacheMirror {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (until switched back).
    pub fn fail_next(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Whether a single-event entry currently exists.
    #[must_use]
    pub fn has_event(&self, id: EventId) -> bool {
        self.events.lock().unwrap().contains_key(&id)
    }

    /// Number of cached list projections.
    #[must_use]
    pub fn list_count(&self) -> usize {
        self.lists.lock().unwrap().len()
    }

    /// Overwrite a single-event entry directly, bypassing the trait.
    ///
    /// Lets tests plant a deliberately stale projection.
    pub fn plant_event(&self, event: Event) {
        self.events.lock().unwrap().insert(event.id, event);
    }

    fn check(&self) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl CacheMirror for InMemoryCacheMirror {
    fn get_event(&self, id: EventId) -> BoxFuture<'_, CacheResult<Option<Event>>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.events.lock().unwrap().get(&id).cloned())
        })
    }

    fn put_event(&self, event: &Event) -> BoxFuture<'_, CacheResult<()>> {
        let event = event.clone();
        Box::pin(async move {
            self.check()?;
            self.events.lock().unwrap().insert(event.id, event);
            Ok(())
        })
    }

    fn invalidate_event(&self, id: EventId) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.events.lock().unwrap().remove(&id);
            Ok(())
        })
    }

    fn get_list(&self, signature: &str) -> BoxFuture<'_, CacheResult<Option<Vec<Event>>>> {
        let signature = signature.to_string();
        Box::pin(async move {
            self.check()?;
            Ok(self.lists.lock().unwrap().get(&signature).cloned())
        })
    }

    fn put_list(&self, signature: &str, events: &[Event]) -> BoxFuture<'_, CacheResult<()>> {
        let signature = signature.to_string();
        let events = events.to_vec();
        Box::pin(async move {
            self.check()?;
            self.lists.lock().unwrap().insert(signature, events);
            Ok(())
        })
    }

    fn invalidate_lists(&self) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.lists.lock().unwrap().clear();
            Ok(())
        })
    }

    fn get_registered_flag(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, CacheResult<Option<bool>>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.flags.lock().unwrap().get(&(event_id, user_id)).copied())
        })
    }

    fn put_registered_flag(
        &self,
        event_id: EventId,
        user_id: UserId,
        registered: bool,
    ) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.flags
                .lock()
                .unwrap()
                .insert((event_id, user_id), registered);
            Ok(())
        })
    }

    fn invalidate_registered_flag(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.flags.lock().unwrap().remove(&(event_id, user_id));
            Ok(())
        })
    }
}
