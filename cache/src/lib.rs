//! Redis-backed cache mirror.
//!
//! A disposable, TTL-bounded projection of the Event Store. Keys:
//!
//! - `event:{event_id}` → bincode-serialized [`Event`]
//! - `events:list:gen` → generation counter for list keys
//! - `events:list:{gen}:{signature}` → bincode-serialized `Vec<Event>`
//! - `reg:{event_id}:{user_id}` → is-registered flag
//!
//! List invalidation is broad by design: bumping the generation counter
//! orphans every list key at once, and the orphans fall out through
//! their TTL. Single-event entries get a longer TTL than lists, so a
//! stale list never outlives the fresher per-event entry it points at.
//!
//! Flushing the whole keyspace loses nothing but latency; the arbiter
//! never reads from here.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use turnout_core::{BoxFuture, CacheError, CacheMirror, CacheResult, Event, EventId, UserId};

/// Time-to-live settings for each projection family.
#[derive(Clone, Copy, Debug)]
pub struct CacheTtls {
    /// Single-event entries. Must exceed `list`.
    pub event: Duration,
    /// List entries.
    pub list: Duration,
    /// Is-registered flags.
    pub registered_flag: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            event: Duration::from_secs(300),
            list: Duration::from_secs(60),
            registered_flag: Duration::from_secs(300),
        }
    }
}

/// Redis implementation of the cache mirror.
///
/// Connection pooling via `ConnectionManager`; every operation clones
/// the manager, which shares the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisCacheMirror {
    conn_manager: ConnectionManager,
    ttls: CacheTtls,
}

impl RedisCacheMirror {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the client cannot be
    /// created or the initial connection fails.
    pub async fn new(redis_url: &str, ttls: CacheTtls) -> CacheResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("failed to create client: {e}")))?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Unavailable(format!("failed to create connection manager: {e}"))
        })?;
        Ok(Self { conn_manager, ttls })
    }

    fn event_key(id: EventId) -> String {
        format!("event:{id}")
    }

    fn list_gen_key() -> &'static str {
        "events:list:gen"
    }

    fn list_key(generation: u64, signature: &str) -> String {
        format!("events:list:{generation}:{signature}")
    }

    fn flag_key(event_id: EventId, user_id: UserId) -> String {
        format!("reg:{event_id}:{user_id}")
    }

    async fn current_generation(conn: &mut ConnectionManager) -> CacheResult<u64> {
        let generation: Option<u64> = conn
            .get(Self::list_gen_key())
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(generation.unwrap_or(0))
    }
}

impl CacheMirror for RedisCacheMirror {
    fn get_event(&self, id: EventId) -> BoxFuture<'_, CacheResult<Option<Event>>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let bytes: Option<Vec<u8>> = conn
                .get(Self::event_key(id))
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            match bytes {
                Some(bytes) => {
                    let event: Event = bincode::deserialize(&bytes)
                        .map_err(|e| CacheError::Codec(e.to_string()))?;
                    Ok(Some(event))
                }
                None => Ok(None),
            }
        })
    }

    fn put_event(&self, event: &Event) -> BoxFuture<'_, CacheResult<()>> {
        let event = event.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let bytes =
                bincode::serialize(&event).map_err(|e| CacheError::Codec(e.to_string()))?;
            let () = conn
                .set_ex(Self::event_key(event.id), bytes, self.ttls.event.as_secs())
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }

    fn invalidate_event(&self, id: EventId) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let () = conn
                .del(Self::event_key(id))
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            tracing::debug!(event_id = %id, "invalidated event cache entry");
            Ok(())
        })
    }

    fn get_list(&self, signature: &str) -> BoxFuture<'_, CacheResult<Option<Vec<Event>>>> {
        let signature = signature.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let generation = Self::current_generation(&mut conn).await?;
            let bytes: Option<Vec<u8>> = conn
                .get(Self::list_key(generation, &signature))
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            match bytes {
                Some(bytes) => {
                    let events: Vec<Event> = bincode::deserialize(&bytes)
                        .map_err(|e| CacheError::Codec(e.to_string()))?;
                    Ok(Some(events))
                }
                None => Ok(None),
            }
        })
    }

    fn put_list(&self, signature: &str, events: &[Event]) -> BoxFuture<'_, CacheResult<()>> {
        let signature = signature.to_string();
        let events = events.to_vec();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let generation = Self::current_generation(&mut conn).await?;
            let bytes =
                bincode::serialize(&events).map_err(|e| CacheError::Codec(e.to_string()))?;
            let () = conn
                .set_ex(
                    Self::list_key(generation, &signature),
                    bytes,
                    self.ttls.list.as_secs(),
                )
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }

    fn invalidate_lists(&self) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            // Orphaned generations expire through their TTL.
            let generation: u64 = conn
                .incr(Self::list_gen_key(), 1)
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            tracing::debug!(generation, "bumped list cache generation");
            Ok(())
        })
    }

    fn get_registered_flag(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, CacheResult<Option<bool>>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let flag: Option<u8> = conn
                .get(Self::flag_key(event_id, user_id))
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            Ok(flag.map(|f| f != 0))
        })
    }

    fn put_registered_flag(
        &self,
        event_id: EventId,
        user_id: UserId,
        registered: bool,
    ) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let () = conn
                .set_ex(
                    Self::flag_key(event_id, user_id),
                    u8::from(registered),
                    self.ttls.registered_flag.as_secs(),
                )
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }

    fn invalidate_registered_flag(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let () = conn
                .del(Self::flag_key(event_id, user_id))
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn keys_are_stable() {
        let event_id = EventId::from_uuid(Uuid::nil());
        let user_id = UserId::from_uuid(Uuid::nil());
        assert_eq!(
            RedisCacheMirror::event_key(event_id),
            "event:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            RedisCacheMirror::list_key(3, "o=*&s=published&a=*&p=0&n=20"),
            "events:list:3:o=*&s=published&a=*&p=0&n=20"
        );
        assert_eq!(
            RedisCacheMirror::flag_key(event_id, user_id),
            "reg:00000000-0000-0000-0000-000000000000:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn event_entries_outlive_list_entries() {
        let ttls = CacheTtls::default();
        assert!(ttls.event > ttls.list);
    }
}
