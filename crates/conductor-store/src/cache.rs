use async_trait::async_trait;
use conductor_core::ConductorResult;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Non-authoritative key/value cache for task status snapshots.
///
/// Callers treat every failure as non-fatal.
#[async_trait]
pub trait StatusCache: Send + Sync {
    /// Stores `value` under `key` for `ttl`.
    async fn put_status(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> ConductorResult<()>;
    /// Returns the live value under `key`.
    async fn get_status(&self, key: &str) -> ConductorResult<Option<serde_json::Value>>;
    /// Removes `key`, reporting whether a live value was present.
    async fn delete_status(&self, key: &str) -> ConductorResult<bool>;
    /// Drops expired entries, returning how many were removed.
    ///
    /// Backends that expire entries on their own keep the default.
    async fn purge_expired(&self) -> ConductorResult<usize> {
        Ok(0)
    }
}

struct CacheSlot {
    value: serde_json::Value,
    /// `None` when the TTL is too large to represent.
    expires_at: Option<Instant>,
}

impl CacheSlot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local [`StatusCache`] with lazy expiry.
#[derive(Default)]
pub struct InMemoryStatusCache {
    slots: Mutex<HashMap<String, CacheSlot>>,
}

impl InMemoryStatusCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusCache for InMemoryStatusCache {
    async fn put_status(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> ConductorResult<()> {
        let slot = CacheSlot {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.slots.lock().await.insert(key.to_string(), slot);
        Ok(())
    }

    async fn get_status(&self, key: &str) -> ConductorResult<Option<serde_json::Value>> {
        let mut slots = self.slots.lock().await;
        match slots.get(key) {
            Some(slot) if slot.is_live(Instant::now()) => Ok(Some(slot.value.clone())),
            Some(_) => {
                slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete_status(&self, key: &str) -> ConductorResult<bool> {
        let removed = self.slots.lock().await.remove(key);
        Ok(removed.is_some_and(|slot| slot.is_live(Instant::now())))
    }

    async fn purge_expired(&self) -> ConductorResult<usize> {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        let before = slots.len();
        slots.retain(|_, slot| slot.is_live(now));
        Ok(before - slots.len())
    }
}
