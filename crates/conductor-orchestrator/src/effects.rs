use crate::priority::Priority;
use conductor_channels::{Notifier, TaskEvent};
use conductor_core::{TaskId, TaskRecord, TaskStatus};
use conductor_memory::{HistoryHit, HistorySink};
use conductor_store::StatusCache;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::entry::QueueEntry;

/// Cache key holding the serialized entry of a blocked task.
pub(crate) fn queued_key(id: TaskId) -> String {
    format!("{id}:queued")
}

/// Best-effort writes to the status cache, the history sink and notifiers.
///
/// Every method swallows errors after logging them; none of these
/// collaborators can change the outcome of a task.
pub(crate) struct SideWrites {
    cache: Option<Arc<dyn StatusCache>>,
    history: Option<Arc<dyn HistorySink>>,
    notifier: Option<Arc<dyn Notifier>>,
    ttl: Duration,
    collection: String,
}

impl SideWrites {
    pub(crate) fn new(
        cache: Option<Arc<dyn StatusCache>>,
        history: Option<Arc<dyn HistorySink>>,
        notifier: Option<Arc<dyn Notifier>>,
        ttl: Duration,
        collection: String,
    ) -> Self {
        Self {
            cache,
            history,
            notifier,
            ttl,
            collection,
        }
    }

    /// Writes `{id, status, description, priority, origin}` under `<id>`.
    pub(crate) async fn cache_status(&self, record: &TaskRecord, priority: Option<Priority>) {
        let Some(cache) = &self.cache else {
            return;
        };
        let value = json!({
            "id": record.id,
            "status": record.status,
            "description": record.description,
            "priority": priority,
            "origin": record.origin,
        });
        if let Err(e) = cache
            .put_status(&record.id.to_string(), value, self.ttl)
            .await
        {
            warn!(task_id = %record.id, error = %e, "Status cache write failed");
        }
    }

    /// Stores a parked entry under `<id>:queued` so it can be rebuilt later.
    pub(crate) async fn cache_parked(&self, entry: &QueueEntry) {
        let Some(cache) = &self.cache else {
            return;
        };
        let value = match serde_json::to_value(entry) {
            Ok(value) => value,
            Err(e) => {
                warn!(task_id = %entry.id, error = %e, "Could not serialize parked entry");
                return;
            }
        };
        if let Err(e) = cache.put_status(&queued_key(entry.id), value, self.ttl).await {
            warn!(task_id = %entry.id, error = %e, "Parked entry cache write failed");
        }
    }

    /// Reads back a parked entry written by [`SideWrites::cache_parked`].
    pub(crate) async fn parked_entry(&self, id: TaskId) -> Option<QueueEntry> {
        let cache = self.cache.as_ref()?;
        match cache.get_status(&queued_key(id)).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(task_id = %id, error = %e, "Cached parked entry is unreadable");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(task_id = %id, error = %e, "Parked entry cache read failed");
                None
            }
        }
    }

    /// Deletes `<id>:queued`.
    pub(crate) async fn clear_parked(&self, id: TaskId) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete_status(&queued_key(id)).await {
                warn!(task_id = %id, error = %e, "Cache delete failed");
            }
        }
    }

    /// Deletes both `<id>` and `<id>:queued`.
    pub(crate) async fn clear(&self, id: TaskId) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete_status(&id.to_string()).await {
                warn!(task_id = %id, error = %e, "Cache delete failed");
            }
        }
        self.clear_parked(id).await;
    }

    /// Drops expired cache entries.
    pub(crate) async fn purge_cache(&self) -> usize {
        let Some(cache) = &self.cache else {
            return 0;
        };
        match cache.purge_expired().await {
            Ok(purged) => {
                if purged > 0 {
                    debug!(purged, "Expired cache entries purged");
                }
                purged
            }
            Err(e) => {
                warn!(error = %e, "Cache purge failed");
                0
            }
        }
    }

    /// Records a terminal outcome in the history collection.
    pub(crate) async fn record_outcome(&self, record: &TaskRecord) {
        let Some(history) = &self.history else {
            return;
        };
        let message = record.result_message.as_deref().unwrap_or_default();
        let text = match record.status {
            TaskStatus::Failed => format!("FAILED: {} -> {message}", record.description),
            _ => format!("{} -> {message}", record.description),
        };
        let metadata = HashMap::from([
            ("executor".to_string(), json!(record.executor)),
            ("risk".to_string(), json!(record.risk)),
            ("urgency".to_string(), json!(record.urgency)),
            ("status".to_string(), json!(record.status)),
            ("origin".to_string(), json!(record.origin)),
        ]);
        if let Err(e) = history
            .store(&self.collection, &text, metadata, Some(record.id.to_string()))
            .await
        {
            warn!(task_id = %record.id, error = %e, "History write failed");
        }
    }

    /// Tells a human about a task that failed for good.
    pub(crate) async fn notify_failure(&self, record: &TaskRecord) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let event = TaskEvent {
            task_id: record.id,
            description: record.description.clone(),
            status: record.status,
            message: record.result_message.clone().unwrap_or_default(),
            risk: record.risk,
            executor: record.executor.clone(),
            errors: record.errors.clone(),
        };
        match notifier.notify(&event).await {
            Ok(()) => debug!(task_id = %record.id, notifier = notifier.name(), "Notification sent"),
            Err(e) => warn!(task_id = %record.id, error = %e, "Notification failed"),
        }
    }

    /// Searches past outcomes; an absent or failing sink yields nothing.
    pub(crate) async fn search(&self, query: &str, limit: usize, threshold: f32) -> Vec<HistoryHit> {
        let Some(history) = &self.history else {
            return Vec::new();
        };
        match history.search(&self.collection, query, limit, threshold).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "History search failed");
                Vec::new()
            }
        }
    }
}
