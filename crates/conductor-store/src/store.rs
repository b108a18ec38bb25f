use async_trait::async_trait;
use conductor_core::{
    ConductorError, ConductorResult, Submission, TaskId, TaskRecord, TaskStatus, TaskUpdate,
};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

/// Selection and paging for [`TaskStore::list_tasks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    /// Only records with this status.
    pub status: Option<TaskStatus>,
    /// Only records routed to this executor.
    pub executor: Option<String>,
    /// Maximum number of records returned.
    pub limit: usize,
    /// Number of matching records skipped first.
    pub offset: usize,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            executor: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl TaskFilter {
    /// Records with `status`, first page.
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Sets the page size.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the page offset.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn matches(&self, record: &TaskRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self
                .executor
                .as_deref()
                .map_or(true, |e| record.executor.as_deref() == Some(e))
    }

    /// Filters, orders by creation time and pages `records`.
    fn select(&self, mut records: Vec<TaskRecord>) -> Vec<TaskRecord> {
        records.retain(|r| self.matches(r));
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect()
    }
}

/// Durable storage for task records.
///
/// The store is the source of truth for task status. `update_task` must
/// honour [`TaskUpdate::expect_status`] atomically with respect to other
/// updates of the same task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persists a new PENDING record for `submission`.
    async fn create_task(&self, submission: &Submission) -> ConductorResult<TaskRecord>;
    /// Loads a record, `None` if unknown.
    async fn get_task(&self, id: TaskId) -> ConductorResult<Option<TaskRecord>>;
    /// Applies `changes`, returning the updated record or `None` if unknown.
    async fn update_task(
        &self,
        id: TaskId,
        changes: TaskUpdate,
    ) -> ConductorResult<Option<TaskRecord>>;
    /// Lists records oldest first.
    async fn list_tasks(&self, filter: &TaskFilter) -> ConductorResult<Vec<TaskRecord>>;
}

/// Process-local task store.
#[derive(Default)]
pub struct InMemoryTaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, submission: &Submission) -> ConductorResult<TaskRecord> {
        let record = TaskRecord::new(submission);
        self.records.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_task(&self, id: TaskId) -> ConductorResult<Option<TaskRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update_task(
        &self,
        id: TaskId,
        changes: TaskUpdate,
    ) -> ConductorResult<Option<TaskRecord>> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        changes.check(record)?;
        changes.apply(record);
        Ok(Some(record.clone()))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> ConductorResult<Vec<TaskRecord>> {
        let records = self.records.read().await.values().cloned().collect();
        Ok(filter.select(records))
    }
}

/// File-based task store (one JSON file per task).
pub struct FileTaskStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub async fn new(dir: PathBuf) -> ConductorResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn task_path(&self, id: TaskId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read(&self, id: TaskId) -> ConductorResult<Option<TaskRecord>> {
        let path = self.task_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let record = serde_json::from_str(&data)
            .map_err(|e| ConductorError::Store(format!("Failed to parse task {id}: {e}")))?;
        Ok(Some(record))
    }

    async fn write(&self, record: &TaskRecord) -> ConductorResult<()> {
        let path = self.task_path(record.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn create_task(&self, submission: &Submission) -> ConductorResult<TaskRecord> {
        let record = TaskRecord::new(submission);
        let _guard = self.write_lock.lock().await;
        self.write(&record).await?;
        Ok(record)
    }

    async fn get_task(&self, id: TaskId) -> ConductorResult<Option<TaskRecord>> {
        self.read(id).await
    }

    async fn update_task(
        &self,
        id: TaskId,
        changes: TaskUpdate,
    ) -> ConductorResult<Option<TaskRecord>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.read(id).await? else {
            return Ok(None);
        };
        changes.check(&record)?;
        changes.apply(&mut record);
        self.write(&record).await?;
        Ok(Some(record))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> ConductorResult<Vec<TaskRecord>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(id) = name
                .strip_suffix(".json")
                .and_then(|stem| Uuid::parse_str(stem).ok())
            else {
                continue;
            };
            match self.read(id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(task_id = %id, error = %e, "Skipping unreadable task file"),
            }
        }
        Ok(filter.select(records))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_create_get_update() {
        let store = InMemoryTaskStore::new();
        let record = store.create_task(&Submission::new("index docs")).await.unwrap();
        assert_eq!(record.status, TaskStatus::Pending);

        let updated = store
            .update_task(record.id, TaskUpdate::status(TaskStatus::Running))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Running);
        assert_eq!(
            store.get_task(record.id).await.unwrap().unwrap().status,
            TaskStatus::Running
        );
    }

    #[tokio::test]
    async fn test_in_memory_unknown_task() {
        let store = InMemoryTaskStore::new();
        assert!(store.get_task(Uuid::new_v4()).await.unwrap().is_none());
        let res = store
            .update_task(Uuid::new_v4(), TaskUpdate::status(TaskStatus::Failed))
            .await
            .unwrap();
        assert!(res.is_none());
    }

    #[tokio::test]
    async fn test_guarded_update_rejected_without_change() {
        let store = InMemoryTaskStore::new();
        let record = store.create_task(&Submission::new("x")).await.unwrap();
        let err = store
            .update_task(
                record.id,
                TaskUpdate::status(TaskStatus::Completed).only_if(TaskStatus::Running),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::StatusConflict { .. }));
        assert_eq!(
            store.get_task(record.id).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_list_filters_and_pages_oldest_first() {
        let store = InMemoryTaskStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let sub = Submission::new(format!("task {i}")).with_target(if i % 2 == 0 {
                "even"
            } else {
                "odd"
            });
            ids.push(store.create_task(&sub).await.unwrap().id);
        }
        store
            .update_task(ids[4], TaskUpdate::status(TaskStatus::Completed))
            .await
            .unwrap();

        let pending = store
            .list_tasks(&TaskFilter::with_status(TaskStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 4);
        assert_eq!(pending[0].id, ids[0]);

        let page = store
            .list_tasks(&TaskFilter::default().offset(1).limit(2))
            .await
            .unwrap();
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), ids[1..3]);

        let even = store
            .list_tasks(&TaskFilter {
                executor: Some("even".into()),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(even.len(), 3);
    }
}
