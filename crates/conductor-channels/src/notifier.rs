use async_trait::async_trait;
use conductor_core::{short_id, ConductorResult, RiskLevel, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

/// A finished task worth telling a human about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task the event is about.
    pub task_id: TaskId,
    /// Task description.
    pub description: String,
    /// Terminal status reached.
    pub status: TaskStatus,
    /// Last result message.
    pub message: String,
    /// Risk level of the submission.
    pub risk: RiskLevel,
    /// Executor the task was routed to.
    #[serde(default)]
    pub executor: Option<String>,
    /// Structured errors, for failures.
    #[serde(default)]
    pub errors: Vec<String>,
}

/// A follow-up a human can trigger from a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAction {
    /// Button label.
    pub label: &'static str,
    /// Opaque payload echoed back when pressed, e.g. `retry_<id>`.
    pub payload: String,
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl TaskEvent {
    /// Plain-text body: status, short id, description (200 chars) and result (300 chars).
    pub fn render_text(&self) -> String {
        format!(
            "Task notification\nStatus: {}\nID: {}\nTask: {}\nResult: {}",
            self.status.as_str().to_uppercase(),
            short_id(&self.task_id),
            truncate(&self.description, 200),
            truncate(&self.message, 300),
        )
    }

    /// Retry and dismiss actions for failed tasks, nothing otherwise.
    pub fn actions(&self) -> Vec<EventAction> {
        if self.status != TaskStatus::Failed {
            return Vec::new();
        }
        vec![
            EventAction {
                label: "Retry",
                payload: format!("retry_{}", self.task_id),
            },
            EventAction {
                label: "Dismiss",
                payload: format!("dismiss_{}", self.task_id),
            },
        ]
    }
}

/// Delivers task events to a human-facing channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;
    /// Delivers one event.
    async fn notify(&self, event: &TaskEvent) -> ConductorResult<()>;
}
