use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::ConductorError;

/// Stable identity of a task, shared by its queue entry and its persisted record.
pub type TaskId = Uuid;

/// First eight characters of a task id, used in log lines and messages.
pub fn short_id(id: &TaskId) -> String {
    id.to_string().chars().take(8).collect()
}

macro_rules! level_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            /// Lowest level.
            #[default]
            Low,
            /// Intermediate level.
            Medium,
            /// Highest level.
            High,
        }

        impl $name {
            /// Lowercase name as used in config files and cache payloads.
            pub fn as_str(&self) -> &'static str {
                match self {
                    Self::Low => "low",
                    Self::Medium => "medium",
                    Self::High => "high",
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConductorError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    "low" => Ok(Self::Low),
                    "medium" => Ok(Self::Medium),
                    "high" => Ok(Self::High),
                    other => Err(ConductorError::InvalidInput(format!(
                        "unknown {} level '{other}'",
                        $label
                    ))),
                }
            }
        }
    };
}

level_enum!(
    /// Business risk attached to a submission.
    RiskLevel,
    "risk"
);
level_enum!(
    /// How soon the submitter needs the work done.
    UrgencyLevel,
    "urgency"
);

/// Lifecycle status of a persisted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, waiting in the queue or on dependencies.
    Pending,
    /// Handed to an executor.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed after exhausting its retries.
    Failed,
    /// Cancelled by request or by a failed dependency.
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transition is expected from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ConductorError::InvalidInput(format!(
                "unknown task status '{other}'"
            ))),
        }
    }
}

fn default_origin() -> String {
    "api".to_string()
}

/// Caller-supplied description of a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// What should be done. Must not be blank.
    pub description: String,
    /// Business risk.
    #[serde(default)]
    pub risk: RiskLevel,
    /// Time pressure.
    #[serde(default)]
    pub urgency: UrgencyLevel,
    /// Preferred executor, if the submitter has one in mind.
    #[serde(default)]
    pub target_executor: Option<String>,
    /// Which component produced this submission (`api`, `scheduler`, `retry`...).
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Free-form data forwarded to the executor.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Tasks that must complete before this one may run.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Overrides the global retry ceiling for this task.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Submission {
    /// Creates a low-risk, low-urgency submission originating from the API.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            risk: RiskLevel::default(),
            urgency: UrgencyLevel::default(),
            target_executor: None,
            origin: default_origin(),
            metadata: HashMap::new(),
            depends_on: Vec::new(),
            max_retries: None,
        }
    }

    /// Sets the risk level.
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    /// Sets the urgency level.
    pub fn with_urgency(mut self, urgency: UrgencyLevel) -> Self {
        self.urgency = urgency;
        self
    }

    /// Sets the target executor hint.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_executor = Some(target.into());
        self
    }

    /// Sets the origin tag.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets the dependency list.
    pub fn with_dependencies(mut self, depends_on: impl IntoIterator<Item = TaskId>) -> Self {
        self.depends_on = depends_on.into_iter().collect();
        self
    }

    /// Overrides the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Rejects submissions whose description is blank.
    pub fn validate(&self) -> Result<(), ConductorError> {
        if self.description.trim().is_empty() {
            return Err(ConductorError::InvalidInput(
                "description must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// The persisted, authoritative state of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identity.
    pub id: TaskId,
    /// What should be done.
    pub description: String,
    /// Business risk.
    pub risk: RiskLevel,
    /// Time pressure.
    pub urgency: UrgencyLevel,
    /// Origin tag of the submission that created the task.
    pub origin: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Executor the task was routed to, once dispatched.
    #[serde(default)]
    pub executor: Option<String>,
    /// Dependencies declared at submission.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Metadata forwarded to the executor.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Per-task retry ceiling override.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Last human-readable outcome message.
    #[serde(default)]
    pub result_message: Option<String>,
    /// Whether the last outcome was a success.
    #[serde(default)]
    pub result_success: Option<bool>,
    /// Structured errors reported by the executor.
    #[serde(default)]
    pub errors: Vec<String>,
    /// When the task was accepted.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
    /// When the task reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Builds a fresh PENDING record for a submission.
    pub fn new(submission: &Submission) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: submission.description.clone(),
            risk: submission.risk,
            urgency: submission.urgency,
            origin: submission.origin.clone(),
            status: TaskStatus::Pending,
            executor: submission.target_executor.clone(),
            depends_on: submission.depends_on.clone(),
            metadata: submission.metadata.clone(),
            max_retries: submission.max_retries,
            result_message: None,
            result_success: None,
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Rebuilds the submission this record came from, tagged with a new origin.
    pub fn to_submission(&self, origin: impl Into<String>) -> Submission {
        Submission {
            description: self.description.clone(),
            risk: self.risk,
            urgency: self.urgency,
            target_executor: self.executor.clone(),
            origin: origin.into(),
            metadata: self.metadata.clone(),
            depends_on: self.depends_on.clone(),
            max_retries: self.max_retries,
        }
    }
}

/// Field changes applied to a [`TaskRecord`].
///
/// `None` leaves a field untouched. When `expect_status` is set, stores
/// must reject the update with [`ConductorError::StatusConflict`] unless the
/// record currently has that status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    /// New status.
    pub status: Option<TaskStatus>,
    /// New executor.
    pub executor: Option<Option<String>>,
    /// New result message.
    pub result_message: Option<Option<String>>,
    /// New result flag.
    pub result_success: Option<Option<bool>>,
    /// New error list.
    pub errors: Option<Vec<String>>,
    /// Guard on the current status.
    pub expect_status: Option<TaskStatus>,
}

impl TaskUpdate {
    /// An update that only changes the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Sets the result message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.result_message = Some(Some(message.into()));
        self
    }

    /// Sets the result flag.
    pub fn success(mut self, success: bool) -> Self {
        self.result_success = Some(Some(success));
        self
    }

    /// Sets the error list.
    pub fn errors(mut self, errors: Vec<String>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Records the executor the task was routed to.
    pub fn executor(mut self, executor: Option<String>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Clears every result field.
    pub fn clear_result(mut self) -> Self {
        self.result_message = Some(None);
        self.result_success = Some(None);
        self.errors = Some(Vec::new());
        self
    }

    /// Only apply when the record currently has `status`.
    pub fn only_if(mut self, status: TaskStatus) -> Self {
        self.expect_status = Some(status);
        self
    }

    /// Checks the status guard against `record`.
    pub fn check(&self, record: &TaskRecord) -> Result<(), ConductorError> {
        match self.expect_status {
            Some(expected) if expected != record.status => Err(ConductorError::StatusConflict {
                id: record.id,
                expected,
                actual: record.status,
            }),
            _ => Ok(()),
        }
    }

    /// Applies the changes to `record`, maintaining timestamps.
    pub fn apply(self, record: &mut TaskRecord) {
        let now = Utc::now();
        if let Some(status) = self.status {
            record.status = status;
            record.completed_at = status.is_terminal().then_some(now);
        }
        if let Some(executor) = self.executor {
            record.executor = executor;
        }
        if let Some(message) = self.result_message {
            record.result_message = message;
        }
        if let Some(success) = self.result_success {
            record.result_success = success;
        }
        if let Some(errors) = self.errors {
            record.errors = errors;
        }
        record.updated_at = now;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_parse_case_insensitively() {
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert_eq!(" medium ".parse::<UrgencyLevel>().unwrap(), UrgencyLevel::Medium);
        assert!("extreme".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn test_submission_defaults_from_json() {
        let sub: Submission = serde_json::from_str(r#"{"description": "rotate keys"}"#).unwrap();
        assert_eq!(sub.risk, RiskLevel::Low);
        assert_eq!(sub.urgency, UrgencyLevel::Low);
        assert_eq!(sub.origin, "api");
        assert!(sub.depends_on.is_empty());
        assert!(sub.max_retries.is_none());
    }

    #[test]
    fn test_blank_description_rejected() {
        let err = Submission::new("   \n").validate().unwrap_err();
        assert!(matches!(err, ConductorError::InvalidInput(_)));
        assert!(Submission::new("scan ports").validate().is_ok());
    }

    #[test]
    fn test_record_round_trips_submission() {
        let dep = Uuid::new_v4();
        let sub = Submission::new("patch host")
            .with_risk(RiskLevel::High)
            .with_target("patcher")
            .with_dependencies([dep])
            .with_max_retries(1)
            .with_metadata("host", serde_json::json!("db-1"));
        let record = TaskRecord::new(&sub);
        assert_eq!(record.status, TaskStatus::Pending);

        let rebuilt = record.to_submission("recovery");
        assert_eq!(rebuilt.origin, "recovery");
        assert_eq!(rebuilt.depends_on, vec![dep]);
        assert_eq!(rebuilt.target_executor.as_deref(), Some("patcher"));
        assert_eq!(rebuilt.metadata, sub.metadata);
        assert_eq!(rebuilt.max_retries, Some(1));
    }

    #[test]
    fn test_update_sets_and_clears_completion_time() {
        let mut record = TaskRecord::new(&Submission::new("x"));
        TaskUpdate::status(TaskStatus::Failed)
            .message("boom")
            .success(false)
            .apply(&mut record);
        assert!(record.completed_at.is_some());
        assert_eq!(record.result_message.as_deref(), Some("boom"));

        TaskUpdate::status(TaskStatus::Pending)
            .clear_result()
            .apply(&mut record);
        assert!(record.completed_at.is_none());
        assert!(record.result_message.is_none());
        assert!(record.result_success.is_none());
    }

    #[test]
    fn test_guard_reports_conflict() {
        let record = TaskRecord::new(&Submission::new("x"));
        let update = TaskUpdate::status(TaskStatus::Completed).only_if(TaskStatus::Running);
        match update.check(&record) {
            Err(ConductorError::StatusConflict { expected, actual, .. }) => {
                assert_eq!(expected, TaskStatus::Running);
                assert_eq!(actual, TaskStatus::Pending);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_short_id() {
        let id = Uuid::new_v4();
        assert_eq!(short_id(&id).len(), 8);
        assert!(id.to_string().starts_with(&short_id(&id)));
    }
}
