use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::task::{RiskLevel, Submission, TaskId, UrgencyLevel};
use crate::ConductorResult;

/// Everything an executor needs to perform one attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Task being executed.
    pub task_id: TaskId,
    /// What should be done.
    pub description: String,
    /// Business risk.
    pub risk: RiskLevel,
    /// Time pressure.
    pub urgency: UrgencyLevel,
    /// Executor hint from the submission.
    pub target_executor: Option<String>,
    /// Origin tag of the submission.
    pub origin: String,
    /// Zero for the first attempt, incremented on every retry.
    pub attempt: u32,
    /// Submission metadata, passed through untouched.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ExecutionRequest {
    /// Builds the request for attempt `attempt` of `submission`.
    pub fn from_submission(task_id: TaskId, submission: &Submission, attempt: u32) -> Self {
        Self {
            task_id,
            description: submission.description.clone(),
            risk: submission.risk,
            urgency: submission.urgency,
            target_executor: submission.target_executor.clone(),
            origin: submission.origin.clone(),
            attempt,
            extra: submission.metadata.clone(),
        }
    }

    /// Looks up a string value in `extra`.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Structured output.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    /// Error details when the attempt failed.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ExecutionOutcome {
    /// A successful outcome.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    /// A failed outcome with its error list.
    pub fn failure(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            errors,
            ..Self::default()
        }
    }

    /// Adds one structured output value.
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Performs the domain work behind a task.
///
/// Implementations should watch `cancel` and return early once it fires;
/// whatever they return after cancellation is discarded.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs one attempt. An `Err` is treated as a failed attempt.
    async fn run(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ConductorResult<ExecutionOutcome>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ConductorError;
    use uuid::Uuid;

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn run(
            &self,
            request: ExecutionRequest,
            cancel: CancellationToken,
        ) -> ConductorResult<ExecutionOutcome> {
            if cancel.is_cancelled() {
                return Err(ConductorError::Executor("cancelled".into()));
            }
            Ok(ExecutionOutcome::success(request.description)
                .with_data("attempt", serde_json::json!(request.attempt)))
        }
    }

    #[test]
    fn test_request_carries_metadata_as_extra() {
        let sub = Submission::new("clean logs")
            .with_target("janitor")
            .with_metadata("command", serde_json::json!("echo hi"));
        let req = ExecutionRequest::from_submission(Uuid::new_v4(), &sub, 2);
        assert_eq!(req.attempt, 2);
        assert_eq!(req.target_executor.as_deref(), Some("janitor"));
        assert_eq!(req.extra_str("command"), Some("echo hi"));
        assert_eq!(req.extra_str("missing"), None);
    }

    #[tokio::test]
    async fn test_executor_observes_cancellation() {
        let sub = Submission::new("noop");
        let req = ExecutionRequest::from_submission(Uuid::new_v4(), &sub, 0);

        let ok = EchoExecutor
            .run(req.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.data["attempt"], serde_json::json!(0));

        let token = CancellationToken::new();
        token.cancel();
        assert!(EchoExecutor.run(req, token).await.is_err());
    }

    #[test]
    fn test_failure_outcome() {
        let out = ExecutionOutcome::failure("disk full", vec!["ENOSPC".into()]);
        assert!(!out.success);
        assert_eq!(out.errors, vec!["ENOSPC".to_string()]);
    }
}
