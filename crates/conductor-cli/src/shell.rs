use async_trait::async_trait;
use conductor_core::{ConductorResult, ExecutionOutcome, ExecutionRequest, Executor};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DANGEROUS_PATTERNS: [&str; 4] = ["rm -rf /", "mkfs", "dd if=", ":(){ :|:& };:"];
const MAX_TIMEOUT_SECS: u64 = 300;

/// Runs `extra.command` through `sh -c`.
///
/// Tasks without a command are recorded as handled. `extra.timeout_secs`
/// overrides the default timeout, capped at five minutes.
pub struct ShellExecutor {
    default_timeout: Duration,
}

impl ShellExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    fn timeout_for(&self, request: &ExecutionRequest) -> Duration {
        request
            .extra
            .get("timeout_secs")
            .and_then(serde_json::Value::as_u64)
            .map_or(self.default_timeout, |secs| {
                Duration::from_secs(secs.min(MAX_TIMEOUT_SECS))
            })
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn run(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ConductorResult<ExecutionOutcome> {
        let Some(command) = request.extra_str("command").map(str::trim) else {
            info!(task_id = %request.task_id, "No command attached, task recorded");
            return Ok(ExecutionOutcome::success("recorded"));
        };
        if command.is_empty() {
            return Ok(ExecutionOutcome::failure("Empty command", vec![]));
        }

        if let Some(pattern) = DANGEROUS_PATTERNS.iter().find(|p| command.contains(*p)) {
            warn!(task_id = %request.task_id, command = %command, "Blocked dangerous command");
            return Ok(ExecutionOutcome::failure(
                format!("Command blocked: contains dangerous pattern '{pattern}'"),
                vec![format!("blocked pattern: {pattern}")],
            ));
        }

        let timeout = self.timeout_for(&request);
        info!(
            task_id = %request.task_id,
            command = %command,
            timeout_secs = timeout.as_secs(),
            "Executing shell command"
        );

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output();

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(ExecutionOutcome::failure("Command cancelled", vec![]));
            }
            result = tokio::time::timeout(timeout, child) => result,
        };

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let exit_code = output.status.code().unwrap_or(-1);

                if output.status.success() {
                    let summary = truncate_output(stdout.trim(), 2_000);
                    let message = if summary.is_empty() {
                        "exit code 0".to_string()
                    } else {
                        summary
                    };
                    Ok(ExecutionOutcome::success(message)
                        .with_data("exit_code", serde_json::json!(exit_code))
                        .with_data("stdout", serde_json::json!(truncate_output(&stdout, 50_000))))
                } else {
                    Ok(ExecutionOutcome::failure(
                        format!("exit code {exit_code}"),
                        vec![truncate_output(stderr.trim(), 10_000)],
                    )
                    .with_data("exit_code", serde_json::json!(exit_code)))
                }
            }
            Ok(Err(e)) => Ok(ExecutionOutcome::failure(
                format!("Failed to execute command: {e}"),
                vec![e.to_string()],
            )),
            Err(_) => Ok(ExecutionOutcome::failure(
                format!("Command timed out after {}s", timeout.as_secs()),
                vec![],
            )),
        }
    }
}

fn truncate_output(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut cut = max_len;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated, {} total bytes]", &s[..cut], s.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::Submission;
    use uuid::Uuid;

    fn request(extra: serde_json::Value) -> ExecutionRequest {
        let mut sub = Submission::new("shell test");
        if let serde_json::Value::Object(map) = extra {
            for (k, v) in map {
                sub = sub.with_metadata(k, v);
            }
        }
        ExecutionRequest::from_submission(Uuid::new_v4(), &sub, 0)
    }

    #[tokio::test]
    async fn test_shell_echo() {
        let outcome = ShellExecutor::default()
            .run(request(serde_json::json!({"command": "echo hello"})), CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, "hello");
    }

    #[tokio::test]
    async fn test_shell_without_command_is_recorded() {
        let outcome = ShellExecutor::default()
            .run(request(serde_json::json!({})), CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, "recorded");
    }

    #[tokio::test]
    async fn test_shell_blocks_dangerous() {
        let outcome = ShellExecutor::default()
            .run(request(serde_json::json!({"command": "rm -rf /"})), CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.contains("blocked"));
    }

    #[tokio::test]
    async fn test_shell_nonzero_exit_fails() {
        let outcome = ShellExecutor::default()
            .run(
                request(serde_json::json!({"command": "echo oops >&2; exit 3"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "exit code 3");
        assert_eq!(outcome.errors, vec!["oops".to_string()]);
    }

    #[tokio::test]
    async fn test_shell_timeout() {
        let outcome = ShellExecutor::default()
            .run(
                request(serde_json::json!({"command": "sleep 10", "timeout_secs": 1})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.contains("timed out"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(10);
        let cut = truncate_output(&text, 5);
        assert!(cut.starts_with("éé"));
        assert!(cut.contains("[truncated, 20 total bytes]"));
    }
}
