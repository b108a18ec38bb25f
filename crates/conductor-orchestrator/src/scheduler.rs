use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult, RiskLevel, Submission, UrgencyLevel};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Parses `every_<N>m` or `every_<N>h` (trimmed, case-insensitive) into a duration.
pub fn parse_interval(expr: &str) -> ConductorResult<Duration> {
    let normalized = expr.trim().to_lowercase();
    let invalid = || {
        ConductorError::Config(format!(
            "Invalid schedule interval '{expr}': expected every_<N>m or every_<N>h"
        ))
    };

    let body = normalized.strip_prefix("every_").ok_or_else(invalid)?;
    let (count, unit_secs) = if let Some(n) = body.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = body.strip_suffix('h') {
        (n, 3_600)
    } else {
        return Err(invalid());
    };

    let count: u64 = count.parse().map_err(|_| invalid())?;
    if count == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs(count.saturating_mul(unit_secs)))
}

/// A recurring job as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Unique job name, used as the schedule id.
    pub name: String,
    /// Interval expression, e.g. `every_30m`.
    pub every: String,
    /// Description of the submitted task.
    pub description: String,
    /// Risk level of the submitted task.
    #[serde(default)]
    pub risk: RiskLevel,
    /// Urgency level of the submitted task.
    #[serde(default)]
    pub urgency: UrgencyLevel,
    /// Executor hint.
    #[serde(default)]
    pub target_executor: Option<String>,
    /// Metadata forwarded to the executor.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Disabled jobs are not registered.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleSpec {
    /// The submission fired on every run.
    pub fn to_submission(&self) -> Submission {
        Submission {
            description: self.description.clone(),
            risk: self.risk,
            urgency: self.urgency,
            target_executor: self.target_executor.clone(),
            origin: "scheduler".to_string(),
            metadata: self.metadata.clone(),
            depends_on: Vec::new(),
            max_retries: None,
        }
    }
}

/// A registered recurring submission.
#[derive(Debug, Clone)]
pub struct ScheduledEntry {
    /// Schedule id.
    pub id: String,
    /// Submission fired on each run.
    pub template: Submission,
    /// Original interval expression.
    pub expression: String,
    /// Parsed interval.
    pub interval: Duration,
    /// When the entry last fired.
    pub last_run: Option<DateTime<Utc>>,
}

impl ScheduledEntry {
    /// Whether the entry should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map_or(false, |elapsed| elapsed >= self.interval),
        }
    }
}

/// Read-only view of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleView {
    /// Schedule id.
    pub id: String,
    /// Interval expression.
    pub expression: String,
    /// Interval in seconds.
    pub interval_secs: u64,
    /// Description of the fired submission.
    pub description: String,
    /// Last fire time.
    pub last_run: Option<DateTime<Utc>>,
}

/// The set of recurring submissions.
#[derive(Debug, Default)]
pub struct ScheduleBook {
    entries: Mutex<HashMap<String, ScheduledEntry>>,
}

impl ScheduleBook {
    /// Creates an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `template` to fire every `expression`, replacing any entry with the same id.
    ///
    /// Invalid expressions and blank descriptions are rejected here, never at tick time.
    pub fn add(
        &self,
        template: Submission,
        expression: &str,
        id: Option<String>,
    ) -> ConductorResult<String> {
        template.validate()?;
        let interval = parse_interval(expression)?;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let entry = ScheduledEntry {
            id: id.clone(),
            template,
            expression: expression.trim().to_string(),
            interval,
            last_run: None,
        };
        self.entries.lock().insert(id.clone(), entry);
        Ok(id)
    }

    /// Removes a schedule, reporting whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Entries due at `now`, with their templates.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<(String, Submission)> {
        let mut due: Vec<(String, Submission)> = self
            .entries
            .lock()
            .values()
            .filter(|e| e.is_due(now))
            .map(|e| (e.id.clone(), e.template.clone()))
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0));
        due
    }

    /// Records that `id` fired at `at`.
    pub fn mark_fired(&self, id: &str, at: DateTime<Utc>) {
        if let Some(entry) = self.entries.lock().get_mut(id) {
            entry.last_run = Some(at);
        }
    }

    /// All schedules ordered by id.
    pub fn list(&self) -> Vec<ScheduleView> {
        let mut views: Vec<ScheduleView> = self
            .entries
            .lock()
            .values()
            .map(|e| ScheduleView {
                id: e.id.clone(),
                expression: e.expression.clone(),
                interval_secs: e.interval.as_secs(),
                description: e.template.description.clone(),
                last_run: e.last_run,
            })
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Number of schedules.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no schedule is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
