use conductor_core::{ConductorError, ConductorResult};
use conductor_orchestrator::{parse_interval, OrchestratorConfig, ScheduleSpec};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Contents of `conductor.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConductorConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub schedules: Vec<ScheduleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_shell_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shell_timeout_secs(),
        }
    }
}

/// Telegram credentials. Empty values fall back to `TELEGRAM_BOT_TOKEN`
/// and `TELEGRAM_CHAT_ID`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

impl TelegramConfig {
    /// Token and chat id, or `None` when either is missing everywhere.
    pub fn resolve(&self) -> Option<(String, String)> {
        let pick = |value: &str, var: &str| {
            if value.is_empty() {
                std::env::var(var).ok().filter(|v| !v.is_empty())
            } else {
                Some(value.to_string())
            }
        };
        Some((
            pick(&self.bot_token, "TELEGRAM_BOT_TOKEN")?,
            pick(&self.chat_id, "TELEGRAM_CHAT_ID")?,
        ))
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_shell_timeout_secs() -> u64 {
    30
}

impl ConductorConfig {
    /// Enabled schedules, after checking names are unique and intervals parse.
    pub fn active_schedules(&self) -> ConductorResult<Vec<&ScheduleSpec>> {
        let mut names = HashSet::new();
        let mut active = Vec::new();
        for spec in &self.schedules {
            if !names.insert(spec.name.as_str()) {
                return Err(ConductorError::Config(format!(
                    "Duplicate schedule name '{}'",
                    spec.name
                )));
            }
            parse_interval(&spec.every)?;
            if spec.enabled {
                active.push(spec);
            }
        }
        Ok(active)
    }
}

/// Reads and parses a TOML config file.
pub fn load(path: &Path) -> ConductorResult<ConductorConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConductorError::Config(format!("Failed to read config '{}': {e}", path.display()))
    })?;
    toml::from_str(&content).map_err(|e| {
        ConductorError::Config(format!("Failed to parse config '{}': {e}", path.display()))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::RiskLevel;
    use std::io::Write;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp.as_file_mut(), "{content}").unwrap();
        tmp
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let tmp = write("");
        let config = load(tmp.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.orchestrator.max_concurrent, 5);
        assert_eq!(config.shell.timeout_secs, 30);
        assert!(config.telegram.is_none());
        assert!(config.schedules.is_empty());
    }

    #[test]
    fn test_full_file() {
        let tmp = write(
            r#"
data_dir = "/var/lib/conductor"

[orchestrator]
max_concurrent = 8

[orchestrator.retry]
max_retries = 5

[[orchestrator.decision_rules]]
risk = "low"
urgency = "high"
action = "auto_fix"

[telegram]
bot_token = "123:abc"
chat_id = "42"

[[schedules]]
name = "disk-check"
every = "every_15m"
description = "check free disk space"
risk = "medium"
metadata = { command = "df -h" }

[[schedules]]
name = "weekly"
every = "every_168h"
description = "compact history"
enabled = false
"#,
        );
        let config = load(tmp.path()).unwrap();
        assert_eq!(config.orchestrator.max_concurrent, 8);
        assert_eq!(config.orchestrator.retry.max_retries, 5);
        assert_eq!(config.orchestrator.decision_rules.len(), 1);
        assert_eq!(
            config.telegram.as_ref().unwrap().resolve(),
            Some(("123:abc".to_string(), "42".to_string()))
        );

        let active = config.active_schedules().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "disk-check");
        assert_eq!(active[0].risk, RiskLevel::Medium);
        assert_eq!(active[0].metadata["command"], "df -h");
    }

    #[test]
    fn test_bad_schedules_are_rejected() {
        let tmp = write(
            r#"
[[schedules]]
name = "a"
every = "daily"
description = "x"
"#,
        );
        let config = load(tmp.path()).unwrap();
        assert!(config.active_schedules().is_err());

        let tmp = write(
            r#"
[[schedules]]
name = "a"
every = "every_1h"
description = "x"

[[schedules]]
name = "a"
every = "every_2h"
description = "y"
"#,
        );
        let err = load(tmp.path()).unwrap().active_schedules().unwrap_err();
        assert!(err.to_string().contains("Duplicate schedule name"));
    }

    #[test]
    fn test_invalid_toml_and_missing_file() {
        let tmp = write("{{{{invalid toml!!!!");
        let err = load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));

        let err = load(Path::new("/nonexistent/conductor.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
