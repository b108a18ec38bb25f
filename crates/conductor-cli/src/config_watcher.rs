//! Config hot-reload.
//!
//! [`ConfigWatcher`] watches `conductor.toml` and hands every successfully
//! parsed version to a callback after a debounce window. [`ScheduleSync`]
//! applies the `[[schedules]]` section of each version to a running
//! orchestrator.

use crate::config::{load, ConductorConfig};
use conductor_core::{ConductorError, ConductorResult};
use conductor_orchestrator::{Orchestrator, ScheduleSpec};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Watches a config file on disk and calls back on every (debounced) change.
///
/// Dropping the watcher stops the background thread.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Starts watching `config_path`.
    ///
    /// `on_reload` runs on a background thread. Parse errors are logged and
    /// do not invoke it.
    pub fn start<F>(config_path: PathBuf, debounce_ms: u64, on_reload: F) -> ConductorResult<Self>
    where
        F: Fn(ConductorConfig) + Send + Sync + 'static,
    {
        let (tx, rx) = std_mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    let _ = tx.send(());
                }
            }
        })
        .map_err(|e| ConductorError::Config(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(config_path.as_ref(), RecursiveMode::NonRecursive)
            .map_err(|e| ConductorError::Config(format!("Failed to watch config file: {e}")))?;

        let path = config_path.clone();
        std::thread::spawn(move || {
            let debounce = Duration::from_millis(debounce_ms);
            let mut last_reload = Instant::now();

            while rx.recv().is_ok() {
                // one reload per burst of writes
                while rx.try_recv().is_ok() {}

                let since = last_reload.elapsed();
                if since < debounce {
                    std::thread::sleep(debounce - since);
                }
                last_reload = Instant::now();

                match load(&path) {
                    Ok(config) => on_reload(config),
                    Err(e) => warn!(error = %e, "Failed to reload config"),
                }
            }
            debug!("Config watcher thread exiting");
        });

        info!(path = %config_path.display(), "Config hot-reload watcher started");
        Ok(Self { _watcher: watcher })
    }
}

/// Schedule changes made by one [`ScheduleSync::apply`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub replaced: usize,
    pub removed: usize,
}

/// Keeps the orchestrator's schedules in line with the config file.
///
/// Unchanged entries are left alone so their last-run time survives a reload.
pub struct ScheduleSync {
    orchestrator: Orchestrator,
    applied: HashMap<String, ScheduleSpec>,
}

impl ScheduleSync {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            applied: HashMap::new(),
        }
    }

    /// Applies the schedules of `config`. An invalid section changes nothing.
    pub fn apply(&mut self, config: &ConductorConfig) -> ConductorResult<SyncReport> {
        let wanted: HashMap<String, ScheduleSpec> = config
            .active_schedules()?
            .into_iter()
            .map(|spec| (spec.name.clone(), spec.clone()))
            .collect();
        let mut report = SyncReport::default();

        let stale: Vec<String> = self
            .applied
            .keys()
            .filter(|name| !wanted.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            self.orchestrator.unschedule(&name);
            self.applied.remove(&name);
            report.removed += 1;
        }

        for (name, spec) in wanted {
            let previous = self.applied.get(&name);
            if previous == Some(&spec) {
                continue;
            }
            let replacing = previous.is_some();
            self.orchestrator
                .schedule(spec.to_submission(), &spec.every, Some(name.clone()))?;
            if replacing {
                report.replaced += 1;
            } else {
                report.added += 1;
            }
            self.applied.insert(name, spec);
        }

        if report != SyncReport::default() {
            info!(
                added = report.added,
                replaced = report.replaced,
                removed = report.removed,
                "Schedules synchronized"
            );
        }
        Ok(report)
    }
}
