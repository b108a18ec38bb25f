use crate::entry::QueueEntry;
use conductor_core::{ConductorResult, TaskId, TaskStatus};
use conductor_store::TaskStore;
use std::collections::{HashMap, HashSet};

/// Outcome of looking up a task's dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyCheck {
    /// Every dependency completed; the task may be queued.
    Ready,
    /// These dependencies have not completed yet.
    Blocked(HashSet<TaskId>),
    /// This dependency failed or was cancelled; the task can never run.
    Doomed(TaskId),
}

/// Looks up the persisted status of each dependency.
///
/// Only COMPLETED counts as satisfied. Unknown ids are treated as not yet
/// completed.
pub async fn check_dependencies(
    store: &dyn TaskStore,
    depends_on: &[TaskId],
) -> ConductorResult<DependencyCheck> {
    let mut unmet = HashSet::new();
    for dep in depends_on {
        if unmet.contains(dep) {
            continue;
        }
        match store.get_task(*dep).await? {
            Some(record) => match record.status {
                TaskStatus::Completed => {}
                TaskStatus::Failed | TaskStatus::Cancelled => {
                    return Ok(DependencyCheck::Doomed(*dep));
                }
                TaskStatus::Pending | TaskStatus::Running => {
                    unmet.insert(*dep);
                }
            },
            None => {
                unmet.insert(*dep);
            }
        }
    }
    if unmet.is_empty() {
        Ok(DependencyCheck::Ready)
    } else {
        Ok(DependencyCheck::Blocked(unmet))
    }
}

/// A dependent released by [`DependencyTracker::resolve`].
#[derive(Debug)]
pub struct Unblocked {
    /// The released task.
    pub id: TaskId,
    /// Its parked entry, if still held in memory.
    pub entry: Option<QueueEntry>,
}

/// Dynamic dependency graph between not-yet-runnable tasks.
///
/// `dependents[x]` contains `t` exactly when `unmet[t]` contains `x`.
/// Blocked entries are parked here instead of in the queue.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    unmet: HashMap<TaskId, HashSet<TaskId>>,
    dependents: HashMap<TaskId, HashSet<TaskId>>,
    parked: HashMap<TaskId, QueueEntry>,
}

impl DependencyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `entry` waits on `unmet` and parks it.
    pub fn block(&mut self, entry: QueueEntry, unmet: HashSet<TaskId>) {
        let id = entry.id;
        for dep in &unmet {
            self.dependents.entry(*dep).or_default().insert(id);
        }
        self.unmet.entry(id).or_default().extend(unmet);
        self.parked.insert(id, entry);
    }

    /// Whether `id` is waiting on anything.
    pub fn is_blocked(&self, id: TaskId) -> bool {
        self.unmet.contains_key(&id)
    }

    /// Number of blocked tasks.
    pub fn blocked_count(&self) -> usize {
        self.unmet.len()
    }

    /// Marks `completed` as satisfied, returning dependents that became runnable.
    pub fn resolve(&mut self, completed: TaskId) -> Vec<Unblocked> {
        let Some(waiting) = self.dependents.remove(&completed) else {
            return Vec::new();
        };
        let mut released = Vec::new();
        for id in waiting {
            let now_free = match self.unmet.get_mut(&id) {
                Some(deps) => {
                    deps.remove(&completed);
                    deps.is_empty()
                }
                None => false,
            };
            if now_free {
                self.unmet.remove(&id);
                released.push(Unblocked {
                    id,
                    entry: self.parked.remove(&id),
                });
            }
        }
        released
    }

    /// Drops every edge of `id` as a waiter, e.g. when it is cancelled directly.
    ///
    /// Tasks waiting on `id` are left for [`DependencyTracker::cascade`].
    pub fn forget(&mut self, id: TaskId) {
        if let Some(deps) = self.unmet.remove(&id) {
            for dep in deps {
                if let Some(waiters) = self.dependents.get_mut(&dep) {
                    waiters.remove(&id);
                    if waiters.is_empty() {
                        self.dependents.remove(&dep);
                    }
                }
            }
        }
        self.parked.remove(&id);
    }

    /// Removes `root` and every transitive dependent of it from the graph.
    ///
    /// Returns `(dependent, blocker)` pairs in walk order, where `blocker` is
    /// the task whose failure doomed `dependent`. Each task appears once even
    /// if the input graph contains cycles.
    pub fn cascade(&mut self, root: TaskId) -> Vec<(TaskId, TaskId)> {
        self.forget(root);
        let mut visited = HashSet::from([root]);
        let mut stack = vec![root];
        let mut doomed = Vec::new();

        while let Some(current) = stack.pop() {
            let Some(waiters) = self.dependents.remove(&current) else {
                continue;
            };
            let mut waiters: Vec<TaskId> = waiters.into_iter().collect();
            waiters.sort();
            for dependent in waiters {
                if !visited.insert(dependent) {
                    continue;
                }
                self.forget(dependent);
                doomed.push((dependent, current));
                stack.push(dependent);
            }
        }
        doomed
    }

    /// Whether both adjacency maps agree with each other.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let forward = self
            .unmet
            .iter()
            .all(|(t, deps)| deps.iter().all(|d| self.dependents.get(d).is_some_and(|w| w.contains(t))));
        let backward = self.dependents.iter().all(|(d, waiters)| {
            !waiters.is_empty()
                && waiters
                    .iter()
                    .all(|t| self.unmet.get(t).is_some_and(|u| u.contains(d)))
        });
        forward && backward
    }
}
