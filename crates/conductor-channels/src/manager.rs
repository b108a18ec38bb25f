use crate::notifier::{Notifier, TaskEvent};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};

/// Fans each event out to every registered notifier.
///
/// Usable wherever a single [`Notifier`] is expected; delivery fails only
/// when every member failed.
#[derive(Default)]
pub struct NotifierSet {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a notifier.
    pub fn add(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    /// Names of the registered notifiers, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    /// Number of registered notifiers.
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Whether no notifier is registered.
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Delivers `event` everywhere, returning the individual failures.
    pub async fn broadcast(&self, event: &TaskEvent) -> Vec<ConductorError> {
        let mut errors = Vec::new();
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event).await {
                tracing::warn!(notifier = %notifier.name(), error = %e, "Notification failed");
                errors.push(e);
            }
        }
        errors
    }
}

#[async_trait]
impl Notifier for NotifierSet {
    fn name(&self) -> &str {
        "set"
    }

    async fn notify(&self, event: &TaskEvent) -> ConductorResult<()> {
        let errors = self.broadcast(event).await;
        if !errors.is_empty() && errors.len() == self.notifiers.len() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ConductorError::Channel(format!(
                "all notifiers failed: {joined}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::{RiskLevel, TaskStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    /// Mock notifier that counts deliveries and optionally fails.
    struct MockNotifier {
        name: String,
        fail: bool,
        count: Arc<AtomicUsize>,
    }

    impl MockNotifier {
        fn new(name: &str, fail: bool) -> Self {
            Self {
                name: name.to_string(),
                fail,
                count: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        fn name(&self) -> &str {
            &self.name
        }

        async fn notify(&self, _event: &TaskEvent) -> ConductorResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ConductorError::Channel(format!("{} down", self.name)));
            }
            Ok(())
        }
    }

    fn test_event() -> TaskEvent {
        TaskEvent {
            task_id: Uuid::new_v4(),
            description: "restart worker".into(),
            status: TaskStatus::Failed,
            message: "exit 1".into(),
            risk: RiskLevel::Medium,
            executor: None,
            errors: vec!["exit 1".into()],
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let a = MockNotifier::new("a", false);
        let b = MockNotifier::new("b", true);
        let (ca, cb) = (a.count.clone(), b.count.clone());

        let mut set = NotifierSet::new();
        set.add(Box::new(a));
        set.add(Box::new(b));
        assert_eq!(set.names(), vec!["a", "b"]);

        let errors = set.broadcast(&test_event()).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(ca.load(Ordering::SeqCst), 1);
        assert_eq!(cb.load(Ordering::SeqCst), 1);

        assert!(set.notify(&test_event()).await.is_ok());
    }

    #[tokio::test]
    async fn test_all_failing_is_an_error() {
        let mut set = NotifierSet::new();
        set.add(Box::new(MockNotifier::new("x", true)));
        set.add(Box::new(MockNotifier::new("y", true)));
        let err = set.notify(&test_event()).await.unwrap_err();
        assert!(err.to_string().contains("x down"));
    }

    #[tokio::test]
    async fn test_empty_set_is_fine() {
        let set = NotifierSet::new();
        assert!(set.is_empty());
        assert!(set.notify(&test_event()).await.is_ok());
    }
}
