//! Shard health signalling

use tokio::sync::watch;
use tracing::error;

use crate::error::FatalCondition;

/// One-shot fatal condition latch shared by the pump and its workers
///
/// The first condition raised wins; later ones are logged by the caller's
/// error path but never replace it.
pub(crate) struct HealthSignal {
    shard_id: u32,
    tx: watch::Sender<Option<FatalCondition>>,
}

impl HealthSignal {
    pub(crate) fn new(shard_id: u32) -> Self {
        let (tx, _) = watch::channel(None);
        Self { shard_id, tx }
    }

    /// Raise a fatal condition; returns `false` if one was already raised
    pub(crate) fn raise(&self, condition: FatalCondition) -> bool {
        let task_id = condition.task_id();
        let message = condition.to_string();

        let raised = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(condition);
            true
        });

        if raised {
            error!(
                shard_id = self.shard_id,
                task_id,
                condition = %message,
                "Transfer queue processor hit a fatal condition, shard is unhealthy"
            );
        }
        raised
    }

    pub(crate) fn current(&self) -> Option<FatalCondition> {
        self.tx.borrow().clone()
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<FatalCondition>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exhausted(task_id: i64) -> FatalCondition {
        FatalCondition::RetryExhausted {
            task_id,
            attempts: 10,
            last_error: "down".into(),
        }
    }

    #[test]
    fn test_first_condition_wins() {
        let health = HealthSignal::new(1);
        assert!(!health.is_raised());

        assert!(health.raise(exhausted(4)));
        assert!(!health.raise(exhausted(9)));

        assert_eq!(health.current().unwrap().task_id(), 4);
    }

    #[tokio::test]
    async fn test_subscribers_are_notified_once() {
        let health = HealthSignal::new(1);
        let mut rx = health.subscribe();

        health.raise(exhausted(4));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().task_id(), 4);

        health.raise(exhausted(5));
        assert!(!rx.has_changed().unwrap());
    }
}
