use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use file_relay_core::RelayError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::AbortHandle;
use ulid::Ulid;

/// Upload notices are removed this long after they arrive.
pub const NOTICE_TTL: Duration = Duration::from_secs(60);

/// Delivered copies are removed this long after they are sent.
pub const DELIVERED_TTL: Duration = Duration::from_secs(5_400);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Delete,
}

/// Message the transport can address later, independent of how it deletes it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct DeliveryTarget {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ScheduledAction {
    pub id: Ulid,
    pub action: ActionKind,
    pub target: DeliveryTarget,
    #[serde(with = "time::serde::rfc3339")]
    pub fire_at: OffsetDateTime,
}

/// Transport capability used when a delete action fires.
#[async_trait]
pub trait MessageDeleter: Send + Sync {
    async fn delete_message(&self, target: &DeliveryTarget) -> Result<(), RelayError>;
}

/// One-shot delayed actions on the tokio runtime.
///
/// Actions are fire-and-forget: a failing or panicking action is logged and never
/// reaches the caller or other pending actions. Nothing is persisted.
#[derive(Clone)]
pub struct DelayedActionScheduler {
    deleter: Arc<dyn MessageDeleter>,
    pending: Arc<Mutex<HashMap<Ulid, AbortHandle>>>,
}

impl DelayedActionScheduler {
    #[must_use]
    pub fn new(deleter: Arc<dyn MessageDeleter>) -> Self {
        Self { deleter, pending: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register `action` against `target`, firing once after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_once(
        &self,
        delay: Duration,
        target: DeliveryTarget,
        action: ActionKind,
    ) -> ScheduledAction {
        let scheduled = ScheduledAction {
            id: Ulid::new(),
            action,
            target,
            fire_at: OffsetDateTime::now_utc() + delay,
        };

        let job = scheduled.clone();
        let deleter = Arc::clone(&self.deleter);
        let pending = Arc::clone(&self.pending);

        // Held across spawn so the task cannot deregister before it is registered.
        let mut registry = self.pending.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run_action(deleter, &job).await;
            pending.lock().remove(&job.id);
        });
        registry.insert(scheduled.id, task.abort_handle());
        drop(registry);

        tracing::debug!(
            action_id = %scheduled.id,
            chat_id = scheduled.target.chat_id,
            message_id = scheduled.target.message_id,
            delay_secs = delay.as_secs(),
            "scheduled delayed action"
        );
        scheduled
    }

    /// Drop a pending action. Returns `false` when it already fired or never existed.
    pub fn cancel(&self, id: Ulid) -> bool {
        match self.pending.lock().remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

async fn run_action(deleter: Arc<dyn MessageDeleter>, job: &ScheduledAction) {
    let target = job.target.clone();
    let outcome = match job.action {
        ActionKind::Delete => {
            tokio::spawn(async move { deleter.delete_message(&target).await }).await
        }
    };

    match outcome {
        Ok(Ok(())) => tracing::info!(
            action_id = %job.id,
            chat_id = job.target.chat_id,
            message_id = job.target.message_id,
            "delayed action fired"
        ),
        Ok(Err(err)) => tracing::warn!(
            action_id = %job.id,
            chat_id = job.target.chat_id,
            message_id = job.target.message_id,
            error = %err,
            "delayed action failed"
        ),
        Err(err) => tracing::error!(
            action_id = %job.id,
            error = %err,
            "delayed action aborted"
        ),
    }
}
