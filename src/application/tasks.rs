use crate::domain::models::StudyTask;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::task_store::{NewTask, StoreAuth, TaskStore};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u64 << attempt.min(6);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier))
    }
}

fn is_transient(error: &InfraError) -> bool {
    matches!(error, InfraError::Store(_) | InfraError::Io(_))
}

/// Task list operations on top of the remote store. Mutations re-read the
/// affected row through the store's returned representation, so callers
/// always see the server's view of the task.
pub struct TaskService<S>
where
    S: TaskStore,
{
    store: Arc<S>,
    retry_policy: RetryPolicy,
}

impl<S> TaskService<S>
where
    S: TaskStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub async fn list_tasks(&self, auth: &StoreAuth) -> Result<Vec<StudyTask>, InfraError> {
        self.with_retries(|| self.store.list_tasks(auth)).await
    }

    pub async fn create_task(
        &self,
        auth: &StoreAuth,
        task: &str,
        estimated_tomatoes: u32,
    ) -> Result<StudyTask, InfraError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(InfraError::Store("task name must not be empty".to_string()));
        }
        if estimated_tomatoes == 0 {
            return Err(InfraError::Store(
                "estimated tomatoes must be at least 1".to_string(),
            ));
        }

        let fields = NewTask {
            task: task.to_string(),
            estimated_tomatoes,
        };
        self.with_retries(|| self.store.insert_task(auth, fields.clone()))
            .await
    }

    /// Writes an absolute progress value, clamped to the task's estimate.
    /// Returns `None` when the row no longer exists on the server.
    pub async fn set_progress(
        &self,
        auth: &StoreAuth,
        task_id: &str,
        progress: u32,
    ) -> Result<Option<StudyTask>, InfraError> {
        let tasks = self.list_tasks(auth).await?;
        let Some(current) = tasks.iter().find(|task| task.id == task_id) else {
            return Ok(None);
        };

        let clamped = current.clamped_progress(progress);
        self.with_retries(|| self.store.update_progress(auth, task_id, clamped))
            .await
    }

    /// Writes an already-clamped absolute progress value without re-reading
    /// the list first. Used by the timer's completion path, which clamps
    /// against its own task snapshot.
    pub async fn write_progress(
        &self,
        auth: &StoreAuth,
        task_id: &str,
        progress: u32,
    ) -> Result<Option<StudyTask>, InfraError> {
        self.with_retries(|| self.store.update_progress(auth, task_id, progress))
            .await
    }

    /// Makes `task_id` the only active task. The clear and the set are two
    /// separate writes; a crash in between leaves no task active, which the
    /// next activation repairs.
    pub async fn set_active_task(
        &self,
        auth: &StoreAuth,
        task_id: &str,
    ) -> Result<Option<StudyTask>, InfraError> {
        self.with_retries(|| self.store.clear_active_flags(auth))
            .await?;
        self.with_retries(|| self.store.set_active_flag(auth, task_id, true))
            .await
    }

    pub async fn exit_active_task(&self, auth: &StoreAuth) -> Result<(), InfraError> {
        self.with_retries(|| self.store.clear_active_flags(auth))
            .await
    }

    pub async fn delete_task(&self, auth: &StoreAuth, task_id: &str) -> Result<bool, InfraError> {
        self.with_retries(|| self.store.delete_task(auth, task_id))
            .await
    }

    pub async fn read_active_task(
        &self,
        auth: &StoreAuth,
    ) -> Result<Option<StudyTask>, InfraError> {
        let tasks = self.list_tasks(auth).await?;
        Ok(tasks.into_iter().find(|task| task.is_active))
    }

    async fn with_retries<T, F, Fut>(&self, operation: F) -> Result<T, InfraError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, InfraError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if is_transient(&error) && attempt + 1 < self.retry_policy.max_attempts => {
                    tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
