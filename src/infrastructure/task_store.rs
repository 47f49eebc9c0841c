use crate::domain::models::StudyTask;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use url::Url;

const PROGRESS_TABLE: &str = "progress";

/// Per-call credentials for the hosted row store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreAuth {
    pub access_token: String,
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub task: String,
    pub estimated_tomatoes: u32,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Lists the user's tasks ordered by creation time ascending.
    async fn list_tasks(&self, auth: &StoreAuth) -> Result<Vec<StudyTask>, InfraError>;

    async fn insert_task(&self, auth: &StoreAuth, fields: NewTask) -> Result<StudyTask, InfraError>;

    /// Writes an absolute progress value. Returns `None` when the row no
    /// longer exists (deleted by another client).
    async fn update_progress(
        &self,
        auth: &StoreAuth,
        task_id: &str,
        new_progress: u32,
    ) -> Result<Option<StudyTask>, InfraError>;

    async fn set_active_flag(
        &self,
        auth: &StoreAuth,
        task_id: &str,
        active: bool,
    ) -> Result<Option<StudyTask>, InfraError>;

    /// Clears the active flag on every task of the user.
    async fn clear_active_flags(&self, auth: &StoreAuth) -> Result<(), InfraError>;

    async fn delete_task(&self, auth: &StoreAuth, task_id: &str) -> Result<bool, InfraError>;
}

/// PostgREST-speaking store client. Rows live in the hosted `progress`
/// table; row-level security scopes them to the authenticated user, and the
/// `user_id` filter is repeated client-side so a misconfigured policy cannot
/// widen a query.
#[derive(Debug, Clone)]
pub struct ReqwestTaskStore {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl ReqwestTaskStore {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            anon_key: anon_key.into(),
        }
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Store(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn store_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return InfraError::SessionExpired;
        }
        let message = if body.trim().is_empty() {
            format!("row store error: http {}", status.as_u16())
        } else {
            format!("row store error: http {}; body={body}", status.as_u16())
        };
        InfraError::Store(message)
    }

    fn table_endpoint(&self) -> Result<Url, InfraError> {
        let mut url = Url::parse(self.base_url.trim())
            .map_err(|error| InfraError::Store(format!("invalid backend base url: {error}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Store("backend base URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.push("rest");
            segments.push("v1");
            segments.push(PROGRESS_TABLE);
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder, auth: &StoreAuth) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&auth.access_token)
    }

    async fn read_rows(
        response: reqwest::Response,
        context: &str,
    ) -> Result<Vec<StudyTask>, InfraError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Store(format!("failed reading {context} response: {error}")))?;

        if !status.is_success() {
            return Err(Self::store_http_error(status, &body));
        }

        let rows = serde_json::from_str::<Vec<StudyTask>>(&body).map_err(|error| {
            InfraError::Store(format!("invalid {context} payload: {error}; body={body}"))
        })?;
        for row in &rows {
            row.validate()
                .map_err(|reason| InfraError::Store(format!("invalid {context} row: {reason}")))?;
        }
        Ok(rows)
    }
}

#[async_trait]
impl TaskStore for ReqwestTaskStore {
    async fn list_tasks(&self, auth: &StoreAuth) -> Result<Vec<StudyTask>, InfraError> {
        Self::ensure_non_empty(&auth.access_token, "access token")?;
        Self::ensure_non_empty(&auth.user_id, "user id")?;

        let mut url = self.table_endpoint()?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("user_id", &format!("eq.{}", auth.user_id))
            .append_pair("order", "created_at.asc");

        let response = self
            .authorize(self.client.get(url), auth)
            .send()
            .await
            .map_err(|error| InfraError::Store(format!("network error while listing tasks: {error}")))?;
        Self::read_rows(response, "task list").await
    }

    async fn insert_task(&self, auth: &StoreAuth, fields: NewTask) -> Result<StudyTask, InfraError> {
        Self::ensure_non_empty(&auth.access_token, "access token")?;
        Self::ensure_non_empty(&auth.user_id, "user id")?;
        Self::ensure_non_empty(&fields.task, "task label")?;

        let url = self.table_endpoint()?;
        let body = serde_json::json!([{
            "task": fields.task.trim(),
            "user_id": auth.user_id,
            "progress": 0,
            "estimated_tomatoes": fields.estimated_tomatoes.max(1),
            "is_active": false,
        }]);

        let response = self
            .authorize(self.client.post(url), auth)
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .map_err(|error| InfraError::Store(format!("network error while inserting task: {error}")))?;

        let mut rows = Self::read_rows(response, "task insert").await?;
        if rows.is_empty() {
            return Err(InfraError::Store(
                "task insert returned no representation".to_string(),
            ));
        }
        Ok(rows.remove(0))
    }

    async fn update_progress(
        &self,
        auth: &StoreAuth,
        task_id: &str,
        new_progress: u32,
    ) -> Result<Option<StudyTask>, InfraError> {
        Self::ensure_non_empty(&auth.access_token, "access token")?;
        Self::ensure_non_empty(task_id, "task id")?;

        let mut url = self.table_endpoint()?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{task_id}"))
            .append_pair("user_id", &format!("eq.{}", auth.user_id));

        let response = self
            .authorize(self.client.patch(url), auth)
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "progress": new_progress }))
            .send()
            .await
            .map_err(|error| {
                InfraError::Store(format!("network error while updating progress: {error}"))
            })?;

        let mut rows = Self::read_rows(response, "progress update").await?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows.remove(0)))
    }

    async fn set_active_flag(
        &self,
        auth: &StoreAuth,
        task_id: &str,
        active: bool,
    ) -> Result<Option<StudyTask>, InfraError> {
        Self::ensure_non_empty(&auth.access_token, "access token")?;
        Self::ensure_non_empty(task_id, "task id")?;

        let mut url = self.table_endpoint()?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{task_id}"))
            .append_pair("user_id", &format!("eq.{}", auth.user_id));

        let response = self
            .authorize(self.client.patch(url), auth)
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "is_active": active }))
            .send()
            .await
            .map_err(|error| {
                InfraError::Store(format!("network error while setting active flag: {error}"))
            })?;

        let mut rows = Self::read_rows(response, "active flag update").await?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows.remove(0)))
    }

    async fn clear_active_flags(&self, auth: &StoreAuth) -> Result<(), InfraError> {
        Self::ensure_non_empty(&auth.access_token, "access token")?;
        Self::ensure_non_empty(&auth.user_id, "user id")?;

        let mut url = self.table_endpoint()?;
        url.query_pairs_mut()
            .append_pair("user_id", &format!("eq.{}", auth.user_id))
            .append_pair("is_active", "eq.true");

        let response = self
            .authorize(self.client.patch(url), auth)
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "is_active": false }))
            .send()
            .await
            .map_err(|error| {
                InfraError::Store(format!("network error while clearing active flags: {error}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Store(format!("failed reading active clear response: {error}")))?;
        if !status.is_success() {
            return Err(Self::store_http_error(status, &body));
        }
        Ok(())
    }

    async fn delete_task(&self, auth: &StoreAuth, task_id: &str) -> Result<bool, InfraError> {
        Self::ensure_non_empty(&auth.access_token, "access token")?;
        Self::ensure_non_empty(task_id, "task id")?;

        let mut url = self.table_endpoint()?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{task_id}"))
            .append_pair("user_id", &format!("eq.{}", auth.user_id));

        let response = self
            .authorize(self.client.delete(url), auth)
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|error| InfraError::Store(format!("network error while deleting task: {error}")))?;

        let rows = Self::read_rows(response, "task delete").await?;
        Ok(!rows.is_empty())
    }
}

/// In-memory store used by the test suites and by the controller tests.
/// Creation timestamps are deterministic so ordering assertions are stable.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, StudyTask>>,
    next_sequence: AtomicU64,
}

impl InMemoryTaskStore {
    fn lock_tasks(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StudyTask>>, InfraError> {
        self.tasks
            .lock()
            .map_err(|error| InfraError::Store(format!("task store lock poisoned: {error}")))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn list_tasks(&self, auth: &StoreAuth) -> Result<Vec<StudyTask>, InfraError> {
        let tasks = self.lock_tasks()?;
        let mut rows = tasks
            .values()
            .filter(|task| task.user_id == auth.user_id)
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(rows)
    }

    async fn insert_task(&self, auth: &StoreAuth, fields: NewTask) -> Result<StudyTask, InfraError> {
        let label = fields.task.trim();
        if label.is_empty() {
            return Err(InfraError::Store("task label must not be empty".to_string()));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let base = Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .expect("valid fixed base time");
        let task = StudyTask {
            id: format!("mem-{sequence}"),
            user_id: auth.user_id.clone(),
            task: label.to_string(),
            progress: 0,
            estimated_tomatoes: fields.estimated_tomatoes.max(1),
            is_active: false,
            created_at: base + Duration::seconds(sequence as i64),
        };

        let mut tasks = self.lock_tasks()?;
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn update_progress(
        &self,
        auth: &StoreAuth,
        task_id: &str,
        new_progress: u32,
    ) -> Result<Option<StudyTask>, InfraError> {
        let mut tasks = self.lock_tasks()?;
        let Some(task) = tasks
            .get_mut(task_id)
            .filter(|task| task.user_id == auth.user_id)
        else {
            return Ok(None);
        };
        task.progress = new_progress;
        Ok(Some(task.clone()))
    }

    async fn set_active_flag(
        &self,
        auth: &StoreAuth,
        task_id: &str,
        active: bool,
    ) -> Result<Option<StudyTask>, InfraError> {
        let mut tasks = self.lock_tasks()?;
        let Some(task) = tasks
            .get_mut(task_id)
            .filter(|task| task.user_id == auth.user_id)
        else {
            return Ok(None);
        };
        task.is_active = active;
        Ok(Some(task.clone()))
    }

    async fn clear_active_flags(&self, auth: &StoreAuth) -> Result<(), InfraError> {
        let mut tasks = self.lock_tasks()?;
        for task in tasks.values_mut() {
            if task.user_id == auth.user_id {
                task.is_active = false;
            }
        }
        Ok(())
    }

    async fn delete_task(&self, auth: &StoreAuth, task_id: &str) -> Result<bool, InfraError> {
        let mut tasks = self.lock_tasks()?;
        let existed = tasks
            .get(task_id)
            .map(|task| task.user_id == auth.user_id)
            .unwrap_or(false);
        if existed {
            tasks.remove(task_id);
        }
        Ok(existed)
    }
}
