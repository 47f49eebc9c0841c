use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row of the hosted `progress` table. The backend owns the canonical copy;
/// the controller only ever holds a snapshot of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudyTask {
    pub id: String,
    pub user_id: String,
    pub task: String,
    pub progress: u32,
    pub estimated_tomatoes: u32,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl StudyTask {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.user_id, "task.user_id")?;
        validate_non_empty(&self.task, "task.task")?;
        if self.estimated_tomatoes == 0 {
            return Err("task.estimated_tomatoes must be >= 1".to_string());
        }
        if self.progress > self.estimated_tomatoes {
            return Err("task.progress must be <= task.estimated_tomatoes".to_string());
        }
        Ok(())
    }

    /// Clamps a candidate progress value into `[0, estimated_tomatoes]`.
    pub fn clamped_progress(&self, value: u32) -> u32 {
        value.min(self.estimated_tomatoes)
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= self.estimated_tomatoes
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    Studying,
    Resting,
}

impl TimerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Studying => "studying",
            Self::Resting => "resting",
        }
    }
}

/// Authenticated backend session, stored in the OS credential store between
/// application runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user_id: String,
    pub email: String,
}

impl AuthSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

/// Completed or interrupted countdown interval, logged locally for the
/// focus summary. Never synchronized to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FocusLog {
    pub id: String,
    pub task_id: Option<String>,
    pub mode: TimerMode,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub interruption_reason: Option<String>,
}

impl FocusLog {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "focus_log.id")?;
        if let Some(ended_at) = self.ended_at {
            if ended_at < self.started_at {
                return Err("focus_log.ended_at must be >= focus_log.started_at".to_string());
            }
        }
        Ok(())
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_task() -> StudyTask {
        StudyTask {
            id: "tsk-1".to_string(),
            user_id: "usr-1".to_string(),
            task: "Read chapter 4".to_string(),
            progress: 1,
            estimated_tomatoes: 4,
            is_active: true,
            created_at: fixed_time("2026-03-02T08:00:00Z"),
        }
    }

    fn sample_session() -> AuthSession {
        AuthSession {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: fixed_time("2026-03-02T09:00:00Z"),
            user_id: "usr-1".to_string(),
            email: "student@example.com".to_string(),
        }
    }

    #[test]
    fn task_validate_accepts_valid_task() {
        assert!(sample_task().validate().is_ok());
    }

    #[test]
    fn task_validate_rejects_empty_label() {
        let mut task = sample_task();
        task.task = "   ".to_string();
        assert!(task.validate().is_err());
    }

    #[test]
    fn task_validate_rejects_progress_over_estimate() {
        let mut task = sample_task();
        task.progress = 5;
        assert!(task.validate().is_err());
    }

    #[test]
    fn task_validate_rejects_zero_estimate() {
        let mut task = sample_task();
        task.estimated_tomatoes = 0;
        task.progress = 0;
        assert!(task.validate().is_err());
    }

    #[test]
    fn session_validity_honors_leeway() {
        let session = sample_session();
        let just_before = fixed_time("2026-03-02T08:58:00Z");
        let within_leeway = fixed_time("2026-03-02T08:59:30Z");
        assert!(session.is_valid_at(just_before, 60));
        assert!(!session.is_valid_at(within_leeway, 60));
    }

    #[test]
    fn focus_log_rejects_reverse_interval() {
        let log = FocusLog {
            id: "log-1".to_string(),
            task_id: Some("tsk-1".to_string()),
            mode: TimerMode::Studying,
            started_at: fixed_time("2026-03-02T08:25:00Z"),
            ended_at: Some(fixed_time("2026-03-02T08:00:00Z")),
            interruption_reason: None,
        };
        assert!(log.validate().is_err());
    }

    proptest! {
        #[test]
        fn clamped_progress_never_exceeds_estimate(
            estimate in 1u32..1000u32,
            candidate in 0u32..10_000u32
        ) {
            let mut task = sample_task();
            task.estimated_tomatoes = estimate;
            task.progress = 0;

            let clamped = task.clamped_progress(candidate);
            prop_assert!(clamped <= estimate);
            prop_assert_eq!(clamped, candidate.min(estimate));
        }
    }
}
