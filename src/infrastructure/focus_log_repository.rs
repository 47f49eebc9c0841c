use crate::domain::models::{FocusLog, TimerMode};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait FocusLogRepository: Send + Sync {
    fn append(&self, log: &FocusLog) -> Result<(), InfraError>;
    fn list_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FocusLog>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteFocusLogRepository {
    db_path: PathBuf,
}

impl SqliteFocusLogRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

fn mode_to_string(mode: TimerMode) -> &'static str {
    mode.as_str()
}

fn mode_from_string(value: &str) -> Result<TimerMode, InfraError> {
    match value {
        "studying" => Ok(TimerMode::Studying),
        "resting" => Ok(TimerMode::Resting),
        other => Err(InfraError::InvalidConfig(format!(
            "invalid focus_logs.mode '{other}'"
        ))),
    }
}

fn parse_stored_time(raw: &str, column: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            InfraError::InvalidConfig(format!("invalid focus_logs.{column} '{raw}': {error}"))
        })
}

impl FocusLogRepository for SqliteFocusLogRepository {
    fn append(&self, log: &FocusLog) -> Result<(), InfraError> {
        log.validate().map_err(InfraError::InvalidConfig)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO focus_logs (id, task_id, mode, started_at, ended_at, interruption_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
               task_id = excluded.task_id,
               mode = excluded.mode,
               started_at = excluded.started_at,
               ended_at = excluded.ended_at,
               interruption_reason = excluded.interruption_reason",
            params![
                log.id,
                log.task_id,
                mode_to_string(log.mode),
                log.started_at.to_rfc3339(),
                log.ended_at.map(|value| value.to_rfc3339()),
                log.interruption_reason,
            ],
        )?;
        Ok(())
    }

    fn list_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FocusLog>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT id, task_id, mode, started_at, ended_at, interruption_reason
             FROM focus_logs
             WHERE started_at >= ?1 AND started_at <= ?2
             ORDER BY started_at ASC",
        )?;

        let rows = statement.query_map(
            params![start.to_rfc3339(), end.to_rfc3339()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )?;

        let mut logs = Vec::new();
        for row in rows {
            let (id, task_id, mode_raw, started_raw, ended_raw, interruption_reason) = row?;
            logs.push(FocusLog {
                id,
                task_id,
                mode: mode_from_string(&mode_raw)?,
                started_at: parse_stored_time(&started_raw, "started_at")?,
                ended_at: ended_raw
                    .map(|raw| parse_stored_time(&raw, "ended_at"))
                    .transpose()?,
                interruption_reason,
            });
        }
        Ok(logs)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFocusLogRepository {
    logs: Mutex<Vec<FocusLog>>,
}

impl FocusLogRepository for InMemoryFocusLogRepository {
    fn append(&self, log: &FocusLog) -> Result<(), InfraError> {
        log.validate().map_err(InfraError::InvalidConfig)?;
        let mut logs = self
            .logs
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("focus log lock poisoned: {error}")))?;
        logs.retain(|candidate| candidate.id != log.id);
        logs.push(log.clone());
        Ok(())
    }

    fn list_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FocusLog>, InfraError> {
        let logs = self
            .logs
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("focus log lock poisoned: {error}")))?;
        let mut selected = logs
            .iter()
            .filter(|log| log.started_at >= start && log.started_at <= end)
            .cloned()
            .collect::<Vec<_>>();
        selected.sort_by(|left, right| left.started_at.cmp(&right.started_at));
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDatabase {
        path: PathBuf,
    }

    impl TempDatabase {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "studytrack-focuslog-tests-{}-{}.sqlite",
                std::process::id(),
                sequence
            ));
            initialize_database(&path).expect("initialize database");
            Self { path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_log(id: &str, started_at: &str) -> FocusLog {
        FocusLog {
            id: id.to_string(),
            task_id: Some("tsk-1".to_string()),
            mode: TimerMode::Studying,
            started_at: fixed_time(started_at),
            ended_at: Some(fixed_time(started_at) + chrono::Duration::minutes(25)),
            interruption_reason: None,
        }
    }

    #[test]
    fn sqlite_repository_round_trips_logs() {
        let database = TempDatabase::new();
        let repository = SqliteFocusLogRepository::new(&database.path);

        repository
            .append(&sample_log("log-1", "2026-03-02T09:00:00Z"))
            .expect("append first");
        repository
            .append(&sample_log("log-2", "2026-03-02T10:00:00Z"))
            .expect("append second");

        let listed = repository
            .list_between(
                fixed_time("2026-03-02T00:00:00Z"),
                fixed_time("2026-03-03T00:00:00Z"),
            )
            .expect("list logs");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "log-1");
        assert_eq!(listed[1].id, "log-2");
        assert_eq!(listed[0].mode, TimerMode::Studying);
    }

    #[test]
    fn sqlite_repository_filters_by_window() {
        let database = TempDatabase::new();
        let repository = SqliteFocusLogRepository::new(&database.path);
        repository
            .append(&sample_log("log-1", "2026-03-01T09:00:00Z"))
            .expect("append outside");
        repository
            .append(&sample_log("log-2", "2026-03-02T09:00:00Z"))
            .expect("append inside");

        let listed = repository
            .list_between(
                fixed_time("2026-03-02T00:00:00Z"),
                fixed_time("2026-03-03T00:00:00Z"),
            )
            .expect("list logs");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "log-2");
    }

    #[test]
    fn append_rejects_invalid_log() {
        let repository = InMemoryFocusLogRepository::default();
        let mut log = sample_log("log-1", "2026-03-02T09:00:00Z");
        log.ended_at = Some(fixed_time("2026-03-02T08:00:00Z"));
        assert!(repository.append(&log).is_err());
    }

    #[test]
    fn in_memory_repository_replaces_on_same_id() {
        let repository = InMemoryFocusLogRepository::default();
        let mut log = sample_log("log-1", "2026-03-02T09:00:00Z");
        repository.append(&log).expect("append");
        log.interruption_reason = Some("paused".to_string());
        repository.append(&log).expect("replace");

        let listed = repository
            .list_between(
                fixed_time("2026-03-02T00:00:00Z"),
                fixed_time("2026-03-03T00:00:00Z"),
            )
            .expect("list logs");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].interruption_reason.as_deref(), Some("paused"));
    }
}
