use crate::infrastructure::error::InfraError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const TIMER_JSON: &str = "timer.json";

pub const DEFAULT_STUDY_MINUTES: u32 = 25;
pub const DEFAULT_BREAK_MINUTES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerDefaults {
    pub study_minutes: u32,
    pub break_minutes: u32,
}

impl Default for TimerDefaults {
    fn default() -> Self {
        Self {
            study_minutes: DEFAULT_STUDY_MINUTES,
            break_minutes: DEFAULT_BREAK_MINUTES,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "StudyTrack"
            }),
        ),
        (
            TIMER_JSON,
            serde_json::json!({
                "schema": 1,
                "studyMinutes": DEFAULT_STUDY_MINUTES,
                "breakMinutes": DEFAULT_BREAK_MINUTES
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

/// Reads the configured countdown durations. Malformed or missing values
/// fall back to the defaults; a broken config file must never stop the timer.
pub fn load_timer_defaults(config_dir: &Path) -> TimerDefaults {
    let mut defaults = TimerDefaults::default();
    let Ok(parsed) = read_config(&config_dir.join(TIMER_JSON)) else {
        return defaults;
    };

    if let Some(value) = parsed
        .get("studyMinutes")
        .and_then(serde_json::Value::as_u64)
    {
        defaults.study_minutes = (value as u32).max(1);
    }
    if let Some(value) = parsed
        .get("breakMinutes")
        .and_then(serde_json::Value::as_u64)
    {
        defaults.break_minutes = (value as u32).max(1);
    }

    defaults
}

pub fn save_timer_defaults(config_dir: &Path, defaults: TimerDefaults) -> Result<(), InfraError> {
    let path = config_dir.join(TIMER_JSON);
    let mut parsed = read_config(&path).unwrap_or_else(|_| serde_json::json!({ "schema": 1 }));
    let object = parsed.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert(
        "studyMinutes".to_string(),
        serde_json::json!(defaults.study_minutes.max(1)),
    );
    object.insert(
        "breakMinutes".to_string(),
        serde_json::json!(defaults.break_minutes.max(1)),
    );

    let formatted = serde_json::to_string_pretty(&parsed)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

pub fn read_app_name(config_dir: &Path) -> Result<String, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let name = app
        .get("appName")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("StudyTrack");
    Ok(name.to_string())
}
