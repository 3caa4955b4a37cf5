use serde::{Deserialize, Serialize};
use std::path::Path;

/// Env (`REHBER_*`) overrides `rehber.toml`, which overrides the defaults.
pub const CONFIG_FILE_NAME: &str = "rehber.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    ReadFailed { path: String, message: String },

    #[error("invalid TOML in {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("invalid value for {field}: {message}")]
    ValidationFailed { field: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub lesson_minutes: i64,
    pub break_minutes: i64,
    pub default_topic_minutes: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            lesson_minutes: 45,
            break_minutes: 15,
            default_topic_minutes: 45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Overall progress (percent) below which a student is listed as at risk.
    pub progress_threshold: f64,
    pub min_training_students: usize,
    pub test_ratio: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            progress_threshold: 25.0,
            min_training_students: 10,
            test_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitiesConfig {
    pub upcoming_days: i64,
}

impl Default for ActivitiesConfig {
    fn default() -> Self {
        Self { upcoming_days: 7 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RehberConfig {
    pub schedule: ScheduleConfig,
    pub risk: RiskConfig,
    pub activities: ActivitiesConfig,
}

impl RehberConfig {
    pub fn load(workspace: &Path) -> Result<Self, ConfigError> {
        let path = workspace.join(CONFIG_FILE_NAME);
        let mut config = if path.is_file() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFailed {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            path: "<string>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Unparseable values are ignored and leave the file/default value in place.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("REHBER_LESSON_MINUTES").and_then(|s| s.trim().parse().ok()) {
            self.schedule.lesson_minutes = v;
        }
        if let Some(v) = lookup("REHBER_BREAK_MINUTES").and_then(|s| s.trim().parse().ok()) {
            self.schedule.break_minutes = v;
        }
        if let Some(v) = lookup("REHBER_RISK_THRESHOLD").and_then(|s| s.trim().parse().ok()) {
            self.risk.progress_threshold = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.lesson_minutes <= 0 {
            return Err(invalid("schedule.lesson_minutes", "must be greater than 0"));
        }
        if self.schedule.break_minutes < 0 {
            return Err(invalid("schedule.break_minutes", "must not be negative"));
        }
        if self.schedule.default_topic_minutes <= 0 {
            return Err(invalid(
                "schedule.default_topic_minutes",
                "must be greater than 0",
            ));
        }
        if !(0.0..=100.0).contains(&self.risk.progress_threshold) {
            return Err(invalid(
                "risk.progress_threshold",
                "must be between 0 and 100",
            ));
        }
        if self.risk.min_training_students < 2 {
            return Err(invalid("risk.min_training_students", "must be at least 2"));
        }
        if !(self.risk.test_ratio > 0.0 && self.risk.test_ratio < 1.0) {
            return Err(invalid("risk.test_ratio", "must be between 0 and 1"));
        }
        if self.activities.upcoming_days < 0 {
            return Err(invalid("activities.upcoming_days", "must not be negative"));
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "schedule": {
                "lessonMinutes": self.schedule.lesson_minutes,
                "breakMinutes": self.schedule.break_minutes,
                "defaultTopicMinutes": self.schedule.default_topic_minutes,
            },
            "risk": {
                "progressThreshold": self.risk.progress_threshold,
                "minTrainingStudents": self.risk.min_training_students,
                "testRatio": self.risk.test_ratio,
            },
            "activities": {
                "upcomingDays": self.activities.upcoming_days,
            }
        })
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::ValidationFailed {
        field: field.to_string(),
        message: message.to_string(),
    }
}
