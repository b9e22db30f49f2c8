use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::Deserialize;

use crate::engine::EngineOptions;
use crate::error::ConfigError;
use crate::models::Grade;
use crate::trajectory::MatrixWidth;

const DEFAULT_CONFIG_FILE: &str = "trajectory.toml";
const ENV_PREFIX: &str = "TRAJECTORY";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub reports: ReportSettings,
    pub database: DatabaseSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportSettings {
    pub year_start: i32,
    pub year_end: i32,
    pub grades: Vec<Grade>,
    pub output_dir: PathBuf,
    /// Term slots per academic year in period identifiers.
    pub periods_per_year: u32,
    /// Fixed number of offset columns; unset keeps one column per cohort.
    pub lookahead_window: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    pub enabled: bool,
    /// Local wall-clock time, `HH:MM`.
    pub time: String,
}

impl SchedulerSettings {
    pub fn run_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.time, "%H:%M").map_err(|e| {
            ConfigError::Validation(format!("scheduler.time {:?} is not HH:MM: {e}", self.time))
        })
    }
}

impl ReportSettings {
    pub fn engine_options(&self) -> Result<EngineOptions, ConfigError> {
        let width = MatrixWidth::lookahead(self.lookahead_window)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(EngineOptions {
            periods_per_year: self.periods_per_year,
            width,
        })
    }
}

fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Ok(config::Config::builder()
        .set_default("reports.year_start", 2021)?
        .set_default("reports.year_end", 2025)?
        .set_default(
            "reports.grades",
            Grade::ALL.iter().map(Grade::code).collect::<Vec<_>>(),
        )?
        .set_default("reports.output_dir", "reports")?
        .set_default("reports.periods_per_year", 10)?
        .set_default("database.max_connections", 5)?
        .set_default("database.acquire_timeout_secs", 5)?
        .set_default("scheduler.enabled", true)?
        .set_default("scheduler.time", "08:00")?)
}

/// Loads defaults, then the config file (optional unless given explicitly),
/// then `TRAJECTORY__SECTION__KEY` environment overrides.
pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };
    let settings = builder()?
        .add_source(file)
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("reports.grades")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}

pub fn from_toml(source: &str) -> Result<Settings, ConfigError> {
    let settings = builder()?
        .add_source(config::File::from_str(source, config::FileFormat::Toml))
        .build()?
        .try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reports.year_start > self.reports.year_end {
            return Err(ConfigError::Validation(format!(
                "reports.year_start ({}) is after reports.year_end ({})",
                self.reports.year_start, self.reports.year_end
            )));
        }
        if self.reports.grades.is_empty() {
            return Err(ConfigError::Validation("reports.grades is empty".to_string()));
        }
        if self.reports.periods_per_year == 0 {
            return Err(ConfigError::Validation(
                "reports.periods_per_year must be at least 1".to_string(),
            ));
        }
        self.reports.engine_options()?;
        self.scheduler.run_time()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let settings = from_toml("").unwrap();
        assert_eq!(settings.reports.year_start, 2021);
        assert_eq!(settings.reports.year_end, 2025);
        assert_eq!(settings.reports.grades, Grade::ALL.to_vec());
        assert_eq!(settings.reports.periods_per_year, 10);
        assert_eq!(settings.reports.lookahead_window, None);
        assert_eq!(settings.database.max_connections, 5);
        assert!(settings.scheduler.enabled);
        assert_eq!(
            settings.scheduler.run_time().unwrap(),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap()
        );
    }

    #[test]
    fn file_values_override_defaults() {
        let settings = from_toml(
            r#"
            [reports]
            year_start = 2023
            grades = ["ML"]
            lookahead_window = 6

            [scheduler]
            time = "21:30"
            "#,
        )
        .unwrap();
        assert_eq!(settings.reports.year_start, 2023);
        assert_eq!(settings.reports.grades, vec![Grade::Maestria]);
        assert_eq!(
            settings.reports.engine_options().unwrap().width,
            MatrixWidth::Fixed(6)
        );
        assert_eq!(
            settings.scheduler.run_time().unwrap(),
            NaiveTime::from_hms_opt(21, 30, 0).unwrap()
        );
    }

    #[test]
    fn rejects_oversized_lookahead() {
        let err = from_toml("[reports]\nlookahead_window = 9223372036854775807\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("exceeds the maximum")));
        assert!(from_toml("[reports]\nlookahead_window = 200\n").is_ok());
    }

    #[test]
    fn rejects_inverted_year_range() {
        let err = from_toml("[reports]\nyear_start = 2026\nyear_end = 2024\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_zero_lookahead_and_bad_time() {
        assert!(matches!(
            from_toml("[reports]\nlookahead_window = 0\n").unwrap_err(),
            ConfigError::Validation(_)
        ));
        assert!(matches!(
            from_toml("[scheduler]\ntime = \"8am\"\n").unwrap_err(),
            ConfigError::Validation(_)
        ));
        assert!(matches!(
            from_toml("[reports]\nperiods_per_year = 0\n").unwrap_err(),
            ConfigError::Validation(_)
        ));
    }
}
