use crate::day_close::DEFAULT_ROLLOVER_THRESHOLD;
use crate::error::AppError;
use crate::lifecycle::{DEFAULT_WIP_LIMIT, WipLimit};
use crate::storage::BackendPreference;
use crate::summary::{SummaryFormat, SummaryOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::UtcOffset;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "TACT_CONFIG_PATH";
const DATA_DIR_ENV_VAR: &str = "TACT_DATA_DIR";
const APP_DIR_NAME: &str = "tact";

pub const DEFAULT_AVAILABLE_HOURS: f64 = 6.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wip_limit: i64,
    pub rollover_threshold: u32,
    pub summary_format: SummaryFormat,
    pub summary_with_times: bool,
    pub available_hours: f64,
    pub sync: bool,
    pub backend: BackendPreference,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wip_limit: DEFAULT_WIP_LIMIT as i64,
            rollover_threshold: DEFAULT_ROLLOVER_THRESHOLD,
            summary_format: SummaryFormat::Markdown,
            summary_with_times: true,
            available_hours: DEFAULT_AVAILABLE_HOURS,
            sync: true,
            backend: BackendPreference::Auto,
        }
    }
}

impl Config {
    pub fn wip_limit(&self) -> WipLimit {
        WipLimit::new(self.wip_limit)
    }

    pub fn summary_options(&self, offset: UtcOffset) -> SummaryOptions {
        SummaryOptions {
            format: self.summary_format,
            with_times: self.summary_with_times,
            offset,
        }
    }

    /// Time budget in minutes.
    pub fn available_minutes(&self) -> u32 {
        (self.available_hours * 60.0).round() as u32
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConfigOverrides {
    pub wip_limit: Option<i64>,
    pub rollover_threshold: Option<u32>,
    pub summary_format: Option<SummaryFormat>,
    pub summary_with_times: Option<bool>,
    pub available_hours: Option<f64>,
    pub sync: Option<bool>,
    pub backend: Option<BackendPreference>,
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

fn default_config_dir() -> Result<PathBuf, AppError> {
    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata).join(APP_DIR_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home).join(".config").join(APP_DIR_NAME))
    }
}

/// Where the storage files live: `TACT_DATA_DIR`, else the config directory.
pub fn data_dir() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(DATA_DIR_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    let path = config_path()?;
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => default_config_dir(),
    }
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
    let config = serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })?;
    Ok(normalize_config(config))
}

/// Pull every field back into its legal range.
fn normalize_config(mut config: Config) -> Config {
    config.wip_limit = config.wip_limit().get() as i64;
    config.rollover_threshold = config.rollover_threshold.max(1);
    if !config.available_hours.is_finite() || config.available_hours < 0.0 {
        config.available_hours = DEFAULT_AVAILABLE_HOURS;
    }
    config
}

pub fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();
    if let Some(wip_limit) = overrides.wip_limit {
        merged.wip_limit = wip_limit;
    }
    if let Some(threshold) = overrides.rollover_threshold {
        merged.rollover_threshold = threshold;
    }
    if let Some(format) = overrides.summary_format {
        merged.summary_format = format;
    }
    if let Some(with_times) = overrides.summary_with_times {
        merged.summary_with_times = with_times;
    }
    if let Some(hours) = overrides.available_hours {
        merged.available_hours = hours;
    }
    if let Some(sync) = overrides.sync {
        merged.sync = sync;
    }
    if let Some(backend) = overrides.backend {
        merged.backend = backend;
    }

    normalize_config(merged)
}

#[cfg(test)]
mod tests {
    use super::{
        Config, ConfigOverrides, load_config_from_path, load_config_with_fallback_from_path,
        merge_overrides,
    };
    use crate::storage::BackendPreference;
    use crate::summary::SummaryFormat;
    use std::fs;

    #[test]
    fn load_config_missing_returns_defaults_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config_with_fallback_from_path(&dir.path().join("missing.json"));

        assert_eq!(result.config, Config::default());
        assert!(result.error.is_none());
    }

    #[test]
    fn load_config_invalid_returns_defaults_and_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ invalid json ").unwrap();

        let result = load_config_with_fallback_from_path(&path);

        assert_eq!(result.config, Config::default());
        assert_eq!(result.error.unwrap().code(), "invalid_data");
    }

    #[test]
    fn load_config_reads_valid_file_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let content = serde_json::json!({
            "wip_limit": 9,
            "summary_format": "plain",
            "backend": "json",
            "sync": false
        });
        fs::write(&path, serde_json::to_string(&content).unwrap()).unwrap();

        let loaded = load_config_from_path(&path).unwrap();

        assert_eq!(loaded.wip_limit, 5);
        assert_eq!(loaded.summary_format, SummaryFormat::Plain);
        assert_eq!(loaded.backend, BackendPreference::Fallback);
        assert!(!loaded.sync);
        assert_eq!(loaded.rollover_threshold, 3);
        assert!(loaded.summary_with_times);
    }

    #[test]
    fn merge_overrides_replaces_only_given_fields() {
        let base = Config {
            wip_limit: 3,
            ..Config::default()
        };
        let overrides = ConfigOverrides {
            rollover_threshold: Some(5),
            available_hours: Some(4.5),
            ..ConfigOverrides::default()
        };

        let merged = merge_overrides(&base, &overrides);

        assert_eq!(merged.wip_limit, 3);
        assert_eq!(merged.rollover_threshold, 5);
        assert_eq!(merged.available_minutes(), 270);
        assert_eq!(base.rollover_threshold, 3);
    }

    #[test]
    fn merge_overrides_normalizes_out_of_range_values() {
        let overrides = ConfigOverrides {
            wip_limit: Some(0),
            rollover_threshold: Some(0),
            available_hours: Some(-1.0),
            ..ConfigOverrides::default()
        };

        let merged = merge_overrides(&Config::default(), &overrides);

        assert_eq!(merged.wip_limit, 1);
        assert_eq!(merged.rollover_threshold, 1);
        assert_eq!(merged.available_hours, 6.0);
    }

    #[test]
    fn merge_overrides_with_empty_overrides_returns_clone() {
        let base = Config::default();
        assert_eq!(merge_overrides(&base, &ConfigOverrides::default()), base);
    }
}
