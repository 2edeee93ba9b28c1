pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file directly
pub const CONFIG_PATH_ENV: &str = "STACKFLOW_CONFIG_PATH";

const CANDIDATES: [&str; 2] = ["stackflow.local.yaml", "stackflow.yaml"];

/// Locate the StackFlow config file
///
/// Search order:
/// 1. `STACKFLOW_CONFIG_PATH` (direct path)
/// 2. current directory: stackflow.local.yaml, stackflow.yaml
/// 3. `./.stackflow/` in the same order
/// 4. `~/.config/stackflow/config.yaml` (global)
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = current_dir.join(".stackflow");
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("stackflow").join("config.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub volume: VolumeSettings,
    pub retry: RetrySettings,
    pub pagination: PaginationSettings,
    pub launcher: LauncherConfig,
}

/// Retry windows of the polled volume steps, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
    pub available_timeout_secs: u64,
    pub snapshot_complete_timeout_secs: u64,
    pub deleted_timeout_secs: u64,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            available_timeout_secs: 300,
            snapshot_complete_timeout_secs: 300,
            deleted_timeout_secs: 300,
        }
    }
}

impl VolumeSettings {
    pub fn available_timeout(&self) -> Duration {
        Duration::from_secs(self.available_timeout_secs)
    }

    pub fn snapshot_complete_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_complete_timeout_secs)
    }

    pub fn deleted_timeout(&self) -> Duration {
        Duration::from_secs(self.deleted_timeout_secs)
    }
}

/// Backoff between attempts of a not-ready step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    /// Upper bound on pages fetched by one listing
    pub max_pages: usize,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self { max_pages: 100 }
    }
}

/// Worker stack launcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub launcher_id: String,
    pub stack_name: String,
    pub certificate_name: String,
    pub certificate_path: String,
    /// Machine image the worker stack boots from
    pub image: Option<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            launcher_id: "worker-01".to_string(),
            stack_name: "euca-internal-workers".to_string(),
            certificate_name: "euca-internal-workers".to_string(),
            certificate_path: "/euca-internal".to_string(),
            image: None,
        }
    }
}

impl EngineConfig {
    /// Load from the discovered config file, or defaults if there is none
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Ok(path) => Self::load_from(&path),
            Err(ConfigError::ConfigFileNotFound) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Load and validate a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Yaml(source) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty file is a valid, all-defaults config
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("volume.available_timeout_secs", self.volume.available_timeout_secs),
            (
                "volume.snapshot_complete_timeout_secs",
                self.volume.snapshot_complete_timeout_secs,
            ),
            ("volume.deleted_timeout_secs", self.volume.deleted_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }

        if self.pagination.max_pages == 0 {
            return Err(ConfigError::Invalid(
                "pagination.max_pages must be positive".to_string(),
            ));
        }

        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be at least 1.0 (got {})",
                self.retry.multiplier
            )));
        }

        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be below retry.initial_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("stackflow.yaml"), "# test").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with("stackflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("stackflow.yaml"), "# shared").unwrap();
        fs::write(temp_dir.path().join("stackflow.local.yaml"), "# local").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with("stackflow.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let project_dir = temp_dir.path().join(".stackflow");
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("stackflow.yaml"), "# project").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with(".stackflow/stackflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "# custom").unwrap();

        unsafe {
            std::env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        }

        let result = find_config_file();

        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
        }

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.volume.available_timeout(), Duration::from_secs(300));
        assert_eq!(config.retry.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.retry.max_delay(), Duration::from_secs(30));
        assert_eq!(config.pagination.max_pages, 100);
        assert_eq!(config.launcher.launcher_id, "worker-01");
        assert_eq!(config.launcher.certificate_path, "/euca-internal");
        assert!(config.launcher.image.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml(
            "volume:\n  available_timeout_secs: 60\nlauncher:\n  image: emi-1234\n",
        )
        .unwrap();

        assert_eq!(config.volume.available_timeout_secs, 60);
        assert_eq!(config.volume.deleted_timeout_secs, 300);
        assert_eq!(config.retry, RetrySettings::default());
        assert_eq!(config.launcher.image.as_deref(), Some("emi-1234"));
        assert_eq!(config.launcher.launcher_id, "worker-01");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(EngineConfig::from_yaml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_timeout = "volume:\n  deleted_timeout_secs: 0\n";
        assert!(matches!(
            EngineConfig::from_yaml(zero_timeout),
            Err(ConfigError::Invalid(_))
        ));

        let zero_pages = "pagination:\n  max_pages: 0\n";
        assert!(matches!(
            EngineConfig::from_yaml(zero_pages),
            Err(ConfigError::Invalid(_))
        ));

        let shrinking = "retry:\n  multiplier: 0.5\n";
        assert!(matches!(
            EngineConfig::from_yaml(shrinking),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_from_reports_path_on_parse_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stackflow.yaml");
        fs::write(&path, "volume: [not, a, map]\n").unwrap();

        match EngineConfig::load_from(&path) {
            Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
