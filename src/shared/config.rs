use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::shared::error::ConfigError;

/// Default upper bound on a single collection.
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Overrides the detected host name.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_max_timeout", with = "humantime_serde")]
    pub max_timeout: Duration,

    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub user: UserSettings,

    #[serde(default)]
    pub login: LoginSettings,
}

fn default_max_timeout() -> Duration {
    DEFAULT_MAX_TIMEOUT
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_timeout: DEFAULT_MAX_TIMEOUT,
            datasets: Vec::new(),
            output: OutputConfig::default(),
            user: UserSettings::default(),
            login: LoginSettings::default(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Reading config from: {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_timeout.is_zero() {
            return Err(ConfigError::Invalid("max_timeout must be positive".into()));
        }
        for (i, dataset) in self.datasets.iter().enumerate() {
            if self.datasets[..i].iter().any(|d| d.dataset == dataset.dataset) {
                return Err(ConfigError::Invalid(format!(
                    "dataset '{}' is configured more than once",
                    dataset.dataset
                )));
            }
            if dataset.interval.is_some_and(|d| d.is_zero()) {
                return Err(ConfigError::Invalid(format!(
                    "dataset '{}' has a zero interval",
                    dataset.dataset
                )));
            }
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("name must not be blank".into()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub dataset: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
}

fn default_enabled() -> bool {
    true
}

impl DatasetConfig {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            enabled: true,
            interval: None,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputConfig {
    Console {},
    File { path: PathBuf },
    Elasticsearch(ElasticsearchConfig),
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig::Console {}
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_es_host")]
    pub host: String,
    #[serde(default = "default_es_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_es_index")]
    pub index: String,
}

fn default_es_host() -> String {
    String::from("localhost")
}

fn default_es_port() -> u16 {
    9200
}

fn default_es_index() -> String {
    String::from("hostaudit")
}

/// Settings for the `user` dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSettings {
    #[serde(default = "default_passwd_path")]
    pub passwd_path: PathBuf,

    /// How often the full user list is re-sent, regardless of changes.
    #[serde(default = "default_state_period", with = "humantime_serde")]
    pub state_period: Duration,
}

fn default_passwd_path() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_state_period() -> Duration {
    Duration::from_secs(12 * 60 * 60)
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            passwd_path: default_passwd_path(),
            state_period: default_state_period(),
        }
    }
}

/// Settings for the `login` dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginSettings {
    /// Wtmp files to read. `*` and `?` are expanded in the file name only.
    #[serde(default = "default_wtmp_file_pattern")]
    pub wtmp_file_pattern: PathBuf,
}

fn default_wtmp_file_pattern() -> PathBuf {
    PathBuf::from("/var/log/wtmp*")
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            wtmp_file_pattern: default_wtmp_file_pattern(),
        }
    }
}
