use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration failed: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("Collection failed: {0}")]
    Collection(#[from] CollectionError),

    #[error("Output failed: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse data: {0}")]
    Parse(String),

    #[error("System API error: {0}")]
    SystemApi(String),

    #[error("Collection exceeded its deadline")]
    Timeout,

    #[error("Collection cancelled")]
    Cancelled,

    #[error("Not supported on this platform: {0}")]
    Unsupported(String),
}

impl CollectionError {
    /// Cancellation happens during shutdown and is not reported as a fault.
    pub fn is_fault(&self) -> bool {
        !matches!(self, CollectionError::Cancelled)
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Dataset '{0}' is already registered")]
    DuplicateDataset(String),

    #[error("Unknown dataset '{0}'")]
    UnknownDataset(String),

    #[error("Invalid dataset name '{0}'")]
    InvalidName(String),

    #[error("Failed to create collector for '{dataset}': {source}")]
    Factory {
        dataset: String,
        #[source]
        source: CollectionError,
    },
}

#[derive(Error, Debug, PartialEq)]
pub enum NormalizationError {
    #[error("Field '{0}' holds a non-finite float")]
    NonFiniteFloat(String),

    #[error("Record contains an empty field name")]
    EmptyKey,

    #[error("Common field '{0}' is empty")]
    MissingCommonField(&'static str),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Write operation failed: {0}")]
    Write(String),

    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        SinkError::Write(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
