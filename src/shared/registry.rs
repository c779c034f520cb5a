//! Dataset name → collector factory mapping.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{info, warn};
use regex::Regex;

use crate::shared::config::DatasetConfig;
use crate::shared::error::{CollectionError, RegistryError};
use crate::shared::traits::DataCollector;

/// Intervals shorter than this are clamped.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Static facts about a dataset. Immutable once the registry is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorDescriptor {
    pub name: String,
    pub interval: Duration,
    pub privilege_required: bool,
    pub enabled: bool,
    pub experimental: bool,
}

impl CollectorDescriptor {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            privilege_required: false,
            enabled: true,
            experimental: false,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privilege_required = true;
        self
    }

    pub fn experimental(mut self) -> Self {
        self.experimental = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

pub type CollectorFactory =
    Arc<dyn Fn() -> Result<Box<dyn DataCollector>, CollectionError> + Send + Sync>;

struct Entry {
    descriptor: Arc<CollectorDescriptor>,
    factory: CollectorFactory,
}

fn dataset_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid dataset name pattern"))
}

/// Registry of datasets in registration order.
#[derive(Default)]
pub struct CollectorRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field(
                "datasets",
                &self.entries.iter().map(|e| e.descriptor.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in dataset at its default settings.
    pub fn with_defaults() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        crate::features::register_builtin(&mut registry, &Default::default())?;
        Ok(registry)
    }

    pub fn register<F>(&mut self, descriptor: CollectorDescriptor, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Result<Box<dyn DataCollector>, CollectionError> + Send + Sync + 'static,
    {
        if !dataset_name_pattern().is_match(&descriptor.name) {
            return Err(RegistryError::InvalidName(descriptor.name));
        }
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateDataset(descriptor.name));
        }

        let mut descriptor = descriptor;
        if descriptor.interval < MIN_INTERVAL {
            warn!(
                "Interval {:?} for dataset {} is below the minimum, using {:?}",
                descriptor.interval, descriptor.name, MIN_INTERVAL
            );
            descriptor.interval = MIN_INTERVAL;
        }
        if descriptor.experimental {
            warn!("The {}/{} dataset is experimental", crate::shared::event::MODULE_NAME, descriptor.name);
        }
        info!(
            "Registered dataset {} (interval {:?}, enabled {})",
            descriptor.name, descriptor.interval, descriptor.enabled
        );

        self.index.insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(Entry {
            descriptor: Arc::new(descriptor),
            factory: Arc::new(factory),
        });
        Ok(())
    }

    /// Creates a fresh collector instance for the dataset.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn DataCollector>, RegistryError> {
        let entry = self.entry(name)?;
        (entry.factory)().map_err(|source| RegistryError::Factory {
            dataset: name.to_string(),
            source,
        })
    }

    pub(crate) fn factory(&self, name: &str) -> Result<CollectorFactory, RegistryError> {
        self.entry(name).map(|e| Arc::clone(&e.factory))
    }

    pub fn descriptor(&self, name: &str) -> Result<Arc<CollectorDescriptor>, RegistryError> {
        self.entry(name).map(|e| Arc::clone(&e.descriptor))
    }

    /// Enabled datasets, in registration order.
    pub fn enabled_descriptors(&self) -> Vec<Arc<CollectorDescriptor>> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.enabled)
            .map(|e| Arc::clone(&e.descriptor))
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.descriptor.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies per-dataset settings. Datasets listed in `configs` take their
    /// `enabled` and `interval` from it; unlisted datasets are disabled when
    /// the list is non-empty.
    pub fn apply_config(&mut self, configs: &[DatasetConfig]) -> Result<(), RegistryError> {
        if configs.is_empty() {
            return Ok(());
        }
        for config in configs {
            self.entry(&config.dataset)?;
        }
        for entry in &mut self.entries {
            let mut descriptor = (*entry.descriptor).clone();
            match configs.iter().find(|c| c.dataset == descriptor.name) {
                Some(config) => {
                    descriptor.enabled = config.enabled;
                    if let Some(interval) = config.interval {
                        if interval < MIN_INTERVAL {
                            warn!(
                                "Interval {:?} for dataset {} is below the minimum, using {:?}",
                                interval, descriptor.name, MIN_INTERVAL
                            );
                        }
                        descriptor.interval = interval.max(MIN_INTERVAL);
                    }
                }
                None => descriptor.enabled = false,
            }
            entry.descriptor = Arc::new(descriptor);
        }
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<&Entry, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| RegistryError::UnknownDataset(name.to_string()))
    }
}
