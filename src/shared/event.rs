//! Normalized events and the normalizer that wraps raw records into them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::shared::error::NormalizationError;
use crate::shared::record::{fields_to_json, put_dotted, RawRecord};
use crate::shared::registry::CollectorDescriptor;

/// Module name carried by every event this agent emits.
pub const MODULE_NAME: &str = "system";

/// Field paths present on every emitted event.
pub const COMMON_FIELDS: [&str; 5] = [
    "@timestamp",
    "beat.version",
    "host.name",
    "event.module",
    "event.dataset",
];

/// Facts about the agent and its host, detected once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct HostFacts {
    pub host_name: String,
    pub agent_name: String,
    pub agent_version: String,
}

impl HostFacts {
    pub fn detect() -> Self {
        let host_name = Some(whoami::hostname())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| String::from("localhost"));
        Self {
            host_name,
            agent_name: env!("CARGO_PKG_NAME").to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_host_name(mut self, name: impl Into<String>) -> Self {
        self.host_name = name.into();
        self
    }
}

/// A fully enveloped event ready for a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub agent_version: String,
    pub host_name: String,
    pub module: String,
    pub dataset: String,
    pub degraded: bool,
    /// Dataset-specific fields, already expanded into nested objects.
    pub fields: Map<String, Value>,
    /// Fields placed at the document root (e.g. `event.action`).
    pub root: Map<String, Value>,
}

impl Event {
    /// Builds the output document. Common fields are written last so a
    /// collector's root fields can never override them.
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        for (key, value) in &self.root {
            put_dotted(&mut doc, key, value.clone());
        }
        put_dotted(
            &mut doc,
            &format!("{}.{}", self.module, self.dataset),
            Value::Object(self.fields.clone()),
        );
        if self.degraded {
            put_dotted(&mut doc, "event.degraded", Value::Bool(true));
        }
        put_dotted(
            &mut doc,
            "@timestamp",
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        put_dotted(&mut doc, "beat.name", Value::String(self.agent_name.clone()));
        put_dotted(&mut doc, "beat.version", Value::String(self.agent_version.clone()));
        put_dotted(&mut doc, "host.name", Value::String(self.host_name.clone()));
        put_dotted(&mut doc, "event.module", Value::String(self.module.clone()));
        put_dotted(&mut doc, "event.dataset", Value::String(self.dataset.clone()));
        Value::Object(doc)
    }

    /// Looks up a dotted path such as `system.host.os.name` in the output document.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        lookup_path(&self.to_document(), path).cloned()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

/// Walks a dotted path through nested objects. `@timestamp` style keys
/// without dots are looked up directly.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(found) = value.get(path) {
        return Some(found);
    }
    let (head, rest) = path.split_once('.')?;
    lookup_path(value.get(head)?, rest)
}

/// Wraps a raw record into the common envelope.
///
/// Deterministic in its inputs; fails only when the record cannot be
/// represented or a common field would be empty.
pub fn normalize(
    descriptor: &CollectorDescriptor,
    record: RawRecord,
    facts: &HostFacts,
    timestamp: DateTime<Utc>,
    degraded: bool,
) -> Result<Event, NormalizationError> {
    if facts.host_name.is_empty() {
        return Err(NormalizationError::MissingCommonField("host.name"));
    }
    if facts.agent_version.is_empty() {
        return Err(NormalizationError::MissingCommonField("beat.version"));
    }
    if descriptor.name.is_empty() {
        return Err(NormalizationError::MissingCommonField("event.dataset"));
    }

    let prefix = format!("{}.{}", MODULE_NAME, descriptor.name);
    let fields = fields_to_json(record.fields(), &prefix)?;
    let root = fields_to_json(record.root(), "")?;

    Ok(Event {
        timestamp,
        agent_name: facts.agent_name.clone(),
        agent_version: facts.agent_version.clone(),
        host_name: facts.host_name.clone(),
        module: MODULE_NAME.to_string(),
        dataset: descriptor.name.clone(),
        degraded,
        fields,
        root,
    })
}

/// Holds the host facts so the scheduler can normalize without re-detecting.
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    facts: HostFacts,
}

impl EventNormalizer {
    pub fn new(facts: HostFacts) -> Self {
        Self { facts }
    }

    pub fn facts(&self) -> &HostFacts {
        &self.facts
    }

    pub fn normalize(
        &self,
        descriptor: &CollectorDescriptor,
        record: RawRecord,
        timestamp: DateTime<Utc>,
        degraded: bool,
    ) -> Result<Event, NormalizationError> {
        normalize(descriptor, record, &self.facts, timestamp, degraded)
    }
}
