//! Consumers of normalized events.
//!
//! A sink acknowledges or fails a whole batch. Delivery is at most once:
//! the scheduler logs a failed batch and moves on.

mod elasticsearch;

pub use self::elasticsearch::ElasticsearchSink;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use crate::shared::config::OutputConfig;
use crate::shared::error::SinkError;
use crate::shared::event::Event;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, events: Vec<Event>) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}

/// Builds the sink selected in the configuration.
pub async fn from_config(config: &OutputConfig) -> Result<Arc<dyn EventSink>, SinkError> {
    Ok(match config {
        OutputConfig::Console {} => Arc::new(ConsoleSink::new()),
        OutputConfig::File { path } => Arc::new(FileSink::open(path).await?),
        OutputConfig::Elasticsearch(es) => Arc::new(ElasticsearchSink::new(
            &es.host,
            es.port,
            es.username.as_deref(),
            es.password.as_deref(),
            &es.index,
        )?),
    })
}

fn to_ndjson(events: &[Event]) -> Result<Vec<u8>, SinkError> {
    let mut buf = Vec::with_capacity(events.len() * 512);
    for event in events {
        serde_json::to_writer(&mut buf, event)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Appends events as newline-delimited JSON.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SinkError::Connection(format!("{}: {}", path.display(), e)))?;
        info!("Writing events to {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSink for FileSink {
    async fn publish(&self, events: Vec<Event>) -> Result<(), SinkError> {
        if events.is_empty() {
            return Ok(());
        }
        let buf = to_ndjson(&events)?;
        let mut file = self.file.lock().await;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Writes events as newline-delimited JSON to stdout.
pub struct ConsoleSink {
    out: Mutex<Stdout>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for ConsoleSink {
    async fn publish(&self, events: Vec<Event>) -> Result<(), SinkError> {
        let buf = to_ndjson(&events)?;
        let mut out = self.out.lock().await;
        out.write_all(&buf).await?;
        out.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

/// Keeps events in memory; used when embedding the agent and in tests.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn events_for(&self, dataset: &str) -> Vec<Event> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.dataset == dataset)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, events: Vec<Event>) -> Result<(), SinkError> {
        self.events.lock().await.extend(events);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::event::{normalize, HostFacts};
    use crate::shared::record::RawRecord;
    use crate::shared::registry::CollectorDescriptor;
    use chrono::Utc;
    use std::time::Duration;

    fn event(dataset: &str) -> Event {
        let facts = HostFacts {
            host_name: "test-host".into(),
            agent_name: "hostaudit".into(),
            agent_version: "0.1.0".into(),
        };
        normalize(
            &CollectorDescriptor::new(dataset, Duration::from_secs(1)),
            RawRecord::new().with("value", 1i64),
            &facts,
            Utc::now(),
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn file_sink_appends_ndjson_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("events.ndjson");
        let sink = FileSink::open(&path).await.unwrap();

        sink.publish(vec![event("host"), event("packages")]).await.unwrap();
        sink.publish(vec![event("processes")]).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let doc: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(doc["event"]["dataset"], "processes");
        assert_eq!(doc["system"]["processes"]["value"], 1);
    }

    #[tokio::test]
    async fn memory_sink_filters_by_dataset() {
        let sink = MemorySink::new();
        sink.publish(vec![event("host"), event("user"), event("host")])
            .await
            .unwrap();
        assert_eq!(sink.len().await, 3);
        assert_eq!(sink.events_for("host").await.len(), 2);
    }

    #[tokio::test]
    async fn from_config_builds_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let config = OutputConfig::File {
            path: dir.path().join("e.ndjson"),
        };
        let sink = from_config(&config).await.unwrap();
        assert_eq!(sink.name(), "file");
    }
}
