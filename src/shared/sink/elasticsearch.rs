use async_trait::async_trait;
use elasticsearch::{
    auth::Credentials,
    http::request::JsonBody,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    BulkParts, Elasticsearch,
};
use log::{debug, error};
use serde_json::{json, Value};
use url::Url;

use super::EventSink;
use crate::shared::error::SinkError;
use crate::shared::event::Event;

/// Ships each batch with a single bulk request.
pub struct ElasticsearchSink {
    client: Elasticsearch,
    index: String,
}

impl ElasticsearchSink {
    pub fn new(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        index: &str,
    ) -> Result<Self, SinkError> {
        let url = format!("http://{}:{}", host, port);
        let url = Url::parse(&url).map_err(|e| SinkError::Connection(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(url);
        let mut builder = TransportBuilder::new(conn_pool);

        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.auth(Credentials::Basic(
                username.to_string(),
                password.to_string(),
            ));
        }

        let transport = builder
            .build()
            .map_err(|e| SinkError::Connection(e.to_string()))?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            index: index.to_string(),
        })
    }

    fn bulk_body(events: &[Event]) -> Vec<JsonBody<Value>> {
        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(events.len() * 2);
        for event in events {
            body.push(json!({ "index": {} }).into());
            body.push(event.to_document().into());
        }
        body
    }
}

#[async_trait]
impl EventSink for ElasticsearchSink {
    async fn publish(&self, events: Vec<Event>) -> Result<(), SinkError> {
        if events.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .bulk(BulkParts::Index(&self.index))
            .body(Self::bulk_body(&events))
            .send()
            .await
            .map_err(|e| SinkError::Connection(e.to_string()))?;

        if !response.status_code().is_success() {
            error!("Bulk request rejected: {:?}", response);
            return Err(SinkError::Write(format!(
                "Elasticsearch returned error status: {}",
                response.status_code()
            )));
        }

        let response_body: Value = response
            .json()
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;

        if response_body["errors"].as_bool().unwrap_or(false) {
            return Err(SinkError::Write(format!(
                "Elasticsearch rejected some of {} events",
                events.len()
            )));
        }

        debug!("Stored {} events in index {}", events.len(), self.index);
        Ok(())
    }

    fn name(&self) -> &str {
        "elasticsearch"
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

    #[test]
    fn rejects_unparseable_host() {
        assert!(matches!(
            ElasticsearchSink::new("bad host", 9200, None, None, "idx"),
            Err(SinkError::Connection(_))
        ));
    }

    #[test]
    fn bulk_body_pairs_action_and_document() {
        let facts = HostFacts::detect();
        let event = normalize(
            &CollectorDescriptor::new("host", Duration::from_secs(1)),
            RawRecord::new().with("uptime", 1u64),
            &facts,
            Utc::now(),
            false,
        )
        .unwrap();
        let body = ElasticsearchSink::bulk_body(&[event.clone(), event]);
        assert_eq!(body.len(), 4);
    }
}
