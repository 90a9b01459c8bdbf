//! HTTP webhook connector: PubOnly, delivers each event as a JSON POST.
//!
//! Grounded on the teacher's `event_sink::http::HttpEventSink` — the
//! `reqwest::Client` usage and exponential-backoff retry loop are kept, but
//! the retry now lives entirely inside `publish` (per spec.md §7, sink
//! retry is "the sink's responsibility," not the dispatch engine's), and
//! the SMTP failure-notification path is dropped — it has no counterpart
//! in the spec and pulls in a dependency (`lettre`) nothing else needs (see
//! DESIGN.md's trimming ledger).

use super::{Connector, PeerType};
use crate::errors::{ReplicationError, ReplicationResult};
use crate::event::Event;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct HttpConnectorConfig {
    endpoint_url: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

pub struct HttpConnector {
    peer_name: String,
    endpoint_url: String,
    client: Option<Client>,
}

impl HttpConnector {
    pub fn new() -> Self {
        Self {
            peer_name: String::new(),
            endpoint_url: String::new(),
            client: None,
        }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&mut self, peer_name: &str, config: Value) -> ReplicationResult<()> {
        self.peer_name = peer_name.to_string();
        let parsed: HttpConnectorConfig = serde_json::from_value(config)
            .map_err(|e| ReplicationError::config(format!("invalid http connector config: {e}")))?;

        if !parsed.endpoint_url.starts_with("http://") && !parsed.endpoint_url.starts_with("https://") {
            return Err(ReplicationError::config(
                "http connector endpoint_url must start with http:// or https://",
            ));
        }

        self.endpoint_url = parsed.endpoint_url;
        self.client = Some(
            Client::builder()
                .timeout(Duration::from_secs(parsed.timeout_secs))
                .build()
                .map_err(|e| ReplicationError::connector(peer_name, e.to_string()))?,
        );
        Ok(())
    }

    fn peer_type(&self) -> PeerType {
        PeerType::PubOnly
    }

    async fn publish(&mut self, event: &Event) -> ReplicationResult<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ReplicationError::connector(&self.peer_name, "not connected"))?;

        let mut delay = BASE_DELAY;
        for attempt in 1..=MAX_ATTEMPTS {
            let response = client.post(&self.endpoint_url).json(event).send().await;
            match response {
                Ok(resp) if resp.status().is_success() => {
                    debug!(peer = %self.peer_name, "delivered event to webhook");
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(peer = %self.peer_name, status = %resp.status(), attempt, "webhook returned non-success status");
                }
                Err(e) => {
                    warn!(peer = %self.peer_name, error = %e, attempt, "webhook request failed");
                }
            }

            if attempt == MAX_ATTEMPTS {
                error!(peer = %self.peer_name, "webhook delivery failed after {} attempts", MAX_ATTEMPTS);
                return Err(ReplicationError::connector(
                    &self.peer_name,
                    format!("delivery failed after {MAX_ATTEMPTS} attempts"),
                ));
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_DELAY);
        }
        unreachable!("loop always returns on its last attempt")
    }

    async fn disconnect(&mut self) -> ReplicationResult<()> {
        self.client = None;
        Ok(())
    }

    fn peer_name(&self) -> &str {
        &self.peer_name
    }
}
