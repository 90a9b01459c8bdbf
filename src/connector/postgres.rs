//! `postgres` connector: SubOnly, wraps a `replication::session` as the
//! upstream logical-replication source peer.
//!
//! Grounded on the teacher's `server::ReplicationServer`, generalized from
//! a freestanding binary into a `Connector` whose `subscribe` spawns the
//! session's blocking keepalive loop (`tokio::task::spawn_blocking`, the
//! teacher's own pattern for synchronous `libpq-sys` calls) and hands back
//! the receiving half of the event channel.

use super::{Connector, PeerType};
use crate::errors::{ReplicationError, ReplicationResult};
use crate::event::Event;
use crate::replication::{ReplicationSession, SessionConfig};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::error;

const EVENT_CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Deserialize)]
struct PostgresConnectorConfig {
    connection_string: String,
    #[serde(default = "default_publication_name")]
    publication_name: String,
    #[serde(default = "default_slot_name")]
    slot_name: String,
    #[serde(default = "default_output_plugin")]
    output_plugin: String,
    #[serde(default = "default_tables")]
    tables: Vec<String>,
    #[serde(default)]
    operations: Option<Vec<String>>,
    #[serde(default)]
    partition_root: bool,
    #[serde(default = "default_standby_interval_secs")]
    standby_interval_secs: u64,
    #[serde(default = "default_server_name")]
    server_name: String,
}

fn default_publication_name() -> String {
    "pgo_logrepl".to_string()
}
fn default_slot_name() -> String {
    "pgo_logrepl".to_string()
}
fn default_output_plugin() -> String {
    "pgoutput".to_string()
}
fn default_tables() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_standby_interval_secs() -> u64 {
    10
}
fn default_server_name() -> String {
    "postgresql".to_string()
}

pub struct PostgresConnector {
    peer_name: String,
    session_config: Option<SessionConfig>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl PostgresConnector {
    pub fn new() -> Self {
        Self {
            peer_name: String::new(),
            session_config: None,
            shutdown_tx: None,
            task: None,
        }
    }
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&mut self, peer_name: &str, config: Value) -> ReplicationResult<()> {
        self.peer_name = peer_name.to_string();
        let parsed: PostgresConnectorConfig = serde_json::from_value(config)
            .map_err(|e| ReplicationError::config(format!("invalid postgres connector config: {e}")))?;

        if parsed.connection_string.trim().is_empty() {
            return Err(ReplicationError::config(
                "postgres connector requires a non-empty connection_string",
            ));
        }

        self.session_config = Some(SessionConfig {
            connection_string: parsed.connection_string,
            publication_name: parsed.publication_name,
            slot_name: parsed.slot_name,
            output_plugin: parsed.output_plugin,
            tables: parsed.tables,
            operations: parsed.operations,
            partition_root: parsed.partition_root,
            standby_interval: std::time::Duration::from_secs(parsed.standby_interval_secs),
            server_name: parsed.server_name,
        });
        Ok(())
    }

    fn peer_type(&self) -> PeerType {
        PeerType::SubOnly
    }

    async fn subscribe(&mut self) -> ReplicationResult<mpsc::Receiver<Event>> {
        let session_config = self
            .session_config
            .clone()
            .ok_or_else(|| ReplicationError::connector(&self.peer_name, "not connected"))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let peer_name = self.peer_name.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut session = match ReplicationSession::establish(session_config) {
                Ok(session) => session,
                Err(e) => {
                    error!(peer = %peer_name, error = %e, "failed to establish replication session");
                    return;
                }
            };
            if let Err(e) = session.run(event_tx, shutdown_rx) {
                error!(peer = %peer_name, error = %e, "replication session ended with error");
            }
        });
        self.task = Some(task);

        Ok(event_rx)
    }

    async fn disconnect(&mut self) -> ReplicationResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    fn peer_name(&self) -> &str {
        &self.peer_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_empty_connection_string() {
        let mut connector = PostgresConnector::new();
        let result = connector
            .connect("upstream", serde_json::json!({"connection_string": ""}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_populates_session_config_with_defaults() {
        let mut connector = PostgresConnector::new();
        connector
            .connect("upstream", serde_json::json!({"connection_string": "host=localhost"}))
            .await
            .unwrap();
        let config = connector.session_config.unwrap();
        assert_eq!(config.publication_name, "pgo_logrepl");
        assert_eq!(config.slot_name, "pgo_logrepl");
        assert_eq!(config.output_plugin, "pgoutput");
    }

    #[tokio::test]
    async fn publish_on_sub_only_is_mismatch() {
        let mut connector = PostgresConnector::new();
        connector
            .connect("upstream", serde_json::json!({"connection_string": "host=localhost"}))
            .await
            .unwrap();
        let event = crate::event::EventBuilder::new(crate::event::Op::Create, "pg1", "db").build();
        assert!(connector.publish(&event).await.is_err());
    }
}
