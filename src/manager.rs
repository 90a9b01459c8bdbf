//! Manager (C8): peer lifecycle and pipeline orchestration.
//!
//! Grounded on the teacher's `server::ReplicationServer` (connect-with-retry
//! loop, `tokio::sync::watch` shutdown broadcast, task wait-group) —
//! generalized from "one upstream, one sink" to N named peers feeding M
//! pipelines.

use crate::config::{AppConfig, EnvDefaults, PeerConfig, PipelineConfig};
use crate::connector::{Connector, ConnectorRegistry, PeerType};
use crate::dispatch::{self, PipelineTasks};
use crate::errors::{ReplicationError, ReplicationResult};
use crate::metrics::Metrics;
use crate::transform::TransformationRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Delay schedule for connect retries (spec.md §4.4's "reconnect-with-backoff
/// applies to peers too").
const CONNECT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(3),
];

/// A connected peer: its connector (behind a lock so the sink-consumer task
/// and, briefly at startup, the source-consumer task can share ownership)
/// and its declared type, cached so dispatch wiring doesn't need to lock
/// just to check compatibility.
#[derive(Clone)]
pub struct PeerHandle {
    pub connector: Arc<Mutex<Box<dyn Connector>>>,
    pub peer_type: PeerType,
}

pub struct Manager {
    connector_registry: ConnectorRegistry,
    transform_registry: TransformationRegistry,
    metrics: Arc<Metrics>,
    peers: HashMap<String, PeerHandle>,
    pipeline_tasks: Vec<PipelineTasks>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Manager {
    pub fn new(connector_registry: ConnectorRegistry, transform_registry: TransformationRegistry) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            connector_registry,
            transform_registry,
            metrics: Arc::new(Metrics::new()),
            peers: HashMap::new(),
            pipeline_tasks: Vec::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Connect every peer named in `config.peers`, retrying each up to 3
    /// times with the `CONNECT_RETRY_DELAYS` schedule. Any peer that never
    /// connects is a fatal startup error (spec.md §4.4).
    pub async fn connect_peers(&mut self, peers: &[PeerConfig], env_defaults: &EnvDefaults) -> ReplicationResult<()> {
        for peer_config in peers {
            let mut connector = self.connector_registry.create(&peer_config.connector)?;

            let mut config = peer_config.config.clone();
            if peer_config.connector == "postgres" {
                env_defaults.apply_to(&mut config);
            }

            let mut attempt = 0;
            loop {
                match connector.connect(&peer_config.name, config.clone()).await {
                    Ok(()) => break,
                    Err(e) if attempt < CONNECT_RETRY_DELAYS.len() => {
                        warn!(
                            peer = %peer_config.name,
                            attempt = attempt + 1,
                            error = %e,
                            "peer connect failed, retrying"
                        );
                        tokio::time::sleep(CONNECT_RETRY_DELAYS[attempt]).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        return Err(ReplicationError::connector(
                            &peer_config.name,
                            format!("failed to connect after {} attempts: {e}", attempt + 1),
                        ));
                    }
                }
            }

            info!(peer = %peer_config.name, connector = %peer_config.connector, "peer connected");
            let peer_type = connector.peer_type();
            self.peers.insert(
                peer_config.name.clone(),
                PeerHandle {
                    connector: Arc::new(Mutex::new(connector)),
                    peer_type,
                },
            );
        }
        Ok(())
    }

    /// Validate peer-type compatibility and spawn the dispatch tasks for
    /// every pipeline.
    pub fn start_pipelines(&mut self, pipelines: &[PipelineConfig]) -> ReplicationResult<()> {
        for pipeline in pipelines {
            for source in &pipeline.sources {
                let peer = self.peers.get(&source.name).ok_or_else(|| {
                    ReplicationError::pipeline(&pipeline.name, format!("unknown source peer '{}'", source.name))
                })?;
                if !peer.peer_type.can_subscribe() {
                    return Err(ReplicationError::pipeline(
                        &pipeline.name,
                        format!(
                            "source peer '{}' is {:?} and cannot be subscribed to",
                            source.name, peer.peer_type
                        ),
                    ));
                }
            }
            for sink in &pipeline.sinks {
                let peer = self.peers.get(&sink.name).ok_or_else(|| {
                    ReplicationError::pipeline(&pipeline.name, format!("unknown sink peer '{}'", sink.name))
                })?;
                if !peer.peer_type.can_publish() {
                    return Err(ReplicationError::pipeline(
                        &pipeline.name,
                        format!(
                            "sink peer '{}' is {:?} and cannot be published to",
                            sink.name, peer.peer_type
                        ),
                    ));
                }
            }

            let tasks = dispatch::spawn_pipeline(
                pipeline,
                &self.peers,
                &self.transform_registry,
                self.metrics.clone(),
                self.shutdown_rx.clone(),
            )?;
            info!(pipeline = %pipeline.name, "pipeline started");
            self.pipeline_tasks.push(tasks);
        }
        Ok(())
    }

    pub async fn run_from_config(&mut self, config: &AppConfig, env_defaults: &EnvDefaults) -> ReplicationResult<()> {
        self.connect_peers(&config.peers, env_defaults).await?;
        self.start_pipelines(&config.pipelines)
    }

    /// Broadcast shutdown, await every dispatch task, then disconnect every
    /// peer. Consumes `self` since nothing may be started again afterward.
    pub async fn shutdown(mut self) {
        info!("shutdown requested, signalling pipeline tasks");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self
            .pipeline_tasks
            .drain(..)
            .flat_map(|t| t.handles)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }

        for (name, peer) in self.peers.drain() {
            let mut connector = peer.connector.lock().await;
            if let Err(e) = connector.disconnect().await {
                warn!(peer = %name, error = %e, "error disconnecting peer during shutdown");
            }
        }
        info!("shutdown complete");
    }

    /// A receiver that resolves once `shutdown` has been called elsewhere
    /// (used by `main.rs` to wire a Ctrl-C handler without holding the
    /// `Manager` itself).
    pub fn shutdown_trigger(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineEndpoint;

    #[tokio::test]
    async fn rejects_pipeline_with_pub_only_source() {
        let mut manager = Manager::new(ConnectorRegistry::with_builtins(), TransformationRegistry::with_builtins());
        manager
            .connect_peers(
                &[PeerConfig {
                    name: "diag".to_string(),
                    connector: "stdout".to_string(),
                    config: serde_json::Value::Null,
                }],
                &EnvDefaults::from_env(),
            )
            .await
            .unwrap();

        let pipeline = PipelineConfig {
            name: "bad".to_string(),
            sources: vec![PipelineEndpoint {
                name: "diag".to_string(),
                transformations: vec![],
            }],
            sinks: vec![PipelineEndpoint {
                name: "diag".to_string(),
                transformations: vec![],
            }],
            transformations: vec![],
            queue_capacity: 10,
        };

        let result = manager.start_pipelines(&[pipeline]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_pipeline_referencing_unknown_peer() {
        let mut manager = Manager::new(ConnectorRegistry::with_builtins(), TransformationRegistry::with_builtins());
        let pipeline = PipelineConfig {
            name: "bad".to_string(),
            sources: vec![PipelineEndpoint {
                name: "nonexistent".to_string(),
                transformations: vec![],
            }],
            sinks: vec![],
            transformations: vec![],
            queue_capacity: 10,
        };
        assert!(manager.start_pipelines(&[pipeline]).is_err());
    }
}
