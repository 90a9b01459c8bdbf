//! Dispatch Engine (C7): per-sink bounded queues, transformation
//! application, drop-on-full backpressure, and the metrics spec.md §4.6
//! names.
//!
//! No teacher analog (the teacher has no multi-sink fan-out); built from
//! `tokio::sync::mpsc` bounded channels and `tokio::task::spawn`, matching
//! the teacher's own task-spawning idiom throughout `replication/session.rs`.

use crate::config::PipelineConfig;
use crate::connector::Connector;
use crate::errors::ReplicationResult;
use crate::event::Event;
use crate::manager::PeerHandle;
use crate::metrics::Metrics;
use crate::transform::{Outcome, TransformationChain, TransformationRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Every task spawned for one pipeline: one consumer per sink, one consumer
/// per source. Held by the `Manager` purely so it can await them all at
/// shutdown (the wait-group of spec.md §4.7).
pub struct PipelineTasks {
    pub handles: Vec<JoinHandle<()>>,
}

/// Wire one pipeline: create its sink queues, spawn a consumer per sink,
/// subscribe each source peer and spawn a consumer that applies source and
/// pipeline transformations before fanning out.
pub fn spawn_pipeline(
    pipeline: &PipelineConfig,
    peers: &HashMap<String, PeerHandle>,
    transform_registry: &TransformationRegistry,
    metrics: Arc<Metrics>,
    shutdown_rx: watch::Receiver<bool>,
) -> ReplicationResult<PipelineTasks> {
    let mut handles = Vec::new();
    let mut sink_senders = Vec::new();

    for sink in &pipeline.sinks {
        let chain = Arc::new(transform_registry.build_chain(&sink.transformations)?);
        let (tx, rx) = mpsc::channel::<Event>(pipeline.queue_capacity);
        sink_senders.push(tx);

        let peer = peers
            .get(&sink.name)
            .expect("sink peer existence verified by Manager before dispatch")
            .clone();
        let pipeline_name = pipeline.name.clone();
        let sink_name = sink.name.clone();
        let metrics = metrics.clone();

        handles.push(tokio::spawn(sink_consumer(
            rx,
            chain,
            peer,
            pipeline_name,
            sink_name,
            metrics,
        )));
    }

    let pipeline_chain = Arc::new(transform_registry.build_chain(&pipeline.transformations)?);

    for source in &pipeline.sources {
        let source_chain = Arc::new(transform_registry.build_chain(&source.transformations)?);
        let peer = peers
            .get(&source.name)
            .expect("source peer existence verified by Manager before dispatch")
            .clone();
        let pipeline_chain = pipeline_chain.clone();
        let sink_txs = sink_senders.clone();
        let pipeline_name = pipeline.name.clone();
        let source_name = source.name.clone();
        let metrics = metrics.clone();
        let shutdown_rx = shutdown_rx.clone();

        handles.push(tokio::spawn(source_consumer(
            peer,
            source_chain,
            pipeline_chain,
            sink_txs,
            pipeline_name,
            source_name,
            metrics,
            shutdown_rx,
        )));
    }

    Ok(PipelineTasks { handles })
}

async fn sink_consumer(
    mut rx: mpsc::Receiver<Event>,
    chain: Arc<TransformationChain>,
    peer: PeerHandle,
    pipeline_name: String,
    sink_name: String,
    metrics: Arc<Metrics>,
) {
    // Events reaching one sink queue may have originated from any of the
    // pipeline's sources; the per-sink consumer has no single "source"
    // label to report, so transformation/processing metrics at this stage
    // use "*" for that label (see DESIGN.md).
    const ANY_SOURCE: &str = "*";

    while let Some(event) = rx.recv().await {
        let started = Instant::now();
        match chain.apply(event) {
            Ok(Outcome::Drop) => continue,
            Ok(Outcome::Pass(event)) => {
                let mut connector = peer.connector.lock().await;
                match connector.publish(&event).await {
                    Ok(()) => {
                        metrics
                            .processed_events_total
                            .with_label_values(&[&pipeline_name, ANY_SOURCE, &sink_name])
                            .inc();
                        metrics
                            .event_processing_duration_seconds
                            .with_label_values(&[&pipeline_name, ANY_SOURCE, &sink_name])
                            .observe(started.elapsed().as_secs_f64());
                    }
                    Err(e) => {
                        metrics
                            .publish_errors_total
                            .with_label_values(&[&sink_name])
                            .inc();
                        warn!(pipeline = %pipeline_name, sink = %sink_name, error = %e, "sink publish failed");
                    }
                }
            }
            Err(e) => {
                metrics
                    .transformation_errors_total
                    .with_label_values(&["sink", &pipeline_name, ANY_SOURCE, &sink_name])
                    .inc();
                warn!(pipeline = %pipeline_name, sink = %sink_name, error = %e, "sink transformation failed");
            }
        }
    }
    info!(pipeline = %pipeline_name, sink = %sink_name, "sink consumer drained and exiting");
}

#[allow(clippy::too_many_arguments)]
async fn source_consumer(
    peer: PeerHandle,
    source_chain: Arc<TransformationChain>,
    pipeline_chain: Arc<TransformationChain>,
    sink_txs: Vec<mpsc::Sender<Event>>,
    pipeline_name: String,
    source_name: String,
    metrics: Arc<Metrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut source_rx = {
        let mut connector = peer.connector.lock().await;
        match connector.subscribe().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(pipeline = %pipeline_name, source = %source_name, error = %e, "failed to subscribe to source peer");
                return;
            }
        }
    };

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!(pipeline = %pipeline_name, source = %source_name, "shutdown observed, closing sink channels");
                    break;
                }
            }
            maybe_event = source_rx.recv() => {
                let Some(event) = maybe_event else {
                    info!(pipeline = %pipeline_name, source = %source_name, "source channel closed");
                    break;
                };

                let event = match source_chain.apply(event) {
                    Ok(Outcome::Drop) => continue,
                    Ok(Outcome::Pass(event)) => event,
                    Err(e) => {
                        metrics
                            .transformation_errors_total
                            .with_label_values(&["source", &pipeline_name, &source_name, "*"])
                            .inc();
                        warn!(pipeline = %pipeline_name, source = %source_name, error = %e, "source transformation failed");
                        continue;
                    }
                };

                let event = match pipeline_chain.apply(event) {
                    Ok(Outcome::Drop) => continue,
                    Ok(Outcome::Pass(event)) => event,
                    Err(e) => {
                        metrics
                            .transformation_errors_total
                            .with_label_values(&["pipeline", &pipeline_name, &source_name, "*"])
                            .inc();
                        warn!(pipeline = %pipeline_name, source = %source_name, error = %e, "pipeline transformation failed");
                        continue;
                    }
                };

                fan_out(&sink_txs, event, &pipeline_name, &source_name);
            }
        }
    }
    // Dropping `sink_txs` here closes every sink queue, letting each sink
    // consumer drain and exit (spec.md §4.7's shutdown ordering).
}

/// Non-blocking drop-on-full fan-out: a full sink queue only drops the
/// event for that sink, never blocks delivery to the others (spec.md
/// §4.6's documented backpressure contract).
fn fan_out(sink_txs: &[mpsc::Sender<Event>], event: Event, pipeline_name: &str, source_name: &str) {
    for tx in sink_txs {
        match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(pipeline = %pipeline_name, source = %source_name, "sink queue full, dropping event for this sink");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineEndpoint;
    use crate::connector::PeerType;
    use crate::event::{EventBuilder, Op};
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct CountingSink {
        peer_name: String,
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for CountingSink {
        async fn connect(&mut self, peer_name: &str, _config: JsonValue) -> ReplicationResult<()> {
            self.peer_name = peer_name.to_string();
            Ok(())
        }
        fn peer_type(&self) -> PeerType {
            PeerType::PubOnly
        }
        async fn publish(&mut self, _event: &Event) -> ReplicationResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&mut self) -> ReplicationResult<()> {
            Ok(())
        }
        fn peer_name(&self) -> &str {
            &self.peer_name
        }
    }

    struct OneShotSource {
        peer_name: String,
        events: Vec<Event>,
    }

    #[async_trait]
    impl Connector for OneShotSource {
        async fn connect(&mut self, peer_name: &str, _config: JsonValue) -> ReplicationResult<()> {
            self.peer_name = peer_name.to_string();
            Ok(())
        }
        fn peer_type(&self) -> PeerType {
            PeerType::SubOnly
        }
        async fn subscribe(&mut self) -> ReplicationResult<mpsc::Receiver<Event>> {
            let (tx, rx) = mpsc::channel(16);
            for event in self.events.drain(..) {
                tx.try_send(event).unwrap();
            }
            Ok(rx)
        }
        async fn disconnect(&mut self) -> ReplicationResult<()> {
            Ok(())
        }
        fn peer_name(&self) -> &str {
            &self.peer_name
        }
    }

    #[tokio::test]
    async fn fan_out_delivers_to_every_sink() {
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));

        let sink_a = PeerHandle {
            connector: Arc::new(Mutex::new(Box::new(CountingSink {
                peer_name: "a".into(),
                count: count_a.clone(),
            }))),
            peer_type: PeerType::PubOnly,
        };
        let sink_b = PeerHandle {
            connector: Arc::new(Mutex::new(Box::new(CountingSink {
                peer_name: "b".into(),
                count: count_b.clone(),
            }))),
            peer_type: PeerType::PubOnly,
        };
        let events = vec![
            EventBuilder::new(Op::Create, "pg1", "db").relation("public", "t").build(),
            EventBuilder::new(Op::Create, "pg1", "db").relation("public", "t").build(),
        ];
        let source = PeerHandle {
            connector: Arc::new(Mutex::new(Box::new(OneShotSource {
                peer_name: "src".into(),
                events,
            }))),
            peer_type: PeerType::SubOnly,
        };

        let mut peers = HashMap::new();
        peers.insert("a".to_string(), sink_a);
        peers.insert("b".to_string(), sink_b);
        peers.insert("src".to_string(), source);

        let pipeline = PipelineConfig {
            name: "main".to_string(),
            sources: vec![PipelineEndpoint {
                name: "src".to_string(),
                transformations: vec![],
            }],
            sinks: vec![
                PipelineEndpoint {
                    name: "a".to_string(),
                    transformations: vec![],
                },
                PipelineEndpoint {
                    name: "b".to_string(),
                    transformations: vec![],
                },
            ],
            transformations: vec![],
            queue_capacity: 10,
        };

        let registry = TransformationRegistry::with_builtins();
        let metrics = Arc::new(Metrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = spawn_pipeline(&pipeline, &peers, &registry, metrics, shutdown_rx).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        for handle in tasks.handles {
            let _ = handle.await;
        }

        assert_eq!(count_a.load(Ordering::SeqCst), 2);
        assert_eq!(count_b.load(Ordering::SeqCst), 2);
    }
}
