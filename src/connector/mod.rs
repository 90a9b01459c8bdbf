//! Connector Contract (C5): the abstract pub/sub/pubsub peer interface and
//! its explicit registry.
//!
//! Grounded on the teacher's `event_sink::sink::{EventSink, SinkRegistry}` —
//! reshaped from a sink-only trait to the five-operation contract spec.md
//! §4.4 describes, and generalized from "always a sink" to Pub/Sub/PubSub.
//! Per the Design Notes' resolution, registration is an explicit value
//! (`ConnectorRegistry`) built in `main.rs`, not a global/lazy-static map.

pub mod http;
pub mod postgres;
pub mod stdout;

use crate::errors::{ReplicationError, ReplicationResult};
use crate::event::Event;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Declared capability of a connector implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerType {
    PubOnly,
    SubOnly,
    PubSub,
}

impl PeerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerType::PubOnly => "PubOnly",
            PeerType::SubOnly => "SubOnly",
            PeerType::PubSub => "PubSub",
        }
    }

    pub fn can_publish(&self) -> bool {
        matches!(self, PeerType::PubOnly | PeerType::PubSub)
    }

    pub fn can_subscribe(&self) -> bool {
        matches!(self, PeerType::SubOnly | PeerType::PubSub)
    }
}

/// A peer implementation: connect, publish, subscribe, disconnect, plus its
/// declared type. `publish`/`subscribe` default to the connector-type
/// mismatch error so PubOnly/SubOnly connectors need only implement the
/// operation their type supports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Parse `config` and open the underlying transport. `peer_name` is the
    /// name this connector was registered under, kept for diagnostics and
    /// mismatch error messages.
    async fn connect(&mut self, peer_name: &str, config: Value) -> ReplicationResult<()>;

    fn peer_type(&self) -> PeerType;

    async fn publish(&mut self, _event: &Event) -> ReplicationResult<()> {
        Err(ReplicationError::connector_mismatch(
            self.peer_name(),
            "publish",
            self.peer_type().as_str(),
        ))
    }

    async fn subscribe(&mut self) -> ReplicationResult<mpsc::Receiver<Event>> {
        Err(ReplicationError::connector_mismatch(
            self.peer_name(),
            "subscribe",
            self.peer_type().as_str(),
        ))
    }

    /// Release transport resources. Safe to call more than once.
    async fn disconnect(&mut self) -> ReplicationResult<()>;

    /// The peer name this connector instance was connected under (set during
    /// `connect`), used in mismatch/error messages.
    fn peer_name(&self) -> &str;
}

/// A factory producing one fresh `Connector` instance per peer, keyed by the
/// connector type string used in configuration (`peers[].connector`).
type ConnectorFactory = Box<dyn Fn() -> Box<dyn Connector> + Send + Sync>;

/// Explicit, non-global registry of connector factories. Built once at
/// process entry and threaded into the `Manager` by value/reference.
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a connector factory under `type_name` (e.g. `"http"`,
    /// `"postgres"`, `"stdout"`).
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Connector> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Box::new(factory));
    }

    /// Instantiate a fresh connector for `type_name`.
    pub fn create(&self, type_name: &str) -> ReplicationResult<Box<dyn Connector>> {
        self.factories
            .get(type_name)
            .map(|factory| factory())
            .ok_or_else(|| {
                ReplicationError::config(format!("no connector registered for type '{type_name}'"))
            })
    }

    /// The standard set of built-in connectors (`stdout`, `http`,
    /// `postgres`), registered the way `main.rs` wires them at startup.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("stdout", || Box::new(stdout::StdoutConnector::new()));
        registry.register("http", || Box::new(http::HttpConnector::new()));
        registry.register("postgres", || Box::new(postgres::PostgresConnector::new()));
        registry
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_on_sub_only_returns_mismatch() {
        let mut connector = postgres::PostgresConnector::new();
        connector
            .connect("upstream", serde_json::json!({"connection_string": "host=localhost"}))
            .await
            .ok();
        let event = crate::event::EventBuilder::new(crate::event::Op::Create, "pg1", "db").build();
        let result = connector.publish(&event).await;
        assert!(matches!(
            result,
            Err(ReplicationError::ConnectorTypeMismatch { .. })
        ));
    }

    #[test]
    fn registry_creates_registered_connector() {
        let registry = ConnectorRegistry::with_builtins();
        assert!(registry.create("stdout").is_ok());
        assert!(registry.create("nonexistent").is_err());
    }
}
