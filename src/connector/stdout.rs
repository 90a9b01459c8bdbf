//! Diagnostic `stdout` connector: PubOnly, prints each event as JSON.
//!
//! Grounded on the teacher's `event_sink::stdout::StdoutSink`, generalized
//! from debug-printing a `ReplicationMessage` to JSON-printing an `Event`.

use super::{Connector, PeerType};
use crate::errors::ReplicationResult;
use crate::event::Event;
use async_trait::async_trait;
use serde_json::Value;
use std::io::{self, Write};
use tracing::debug;

pub struct StdoutConnector {
    peer_name: String,
}

impl StdoutConnector {
    pub fn new() -> Self {
        Self {
            peer_name: String::new(),
        }
    }
}

impl Default for StdoutConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for StdoutConnector {
    async fn connect(&mut self, peer_name: &str, _config: Value) -> ReplicationResult<()> {
        self.peer_name = peer_name.to_string();
        Ok(())
    }

    fn peer_type(&self) -> PeerType {
        PeerType::PubOnly
    }

    async fn publish(&mut self, event: &Event) -> ReplicationResult<()> {
        debug!(peer = %self.peer_name, "writing event to stdout");
        let json = serde_json::to_string(event)
            .map_err(|e| crate::errors::ReplicationError::connector(&self.peer_name, e.to_string()))?;
        let mut stdout = io::stdout();
        writeln!(stdout, "{json}")
            .and_then(|_| stdout.flush())
            .map_err(|e| crate::errors::ReplicationError::connector(&self.peer_name, e.to_string()))?;
        Ok(())
    }

    async fn disconnect(&mut self) -> ReplicationResult<()> {
        Ok(())
    }

    fn peer_name(&self) -> &str {
        &self.peer_name
    }
}
