//! Configuration surface (C8's input): the `peers`/`pipelines` YAML/JSON
//! document described in spec.md §6, plus the `LOGREPL_*` environment
//! variable defaults threaded into the `postgres` connector's config.
//!
//! Grounded on the teacher's `core::config::ReplicationConfig::new`
//! validation style (inline checks returning `ReplicationError::config`)
//! generalized from one fixed set of fields to the open-ended peer/pipeline
//! document; loading uses `serde` + `serde_yaml` the way the teacher's
//! config loaded from environment variables with defaults and validation.

use crate::errors::{ReplicationError, ReplicationResult};
use crate::transform::TransformConfig;
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::path::Path;

/// One `peers[]` entry: a named connector instance plus its config blob.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub connector: String,
    #[serde(default)]
    pub config: Value,
}

/// One source or sink entry within a pipeline: a peer name plus the
/// transformations applied at that stage.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineEndpoint {
    pub name: String,
    #[serde(default)]
    pub transformations: Vec<TransformConfig>,
}

/// One `pipelines[]` entry: N sources, M sinks, and the pipeline-level
/// transformation list applied between them.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub sources: Vec<PipelineEndpoint>,
    pub sinks: Vec<PipelineEndpoint>,
    #[serde(default)]
    pub transformations: Vec<TransformConfig>,
    /// Capacity of each sink's bounded queue (spec.md §3's Sink queue).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

impl AppConfig {
    /// Parse a YAML (or JSON, a YAML superset) document into an `AppConfig`
    /// and validate the peer/pipeline reference invariants from spec.md §3.
    pub fn from_yaml_str(source: &str) -> ReplicationResult<Self> {
        let config: AppConfig = serde_yaml::from_str(source)
            .map_err(|e| ReplicationError::config(format!("invalid configuration document: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ReplicationResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ReplicationError::config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Peer-name uniqueness and pipeline source/sink reference validity
    /// (spec.md §3's Peer/Pipeline invariants). Peer *type* compatibility
    /// (source must be Sub/PubSub, sink must be Pub/PubSub) is checked by
    /// the Manager once peers are connected and their declared types known.
    fn validate(&self) -> ReplicationResult<()> {
        let mut seen = std::collections::HashSet::new();
        for peer in &self.peers {
            if peer.name.trim().is_empty() {
                return Err(ReplicationError::config("peer name must not be empty"));
            }
            if !seen.insert(peer.name.as_str()) {
                return Err(ReplicationError::config(format!(
                    "duplicate peer name '{}'",
                    peer.name
                )));
            }
        }

        for pipeline in &self.pipelines {
            if pipeline.sources.is_empty() {
                return Err(ReplicationError::pipeline(
                    &pipeline.name,
                    "must reference at least one source",
                ));
            }
            if pipeline.sinks.is_empty() {
                return Err(ReplicationError::pipeline(
                    &pipeline.name,
                    "must reference at least one sink",
                ));
            }
            for endpoint in pipeline.sources.iter().chain(pipeline.sinks.iter()) {
                if !seen.contains(endpoint.name.as_str()) {
                    return Err(ReplicationError::pipeline(
                        &pipeline.name,
                        format!("references unknown peer '{}'", endpoint.name),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// The `LOGREPL_*` environment variable defaults, merged into a `postgres`
/// peer's config when the peer's own config omits them.
#[derive(Debug, Clone)]
pub struct EnvDefaults {
    pub output_plugin: String,
    pub publication_name: String,
    pub slot_name: String,
}

impl EnvDefaults {
    pub fn from_env() -> Self {
        Self {
            output_plugin: env::var("LOGREPL_OUTPUT_PLUGIN").unwrap_or_else(|_| "pgoutput".to_string()),
            publication_name: env::var("LOGREPL_PUBLICATION_NAME")
                .unwrap_or_else(|_| "pgo_logrepl".to_string()),
            slot_name: env::var("LOGREPL_SLOT_NAME").unwrap_or_else(|_| "pgo_logrepl".to_string()),
        }
    }

    /// Fill in `output_plugin`/`publication_name`/`slot_name` on a
    /// `postgres` connector's config object when the peer's own
    /// configuration left them unset.
    pub fn apply_to(&self, config: &mut Value) {
        let Value::Object(map) = config else {
            return;
        };
        map.entry("output_plugin")
            .or_insert_with(|| Value::String(self.output_plugin.clone()));
        map.entry("publication_name")
            .or_insert_with(|| Value::String(self.publication_name.clone()));
        map.entry("slot_name")
            .or_insert_with(|| Value::String(self.slot_name.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
peers:
  - name: upstream
    connector: postgres
    config:
      connection_string: "host=localhost dbname=test"
  - name: diag
    connector: stdout
pipelines:
  - name: main
    sources:
      - name: upstream
    sinks:
      - name: diag
        transformations:
          - type: extract
            config:
              fields: ["id"]
"#;

    #[test]
    fn parses_sample_document() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.pipelines.len(), 1);
        assert_eq!(config.pipelines[0].queue_capacity, 100);
    }

    #[test]
    fn rejects_duplicate_peer_names() {
        let yaml = r#"
peers:
  - name: a
    connector: stdout
  - name: a
    connector: stdout
pipelines: []
"#;
        assert!(AppConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn rejects_unknown_peer_reference() {
        let yaml = r#"
peers:
  - name: upstream
    connector: postgres
pipelines:
  - name: main
    sources:
      - name: upstream
    sinks:
      - name: nonexistent
"#;
        assert!(AppConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn env_defaults_fill_missing_fields_only() {
        let defaults = EnvDefaults {
            output_plugin: "pgoutput".to_string(),
            publication_name: "pgo_logrepl".to_string(),
            slot_name: "pgo_logrepl".to_string(),
        };
        let mut config = serde_json::json!({"slot_name": "custom"});
        defaults.apply_to(&mut config);
        assert_eq!(config["slot_name"], "custom");
        assert_eq!(config["output_plugin"], "pgoutput");
    }
}
