//! Transformation Engine (C6): a string-keyed registry of pure
//! `(event) -> (event | drop | error)` functions, chained in declaration
//! order.
//!
//! No direct teacher analog — the teacher has no transformation stage —
//! built in its idiom: a trait-object registry shaped like
//! `event_sink::sink::SinkRegistry`, config structs validated the way
//! `types::ReplicationConfig::new` validates its fields.

pub mod extract;
pub mod filter;
pub mod replace;

use crate::errors::{ReplicationError, ReplicationResult};
use crate::event::Event;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// The result of applying one transformation stage.
pub enum Outcome {
    Pass(Event),
    Drop,
}

/// One configured transformation stage, as it appears in a pipeline's
/// source/pipeline/sink transformation list (`{type, config}`).
#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    #[serde(rename = "type")]
    pub transform_type: String,
    #[serde(default)]
    pub config: Value,
}

/// A single transformation instance, already validated against its config.
pub trait Transformation: Send + Sync {
    fn transform_type(&self) -> &'static str;
    fn apply(&self, event: Event) -> ReplicationResult<Outcome>;
}

type TransformationFactory = Box<dyn Fn(Value) -> ReplicationResult<Box<dyn Transformation>> + Send + Sync>;

/// Registry of transformation factories, keyed by the `type` string used in
/// configuration. Thread-safe by construction (no interior mutability after
/// the built-ins are registered).
pub struct TransformationRegistry {
    factories: HashMap<String, TransformationFactory>,
}

impl TransformationRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(Value) -> ReplicationResult<Box<dyn Transformation>> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Box::new(factory));
    }

    pub fn create(&self, type_name: &str, config: Value) -> ReplicationResult<Box<dyn Transformation>> {
        let factory = self.factories.get(type_name).ok_or_else(|| {
            ReplicationError::transform_validation(type_name, "no transformation registered for this type")
        })?;
        factory(config)
    }

    /// The built-in `extract`/`filter`/`replace` transformations.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("extract", |config| extract::Extract::from_config(config));
        registry.register("filter", |config| filter::Filter::from_config(config));
        registry.register("replace", |config| replace::Replace::from_config(config));
        registry
    }

    /// Instantiate and validate every stage in `configs`, then return a
    /// chain that applies them in order. Validation failures surface here,
    /// before the pipeline starts (spec.md §7: "surfaced when chain is
    /// built").
    pub fn build_chain(&self, configs: &[TransformConfig]) -> ReplicationResult<TransformationChain> {
        let stages = configs
            .iter()
            .map(|c| self.create(&c.transform_type, c.config.clone()))
            .collect::<ReplicationResult<Vec<_>>>()?;
        Ok(TransformationChain { stages })
    }
}

impl Default for TransformationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered list of transformation stages applied to one event. A `Drop`
/// or `Err` from any stage short-circuits the remaining stages.
pub struct TransformationChain {
    stages: Vec<Box<dyn Transformation>>,
}

impl TransformationChain {
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn apply(&self, mut event: Event) -> ReplicationResult<Outcome> {
        for stage in &self.stages {
            match stage.apply(event)? {
                Outcome::Pass(next) => event = next,
                Outcome::Drop => return Ok(Outcome::Drop),
            }
        }
        Ok(Outcome::Pass(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBuilder, Op};

    #[test]
    fn empty_chain_passes_event_unchanged() {
        let chain = TransformationChain::empty();
        let event = EventBuilder::new(Op::Create, "pg1", "db").build();
        match chain.apply(event).unwrap() {
            Outcome::Pass(_) => {}
            Outcome::Drop => panic!("empty chain must not drop"),
        }
    }

    #[test]
    fn build_chain_surfaces_validation_errors() {
        let registry = TransformationRegistry::with_builtins();
        let configs = vec![TransformConfig {
            transform_type: "extract".to_string(),
            config: serde_json::json!({"fields": []}),
        }];
        assert!(registry.build_chain(&configs).is_err());
    }

    #[test]
    fn unknown_transform_type_fails_to_build() {
        let registry = TransformationRegistry::with_builtins();
        let configs = vec![TransformConfig {
            transform_type: "nonexistent".to_string(),
            config: Value::Null,
        }];
        assert!(registry.build_chain(&configs).is_err());
    }
}
