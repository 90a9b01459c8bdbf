//! `extract` transformation: keeps only the listed keys of `before`/`after`.
//!
//! No teacher analog; built in the registry's idiom (see `transform::mod`).

use super::{Outcome, Transformation};
use crate::errors::{ReplicationError, ReplicationResult};
use crate::event::Event;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct ExtractConfig {
    fields: Vec<String>,
}

pub struct Extract {
    fields: Vec<String>,
}

impl Extract {
    pub fn from_config(config: Value) -> ReplicationResult<Box<dyn Transformation>> {
        let parsed: ExtractConfig = serde_json::from_value(config).map_err(|e| {
            ReplicationError::transform_validation("extract", format!("invalid config: {e}"))
        })?;
        if parsed.fields.is_empty() {
            return Err(ReplicationError::transform_validation(
                "extract",
                "fields must not be empty",
            ));
        }
        Ok(Box::new(Self {
            fields: parsed.fields,
        }))
    }

    fn keep_only(&self, row: crate::event::RowMap) -> crate::event::RowMap {
        row.into_iter()
            .filter(|(k, _)| self.fields.contains(k))
            .collect()
    }
}

impl Transformation for Extract {
    fn transform_type(&self) -> &'static str {
        "extract"
    }

    fn apply(&self, mut event: Event) -> ReplicationResult<Outcome> {
        event.payload.before = event.payload.before.map(|b| self.keep_only(b));
        event.payload.after = event.payload.after.map(|a| self.keep_only(a));
        Ok(Outcome::Pass(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBuilder, Op, RowMap};

    fn sample_after() -> RowMap {
        let mut row = RowMap::new();
        row.insert("email".to_string(), Value::from("a@b"));
        row.insert("id".to_string(), Value::from(1));
        row.insert("name".to_string(), Value::from("x"));
        row
    }

    #[test]
    fn empty_fields_fails_validation() {
        let result = Extract::from_config(serde_json::json!({"fields": []}));
        assert!(result.is_err());
    }

    #[test]
    fn keeps_only_listed_keys() {
        let extract = Extract::from_config(serde_json::json!({"fields": ["email", "id"]})).unwrap();
        let event = EventBuilder::new(Op::Update, "pg1", "db")
            .relation("public", "users")
            .after(Some(sample_after()))
            .build();
        let Outcome::Pass(event) = extract.apply(event).unwrap() else {
            panic!("extract must not drop");
        };
        let after = event.payload.after.unwrap();
        let mut keys: Vec<_> = after.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["email".to_string(), "id".to_string()]);
        assert_eq!(after.get("email").unwrap(), "a@b");
    }

    #[test]
    fn unknown_keys_are_silently_dropped() {
        let extract = Extract::from_config(serde_json::json!({"fields": ["nonexistent"]})).unwrap();
        let event = EventBuilder::new(Op::Update, "pg1", "db")
            .relation("public", "users")
            .after(Some(sample_after()))
            .build();
        let Outcome::Pass(event) = extract.apply(event).unwrap() else {
            panic!("extract must not drop");
        };
        assert!(event.payload.after.unwrap().is_empty());
    }

    #[test]
    fn missing_payload_left_untouched() {
        let extract = Extract::from_config(serde_json::json!({"fields": ["id"]})).unwrap();
        let event = EventBuilder::new(Op::Truncate, "pg1", "db")
            .relation("public", "t")
            .build();
        let Outcome::Pass(event) = extract.apply(event).unwrap() else {
            panic!("extract must not drop");
        };
        assert!(event.payload.before.is_none());
        assert!(event.payload.after.is_none());
    }
}
