//! `replace` transformation: literal and regex-based renaming of schema
//! names, table names, and column names.
//!
//! No teacher analog; built in the registry's idiom (see `transform::mod`).

use super::{Outcome, Transformation};
use crate::errors::{ReplicationError, ReplicationResult};
use crate::event::{Event, RowMap};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RegexTarget {
    Schema,
    Table,
    Column,
}

#[derive(Debug, Deserialize)]
struct RegexReplacement {
    #[serde(rename = "type")]
    target: RegexTarget,
    pattern: String,
    replace: String,
}

#[derive(Debug, Deserialize, Default)]
struct ReplaceConfig {
    #[serde(default)]
    schemas: HashMap<String, String>,
    #[serde(default)]
    tables: HashMap<String, String>,
    #[serde(default)]
    columns: HashMap<String, String>,
    #[serde(default)]
    regex: Vec<RegexReplacement>,
}

struct CompiledRegex {
    target: RegexTarget,
    pattern: Regex,
    replace: String,
}

pub struct Replace {
    schemas: HashMap<String, String>,
    tables: HashMap<String, String>,
    columns: HashMap<String, String>,
    regex: Vec<CompiledRegex>,
}

impl Replace {
    pub fn from_config(config: Value) -> ReplicationResult<Box<dyn Transformation>> {
        let parsed: ReplaceConfig = serde_json::from_value(config).map_err(|e| {
            ReplicationError::transform_validation("replace", format!("invalid config: {e}"))
        })?;

        if parsed.schemas.is_empty()
            && parsed.tables.is_empty()
            && parsed.columns.is_empty()
            && parsed.regex.is_empty()
        {
            return Err(ReplicationError::transform_validation(
                "replace",
                "at least one of schemas/tables/columns/regex must be configured",
            ));
        }

        let regex = parsed
            .regex
            .into_iter()
            .map(|r| {
                Regex::new(&r.pattern)
                    .map(|pattern| CompiledRegex {
                        target: r.target,
                        pattern,
                        replace: r.replace,
                    })
                    .map_err(|e| {
                        ReplicationError::transform_validation(
                            "replace",
                            format!("invalid regex pattern '{}': {e}", r.pattern),
                        )
                    })
            })
            .collect::<ReplicationResult<Vec<_>>>()?;

        Ok(Box::new(Self {
            schemas: parsed.schemas,
            tables: parsed.tables,
            columns: parsed.columns,
            regex,
        }))
    }

    fn rename_column(&self, name: &str) -> String {
        let mut current = self
            .columns
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string());
        for r in self.regex.iter().filter(|r| r.target == RegexTarget::Column) {
            if r.pattern.is_match(&current) {
                current = r.pattern.replace_all(&current, r.replace.as_str()).into_owned();
            }
        }
        current
    }

    fn rename_row_keys(&self, row: RowMap) -> RowMap {
        row.into_iter()
            .map(|(k, v)| (self.rename_column(&k), v))
            .collect()
    }
}

impl Transformation for Replace {
    fn transform_type(&self) -> &'static str {
        "replace"
    }

    fn apply(&self, mut event: Event) -> ReplicationResult<Outcome> {
        // Literal map replacements first.
        if let Some(replacement) = self.schemas.get(&event.payload.source.schema) {
            event.payload.source.schema = replacement.clone();
        }
        if let Some(replacement) = self.tables.get(&event.payload.source.table) {
            event.payload.source.table = replacement.clone();
        }
        event.payload.before = event.payload.before.map(|b| self.rename_row_keys(b));
        event.payload.after = event.payload.after.map(|a| self.rename_row_keys(a));

        // Regex replacements next.
        for r in &self.regex {
            match r.target {
                RegexTarget::Schema => {
                    if r.pattern.is_match(&event.payload.source.schema) {
                        event.payload.source.schema = r
                            .pattern
                            .replace_all(&event.payload.source.schema, r.replace.as_str())
                            .into_owned();
                    }
                }
                RegexTarget::Table => {
                    if r.pattern.is_match(&event.payload.source.table) {
                        event.payload.source.table = r
                            .pattern
                            .replace_all(&event.payload.source.table, r.replace.as_str())
                            .into_owned();
                    }
                }
                RegexTarget::Column => {
                    // Column renaming (both literal and regex) already
                    // happened together in `rename_row_keys` above so the
                    // new key names are consistent within one pass; here we
                    // only need to keep the static schema fields in sync.
                }
            }
        }

        for field in &mut event.schema.fields {
            field.field = self.rename_column(&field.field);
        }

        Ok(Outcome::Pass(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBuilder, Op, RowMap};
    use serde_json::Value;

    #[test]
    fn empty_config_fails_validation() {
        assert!(Replace::from_config(serde_json::json!({})).is_err());
    }

    #[test]
    fn invalid_regex_fails_validation() {
        let result = Replace::from_config(serde_json::json!({
            "regex": [{"type": "table", "pattern": "(", "replace": "x"}]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn no_matching_keys_leaves_event_unchanged() {
        let replace = Replace::from_config(serde_json::json!({"schemas": {"nope": "renamed"}})).unwrap();
        let event = EventBuilder::new(Op::Create, "pg1", "db")
            .relation("public", "users")
            .build();
        let before = serde_json::to_string(&event).unwrap();
        let Outcome::Pass(after_event) = replace.apply(event).unwrap() else {
            panic!("replace must not drop");
        };
        let after = serde_json::to_string(&after_event).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn literal_schema_and_column_rename() {
        let replace = Replace::from_config(serde_json::json!({
            "schemas": {"public": "app"},
            "columns": {"email": "email_address"}
        }))
        .unwrap();
        let mut after = RowMap::new();
        after.insert("email".to_string(), Value::from("a@b"));
        let event = EventBuilder::new(Op::Create, "pg1", "db")
            .relation("public", "users")
            .after(Some(after))
            .build();
        let Outcome::Pass(event) = replace.apply(event).unwrap() else {
            panic!("replace must not drop");
        };
        assert_eq!(event.payload.source.schema, "app");
        assert!(event.payload.after.unwrap().contains_key("email_address"));
    }

    #[test]
    fn regex_table_rename() {
        let replace = Replace::from_config(serde_json::json!({
            "regex": [{"type": "table", "pattern": "^tenant_(\\d+)_orders$", "replace": "orders"}]
        }))
        .unwrap();
        let event = EventBuilder::new(Op::Create, "pg1", "db")
            .relation("public", "tenant_42_orders")
            .build();
        let Outcome::Pass(event) = replace.apply(event).unwrap() else {
            panic!("replace must not drop");
        };
        assert_eq!(event.payload.source.table, "orders");
    }
}
