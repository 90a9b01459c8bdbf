//! `filter` transformation: drops events by table reference, table-name
//! pattern, or operation code.
//!
//! No teacher analog; built in the registry's idiom (see `transform::mod`).

use super::{Outcome, Transformation};
use crate::errors::{ReplicationError, ReplicationResult};
use crate::event::{Event, Op};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize, Default)]
struct FilterConfig {
    #[serde(default)]
    tables: Vec<String>,
    #[serde(default, rename = "excludeTables")]
    exclude_tables: Vec<String>,
    #[serde(default, rename = "tablePattern")]
    table_pattern: Option<String>,
    #[serde(default)]
    operations: Vec<String>,
}

/// One `{schema}.{table}` table reference, matched per spec.md §4.5: either
/// side may be `*`, and a bare `table` (no dot) means "any schema, this
/// exact table name."
#[derive(Debug, Clone)]
struct TableRef {
    schema: Option<String>,
    table: String,
}

impl TableRef {
    fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((schema, table)) => Self {
                schema: if schema == "*" {
                    None
                } else {
                    Some(schema.to_string())
                },
                table: table.to_string(),
            },
            None => Self {
                schema: None,
                table: raw.to_string(),
            },
        }
    }

    fn matches(&self, schema: &str, table: &str) -> bool {
        let schema_ok = match &self.schema {
            None => true,
            Some(s) => s == schema,
        };
        let table_ok = self.table == "*" || self.table == table;
        schema_ok && table_ok
    }
}

pub struct Filter {
    tables: Vec<TableRef>,
    exclude_tables: Vec<TableRef>,
    table_pattern: Option<Regex>,
    operations: Vec<Op>,
}

impl Filter {
    pub fn from_config(config: Value) -> ReplicationResult<Box<dyn Transformation>> {
        let parsed: FilterConfig = serde_json::from_value(config).map_err(|e| {
            ReplicationError::transform_validation("filter", format!("invalid config: {e}"))
        })?;

        if parsed.tables.is_empty()
            && parsed.exclude_tables.is_empty()
            && parsed.table_pattern.is_none()
            && parsed.operations.is_empty()
        {
            return Err(ReplicationError::transform_validation(
                "filter",
                "at least one of tables/excludeTables/tablePattern/operations must be set",
            ));
        }

        let table_pattern = parsed
            .table_pattern
            .map(|p| {
                Regex::new(&p).map_err(|e| {
                    ReplicationError::transform_validation(
                        "filter",
                        format!("invalid tablePattern regex: {e}"),
                    )
                })
            })
            .transpose()?;

        let mut operations = Vec::new();
        for op in &parsed.operations {
            let Some(c) = op.chars().next().filter(|_| op.chars().count() == 1) else {
                return Err(ReplicationError::transform_validation(
                    "filter",
                    format!("invalid operation code: {op}"),
                ));
            };
            let Some(parsed_op) = Op::from_char(c) else {
                return Err(ReplicationError::transform_validation(
                    "filter",
                    format!("invalid operation code: {op}"),
                ));
            };
            operations.push(parsed_op);
        }

        Ok(Box::new(Self {
            tables: parsed.tables.iter().map(|t| TableRef::parse(t)).collect(),
            exclude_tables: parsed
                .exclude_tables
                .iter()
                .map(|t| TableRef::parse(t))
                .collect(),
            table_pattern,
            operations,
        }))
    }
}

impl Transformation for Filter {
    fn transform_type(&self) -> &'static str {
        "filter"
    }

    fn apply(&self, event: Event) -> ReplicationResult<Outcome> {
        let schema = &event.payload.source.schema;
        let table = &event.payload.source.table;

        if !self.operations.is_empty() && !self.operations.contains(&event.payload.op) {
            return Ok(Outcome::Drop);
        }

        if self.exclude_tables.iter().any(|r| r.matches(schema, table)) {
            return Ok(Outcome::Drop);
        }

        if !self.tables.is_empty() && !self.tables.iter().any(|r| r.matches(schema, table)) {
            return Ok(Outcome::Drop);
        }

        if let Some(pattern) = &self.table_pattern {
            let qualified = format!("{schema}.{table}");
            if !pattern.is_match(&qualified) && !pattern.is_match(table) {
                return Ok(Outcome::Drop);
            }
        }

        Ok(Outcome::Pass(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBuilder;

    fn event(op: Op, schema: &str, table: &str) -> Event {
        EventBuilder::new(op, "pg1", "db").relation(schema, table).build()
    }

    #[test]
    fn empty_config_fails_validation() {
        assert!(Filter::from_config(serde_json::json!({})).is_err());
    }

    #[test]
    fn invalid_operation_code_fails_validation() {
        assert!(Filter::from_config(serde_json::json!({"operations": ["x"]})).is_err());
    }

    #[test]
    fn invalid_regex_fails_validation() {
        assert!(Filter::from_config(serde_json::json!({"tablePattern": "("})).is_err());
    }

    #[test]
    fn filters_by_operation() {
        let filter = Filter::from_config(serde_json::json!({"operations": ["c"]})).unwrap();
        assert!(matches!(
            filter.apply(event(Op::Create, "public", "t")).unwrap(),
            Outcome::Pass(_)
        ));
        assert!(matches!(
            filter.apply(event(Op::Update, "public", "t")).unwrap(),
            Outcome::Drop
        ));
    }

    #[test]
    fn excludes_take_precedence_over_includes() {
        let filter = Filter::from_config(serde_json::json!({
            "tables": ["public.*"],
            "excludeTables": ["public.secrets"]
        }))
        .unwrap();
        assert!(matches!(
            filter.apply(event(Op::Create, "public", "secrets")).unwrap(),
            Outcome::Drop
        ));
        assert!(matches!(
            filter.apply(event(Op::Create, "public", "users")).unwrap(),
            Outcome::Pass(_)
        ));
    }

    #[test]
    fn bare_table_matches_any_schema() {
        let filter = Filter::from_config(serde_json::json!({"tables": ["users"]})).unwrap();
        assert!(matches!(
            filter.apply(event(Op::Create, "tenant_a", "users")).unwrap(),
            Outcome::Pass(_)
        ));
    }

    #[test]
    fn table_pattern_checked_against_qualified_and_bare_name() {
        let filter = Filter::from_config(serde_json::json!({"tablePattern": "^public\\."})).unwrap();
        assert!(matches!(
            filter.apply(event(Op::Create, "public", "t")).unwrap(),
            Outcome::Pass(_)
        ));
        assert!(matches!(
            filter.apply(event(Op::Create, "other", "t")).unwrap(),
            Outcome::Drop
        ));
    }

    #[test]
    fn idempotent_decision() {
        let filter = Filter::from_config(serde_json::json!({"operations": ["c"]})).unwrap();
        let e = event(Op::Update, "public", "t");
        let first = matches!(filter.apply(e.clone()).unwrap(), Outcome::Drop);
        let second = matches!(filter.apply(e).unwrap(), Outcome::Drop);
        assert_eq!(first, second);
    }
}
