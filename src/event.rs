//! The CDC envelope (C1): a Debezium-compatible `Event`, its `payload`, and
//! the builders used by the WAL message processor to construct one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Operation code carried by every emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "t")]
    Truncate,
}

impl Op {
    pub fn as_char(&self) -> char {
        match self {
            Op::Create => 'c',
            Op::Update => 'u',
            Op::Delete => 'd',
            Op::Read => 'r',
            Op::Truncate => 't',
        }
    }

    /// Parse a single-letter operation code, as used by the `filter`
    /// transformation's `operations` config.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'c' => Some(Op::Create),
            'u' => Some(Op::Update),
            'd' => Some(Op::Delete),
            'r' => Some(Op::Read),
            't' => Some(Op::Truncate),
            _ => None,
        }
    }
}

/// `payload.source` metadata, fixed to the fields spec.md §3 names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub version: String,
    pub connector: String,
    pub name: String,
    pub ts_ms: i64,
    pub snapshot: bool,
    pub db: String,
    /// `"[lsn,lsn]"`, kept as a string per the Debezium envelope.
    pub sequence: String,
    pub schema: String,
    pub table: String,
    #[serde(rename = "txId")]
    pub tx_id: Option<u32>,
    pub lsn: u64,
    #[serde(rename = "xmin", skip_serializing_if = "Option::is_none")]
    pub in_progress_xid: Option<u32>,
}

/// `payload.transaction`, present only when the upstream supplied one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub total_order: i64,
    pub data_collection_order: i64,
}

pub type RowMap = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<RowMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<RowMap>,
    pub source: Source,
    pub op: Op,
    pub ts_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

/// A single field declaration of the static Debezium schema (`schema.fields`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    #[serde(rename = "type")]
    pub field_type: String,
    pub optional: bool,
    pub field: String,
}

/// The static, self-describing `schema` half of the envelope. It never
/// varies per-event except when the `replace` transformation's `columns`
/// rewrites the matching field names (see `transform::replace`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub fields: Vec<SchemaField>,
    pub optional: bool,
    pub name: String,
}

impl Schema {
    /// The fixed Debezium PostgreSQL-connector envelope shape: `before`,
    /// `after`, `source`, `op`, `ts_ms`, `transaction`.
    pub fn debezium_envelope() -> Self {
        Self {
            schema_type: "struct".to_string(),
            optional: false,
            name: "io.debezium.connector.postgresql.Envelope".to_string(),
            fields: vec![
                SchemaField {
                    field_type: "struct".to_string(),
                    optional: true,
                    field: "before".to_string(),
                },
                SchemaField {
                    field_type: "struct".to_string(),
                    optional: true,
                    field: "after".to_string(),
                },
                SchemaField {
                    field_type: "struct".to_string(),
                    optional: false,
                    field: "source".to_string(),
                },
                SchemaField {
                    field_type: "string".to_string(),
                    optional: false,
                    field: "op".to_string(),
                },
                SchemaField {
                    field_type: "int64".to_string(),
                    optional: true,
                    field: "ts_ms".to_string(),
                },
                SchemaField {
                    field_type: "struct".to_string(),
                    optional: true,
                    field: "transaction".to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub schema: Schema,
    pub payload: Payload,
}

/// Builds one `Event` from the pieces the WAL message processor assembles:
/// relation identity, row data, and the caller-supplied LSN. Mirrors the
/// teacher's `event_formatter::EventBuilder`, generalized from the internal
/// `FormattedEvent` shape to the Debezium `Event` envelope.
pub struct EventBuilder {
    op: Op,
    before: Option<RowMap>,
    after: Option<RowMap>,
    schema_name: String,
    table_name: String,
    db_name: String,
    server_name: String,
    lsn: u64,
    tx_id: Option<u32>,
    ts_ms: i64,
    transaction: Option<Transaction>,
}

impl EventBuilder {
    pub fn new(op: Op, server_name: impl Into<String>, db_name: impl Into<String>) -> Self {
        Self {
            op,
            before: None,
            after: None,
            schema_name: String::new(),
            table_name: String::new(),
            db_name: db_name.into(),
            server_name: server_name.into(),
            lsn: 0,
            tx_id: None,
            ts_ms: 0,
            transaction: None,
        }
    }

    pub fn before(mut self, before: Option<RowMap>) -> Self {
        self.before = before;
        self
    }

    pub fn after(mut self, after: Option<RowMap>) -> Self {
        self.after = after;
        self
    }

    pub fn relation(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.schema_name = schema.into();
        self.table_name = table.into();
        self
    }

    pub fn lsn(mut self, lsn: u64) -> Self {
        self.lsn = lsn;
        self
    }

    pub fn tx_id(mut self, tx_id: Option<u32>) -> Self {
        self.tx_id = tx_id;
        self
    }

    pub fn ts_ms(mut self, ts_ms: i64) -> Self {
        self.ts_ms = ts_ms;
        self
    }

    pub fn transaction(mut self, transaction: Option<Transaction>) -> Self {
        self.transaction = transaction;
        self
    }

    pub fn build(self) -> Event {
        let sequence = format!("[{},{}]", self.lsn, self.lsn);
        let source = Source {
            version: env!("CARGO_PKG_VERSION").to_string(),
            connector: "postgresql".to_string(),
            name: self.server_name,
            ts_ms: self.ts_ms,
            snapshot: false,
            db: self.db_name,
            sequence,
            schema: self.schema_name,
            table: self.table_name,
            tx_id: self.tx_id,
            lsn: self.lsn,
            in_progress_xid: None,
        };

        Event {
            schema: Schema::debezium_envelope(),
            payload: Payload {
                before: self.before,
                after: self.after,
                source,
                op: self.op,
                ts_ms: self.ts_ms,
                transaction: self.transaction,
            },
        }
    }
}

/// A `HashMap<String, serde_json::Value>` is the convenient shape for
/// transformations to operate over; conversions to/from the `RowMap` used
/// on the wire keep the ordering Debezium consumers don't rely on anyway
/// (see the Design Notes on generic container abstractions).
pub fn row_to_hashmap(row: &RowMap) -> HashMap<String, Value> {
    row.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

pub fn hashmap_to_row(map: HashMap<String, Value>) -> RowMap {
    map.into_iter().collect()
}
