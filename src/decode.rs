//! Column Decoder (C2): per-OID text decoding of tuple column data into
//! `serde_json::Value`s suitable for an `Event`'s `before`/`after` maps.
//!
//! Grounded on the teacher's `event_sink::pg_type_conversion::PgType` OID
//! table, generalized from "decode into a `ColumnValue` enum" to "decode
//! directly into a `serde_json::Value`" since the Event model stores rows
//! as JSON maps, not a bespoke value enum.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

pub type Oid = u32;

/// OID -> decoding strategy. Only the types whose text representation needs
/// special handling are listed; anything else decodes as a JSON string.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgType {
    Bool = 16,
    Int2 = 21,
    Int4 = 23,
    Int8 = 20,
    Float4 = 700,
    Float8 = 701,
    Numeric = 1700,
    Json = 114,
    Jsonb = 3802,
    Uuid = 2950,
    Date = 1082,
    Timestamp = 1114,
    Timestamptz = 1184,
    Text = 25,
    Varchar = 1043,
}

impl TryFrom<Oid> for PgType {
    type Error = ();

    fn try_from(value: Oid) -> Result<Self, Self::Error> {
        match value {
            16 => Ok(PgType::Bool),
            20 => Ok(PgType::Int8),
            21 => Ok(PgType::Int2),
            23 => Ok(PgType::Int4),
            25 => Ok(PgType::Text),
            114 => Ok(PgType::Json),
            700 => Ok(PgType::Float4),
            701 => Ok(PgType::Float8),
            1043 => Ok(PgType::Varchar),
            1082 => Ok(PgType::Date),
            1114 => Ok(PgType::Timestamp),
            1184 => Ok(PgType::Timestamptz),
            1700 => Ok(PgType::Numeric),
            2950 => Ok(PgType::Uuid),
            3802 => Ok(PgType::Jsonb),
            _ => Err(()),
        }
    }
}

/// OID -> codec lookup table, built once per replication session from the
/// relation cache and consulted for every column of every tuple.
#[derive(Debug, Default, Clone)]
pub struct TypeMap {
    oids: HashMap<Oid, PgType>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the codec for a column's OID; a no-op for OIDs with no
    /// special codec (they fall back to string decoding).
    pub fn register(&mut self, oid: Oid) {
        if let Ok(ty) = PgType::try_from(oid) {
            self.oids.insert(oid, ty);
        }
    }

    pub fn lookup(&self, oid: Oid) -> Option<PgType> {
        self.oids.get(&oid).copied()
    }
}

/// `timestamptz`'s text format, as produced by `pgoutput` for a column
/// decoded with `proto_version 2`: `YYYY-MM-DD HH:MM:SS[.ffffff]+TZ`.
fn parse_timestamptz(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z").map(|dt| dt.to_utc())
}

/// Decode one column's marker + raw text bytes into a JSON value, per
/// spec.md §4.3's marker semantics:
/// - `n` -> JSON null (the value is absent)
/// - `u` -> JSON null (unchanged TOAST; collapsed per the Design Notes'
///   accepted Open Question resolution — no sentinel is introduced)
/// - `t` -> dispatch to the OID's codec, or raw string if unregistered
/// - anything else -> log and decode to null
pub fn decode_column(marker: char, raw: &[u8], oid: Oid, type_map: &TypeMap) -> Value {
    match marker {
        'n' => Value::Null,
        'u' => Value::Null,
        't' => {
            let text = String::from_utf8_lossy(raw).into_owned();
            decode_text(&text, oid, type_map)
        }
        other => {
            warn!("unknown tuple column marker '{}', decoding as null", other);
            Value::Null
        }
    }
}

fn decode_text(text: &str, oid: Oid, type_map: &TypeMap) -> Value {
    let Some(ty) = type_map.lookup(oid) else {
        return Value::String(text.to_string());
    };

    match ty {
        PgType::Bool => match text {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            other => {
                warn!("unexpected boolean text '{}', keeping as string", other);
                Value::String(text.to_string())
            }
        },
        // Numeric values round-trip as 64-bit floats per spec.md §4.3 — a
        // consequence of the JSON decoding used downstream.
        PgType::Int2 | PgType::Int4 | PgType::Int8 | PgType::Float4 | PgType::Float8
        | PgType::Numeric => match text.parse::<f64>() {
            Ok(n) => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(text.to_string())),
            Err(e) => {
                warn!("numeric column parse failed: {}", e);
                Value::String(text.to_string())
            }
        },
        PgType::Json | PgType::Jsonb => match Value::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("json column parse failed: {}", e);
                Value::String(text.to_string())
            }
        },
        PgType::Uuid => match uuid::Uuid::parse_str(text) {
            Ok(u) => Value::String(u.to_string()),
            Err(e) => {
                warn!("uuid column parse failed: {}", e);
                Value::String(text.to_string())
            }
        },
        PgType::Date => match NaiveDate::from_str(text) {
            Ok(d) => Value::String(d.to_string()),
            Err(e) => {
                warn!("date column parse failed: {}", e);
                Value::String(text.to_string())
            }
        },
        PgType::Timestamp => match NaiveDateTime::from_str(text) {
            Ok(ts) => Value::String(ts.to_string()),
            Err(e) => {
                warn!("timestamp column parse failed: {}", e);
                Value::String(text.to_string())
            }
        },
        PgType::Timestamptz => match parse_timestamptz(text) {
            Ok(ts) => Value::String(ts.to_rfc3339()),
            Err(e) => {
                warn!("timestamptz column parse failed: {}", e);
                Value::String(text.to_string())
            }
        },
        PgType::Text | PgType::Varchar => Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_marker_decodes_to_null() {
        assert_eq!(decode_column('n', b"", 23, &TypeMap::new()), Value::Null);
    }

    #[test]
    fn unchanged_toast_collapses_to_null() {
        assert_eq!(decode_column('u', b"", 25, &TypeMap::new()), Value::Null);
    }

    #[test]
    fn unknown_marker_logs_and_decodes_to_null() {
        assert_eq!(decode_column('?', b"x", 25, &TypeMap::new()), Value::Null);
    }

    #[test]
    fn text_without_codec_is_raw_string() {
        let v = decode_column('t', b"hello", 99999, &TypeMap::new());
        assert_eq!(v, Value::String("hello".to_string()));
    }

    #[test]
    fn int_decodes_as_number() {
        let mut tm = TypeMap::new();
        tm.register(23);
        let v = decode_column('t', b"42", 23, &tm);
        assert_eq!(v, Value::from(42.0));
    }

    #[test]
    fn bool_decodes() {
        let mut tm = TypeMap::new();
        tm.register(16);
        assert_eq!(decode_column('t', b"t", 16, &tm), Value::Bool(true));
        assert_eq!(decode_column('t', b"f", 16, &tm), Value::Bool(false));
    }

    #[test]
    fn jsonb_decodes_as_value() {
        let mut tm = TypeMap::new();
        tm.register(3802);
        let v = decode_column('t', br#"{"a":1}"#, 3802, &tm);
        assert_eq!(v, serde_json::json!({"a": 1}));
    }

    #[test]
    fn uuid_decodes_as_canonical_string() {
        let mut tm = TypeMap::new();
        tm.register(2950);
        let v = decode_column(
            't',
            b"550e8400-e29b-41d4-a716-446655440000",
            2950,
            &tm,
        );
        assert_eq!(v, Value::String("550e8400-e29b-41d4-a716-446655440000".to_string()));
    }

    #[test]
    fn malformed_uuid_falls_back_to_raw_string() {
        let mut tm = TypeMap::new();
        tm.register(2950);
        let v = decode_column('t', b"not-a-uuid", 2950, &tm);
        assert_eq!(v, Value::String("not-a-uuid".to_string()));
    }
}
