//! WAL Message Processor (C4): parses a raw logical-replication ("pgoutput")
//! payload into an intermediate [`ReplicationMessage`], then turns that,
//! together with the relation cache and column decoder, into zero or more
//! [`Event`]s.
//!
//! Grounded on the teacher's `parser::MessageParser` (byte-level message
//! parsing) and `types::ReplicationMessage`/`RelationInfo`/`TupleData`
//! (the wire-shaped intermediate), reshaped to emit `Event`s directly
//! rather than the teacher's `FormattedEvent`/JSON-debug output — this is
//! the two-stage parse-then-format split SPEC_FULL.md §4.2 describes.

use crate::decode::{decode_column, Oid, TypeMap};
use crate::errors::{ReplicationError, ReplicationResult};
use crate::event::{Event, EventBuilder, Op, RowMap};
use crate::utils::{buf_recv_i16, buf_recv_i32, buf_recv_u32, Xid};
use std::collections::HashMap;
use tracing::{debug, error, warn};

/// A table column's static metadata, as declared by a RELATION message.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub key_flag: i8,
    pub column_name: String,
    pub column_type: Oid,
    pub atttypmod: i32,
}

/// Cached per table OID for the duration of the replication session
/// (spec.md §3's Relation descriptor).
#[derive(Debug, Clone)]
pub struct RelationInfo {
    pub oid: Oid,
    pub namespace: String,
    pub relation_name: String,
    pub replica_identity: char,
    pub columns: Vec<ColumnInfo>,
}

/// One column's wire-encoded value within a tuple.
#[derive(Debug, Clone)]
pub struct ColumnData {
    pub marker: char,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TupleData {
    pub columns: Vec<ColumnData>,
    pub processed_length: usize,
}

/// The wire-shaped intermediate result of parsing one XLogData payload,
/// before it is turned into `Event`s.
#[derive(Debug, Clone)]
pub enum ReplicationMessage {
    Begin,
    Commit,
    Relation {
        relation: RelationInfo,
    },
    Insert {
        relation_id: Oid,
        tuple_data: TupleData,
        xid: Option<Xid>,
    },
    Update {
        relation_id: Oid,
        old_tuple_data: Option<TupleData>,
        new_tuple_data: TupleData,
        xid: Option<Xid>,
    },
    Delete {
        relation_id: Oid,
        old_tuple_data: TupleData,
        xid: Option<Xid>,
    },
    Truncate {
        relation_ids: Vec<Oid>,
        xid: Option<Xid>,
    },
    StreamStart,
    StreamStop,
    StreamCommit,
    StreamAbort,
    Origin,
    Type,
    LogicalDecodingMessage,
}

/// Parses the raw byte stream (stage one) and keeps the relation cache and
/// in-stream flag needed to interpret it (stage two, event construction).
pub struct MessageProcessor {
    relations: HashMap<Oid, RelationInfo>,
    type_map: TypeMap,
    in_stream: bool,
}

impl Default for MessageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageProcessor {
    pub fn new() -> Self {
        Self {
            relations: HashMap::new(),
            type_map: TypeMap::new(),
            in_stream: false,
        }
    }

    pub fn in_stream(&self) -> bool {
        self.in_stream
    }

    pub fn relation(&self, oid: Oid) -> Option<&RelationInfo> {
        self.relations.get(&oid)
    }

    /// Parse one XLogData payload and produce the events it represents.
    /// `lsn` is the XLogData's `data_start`, supplied by the caller (the
    /// replication session), `server_name`/`db_name` populate `source`.
    pub fn process(
        &mut self,
        data: &[u8],
        lsn: u64,
        server_name: &str,
        db_name: &str,
        ts_ms: i64,
    ) -> ReplicationResult<Vec<Event>> {
        let message = parse_wal_message(data)?;
        self.to_events(message, lsn, server_name, db_name, ts_ms)
    }

    fn to_events(
        &mut self,
        message: ReplicationMessage,
        lsn: u64,
        server_name: &str,
        db_name: &str,
        ts_ms: i64,
    ) -> ReplicationResult<Vec<Event>> {
        match message {
            ReplicationMessage::Relation { relation } => {
                debug!(
                    "caching relation {} ({}.{})",
                    relation.oid, relation.namespace, relation.relation_name
                );
                for col in &relation.columns {
                    self.type_map.register(col.column_type);
                }
                self.relations.insert(relation.oid, relation);
                Ok(vec![])
            }
            ReplicationMessage::Begin | ReplicationMessage::Commit => Ok(vec![]),
            ReplicationMessage::StreamStart => {
                self.in_stream = true;
                Ok(vec![])
            }
            ReplicationMessage::StreamStop => {
                self.in_stream = false;
                Ok(vec![])
            }
            ReplicationMessage::StreamCommit
            | ReplicationMessage::StreamAbort
            | ReplicationMessage::Origin
            | ReplicationMessage::Type
            | ReplicationMessage::LogicalDecodingMessage => Ok(vec![]),
            ReplicationMessage::Insert {
                relation_id,
                tuple_data,
                xid,
            } => {
                let Some(rel) = self.require_relation(relation_id) else {
                    error!("INSERT for unknown relation OID {}; dropping event", relation_id);
                    return Ok(vec![]);
                };
                let after = self.row_from_tuple(&tuple_data, rel);
                let event = EventBuilder::new(Op::Create, server_name, db_name)
                    .relation(rel.namespace.clone(), rel.relation_name.clone())
                    .after(Some(after))
                    .lsn(lsn)
                    .tx_id(xid)
                    .ts_ms(ts_ms)
                    .build();
                Ok(vec![event])
            }
            ReplicationMessage::Update {
                relation_id,
                old_tuple_data,
                new_tuple_data,
                xid,
            } => {
                let Some(rel) = self.require_relation(relation_id) else {
                    error!("UPDATE for unknown relation OID {}; dropping event", relation_id);
                    return Ok(vec![]);
                };
                let before = old_tuple_data.map(|t| self.row_from_tuple(&t, rel));
                let after = self.row_from_tuple(&new_tuple_data, rel);
                let event = EventBuilder::new(Op::Update, server_name, db_name)
                    .relation(rel.namespace.clone(), rel.relation_name.clone())
                    .before(before)
                    .after(Some(after))
                    .lsn(lsn)
                    .tx_id(xid)
                    .ts_ms(ts_ms)
                    .build();
                Ok(vec![event])
            }
            ReplicationMessage::Delete {
                relation_id,
                old_tuple_data,
                xid,
            } => {
                let Some(rel) = self.require_relation(relation_id) else {
                    error!("DELETE for unknown relation OID {}; dropping event", relation_id);
                    return Ok(vec![]);
                };
                let before = self.row_from_tuple(&old_tuple_data, rel);
                let event = EventBuilder::new(Op::Delete, server_name, db_name)
                    .relation(rel.namespace.clone(), rel.relation_name.clone())
                    .before(Some(before))
                    .lsn(lsn)
                    .tx_id(xid)
                    .ts_ms(ts_ms)
                    .build();
                Ok(vec![event])
            }
            ReplicationMessage::Truncate { relation_ids, xid } => {
                let Some(first) = relation_ids.first().and_then(|id| self.relations.get(id))
                else {
                    // Tie-break per spec.md §4.2: no relation cached yet, no
                    // source can be reconstructed. Drop, don't panic.
                    error!("TRUNCATE received before any RELATION was cached; dropping event");
                    return Ok(vec![]);
                };
                let event = EventBuilder::new(Op::Truncate, server_name, db_name)
                    .relation(first.namespace.clone(), first.relation_name.clone())
                    .lsn(lsn)
                    .tx_id(xid)
                    .ts_ms(ts_ms)
                    .build();
                Ok(vec![event])
            }
        }
    }

    fn require_relation(&self, oid: Oid) -> Option<&RelationInfo> {
        self.relations.get(&oid)
    }

    fn row_from_tuple(&self, tuple: &TupleData, rel: &RelationInfo) -> RowMap {
        let mut row = RowMap::new();
        for (i, col) in tuple.columns.iter().enumerate() {
            let Some(col_info) = rel.columns.get(i) else {
                warn!(
                    "tuple has more columns ({}) than relation {} declares ({})",
                    tuple.columns.len(),
                    rel.relation_name,
                    rel.columns.len()
                );
                continue;
            };
            let value = decode_column(col.marker, &col.raw, col_info.column_type, &self.type_map);
            row.insert(col_info.column_name.clone(), value);
        }
        row
    }
}

/// Parse one raw logical-replication message into the wire-shaped
/// intermediate. Byte layouts below follow `pgoutput`'s protocol version 2
/// message formats (begin/commit/relation/insert/update/delete/truncate
/// plus streaming variants).
pub fn parse_wal_message(buffer: &[u8]) -> ReplicationResult<ReplicationMessage> {
    if buffer.is_empty() {
        return Err(ReplicationError::parse("empty WAL message buffer"));
    }

    match buffer[0] as char {
        'B' => Ok(ReplicationMessage::Begin),
        'C' => Ok(ReplicationMessage::Commit),
        'R' => parse_relation(buffer),
        'I' => parse_insert(buffer),
        'U' => parse_update(buffer),
        'D' => parse_delete(buffer),
        'T' => parse_truncate(buffer),
        'S' => Ok(ReplicationMessage::StreamStart),
        'E' => Ok(ReplicationMessage::StreamStop),
        'c' => Ok(ReplicationMessage::StreamCommit),
        'A' => Ok(ReplicationMessage::StreamAbort),
        'O' => Ok(ReplicationMessage::Origin),
        'Y' => Ok(ReplicationMessage::Type),
        'M' => Ok(ReplicationMessage::LogicalDecodingMessage),
        other => {
            warn!("unknown WAL message type '{}', skipping", other);
            Err(ReplicationError::parse(format!(
                "unknown WAL message type: {other}"
            )))
        }
    }
}

fn read_cstring(buffer: &[u8], offset: &mut usize) -> ReplicationResult<String> {
    let start = *offset;
    while *offset < buffer.len() && buffer[*offset] != 0 {
        *offset += 1;
    }
    if *offset >= buffer.len() {
        return Err(ReplicationError::parse("string not null-terminated"));
    }
    let s = String::from_utf8_lossy(&buffer[start..*offset]).into_owned();
    *offset += 1;
    Ok(s)
}

fn parse_relation(buffer: &[u8]) -> ReplicationResult<ReplicationMessage> {
    if buffer.len() < 7 {
        return Err(ReplicationError::parse("relation message too short"));
    }
    let mut offset = 1;
    let oid = buf_recv_u32(&buffer[offset..]);
    offset += 4;

    let namespace = read_cstring(buffer, &mut offset)?;
    let relation_name = read_cstring(buffer, &mut offset)?;

    if offset >= buffer.len() {
        return Err(ReplicationError::parse("relation message truncated"));
    }
    let replica_identity = buffer[offset] as char;
    offset += 1;

    if offset + 2 > buffer.len() {
        return Err(ReplicationError::parse("relation message truncated"));
    }
    let column_count = buf_recv_i16(&buffer[offset..]);
    offset += 2;

    let mut columns = Vec::new();
    for _ in 0..column_count {
        if offset >= buffer.len() {
            return Err(ReplicationError::parse("column data truncated"));
        }
        let key_flag = buffer[offset] as i8;
        offset += 1;
        let column_name = read_cstring(buffer, &mut offset)?;
        if offset + 8 > buffer.len() {
            return Err(ReplicationError::parse("column data truncated"));
        }
        let column_type = buf_recv_u32(&buffer[offset..]);
        offset += 4;
        let atttypmod = buf_recv_i32(&buffer[offset..]);
        offset += 4;
        columns.push(ColumnInfo {
            key_flag,
            column_name,
            column_type,
            atttypmod,
        });
    }

    Ok(ReplicationMessage::Relation {
        relation: RelationInfo {
            oid,
            namespace,
            relation_name,
            replica_identity,
            columns,
        },
    })
}

fn parse_tuple_data(buffer: &[u8]) -> ReplicationResult<TupleData> {
    if buffer.len() < 2 {
        return Err(ReplicationError::parse("tuple data too short"));
    }
    let mut offset = 0;
    let column_count = buf_recv_i16(&buffer[offset..]);
    offset += 2;

    let mut columns = Vec::new();
    for _ in 0..column_count {
        if offset >= buffer.len() {
            return Err(ReplicationError::parse("tuple data truncated"));
        }
        let marker = buffer[offset] as char;
        offset += 1;

        let raw = match marker {
            'n' | 'u' => Vec::new(),
            't' => {
                if offset + 4 > buffer.len() {
                    return Err(ReplicationError::parse("text column length truncated"));
                }
                let len = buf_recv_i32(&buffer[offset..]);
                offset += 4;
                if len < 0 || offset + len as usize > buffer.len() {
                    return Err(ReplicationError::parse("text column data truncated"));
                }
                let data = buffer[offset..offset + len as usize].to_vec();
                offset += len as usize;
                data
            }
            other => {
                return Err(ReplicationError::parse(format!(
                    "unknown tuple column marker: {other}"
                )));
            }
        };

        columns.push(ColumnData { marker, raw });
    }

    Ok(TupleData {
        columns,
        processed_length: offset,
    })
}

fn parse_insert(buffer: &[u8]) -> ReplicationResult<ReplicationMessage> {
    if buffer.len() < 6 {
        return Err(ReplicationError::parse("insert message too short"));
    }
    let mut offset = 1;
    let tx_or_oid = buf_recv_u32(&buffer[offset..]);
    offset += 4;

    let (relation_id, xid) = if offset < buffer.len() && buffer[offset] == b'N' {
        (tx_or_oid, None)
    } else {
        let relation_id = buf_recv_u32(&buffer[offset..]);
        offset += 4;
        (relation_id, Some(tx_or_oid))
    };

    if offset >= buffer.len() || buffer[offset] != b'N' {
        return Err(ReplicationError::parse("expected 'N' marker in insert message"));
    }
    offset += 1;

    let tuple_data = parse_tuple_data(&buffer[offset..])?;
    Ok(ReplicationMessage::Insert {
        relation_id,
        tuple_data,
        xid,
    })
}

fn parse_update(buffer: &[u8]) -> ReplicationResult<ReplicationMessage> {
    if buffer.len() < 6 {
        return Err(ReplicationError::parse("update message too short"));
    }
    let mut offset = 1;
    let tx_or_oid = buf_recv_u32(&buffer[offset..]);
    offset += 4;

    let (relation_id, xid) = if offset < buffer.len()
        && matches!(buffer[offset], b'K' | b'O' | b'N')
    {
        (tx_or_oid, None)
    } else {
        let relation_id = buf_recv_u32(&buffer[offset..]);
        offset += 4;
        (relation_id, Some(tx_or_oid))
    };

    if offset >= buffer.len() {
        return Err(ReplicationError::parse("update message truncated"));
    }
    let marker = buffer[offset] as char;
    offset += 1;

    let old_tuple_data = match marker {
        'K' | 'O' => {
            let tuple = parse_tuple_data(&buffer[offset..])?;
            offset += tuple.processed_length;
            if offset >= buffer.len() || buffer[offset] != b'N' {
                return Err(ReplicationError::parse("expected 'N' marker after old tuple"));
            }
            offset += 1;
            Some(tuple)
        }
        'N' => None,
        other => return Err(ReplicationError::parse(format!("invalid update marker: {other}"))),
    };

    let new_tuple_data = parse_tuple_data(&buffer[offset..])?;
    Ok(ReplicationMessage::Update {
        relation_id,
        old_tuple_data,
        new_tuple_data,
        xid,
    })
}

fn parse_delete(buffer: &[u8]) -> ReplicationResult<ReplicationMessage> {
    if buffer.len() < 6 {
        return Err(ReplicationError::parse("delete message too short"));
    }
    let mut offset = 1;
    let tx_or_oid = buf_recv_u32(&buffer[offset..]);
    offset += 4;

    let (relation_id, xid) = if offset < buffer.len() && matches!(buffer[offset], b'K' | b'O') {
        offset += 1;
        (tx_or_oid, None)
    } else {
        let relation_id = buf_recv_u32(&buffer[offset..]);
        offset += 4;
        if offset >= buffer.len() {
            return Err(ReplicationError::parse("delete message truncated"));
        }
        offset += 1; // key type byte
        (relation_id, Some(tx_or_oid))
    };

    let old_tuple_data = parse_tuple_data(&buffer[offset..])?;
    Ok(ReplicationMessage::Delete {
        relation_id,
        old_tuple_data,
        xid,
    })
}

fn parse_truncate(buffer: &[u8]) -> ReplicationResult<ReplicationMessage> {
    if buffer.len() < 10 {
        return Err(ReplicationError::parse("truncate message too short"));
    }
    let mut offset = 1;
    let xid_or_num = buf_recv_u32(&buffer[offset..]);
    offset += 4;
    let possible_num = buf_recv_u32(&buffer[offset..]);
    offset += 4;

    let remaining = buffer.len() - offset;
    let expected_streaming_size = 1 + (possible_num as usize * 4);

    let (xid, num_relations) = if remaining == expected_streaming_size {
        (Some(xid_or_num), possible_num)
    } else {
        offset -= 4;
        (None, xid_or_num)
    };

    if offset >= buffer.len() {
        return Err(ReplicationError::parse("truncate message truncated"));
    }
    offset += 1; // flags byte, unused by the Event model

    let mut relation_ids = Vec::new();
    for _ in 0..num_relations {
        if offset + 4 > buffer.len() {
            return Err(ReplicationError::parse("truncate relation ids truncated"));
        }
        relation_ids.push(buf_recv_u32(&buffer[offset..]));
        offset += 4;
    }

    Ok(ReplicationMessage::Truncate { relation_ids, xid })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation_bytes() -> Vec<u8> {
        let mut buf = vec![b'R'];
        buf.extend_from_slice(&100u32.to_be_bytes()); // oid
        buf.extend_from_slice(b"public\0");
        buf.extend_from_slice(b"test_stream\0");
        buf.push(b'f'); // replica identity
        buf.extend_from_slice(&2i16.to_be_bytes()); // column count
        // id column: key, int4 (23)
        buf.push(1);
        buf.extend_from_slice(b"id\0");
        buf.extend_from_slice(&23u32.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        // name column: not key, text (25)
        buf.push(0);
        buf.extend_from_slice(b"name\0");
        buf.extend_from_slice(&25u32.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        buf
    }

    fn insert_bytes(id: &str, name: &str) -> Vec<u8> {
        let mut buf = vec![b'I'];
        buf.extend_from_slice(&100u32.to_be_bytes()); // relation oid (not streaming)
        buf.push(b'N');
        buf.extend_from_slice(&2i16.to_be_bytes());
        buf.push(b't');
        buf.extend_from_slice(&(id.len() as i32).to_be_bytes());
        buf.extend_from_slice(id.as_bytes());
        buf.push(b't');
        buf.extend_from_slice(&(name.len() as i32).to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf
    }

    #[test]
    fn relation_then_insert_produces_create_event() {
        let mut processor = MessageProcessor::new();
        let events = processor
            .process(&relation_bytes(), 10, "pg1", "mydb", 1000)
            .unwrap();
        assert!(events.is_empty());

        let events = processor
            .process(&insert_bytes("1", "test1"), 20, "pg1", "mydb", 2000)
            .unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.payload.op.as_char(), 'c');
        assert!(event.payload.before.is_none());
        let after = event.payload.after.as_ref().unwrap();
        assert_eq!(after.get("name").unwrap(), "test1");
        assert_eq!(event.payload.source.schema, "public");
        assert_eq!(event.payload.source.table, "test_stream");
    }

    #[test]
    fn truncate_before_relation_drops_silently() {
        let mut processor = MessageProcessor::new();
        let mut buf = vec![b'T'];
        buf.extend_from_slice(&1u32.to_be_bytes()); // num_relations (non-streaming)
        buf.push(0); // flags
        buf.extend_from_slice(&999u32.to_be_bytes());
        let events = processor.process(&buf, 1, "pg1", "mydb", 100).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn insert_on_unknown_relation_drops_event() {
        let mut processor = MessageProcessor::new();
        let events = processor
            .process(&insert_bytes("1", "x"), 1, "pg1", "mydb", 100)
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn stream_start_and_stop_toggle_flag() {
        let mut processor = MessageProcessor::new();
        processor.process(b"S", 1, "pg1", "mydb", 1).unwrap();
        assert!(processor.in_stream());
        processor.process(b"E", 1, "pg1", "mydb", 1).unwrap();
        assert!(!processor.in_stream());
    }
}
