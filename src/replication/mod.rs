//! Replication subsystem: the WAL message processor (C4) and the
//! long-lived replication session that drives it (C3).

pub mod parser;
pub mod session;

pub use parser::{
    ColumnData, ColumnInfo, MessageProcessor, RelationInfo, ReplicationMessage, TupleData,
};
pub use session::{ReplicationSession, SessionConfig};
