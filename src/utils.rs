//! Utility functions shared across the pipeline
//!
//! - Byte manipulation with proper (network/big-endian) ordering, used by
//!   `protocol::buffer` to read and write the wire structures.
//! - PostgreSQL timestamp conversion, used by the column decoder.

use chrono::DateTime;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds from the Unix epoch (1970-01-01) to the PostgreSQL epoch (2000-01-01).
pub const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

// Type aliases matching PostgreSQL internal types
pub type XLogRecPtr = u64;
pub type Xid = u32;
pub type Oid = u32;
pub type TimestampTz = i64;

pub const INVALID_XLOG_REC_PTR: XLogRecPtr = 0;

/// Convert a `SystemTime` to a PostgreSQL-compatible timestamp (microseconds
/// since the PostgreSQL epoch), by shifting the epoch from Unix to PG.
pub fn system_time_to_postgres_timestamp(time: SystemTime) -> TimestampTz {
    let duration_since_unix = time
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime is before Unix epoch");

    let unix_secs = duration_since_unix.as_secs() as i64;
    let unix_micros = unix_secs * 1_000_000 + (duration_since_unix.subsec_micros() as i64);

    unix_micros - PG_EPOCH_OFFSET_SECS * 1_000_000
}

/// Convert a PostgreSQL timestamp (microseconds since the PG epoch) into a
/// `"YYYY-MM-DD HH:MM:SS.sss UTC"` display string.
pub fn format_timestamp_from_pg(ts: i64) -> String {
    let secs = ts / 1_000_000 + PG_EPOCH_OFFSET_SECS;
    let nsecs = (ts % 1_000_000) * 1_000;

    let datetime = DateTime::from_timestamp(secs, nsecs as u32).expect("invalid timestamp");
    datetime.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string()
}

/// Current wall-clock time in milliseconds since the Unix epoch, used to
/// stamp `Event.ts_ms` and `Source.ts_ms`.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime is before Unix epoch")
        .as_millis() as i64
}

/// Read a network byte order (big-endian) `u16` from the start of `buf`.
pub fn buf_recv_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes(buf[..2].try_into().expect("buffer too short for u16"))
}

/// Read a network byte order `u32` from the start of `buf`.
pub fn buf_recv_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes(buf[..4].try_into().expect("buffer too short for u32"))
}

/// Read a network byte order `u64` from the start of `buf`.
pub fn buf_recv_u64(buf: &[u8]) -> u64 {
    u64::from_be_bytes(buf[..8].try_into().expect("buffer too short for u64"))
}

/// Read a network byte order `i16` from the start of `buf`.
pub fn buf_recv_i16(buf: &[u8]) -> i16 {
    i16::from_be_bytes(buf[..2].try_into().expect("buffer too short for i16"))
}

/// Read a network byte order `i32` from the start of `buf`.
pub fn buf_recv_i32(buf: &[u8]) -> i32 {
    i32::from_be_bytes(buf[..4].try_into().expect("buffer too short for i32"))
}

/// Read a network byte order `i64` from the start of `buf`.
pub fn buf_recv_i64(buf: &[u8]) -> i64 {
    i64::from_be_bytes(buf[..8].try_into().expect("buffer too short for i64"))
}

/// Write `val` into the start of `buf` in network byte order.
pub fn buf_send_u32(val: u32, buf: &mut [u8]) {
    buf[..4].copy_from_slice(&val.to_be_bytes());
}

/// Write `val` into the start of `buf` in network byte order.
pub fn buf_send_u64(val: u64, buf: &mut [u8]) {
    buf[..8].copy_from_slice(&val.to_be_bytes());
}

/// Write `val` into the start of `buf` in network byte order.
pub fn buf_send_i64(val: i64, buf: &mut [u8]) {
    buf[..8].copy_from_slice(&val.to_be_bytes());
}
