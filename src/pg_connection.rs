//! Safe wrapper around PostgreSQL's C client library (libpq) for replication
//! operations: connection lifecycle, query execution, and the COPY-mode
//! primitives used by the logical-replication sub-protocol.
//!
//! This is the single canonical libpq wrapper; earlier iterations of this
//! crate had a duplicate copy embedded next to the replication code — see
//! DESIGN.md for the consolidation note.

use crate::errors::ReplicationResult;
use libpq_sys::*;
use std::ffi::{CStr, CString};
use std::ptr;

/// Safe wrapper for a PostgreSQL connection opened via `PQconnectdb`.
pub struct PgConnection {
    conn: *mut PGconn,
}

// libpq connections are not implicitly Sync, but this crate only ever
// touches one from the single blocking task that owns it; `Send` lets that
// task be moved across the tokio thread pool via `spawn_blocking`.
unsafe impl Send for PgConnection {}

impl PgConnection {
    /// Establish a connection using a libpq connection string (`key=value`
    /// pairs or a `postgresql://` URI).
    pub fn connect(conninfo: &str) -> ReplicationResult<Self> {
        let c_conninfo = CString::new(conninfo)?;
        let conn = unsafe { PQconnectdb(c_conninfo.as_ptr()) };

        if conn.is_null() {
            return Err(crate::errors::ReplicationError::connection(
                "failed to allocate connection object",
            ));
        }

        let status = unsafe { PQstatus(conn) };
        if status != ConnStatusType::CONNECTION_OK {
            let error_msg = get_error_message(conn).unwrap_or_else(|| "unknown error".to_string());
            unsafe { PQfinish(conn) };
            return Err(crate::errors::ReplicationError::connection(format!(
                "connection failed: {error_msg}"
            )));
        }

        Ok(Self { conn })
    }

    /// Execute a query and return its result.
    pub fn exec(&self, query: &str) -> ReplicationResult<PgResult> {
        let c_query = CString::new(query)?;
        let result = unsafe { PQexec(self.conn, c_query.as_ptr()) };

        if result.is_null() {
            let error_msg = get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
            return Err(crate::errors::ReplicationError::protocol(format!(
                "query execution failed: {error_msg}"
            )));
        }

        Ok(PgResult { result })
    }

    /// Read one row of COPY data (blocking). Returns `Ok(None)` once the
    /// COPY operation has completed successfully.
    pub fn get_copy_data(&self) -> ReplicationResult<Option<Vec<u8>>> {
        let mut buffer: *mut std::os::raw::c_char = ptr::null_mut();

        // PQgetCopyData, blocking mode (async=0): blocks until a row of
        // data is available or the COPY completes. Returns the byte count
        // on success, -1 when the COPY is done, -2 on error.
        let copy_data_len = unsafe { PQgetCopyData(self.conn, &mut buffer, 0) };

        match copy_data_len {
            -2 => {
                let error_msg =
                    get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
                Err(crate::errors::ReplicationError::protocol(error_msg))
            }
            -1 => {
                let result = PgResult {
                    result: unsafe { PQgetResult(self.conn) },
                };
                if !result.is_ok() {
                    let error_msg = get_error_message(self.conn)
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(crate::errors::ReplicationError::protocol(error_msg));
                }
                Ok(None)
            }
            0 => Ok(None), // only reachable in async mode, which this wrapper never uses
            len => {
                if buffer.is_null() {
                    return Err(crate::errors::ReplicationError::buffer("received null buffer"));
                }
                let data =
                    unsafe { std::slice::from_raw_parts(buffer as *const u8, len as usize).to_vec() };
                unsafe { PQfreemem(buffer as *mut std::os::raw::c_void) };
                Ok(Some(data))
            }
        }
    }

    /// Send one chunk of COPY data upstream (used for standby status
    /// updates and hot-standby feedback).
    pub fn put_copy_data(&self, data: &[u8]) -> ReplicationResult<()> {
        let result = unsafe {
            PQputCopyData(
                self.conn,
                data.as_ptr() as *const std::os::raw::c_char,
                data.len() as i32,
            )
        };

        if result != 1 {
            let error_msg = get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
            return Err(crate::errors::ReplicationError::protocol(format!(
                "failed to send copy data: {error_msg}"
            )));
        }

        Ok(())
    }

    /// The connection's last error message, if any (used to inspect a
    /// failed command's SQLSTATE-equivalent text, e.g. to tell "relation is
    /// already a publication member" apart from a real failure).
    pub fn error_message(&self) -> Option<String> {
        get_error_message(self.conn)
    }

    /// Flush any buffered output on the connection.
    pub fn flush(&self) -> ReplicationResult<()> {
        let result = unsafe { PQflush(self.conn) };
        if result != 0 {
            return Err(crate::errors::ReplicationError::protocol(
                "failed to flush connection",
            ));
        }
        Ok(())
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if !self.conn.is_null() {
            unsafe { PQfinish(self.conn) };
        }
    }
}

fn get_error_message(conn: *const PGconn) -> Option<String> {
    unsafe {
        let error_ptr = PQerrorMessage(conn);
        if error_ptr.is_null() {
            None
        } else {
            Some(CStr::from_ptr(error_ptr).to_string_lossy().into_owned())
        }
    }
}

/// Safe wrapper for a PostgreSQL result (`PGresult`).
pub struct PgResult {
    result: *mut PGresult,
}

unsafe impl Send for PgResult {}

impl PgResult {
    /// The raw result status.
    pub fn status(&self) -> ExecStatusType {
        unsafe { PQresultStatus(self.result) }
    }

    /// Whether the command completed successfully (tuples returned or a
    /// command with no result set both count).
    pub fn is_ok(&self) -> bool {
        matches!(
            self.status(),
            ExecStatusType::PGRES_TUPLES_OK | ExecStatusType::PGRES_COMMAND_OK
        )
    }

    /// Number of rows in the result.
    #[allow(unused)]
    pub fn ntuples(&self) -> i32 {
        unsafe { PQntuples(self.result) }
    }

    /// Number of columns in the result.
    #[allow(unused)]
    pub fn nfields(&self) -> i32 {
        unsafe { PQnfields(self.result) }
    }

    /// Read a single cell as a string, if present.
    pub fn getvalue(&self, row: i32, col: i32) -> Option<String> {
        let value_ptr = unsafe { PQgetvalue(self.result, row, col) };
        if value_ptr.is_null() {
            None
        } else {
            unsafe { Some(CStr::from_ptr(value_ptr).to_string_lossy().into_owned()) }
        }
    }
}

impl Drop for PgResult {
    fn drop(&mut self) {
        if !self.result.is_null() {
            unsafe { PQclear(self.result) };
        }
    }
}
