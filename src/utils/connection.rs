//! PostgreSQL connection handling
//!
//! Safe wrapper around PostgreSQL's C library (libpq) for replication
//! operations: connection lifecycle, query execution, COPY-both streaming
//! with a receive deadline, and SQLSTATE extraction for idempotent setup.

use crate::core::errors::{ConnectorError, ConnectorResult};
use libpq_sys::*;
use std::ffi::{CStr, CString};
use std::ptr;
use std::time::Instant;

// PG_DIAG_SQLSTATE field code ('C') for PQresultErrorField
const DIAG_SQLSTATE: std::os::raw::c_int = 'C' as std::os::raw::c_int;

/// Outcome of a bounded-deadline COPY receive.
///
/// `Timeout` is a normal outcome (the caller owes the server a status
/// update); `ServerError` carries the server's message after an in-stream
/// error terminated the COPY.
#[derive(Debug)]
pub enum CopyReceive {
    /// One complete CopyData payload.
    Data(Vec<u8>),
    /// The deadline passed without a complete payload arriving.
    Timeout,
    /// The server ended the COPY stream cleanly.
    Closed,
    /// The server reported an error on the stream.
    ServerError(String),
}

/// Safe wrapper for a PostgreSQL connection using libpq.
///
/// A replication session needs plain SQL (`exec`), replication commands,
/// and the COPY-both data plane; this wrapper owns the raw `PGconn` for
/// all three and releases it on drop.
pub struct PGConnection {
    conn: *mut PGconn,
}

impl PGConnection {
    /// Establishes a connection using a libpq connection string or URI.
    ///
    /// Replication commands require the URI to carry
    /// `?replication=database`; that is validated at configuration time,
    /// not here.
    pub fn connect(conninfo: &str) -> ConnectorResult<Self> {
        let c_conninfo = CString::new(conninfo)?;
        let conn = unsafe { PQconnectdb(c_conninfo.as_ptr()) };

        if conn.is_null() {
            return Err(ConnectorError::connection(
                "failed to allocate connection object",
            ));
        }

        let status = unsafe { PQstatus(conn) };
        if status != ConnStatusType::CONNECTION_OK {
            let error_msg = get_error_message(conn).unwrap_or_else(|| "unknown error".to_string());
            unsafe { PQfinish(conn) };
            return Err(ConnectorError::connection(format!(
                "connection failed: {error_msg}"
            )));
        }

        Ok(Self { conn })
    }

    /// Executes a query (plain SQL or a replication command) and returns
    /// the result wrapper.
    ///
    /// An error *status* is not an `Err` here: callers inspect
    /// `PGResult::is_ok()` and `PGResult::sqlstate()` so that "already
    /// exists" and "does not exist" can be classified.
    pub fn exec(&self, query: &str) -> ConnectorResult<PGResult> {
        let c_query = CString::new(query)?;
        let result = unsafe { PQexec(self.conn, c_query.as_ptr()) };

        if result.is_null() {
            let error_msg =
                get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
            return Err(ConnectorError::protocol(format!(
                "query execution failed: {error_msg}"
            )));
        }

        Ok(PGResult { result })
    }

    /// Receives one CopyData payload, waiting no longer than `deadline`.
    ///
    /// Uses libpq's non-blocking COPY mode: drain any buffered row first,
    /// otherwise `poll(2)` the connection socket until data arrives or the
    /// deadline passes, feeding the socket into libpq with
    /// `PQconsumeInput`.
    pub fn receive_copy_data(&self, deadline: Instant) -> ConnectorResult<CopyReceive> {
        loop {
            if let Some(outcome) = self.drain_copy_data()? {
                return Ok(outcome);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(CopyReceive::Timeout);
            }
            let timeout_ms = (deadline - now).as_millis().min(i32::MAX as u128) as i32;

            let mut pfd = libc::pollfd {
                fd: self.socket()?,
                events: libc::POLLIN,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms.max(1)) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            if rc == 0 {
                return Ok(CopyReceive::Timeout);
            }

            if unsafe { PQconsumeInput(self.conn) } != 1 {
                let error_msg =
                    get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
                return Err(ConnectorError::connection(format!(
                    "lost replication connection: {error_msg}"
                )));
            }
        }
    }

    /// Non-blocking `PQgetCopyData`: returns `None` when no complete row
    /// is buffered yet.
    fn drain_copy_data(&self) -> ConnectorResult<Option<CopyReceive>> {
        let mut buffer: *mut std::os::raw::c_char = ptr::null_mut();
        let copy_data_len = unsafe { PQgetCopyData(self.conn, &mut buffer, 1) };

        match copy_data_len {
            -2 => {
                let error_msg =
                    get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
                Ok(Some(CopyReceive::ServerError(error_msg)))
            }
            -1 => {
                // COPY ended; the final result tells us whether the server
                // terminated it with an ErrorResponse.
                let result = PGResult {
                    result: unsafe { PQgetResult(self.conn) },
                };
                if result.result.is_null() || result.is_ok() {
                    Ok(Some(CopyReceive::Closed))
                } else {
                    let msg = result
                        .error_message()
                        .or_else(|| get_error_message(self.conn))
                        .unwrap_or_else(|| "copy terminated by server".to_string());
                    Ok(Some(CopyReceive::ServerError(msg)))
                }
            }
            0 => Ok(None),
            len => {
                if buffer.is_null() {
                    return Err(ConnectorError::protocol("received null copy buffer"));
                }
                let data = unsafe {
                    std::slice::from_raw_parts(buffer as *const u8, len as usize).to_vec()
                };
                unsafe { PQfreemem(buffer as *mut std::os::raw::c_void) };
                Ok(Some(CopyReceive::Data(data)))
            }
        }
    }

    /// Sends data on the COPY stream (standby status updates).
    pub fn put_copy_data(&self, data: &[u8]) -> ConnectorResult<()> {
        let result = unsafe {
            PQputCopyData(
                self.conn,
                data.as_ptr() as *const std::os::raw::c_char,
                data.len() as i32,
            )
        };

        if result != 1 {
            let error_msg =
                get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
            return Err(ConnectorError::protocol(format!(
                "failed to send copy data: {error_msg}"
            )));
        }

        Ok(())
    }

    /// Flushes buffered output to the server.
    pub fn flush(&self) -> ConnectorResult<()> {
        let result = unsafe { PQflush(self.conn) };
        if result != 0 {
            return Err(ConnectorError::protocol("failed to flush connection"));
        }
        Ok(())
    }

    fn socket(&self) -> ConnectorResult<std::os::raw::c_int> {
        let fd = unsafe { PQsocket(self.conn) };
        if fd < 0 {
            return Err(ConnectorError::connection("connection has no socket"));
        }
        Ok(fd)
    }
}

impl Drop for PGConnection {
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
            Some(
                CStr::from_ptr(error_ptr)
                    .to_string_lossy()
                    .trim_end()
                    .to_string(),
            )
        }
    }
}

/// Safe wrapper for a PostgreSQL query result.
pub struct PGResult {
    result: *mut PGresult,
}

impl PGResult {
    /// Execution status of the query that produced this result.
    pub fn status(&self) -> ExecStatusType {
        unsafe { PQresultStatus(self.result) }
    }

    /// True for PGRES_TUPLES_OK / PGRES_COMMAND_OK.
    pub fn is_ok(&self) -> bool {
        matches!(
            self.status(),
            ExecStatusType::PGRES_TUPLES_OK | ExecStatusType::PGRES_COMMAND_OK
        )
    }

    /// Number of rows in the result.
    pub fn ntuples(&self) -> i32 {
        unsafe { PQntuples(self.result) }
    }

    /// Value at (row, col), if present.
    pub fn getvalue(&self, row: i32, col: i32) -> Option<String> {
        let value_ptr = unsafe { PQgetvalue(self.result, row, col) };
        if value_ptr.is_null() {
            None
        } else {
            unsafe { Some(CStr::from_ptr(value_ptr).to_string_lossy().into_owned()) }
        }
    }

    /// The SQLSTATE of an error result (e.g. `42710` duplicate object,
    /// `42704` undefined object), if the server reported one.
    pub fn sqlstate(&self) -> Option<String> {
        let field_ptr = unsafe { PQresultErrorField(self.result, DIAG_SQLSTATE) };
        if field_ptr.is_null() {
            None
        } else {
            unsafe { Some(CStr::from_ptr(field_ptr).to_string_lossy().into_owned()) }
        }
    }

    /// The server's error message for this result, if any.
    pub fn error_message(&self) -> Option<String> {
        let msg_ptr = unsafe { PQresultErrorMessage(self.result) };
        if msg_ptr.is_null() {
            return None;
        }
        let msg = unsafe { CStr::from_ptr(msg_ptr).to_string_lossy().trim_end().to_string() };
        if msg.is_empty() { None } else { Some(msg) }
    }
}

impl Drop for PGResult {
    fn drop(&mut self) {
        if !self.result.is_null() {
            unsafe { PQclear(self.result) };
        }
    }
}
