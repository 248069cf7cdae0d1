//! Shared low-level utilities
//!
//! Binary codec helpers, the libpq connection wrapper, and timestamp
//! conversions between the Unix and PostgreSQL epochs.

pub mod binary;
pub mod connection;
pub mod timestamp;

pub use binary::{
    Oid, TimestampTz, XLogRecPtr, Xid, buf_recv_i16, buf_recv_i32, buf_recv_i64, buf_recv_u32,
    buf_recv_u64, buf_send_i64, buf_send_u64, format_lsn, parse_lsn,
};
pub use connection::{CopyReceive, PGConnection, PGResult};
pub use timestamp::{format_postgres_timestamp, system_time_to_postgres_timestamp};
