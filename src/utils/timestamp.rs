//! Timestamp conversions between the Unix and PostgreSQL epochs
//!
//! Replication-protocol timestamps are microseconds since 2000-01-01;
//! standby status updates must carry them and keepalive frames deliver them.

use crate::utils::binary::TimestampTz;
use chrono::DateTime;
use std::time::{SystemTime, UNIX_EPOCH};

// Seconds from the Unix epoch (1970) to the PostgreSQL epoch (2000)
const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Convert a `SystemTime` into microseconds since the PostgreSQL epoch,
/// the form the standby status frame carries.
pub fn system_time_to_postgres_timestamp(time: SystemTime) -> TimestampTz {
    let since_unix = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let unix_micros = since_unix.as_secs() as i64 * 1_000_000 + since_unix.subsec_micros() as i64;
    unix_micros - PG_EPOCH_OFFSET_SECS * 1_000_000
}

/// Render a PostgreSQL-epoch microsecond timestamp as a UTC date string,
/// for keepalive logging.
pub fn format_postgres_timestamp(ts: TimestampTz) -> String {
    let secs = ts / 1_000_000 + PG_EPOCH_OFFSET_SECS;
    let nsecs = (ts % 1_000_000) * 1_000;

    match DateTime::from_timestamp(secs, nsecs as u32) {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => format!("<invalid timestamp {ts}>"),
    }
}
