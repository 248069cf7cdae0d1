//! Replication protocol frames and pgoutput message types
//!
//! Two layers travel over the COPY-both stream: the outer replication
//! frames (XLogData, primary keepalive, standby status update) and, inside
//! XLogData, the pgoutput logical-replication messages the decoder consumes.

use crate::core::errors::{ConnectorError, ConnectorResult};
use crate::protocol::buffer::{BufferReader, BufferWriter};
use crate::utils::binary::{Oid, TimestampTz, XLogRecPtr, Xid};

/// First byte of a CopyData payload carrying a primary keepalive.
pub const PRIMARY_KEEPALIVE_BYTE: u8 = b'k';
/// First byte of a CopyData payload carrying WAL data.
pub const XLOG_DATA_BYTE: u8 = b'w';
/// First byte of the standby status update the client sends.
pub const STANDBY_STATUS_UPDATE_BYTE: u8 = b'r';

/// Keepalive frame from the primary.
///
/// `reply_requested` obliges the client to send a standby status update
/// before the next receive.
#[derive(Debug, Clone, Copy)]
pub struct PrimaryKeepalive {
    pub server_wal_end: XLogRecPtr,
    pub server_time: TimestampTz,
    pub reply_requested: bool,
}

impl PrimaryKeepalive {
    /// Parse from a full CopyData payload, including the `k` byte.
    pub fn parse(data: &[u8]) -> ConnectorResult<Self> {
        let mut reader = BufferReader::new(data);
        if !reader.has_bytes(18) {
            return Err(ConnectorError::parse("keepalive message too short"));
        }
        let tag = reader.read_u8()?;
        if tag != PRIMARY_KEEPALIVE_BYTE {
            return Err(ConnectorError::parse(format!(
                "expected keepalive tag, got {:?}",
                tag as char
            )));
        }
        Ok(Self {
            server_wal_end: reader.read_u64()?,
            server_time: reader.read_i64()?,
            reply_requested: reader.read_u8()? != 0,
        })
    }
}

/// WAL data frame: a chunk of the logical stream plus its start position.
#[derive(Debug, Clone)]
pub struct XLogData {
    pub wal_start: XLogRecPtr,
    pub server_wal_end: XLogRecPtr,
    pub server_time: TimestampTz,
    pub data: Vec<u8>,
}

impl XLogData {
    /// Parse from a full CopyData payload, including the `w` byte.
    pub fn parse(data: &[u8]) -> ConnectorResult<Self> {
        let mut reader = BufferReader::new(data);
        if !reader.has_bytes(25) {
            return Err(ConnectorError::parse("XLogData message too short"));
        }
        let tag = reader.read_u8()?;
        if tag != XLOG_DATA_BYTE {
            return Err(ConnectorError::parse(format!(
                "expected XLogData tag, got {:?}",
                tag as char
            )));
        }
        let wal_start = reader.read_u64()?;
        let server_wal_end = reader.read_u64()?;
        let server_time = reader.read_i64()?;
        let data = reader.read_bytes(reader.remaining())?;
        Ok(Self {
            wal_start,
            server_wal_end,
            server_time,
            data,
        })
    }

    /// Position just past this frame's payload; the ack cursor advances
    /// here once the enclosed commit is fully published.
    pub fn end_lsn(&self) -> XLogRecPtr {
        self.wal_start + self.data.len() as XLogRecPtr
    }
}

/// Standby status update sent to the primary, carrying the confirmed
/// position in all three cursors.
#[derive(Debug, Clone, Copy)]
pub struct StandbyStatusUpdate {
    pub wal_write: XLogRecPtr,
    pub wal_flush: XLogRecPtr,
    pub wal_apply: XLogRecPtr,
    pub client_time: TimestampTz,
    pub reply_requested: bool,
}

impl StandbyStatusUpdate {
    /// Frame size: tag + three LSNs + timestamp + reply flag.
    pub const FRAME_LEN: usize = 34;

    pub fn at(confirmed: XLogRecPtr, client_time: TimestampTz) -> Self {
        Self {
            wal_write: confirmed,
            wal_flush: confirmed,
            wal_apply: confirmed,
            client_time,
            reply_requested: false,
        }
    }

    /// Encode into the 34-byte wire frame.
    pub fn encode(&self) -> ConnectorResult<[u8; Self::FRAME_LEN]> {
        let mut frame = [0u8; Self::FRAME_LEN];
        let mut writer = BufferWriter::new(&mut frame);
        writer.write_u8(STANDBY_STATUS_UPDATE_BYTE)?;
        writer.write_u64(self.wal_write)?;
        writer.write_u64(self.wal_flush)?;
        writer.write_u64(self.wal_apply)?;
        writer.write_i64(self.client_time)?;
        writer.write_u8(self.reply_requested as u8)?;
        debug_assert_eq!(writer.bytes_written(), Self::FRAME_LEN);
        Ok(frame)
    }
}

/// A column of a replicated relation.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub flags: u8,
    pub name: String,
    pub type_oid: Oid,
    pub type_modifier: i32,
}

/// Schema of a replicated relation, cached per session keyed by oid.
#[derive(Debug, Clone)]
pub struct RelationInfo {
    pub oid: Oid,
    pub namespace: String,
    pub name: String,
    pub replica_identity: char,
    pub columns: Vec<ColumnInfo>,
}

/// One column value of a replicated tuple.
///
/// pgoutput proto v1 ships values in text format; they stay opaque bytes
/// here and are only interpreted where a recognised outbox column needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleValue {
    Null,
    UnchangedToast,
    Text(Vec<u8>),
}

impl TupleValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TupleValue::Text(bytes) => bytes,
            _ => &[],
        }
    }

    pub fn to_utf8_string(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    /// Interpret the text value as a signed 64-bit integer.
    pub fn parse_i64(&self) -> ConnectorResult<i64> {
        let text = std::str::from_utf8(self.as_bytes())
            .map_err(|_| ConnectorError::parse("int64 column is not UTF-8"))?;
        text.trim()
            .parse::<i64>()
            .map_err(|_| ConnectorError::parse(format!("cannot parse int64 from {text:?}")))
    }
}

/// All column values of one replicated row, in relation column order.
#[derive(Debug, Clone)]
pub struct TupleData {
    pub columns: Vec<TupleValue>,
}

/// A pgoutput (proto v1) logical replication message.
///
/// Only the insert path is fully decoded; the publication is insert-only,
/// so the remaining tags exist for the decoder to skip explicitly.
#[derive(Debug, Clone)]
pub enum LogicalMessage {
    Begin {
        final_lsn: XLogRecPtr,
        commit_time: TimestampTz,
        xid: Xid,
    },
    Commit {
        flags: u8,
        commit_lsn: XLogRecPtr,
        end_lsn: XLogRecPtr,
        commit_time: TimestampTz,
    },
    Relation(RelationInfo),
    Insert {
        relation_oid: Oid,
        tuple: TupleData,
    },
    Origin,
    Update { relation_oid: Oid },
    Delete { relation_oid: Oid },
    Truncate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_parse() {
        let mut buf = vec![b'k'];
        buf.extend_from_slice(&0x500u64.to_be_bytes());
        buf.extend_from_slice(&123_456i64.to_be_bytes());
        buf.push(1);

        let keepalive = PrimaryKeepalive::parse(&buf).unwrap();
        assert_eq!(keepalive.server_wal_end, 0x500);
        assert_eq!(keepalive.server_time, 123_456);
        assert!(keepalive.reply_requested);
    }

    #[test]
    fn test_keepalive_too_short() {
        assert!(PrimaryKeepalive::parse(&[b'k', 0, 0]).is_err());
    }

    #[test]
    fn test_keepalive_wrong_tag() {
        let buf = [b'w'; 18];
        assert!(PrimaryKeepalive::parse(&buf).is_err());
    }

    #[test]
    fn test_xlogdata_parse_and_end_lsn() {
        let mut buf = vec![b'w'];
        buf.extend_from_slice(&0x100u64.to_be_bytes());
        buf.extend_from_slice(&0x200u64.to_be_bytes());
        buf.extend_from_slice(&0i64.to_be_bytes());
        buf.extend_from_slice(b"BPAYLOAD");

        let xld = XLogData::parse(&buf).unwrap();
        assert_eq!(xld.wal_start, 0x100);
        assert_eq!(xld.server_wal_end, 0x200);
        assert_eq!(xld.data, b"BPAYLOAD");
        assert_eq!(xld.end_lsn(), 0x108);
    }

    #[test]
    fn test_standby_status_frame_layout() {
        let status = StandbyStatusUpdate::at(0x120, 77);
        let frame = status.encode().unwrap();
        assert_eq!(frame.len(), StandbyStatusUpdate::FRAME_LEN);
        assert_eq!(frame[0], b'r');
        assert_eq!(u64::from_be_bytes(frame[1..9].try_into().unwrap()), 0x120);
        assert_eq!(u64::from_be_bytes(frame[9..17].try_into().unwrap()), 0x120);
        assert_eq!(u64::from_be_bytes(frame[17..25].try_into().unwrap()), 0x120);
        assert_eq!(i64::from_be_bytes(frame[25..33].try_into().unwrap()), 77);
        assert_eq!(frame[33], 0);
    }

    #[test]
    fn test_tuple_value_accessors() {
        assert_eq!(TupleValue::Null.as_bytes(), b"");
        assert_eq!(TupleValue::Text(b"orders".to_vec()).to_utf8_string(), "orders");
        assert_eq!(TupleValue::Text(b"42".to_vec()).parse_i64().unwrap(), 42);
        assert!(TupleValue::Text(b"-".to_vec()).parse_i64().is_err());
        assert!(TupleValue::Null.parse_i64().is_err());
    }
}
