//! pgoutput logical replication message parser
//!
//! Decodes proto v1 message bytes carried inside XLogData frames. Insert
//! and its supporting messages (Begin, Commit, Relation) are fully
//! decoded; Update/Delete/Truncate/Origin are recognised so the decoder
//! can skip them, since the publication publishes inserts only.

use crate::core::errors::{ConnectorError, ConnectorResult};
use crate::protocol::buffer::BufferReader;
use crate::protocol::messages::*;
use crate::utils::binary::Oid;
use tracing::trace;

pub struct MessageParser;

impl MessageParser {
    pub fn parse(buffer: &[u8]) -> ConnectorResult<LogicalMessage> {
        if buffer.is_empty() {
            return Err(ConnectorError::parse("empty logical message buffer"));
        }

        let tag = buffer[0] as char;
        trace!(tag = %tag, len = buffer.len(), "parsing logical message");

        match tag {
            'B' => Self::parse_begin(buffer),
            'C' => Self::parse_commit(buffer),
            'R' => Self::parse_relation(buffer),
            'I' => Self::parse_insert(buffer),
            'O' => Ok(LogicalMessage::Origin),
            'U' => Self::parse_relation_oid_only(buffer)
                .map(|relation_oid| LogicalMessage::Update { relation_oid }),
            'D' => Self::parse_relation_oid_only(buffer)
                .map(|relation_oid| LogicalMessage::Delete { relation_oid }),
            'T' => Ok(LogicalMessage::Truncate),
            _ => Err(ConnectorError::parse(format!(
                "unknown logical message tag {tag:?}"
            ))),
        }
    }

    fn parse_begin(buffer: &[u8]) -> ConnectorResult<LogicalMessage> {
        let mut reader = BufferReader::new(&buffer[1..]);
        Ok(LogicalMessage::Begin {
            final_lsn: reader.read_u64()?,
            commit_time: reader.read_i64()?,
            xid: reader.read_u32()?,
        })
    }

    fn parse_commit(buffer: &[u8]) -> ConnectorResult<LogicalMessage> {
        let mut reader = BufferReader::new(&buffer[1..]);
        Ok(LogicalMessage::Commit {
            flags: reader.read_u8()?,
            commit_lsn: reader.read_u64()?,
            end_lsn: reader.read_u64()?,
            commit_time: reader.read_i64()?,
        })
    }

    fn parse_relation(buffer: &[u8]) -> ConnectorResult<LogicalMessage> {
        let mut reader = BufferReader::new(&buffer[1..]);
        let oid = reader.read_u32()?;
        let namespace = reader.read_cstring()?;
        let name = reader.read_cstring()?;
        let replica_identity = reader.read_char()?;
        let column_count = reader.read_i16()?;
        if column_count < 0 {
            return Err(ConnectorError::parse("negative relation column count"));
        }

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            columns.push(ColumnInfo {
                flags: reader.read_u8()?,
                name: reader.read_cstring()?,
                type_oid: reader.read_u32()?,
                type_modifier: reader.read_i32()?,
            });
        }

        Ok(LogicalMessage::Relation(RelationInfo {
            oid,
            namespace,
            name,
            replica_identity,
            columns,
        }))
    }

    fn parse_insert(buffer: &[u8]) -> ConnectorResult<LogicalMessage> {
        let mut reader = BufferReader::new(&buffer[1..]);
        let relation_oid = reader.read_u32()?;

        // proto v1: a new-tuple marker precedes the tuple data
        let marker = reader.read_char()?;
        if marker != 'N' {
            return Err(ConnectorError::parse(format!(
                "expected new-tuple marker in insert, got {marker:?}"
            )));
        }

        let tuple = Self::parse_tuple(&mut reader)?;
        Ok(LogicalMessage::Insert {
            relation_oid,
            tuple,
        })
    }

    /// Update and Delete are not published for the outbox table; only the
    /// relation oid is pulled out for diagnostics.
    fn parse_relation_oid_only(buffer: &[u8]) -> ConnectorResult<Oid> {
        let mut reader = BufferReader::new(&buffer[1..]);
        reader.read_u32()
    }

    fn parse_tuple(reader: &mut BufferReader<'_>) -> ConnectorResult<TupleData> {
        let column_count = reader.read_i16()?;
        if column_count < 0 {
            return Err(ConnectorError::parse("negative tuple column count"));
        }

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let kind = reader.read_char()?;
            let value = match kind {
                'n' => TupleValue::Null,
                'u' => TupleValue::UnchangedToast,
                't' => {
                    let len = reader.read_i32()?;
                    if len < 0 {
                        return Err(ConnectorError::parse("negative tuple value length"));
                    }
                    TupleValue::Text(reader.read_bytes(len as usize)?)
                }
                _ => {
                    return Err(ConnectorError::parse(format!(
                        "unknown tuple value kind {kind:?}"
                    )));
                }
            };
            columns.push(value);
        }

        Ok(TupleData { columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin_message(final_lsn: u64, xid: u32) -> Vec<u8> {
        let mut buf = vec![b'B'];
        buf.extend_from_slice(&final_lsn.to_be_bytes());
        buf.extend_from_slice(&0i64.to_be_bytes());
        buf.extend_from_slice(&xid.to_be_bytes());
        buf
    }

    fn commit_message(commit_lsn: u64, end_lsn: u64) -> Vec<u8> {
        let mut buf = vec![b'C', 0];
        buf.extend_from_slice(&commit_lsn.to_be_bytes());
        buf.extend_from_slice(&end_lsn.to_be_bytes());
        buf.extend_from_slice(&0i64.to_be_bytes());
        buf
    }

    fn relation_message(oid: Oid, columns: &[&str]) -> Vec<u8> {
        let mut buf = vec![b'R'];
        buf.extend_from_slice(&oid.to_be_bytes());
        buf.extend_from_slice(b"gulfstream\0outbox\0");
        buf.push(b'd');
        buf.extend_from_slice(&(columns.len() as i16).to_be_bytes());
        for name in columns {
            buf.push(0);
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&25u32.to_be_bytes()); // text
            buf.extend_from_slice(&(-1i32).to_be_bytes());
        }
        buf
    }

    fn insert_message(oid: Oid, values: &[Option<&[u8]>]) -> Vec<u8> {
        let mut buf = vec![b'I'];
        buf.extend_from_slice(&oid.to_be_bytes());
        buf.push(b'N');
        buf.extend_from_slice(&(values.len() as i16).to_be_bytes());
        for value in values {
            match value {
                None => buf.push(b'n'),
                Some(bytes) => {
                    buf.push(b't');
                    buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    buf.extend_from_slice(bytes);
                }
            }
        }
        buf
    }

    #[test]
    fn test_parse_begin() {
        let msg = MessageParser::parse(&begin_message(0x100, 700)).unwrap();
        match msg {
            LogicalMessage::Begin { final_lsn, xid, .. } => {
                assert_eq!(final_lsn, 0x100);
                assert_eq!(xid, 700);
            }
            other => panic!("expected Begin, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_commit() {
        let msg = MessageParser::parse(&commit_message(0x100, 0x120)).unwrap();
        match msg {
            LogicalMessage::Commit {
                commit_lsn,
                end_lsn,
                ..
            } => {
                assert_eq!(commit_lsn, 0x100);
                assert_eq!(end_lsn, 0x120);
            }
            other => panic!("expected Commit, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_relation() {
        let raw = relation_message(16385, &["stream_name", "stream_id", "version", "raw_data"]);
        let msg = MessageParser::parse(&raw).unwrap();
        match msg {
            LogicalMessage::Relation(rel) => {
                assert_eq!(rel.oid, 16385);
                assert_eq!(rel.namespace, "gulfstream");
                assert_eq!(rel.name, "outbox");
                assert_eq!(rel.replica_identity, 'd');
                let names: Vec<_> = rel.columns.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, ["stream_name", "stream_id", "version", "raw_data"]);
            }
            other => panic!("expected Relation, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_insert_with_null_column() {
        let raw = insert_message(16385, &[Some(b"orders"), None, Some(b"7")]);
        let msg = MessageParser::parse(&raw).unwrap();
        match msg {
            LogicalMessage::Insert {
                relation_oid,
                tuple,
            } => {
                assert_eq!(relation_oid, 16385);
                assert_eq!(tuple.columns.len(), 3);
                assert_eq!(tuple.columns[0], TupleValue::Text(b"orders".to_vec()));
                assert_eq!(tuple.columns[1], TupleValue::Null);
                assert_eq!(tuple.columns[2], TupleValue::Text(b"7".to_vec()));
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_insert_unchanged_toast() {
        let mut raw = vec![b'I'];
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.push(b'N');
        raw.extend_from_slice(&1i16.to_be_bytes());
        raw.push(b'u');
        let msg = MessageParser::parse(&raw).unwrap();
        match msg {
            LogicalMessage::Insert { tuple, .. } => {
                assert_eq!(tuple.columns[0], TupleValue::UnchangedToast);
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_insert_requires_new_tuple_marker() {
        let mut raw = vec![b'I'];
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.push(b'O');
        assert!(MessageParser::parse(&raw).is_err());
    }

    #[test]
    fn test_ignored_tags_are_recognised() {
        let mut update = vec![b'U'];
        update.extend_from_slice(&9u32.to_be_bytes());
        assert!(matches!(
            MessageParser::parse(&update).unwrap(),
            LogicalMessage::Update { relation_oid: 9 }
        ));

        let mut delete = vec![b'D'];
        delete.extend_from_slice(&9u32.to_be_bytes());
        assert!(matches!(
            MessageParser::parse(&delete).unwrap(),
            LogicalMessage::Delete { relation_oid: 9 }
        ));

        assert!(matches!(
            MessageParser::parse(&[b'T', 0, 0, 0, 1, 0]).unwrap(),
            LogicalMessage::Truncate
        ));
        assert!(matches!(
            MessageParser::parse(&[b'O']).unwrap(),
            LogicalMessage::Origin
        ));
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        assert!(MessageParser::parse(&[b'Z', 1, 2, 3]).is_err());
        assert!(MessageParser::parse(&[]).is_err());
    }

    #[test]
    fn test_truncated_messages_error() {
        assert!(MessageParser::parse(&begin_message(0x100, 700)[..5]).is_err());
        let insert = insert_message(16385, &[Some(b"orders")]);
        assert!(MessageParser::parse(&insert[..insert.len() - 2]).is_err());
    }
}
