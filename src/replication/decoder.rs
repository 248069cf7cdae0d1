//! Logical decoder: pgoutput messages → committed outbox rows
//!
//! Accumulates rows between Begin and Commit and hands back one
//! `CommittedTx` per transaction. Rows only become visible downstream once
//! their Commit arrives, so a transaction is always replayed or delivered
//! whole.

use crate::core::errors::{ConnectorError, ConnectorResult};
use crate::protocol::messages::{LogicalMessage, RelationInfo, TupleData};
use crate::utils::binary::{format_lsn, Oid, XLogRecPtr, INVALID_XLOG_REC_PTR};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

// Recognised outbox column names
const STREAM_NAME_COL: &str = "stream_name";
const STREAM_ID_COL: &str = "stream_id";
const EVENT_NAME_COL: &str = "event_name";
const VERSION_COL: &str = "version";
const RAW_DATA_COL: &str = "raw_data";

/// One decoded outbox row, tagged with the LSN of the commit that made it
/// durable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboxRecord {
    pub stream_name: String,
    pub stream_id: String,
    pub event_name: String,
    pub version: i64,
    pub raw_data: Vec<u8>,
    pub commit_lsn: XLogRecPtr,
}

impl OutboxRecord {
    /// A row is publishable unless both identifiers are missing or it has
    /// no payload. Unpublishable rows are dropped, not fatal.
    pub fn is_publishable(&self) -> bool {
        !((self.stream_name.is_empty() && self.stream_id.is_empty()) || self.raw_data.is_empty())
    }
}

/// All rows of one committed transaction, in arrival order.
#[derive(Debug, Clone)]
pub struct CommittedTx {
    pub commit_lsn: XLogRecPtr,
    pub end_lsn: XLogRecPtr,
    pub rows: Vec<OutboxRecord>,
}

/// Per-session decode state: the relation cache and the currently open
/// transaction frame.
pub struct LogicalDecoder {
    relations: HashMap<Oid, RelationInfo>,
    begin_lsn: XLogRecPtr,
    rows: Vec<OutboxRecord>,
}

impl LogicalDecoder {
    pub fn new() -> Self {
        Self {
            relations: HashMap::new(),
            begin_lsn: INVALID_XLOG_REC_PTR,
            rows: Vec::new(),
        }
    }

    /// Feed one logical message; returns the finished transaction when the
    /// message was its Commit.
    pub fn apply(&mut self, message: LogicalMessage) -> ConnectorResult<Option<CommittedTx>> {
        match message {
            LogicalMessage::Begin { final_lsn, xid, .. } => {
                if !self.rows.is_empty() {
                    warn!(
                        dropped = self.rows.len(),
                        "discarding unflushed rows at transaction begin"
                    );
                    self.rows.clear();
                }
                trace!(xid, final_lsn = %format_lsn(final_lsn), "transaction begin");
                self.begin_lsn = final_lsn;
                Ok(None)
            }

            LogicalMessage::Relation(relation) => {
                debug!(
                    oid = relation.oid,
                    table = format!("{}.{}", relation.namespace, relation.name),
                    columns = relation.columns.len(),
                    "cached relation descriptor"
                );
                self.relations.insert(relation.oid, relation);
                Ok(None)
            }

            LogicalMessage::Insert {
                relation_oid,
                tuple,
            } => {
                let relation = self.relations.get(&relation_oid).ok_or_else(|| {
                    ConnectorError::decode(format!(
                        "no relation descriptor for row relid={relation_oid}"
                    ))
                })?;
                let row = extract_row(relation, &tuple)?;
                self.rows.push(row);
                Ok(None)
            }

            LogicalMessage::Commit {
                commit_lsn,
                end_lsn,
                ..
            } => {
                // pgoutput proto v1 sets CommitMessage.commit_lsn equal to
                // BeginMessage.final_lsn; a later protocol revision could
                // break this equality.
                if commit_lsn != self.begin_lsn {
                    return Err(ConnectorError::decode(format!(
                        "mismatch wal positions begin:{}, commit:{}",
                        format_lsn(self.begin_lsn),
                        format_lsn(commit_lsn)
                    )));
                }
                let mut rows = std::mem::take(&mut self.rows);
                for row in &mut rows {
                    row.commit_lsn = commit_lsn;
                }
                self.begin_lsn = INVALID_XLOG_REC_PTR;
                Ok(Some(CommittedTx {
                    commit_lsn,
                    end_lsn,
                    rows,
                }))
            }

            // The publication is insert-only; anything else that still
            // arrives carries nothing for the outbox.
            LogicalMessage::Origin
            | LogicalMessage::Update { .. }
            | LogicalMessage::Delete { .. }
            | LogicalMessage::Truncate => Ok(None),
        }
    }
}

impl Default for LogicalDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_row(relation: &RelationInfo, tuple: &TupleData) -> ConnectorResult<OutboxRecord> {
    if relation.columns.len() != tuple.columns.len() {
        return Err(ConnectorError::decode(format!(
            "tuple has {} columns but relation {} has {}",
            tuple.columns.len(),
            relation.oid,
            relation.columns.len()
        )));
    }

    let mut row = OutboxRecord::default();
    for (column, value) in relation.columns.iter().zip(&tuple.columns) {
        match column.name.as_str() {
            STREAM_NAME_COL => row.stream_name = value.to_utf8_string(),
            STREAM_ID_COL => row.stream_id = value.to_utf8_string(),
            EVENT_NAME_COL => row.event_name = value.to_utf8_string(),
            VERSION_COL => {
                row.version = value.parse_i64().map_err(|_| {
                    ConnectorError::decode(format!(
                        "cannot parse version column {:?}",
                        value.to_utf8_string()
                    ))
                })?;
            }
            RAW_DATA_COL => row.raw_data = value.as_bytes().to_vec(),
            _ => {} // unrelated columns are ignored
        }
    }
    Ok(row)
}
