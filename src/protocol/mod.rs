//! Replication wire protocol: frame types, pgoutput parsing, buffer codec

pub mod buffer;
pub mod messages;
pub mod parser;

pub use messages::{
    ColumnInfo, LogicalMessage, PrimaryKeepalive, RelationInfo, StandbyStatusUpdate, TupleData,
    TupleValue, XLogData, PRIMARY_KEEPALIVE_BYTE, STANDBY_STATUS_UPDATE_BYTE, XLOG_DATA_BYTE,
};
pub use parser::MessageParser;
