//! Replication core: slot lifecycle, WAL receiver session, logical decoder

pub mod decoder;
pub mod session;
pub mod slot;

pub use decoder::{CommittedTx, LogicalDecoder, OutboxRecord};
pub use session::{ReplicationSession, DEFAULT_STATUS_INTERVAL};
pub use slot::{create_slot, drop_slot, renew_slot};
