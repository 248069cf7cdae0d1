//! Replication session: the WAL receiver state machine
//!
//! Owns the streaming replication loop over one connection: starts the
//! stream at the slot's restart position, keeps the primary alive with
//! standby status updates, feeds WAL frames through the logical decoder,
//! and advances the confirmed position only for commits the publish
//! pipeline has fully accepted.
//!
//! The connection itself is borrowed; the caller releases it after
//! `listen` returns.

use crate::core::errors::{ConnectorError, ConnectorResult};
use crate::protocol::messages::{
    PrimaryKeepalive, StandbyStatusUpdate, XLogData, PRIMARY_KEEPALIVE_BYTE, XLOG_DATA_BYTE,
};
use crate::protocol::parser::MessageParser;
use crate::replication::decoder::{LogicalDecoder, OutboxRecord};
use crate::utils::binary::{format_lsn, parse_lsn, XLogRecPtr};
use crate::utils::connection::{CopyReceive, PGConnection};
use crate::utils::timestamp::system_time_to_postgres_timestamp;
use libpq_sys::ExecStatusType;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, trace, warn};

/// Default keepalive window: a standby status update is sent at least this
/// often while the session is alive.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(10);

pub type RecordHandler = Box<dyn FnMut(&OutboxRecord) -> ConnectorResult<()> + Send>;
pub type KeepaliveHandler = Box<dyn FnMut(&PrimaryKeepalive) + Send>;
pub type StandbyStatusHandler = Box<dyn FnMut(XLogRecPtr) + Send>;
pub type ErrorHandler = Box<dyn FnMut(&str) + Send>;
pub type ExitHandler = Box<dyn FnMut() + Send>;

/// The streaming WAL receiver.
///
/// Handlers are registered before `listen`; each event kind keeps its own
/// registration-ordered list, and exit handlers run exactly once when the
/// loop terminates for any reason.
pub struct ReplicationSession<'a> {
    conn: &'a PGConnection,
    slot_name: String,
    status_interval: Duration,
    shutdown: Arc<AtomicBool>,
    decoder: LogicalDecoder,
    confirmed_lsn: XLogRecPtr,
    record_handlers: Vec<RecordHandler>,
    keepalive_handlers: Vec<KeepaliveHandler>,
    standby_status_handlers: Vec<StandbyStatusHandler>,
    error_handlers: Vec<ErrorHandler>,
    exit_handlers: Vec<ExitHandler>,
}

impl<'a> ReplicationSession<'a> {
    pub fn new(conn: &'a PGConnection, slot_name: &str, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            conn,
            slot_name: slot_name.to_string(),
            status_interval: DEFAULT_STATUS_INTERVAL,
            shutdown,
            decoder: LogicalDecoder::new(),
            confirmed_lsn: 0,
            record_handlers: Vec::new(),
            keepalive_handlers: Vec::new(),
            standby_status_handlers: Vec::new(),
            error_handlers: Vec::new(),
            exit_handlers: Vec::new(),
        }
    }

    /// Called for every decoded outbox row, in commit order. A handler
    /// error is fatal to the session and blocks ack advancement past the
    /// failing commit.
    pub fn on_record(&mut self, handler: impl FnMut(&OutboxRecord) -> ConnectorResult<()> + Send + 'static) {
        self.record_handlers.push(Box::new(handler));
    }

    pub fn on_primary_keepalive(&mut self, handler: impl FnMut(&PrimaryKeepalive) + Send + 'static) {
        self.keepalive_handlers.push(Box::new(handler));
    }

    /// Called after each standby status update with the confirmed position
    /// it carried.
    pub fn on_standby_status(&mut self, handler: impl FnMut(XLogRecPtr) + Send + 'static) {
        self.standby_status_handlers.push(Box::new(handler));
    }

    pub fn on_error(&mut self, handler: impl FnMut(&str) + Send + 'static) {
        self.error_handlers.push(Box::new(handler));
    }

    pub fn on_exit(&mut self, handler: impl FnMut() + Send + 'static) {
        self.exit_handlers.push(Box::new(handler));
    }

    /// Run the receive loop until cancellation or a fatal error.
    pub fn listen(&mut self) -> ConnectorResult<()> {
        let result = self.run_loop();
        for handler in &mut self.exit_handlers {
            handler();
        }
        result
    }

    fn run_loop(&mut self) -> ConnectorResult<()> {
        let restart_lsn = self.last_lsn()?;
        info!(
            slot = %self.slot_name,
            restart_lsn = %format_lsn(restart_lsn),
            "starting logical replication"
        );
        self.start_replication(restart_lsn)?;
        self.confirmed_lsn = restart_lsn;

        let mut next_deadline = Instant::now() + self.status_interval;

        while !self.shutdown.load(Ordering::SeqCst) {
            if Instant::now() >= next_deadline {
                self.send_standby_status()?;
                next_deadline = Instant::now() + self.status_interval;
            }

            match self.conn.receive_copy_data(next_deadline)? {
                // Timeouts are the pacemaker, not an error: the next
                // iteration owes the primary a status update.
                CopyReceive::Timeout => continue,
                CopyReceive::Data(data) => self.dispatch(&data, &mut next_deadline)?,
                CopyReceive::Closed => {
                    return Err(ConnectorError::protocol(
                        "replication stream closed by server",
                    ));
                }
                CopyReceive::ServerError(message) => {
                    for handler in &mut self.error_handlers {
                        handler(&message);
                    }
                    return Err(ConnectorError::protocol(format!(
                        "server terminated replication: {message}"
                    )));
                }
            }
        }

        debug!("replication session cancelled");
        Ok(())
    }

    fn dispatch(&mut self, data: &[u8], next_deadline: &mut Instant) -> ConnectorResult<()> {
        let Some(&tag) = data.first() else {
            return Err(ConnectorError::parse("empty replication frame"));
        };

        match tag {
            PRIMARY_KEEPALIVE_BYTE => {
                let keepalive = PrimaryKeepalive::parse(data)?;
                if keepalive.reply_requested {
                    // force a status update before the next receive
                    *next_deadline = Instant::now();
                }
                for handler in &mut self.keepalive_handlers {
                    handler(&keepalive);
                }
            }
            XLOG_DATA_BYTE => {
                let xlog = XLogData::parse(data)?;
                trace!(
                    wal_start = %format_lsn(xlog.wal_start),
                    server_wal_end = %format_lsn(xlog.server_wal_end),
                    len = xlog.data.len(),
                    "xlog data frame"
                );
                let message = MessageParser::parse(&xlog.data)?;
                if let Some(tx) = self.decoder.apply(message)? {
                    for row in &tx.rows {
                        for handler in &mut self.record_handlers {
                            handler(row)?;
                        }
                    }
                    // every row of the commit is downstream-accepted; the
                    // primary may now recycle WAL up to this frame's end
                    self.confirmed_lsn = self.confirmed_lsn.max(xlog.end_lsn());
                    debug!(
                        commit_lsn = %format_lsn(tx.commit_lsn),
                        confirmed = %format_lsn(self.confirmed_lsn),
                        rows = tx.rows.len(),
                        "transaction published"
                    );
                }
            }
            other => {
                warn!(tag = %(other as char), "unknown replication frame");
            }
        }
        Ok(())
    }

    fn send_standby_status(&mut self) -> ConnectorResult<()> {
        let now = system_time_to_postgres_timestamp(SystemTime::now());
        let frame = StandbyStatusUpdate::at(self.confirmed_lsn, now).encode()?;
        self.conn.put_copy_data(&frame)?;
        self.conn.flush()?;

        for handler in &mut self.standby_status_handlers {
            handler(self.confirmed_lsn);
        }
        Ok(())
    }

    /// The slot's restart position, read before streaming begins.
    fn last_lsn(&self) -> ConnectorResult<XLogRecPtr> {
        let query = format!(
            "SELECT restart_lsn FROM pg_replication_slots WHERE slot_name = '{}'",
            self.slot_name
        );
        let result = self.conn.exec(&query)?;
        if !result.is_ok() {
            return Err(ConnectorError::setup(format!(
                "restart_lsn lookup failed: {}",
                result
                    .error_message()
                    .unwrap_or_else(|| format!("{:?}", result.status()))
            )));
        }
        if result.ntuples() != 1 {
            return Err(ConnectorError::setup(format!(
                "expected 1 replication slot named {}, got {}",
                self.slot_name,
                result.ntuples()
            )));
        }
        let text = result
            .getvalue(0, 0)
            .ok_or_else(|| ConnectorError::setup("slot has no restart_lsn"))?;
        parse_lsn(&text)
    }

    fn start_replication(&self, restart_lsn: XLogRecPtr) -> ConnectorResult<()> {
        let command = format!(
            "START_REPLICATION SLOT \"{}\" LOGICAL {} (proto_version '1', publication_names '{}')",
            self.slot_name,
            format_lsn(restart_lsn),
            self.slot_name
        );
        let result = self.conn.exec(&command)?;
        if result.status() != ExecStatusType::PGRES_COPY_BOTH {
            return Err(ConnectorError::setup(format!(
                "failed to start replication: {}",
                result
                    .error_message()
                    .unwrap_or_else(|| format!("{:?}", result.status()))
            )));
        }
        Ok(())
    }
}
