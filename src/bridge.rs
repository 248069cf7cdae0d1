//! Command orchestration for the postgres→kafka bridge
//!
//! Wires the blocking replication session (libpq is synchronous, so it
//! runs under `spawn_blocking`) to the async Kafka sink, the stats
//! reporter, and the ctrl-c shutdown flag.

use crate::core::config::Config;
use crate::core::errors::ConnectorResult;
use crate::replication::session::ReplicationSession;
use crate::replication::slot;
use crate::sink::pipeline::Publisher;
use crate::sink::{KafkaSink, RecordSink};
use crate::utils::binary::format_lsn;
use crate::utils::connection::PGConnection;
use crate::utils::timestamp::format_postgres_timestamp;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Run the bridge until cancellation or a fatal error: ensure the slot,
/// stream the outbox, publish to Kafka, acknowledge progress.
pub async fn run(config: &Config) -> ConnectorResult<()> {
    let sink = Arc::new(KafkaSink::new(&config.kafka)?);
    info!(
        sink = sink.name(),
        brokers = ?config.kafka.brokers,
        "initialized event sink"
    );
    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_shutdown_watcher(shutdown.clone());

    let publisher = Publisher::new(sink, Handle::current());
    let published = publisher.published_counter();

    let stats = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                info!(
                    published = published.load(Ordering::Relaxed),
                    "publish progress"
                );
            }
        })
    };

    let connection_uri = config.postgres.connection_uri.clone();
    let slot_name = config.postgres.slot_name().to_string();
    let session_shutdown = shutdown.clone();

    let result = tokio::task::spawn_blocking(move || -> ConnectorResult<()> {
        let conn = PGConnection::connect(&connection_uri)?;
        slot::create_slot(&conn, &slot_name)?;

        let mut session = ReplicationSession::new(&conn, &slot_name, session_shutdown);
        session.on_primary_keepalive(|keepalive| {
            debug!(
                server_wal_end = %format_lsn(keepalive.server_wal_end),
                server_time = %format_postgres_timestamp(keepalive.server_time),
                reply_requested = keepalive.reply_requested,
                "primary keepalive"
            );
        });
        session.on_standby_status(|confirmed| {
            debug!(confirmed = %format_lsn(confirmed), "standby status sent");
        });
        session.on_error(|message| {
            warn!(message, "server reported replication error");
        });
        session.on_exit(|| info!("replication session closed"));
        session.on_record(move |record| publisher.deliver(record));

        session.listen()
    })
    .await?;

    shutdown.store(true, Ordering::SeqCst);
    stats.abort();
    result
}

/// Drop the publication and replication slot, then return.
pub async fn drop_slot(config: &Config) -> ConnectorResult<()> {
    with_connection(config, |conn, slot_name| slot::drop_slot(conn, slot_name)).await
}

/// Drop and recreate the publication and replication slot, then return.
pub async fn renew_slot(config: &Config) -> ConnectorResult<()> {
    with_connection(config, |conn, slot_name| slot::renew_slot(conn, slot_name)).await
}

async fn with_connection(
    config: &Config,
    op: impl FnOnce(&PGConnection, &str) -> ConnectorResult<()> + Send + 'static,
) -> ConnectorResult<()> {
    let connection_uri = config.postgres.connection_uri.clone();
    let slot_name = config.postgres.slot_name().to_string();
    tokio::task::spawn_blocking(move || {
        let conn = PGConnection::connect(&connection_uri)?;
        op(&conn, &slot_name)
    })
    .await?
}

fn spawn_shutdown_watcher(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                shutdown.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("cannot listen for shutdown signal: {e}"),
        }
    });
}
