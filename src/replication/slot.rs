//! Publication and replication slot lifecycle
//!
//! Create, drop, and renew are all idempotent: "already exists" on create
//! and "does not exist" on drop are success. The publication and the slot
//! share one configured name; the publication covers the outbox table for
//! inserts only.

use crate::core::errors::{ConnectorError, ConnectorResult};
use crate::utils::connection::{PGConnection, PGResult};
use tracing::info;

const PGOUTPUT_PLUGIN: &str = "pgoutput";
const OUTBOX_TABLE: &str = "gulfstream.outbox";

// SQLSTATE codes the lifecycle treats as success
const DUPLICATE_OBJECT: &str = "42710";
const UNDEFINED_OBJECT: &str = "42704";

/// Ensure the publication and the logical replication slot exist.
///
/// Safe to call on every startup; an existing publication or slot is left
/// untouched. On a fresh slot the server echoes the assigned name, which
/// must match the requested one.
pub fn create_slot(conn: &PGConnection, slot_name: &str) -> ConnectorResult<()> {
    let result = conn.exec(&format!(
        "CREATE PUBLICATION {slot_name} FOR TABLE {OUTBOX_TABLE} WITH (publish = 'insert');"
    ))?;
    if !result.is_ok() && !has_sqlstate(&result, DUPLICATE_OBJECT) {
        return Err(setup_error("create publication", slot_name, &result));
    }

    let result = conn.exec(&format!(
        "CREATE_REPLICATION_SLOT {slot_name} LOGICAL {PGOUTPUT_PLUGIN} NOEXPORT_SNAPSHOT"
    ))?;
    if !result.is_ok() {
        if has_sqlstate(&result, DUPLICATE_OBJECT) {
            return Ok(());
        }
        return Err(setup_error("create replication slot", slot_name, &result));
    }

    // Fresh slot: the first result column carries the server-assigned name.
    match result.getvalue(0, 0) {
        Some(assigned) if assigned == slot_name => {
            info!(slot = slot_name, "created replication slot and publication");
            Ok(())
        }
        Some(assigned) => Err(ConnectorError::setup(format!(
            "slot creation error got {assigned}, expected {slot_name}"
        ))),
        None => Err(ConnectorError::setup(
            "slot creation returned no slot name",
        )),
    }
}

/// Drop the publication and the replication slot.
///
/// The slot drop waits for any active consumer to detach; a slot that is
/// already gone is success.
pub fn drop_slot(conn: &PGConnection, slot_name: &str) -> ConnectorResult<()> {
    let result = conn.exec(&format!("DROP PUBLICATION IF EXISTS {slot_name};"))?;
    if !result.is_ok() {
        return Err(setup_error("drop publication", slot_name, &result));
    }

    let result = conn.exec(&format!("DROP_REPLICATION_SLOT {slot_name} WAIT"))?;
    if !result.is_ok() && !has_sqlstate(&result, UNDEFINED_OBJECT) {
        return Err(setup_error("drop replication slot", slot_name, &result));
    }

    info!(slot = slot_name, "dropped replication slot and publication");
    Ok(())
}

/// Drop and recreate both objects. Pending WAL past the consumer position
/// is lost.
pub fn renew_slot(conn: &PGConnection, slot_name: &str) -> ConnectorResult<()> {
    drop_slot(conn, slot_name)?;
    create_slot(conn, slot_name)
}

fn has_sqlstate(result: &PGResult, code: &str) -> bool {
    result.sqlstate().as_deref() == Some(code)
}

fn setup_error(operation: &str, slot_name: &str, result: &PGResult) -> ConnectorError {
    let detail = result
        .error_message()
        .unwrap_or_else(|| format!("{:?}", result.status()));
    ConnectorError::setup(format!("{operation} {slot_name}: {detail}"))
}
