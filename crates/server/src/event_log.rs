//! Append-only process event log.
//!
//! The reconciler writes `seen`/`not_found` transitions itself; this module
//! is the path for everything else: agents reporting detected conditions
//! (signals, threshold crossings, suspected hangs, exits) and dashboards
//! reading histories. Events are never updated or deleted.

use chrono::Utc;
use fleet_core::{EventKind, EventPayload, ProcessEvent, RegistryError};

use crate::db::Database;
use crate::host_registry;

/// Append one event to a process the caller's tenant owns.
pub fn append(
    db: &Database,
    tenant_id: &str,
    process_id: &str,
    kind: EventKind,
    payload: &EventPayload,
) -> Result<ProcessEvent, RegistryError> {
    // Ownership check before the write; foreign processes are NotFound.
    let process = db
        .get_process_by_id(tenant_id, process_id)
        .map_err(RegistryError::storage)?
        .ok_or(RegistryError::NotFound)?;

    let event = db
        .insert_event(&process.id, kind, payload, Utc::now())
        .map_err(RegistryError::storage)?;
    tracing::debug!(
        tenant = tenant_id,
        process = process_id,
        kind = ?kind,
        seq = event.seq,
        "appended process event"
    );
    Ok(event)
}

/// Full history for one process, oldest first. `(created_at, seq)` ordering
/// keeps same-timestamp events in insertion order.
pub fn all_events(
    db: &Database,
    tenant_id: &str,
    process_id: &str,
) -> Result<Vec<ProcessEvent>, RegistryError> {
    let process = db
        .get_process_by_id(tenant_id, process_id)
        .map_err(RegistryError::storage)?
        .ok_or(RegistryError::NotFound)?;
    db.events_for_process(&process.id)
        .map_err(RegistryError::storage)
}

/// The newest event for one process; NotFound when the log is empty.
pub fn latest_event(
    db: &Database,
    tenant_id: &str,
    process_id: &str,
) -> Result<ProcessEvent, RegistryError> {
    let process = db
        .get_process_by_id(tenant_id, process_id)
        .map_err(RegistryError::storage)?
        .ok_or(RegistryError::NotFound)?;
    db.latest_event(&process.id)
        .map_err(RegistryError::storage)?
        .ok_or(RegistryError::NotFound)
}

/// Every event for every process (live and retired) on one machine.
pub fn by_machine(
    db: &Database,
    tenant_id: &str,
    machine_id: &str,
) -> Result<Vec<ProcessEvent>, RegistryError> {
    let host = host_registry::by_machine(db, tenant_id, machine_id)?;
    db.events_for_host(&host.id).map_err(RegistryError::storage)
}
