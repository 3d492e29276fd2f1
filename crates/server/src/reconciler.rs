//! Process reconciler: merges agent process snapshots into stored state.
//!
//! Identity of a live process is `(tenant, host, pid)`; `create_time`
//! decides whether a report is a re-sighting of the stored instance or a
//! new instance that took over a recycled pid. Recycled pids retire the old
//! row behind a `not_found` event instead of silently overwriting its
//! identity, so two instances never share one event history.

use chrono::{DateTime, Utc};
use fleet_core::{
    EventKind, EventPayload, ItemError, Process, ProcessReport, RegistryError, ValidProcessReport,
};
use serde::Serialize;

use crate::db::{is_unique_violation, Database};
use crate::host_registry;

/// A pid-recycle takeover: the retired instance and the fresh row that now
/// holds its `(tenant, host, pid)` slot.
#[derive(Debug, Clone, Serialize)]
pub struct Replacement {
    pub retired_process_id: String,
    pub process: Process,
}

/// Best-effort batch result. Items fail individually; `errors` lines up
/// with the input by `index`.
#[derive(Debug, Default, Serialize)]
pub struct ReconcileOutcome {
    pub accepted: usize,
    pub created: Vec<Process>,
    pub updated: Vec<Process>,
    pub replaced: Vec<Replacement>,
    pub errors: Vec<ItemError>,
}

enum ItemOutcome {
    Created(Process),
    Updated(Process),
    Replaced(Replacement),
}

/// Merge one snapshot for one host. Items are handled in input order so
/// derived events land in a deterministic sequence.
pub fn reconcile(
    db: &Database,
    tenant_id: &str,
    machine_id: &str,
    reports: &[ProcessReport],
) -> Result<ReconcileOutcome, RegistryError> {
    let host = host_registry::by_machine(db, tenant_id, machine_id)?;

    let mut outcome = ReconcileOutcome::default();
    for (index, report) in reports.iter().enumerate() {
        let valid = match report.validate() {
            Ok(v) => v,
            Err(RegistryError::Validation { field, message }) => {
                outcome.errors.push(ItemError::new(index, &field, message));
                continue;
            }
            Err(other) => return Err(other),
        };

        match reconcile_item(db, tenant_id, &host.id, &valid) {
            Ok(ItemOutcome::Created(p)) => {
                outcome.accepted += 1;
                outcome.created.push(p);
            }
            Ok(ItemOutcome::Updated(p)) => {
                outcome.accepted += 1;
                outcome.updated.push(p);
            }
            Ok(ItemOutcome::Replaced(r)) => {
                outcome.accepted += 1;
                outcome.replaced.push(r);
            }
            // Storage trouble on one item should not sink the batch either.
            Err(err) => {
                tracing::warn!(
                    tenant = tenant_id,
                    machine_id,
                    pid = valid.pid,
                    error = %err,
                    "failed to reconcile snapshot item"
                );
                outcome
                    .errors
                    .push(ItemError::new(index, "pid", err.to_string()));
            }
        }
    }

    tracing::debug!(
        tenant = tenant_id,
        machine_id,
        accepted = outcome.accepted,
        created = outcome.created.len(),
        updated = outcome.updated.len(),
        replaced = outcome.replaced.len(),
        rejected = outcome.errors.len(),
        "reconciled process snapshot"
    );
    Ok(outcome)
}

fn reconcile_item(
    db: &Database,
    tenant_id: &str,
    host_id: &str,
    report: &ValidProcessReport,
) -> Result<ItemOutcome, RegistryError> {
    let now = Utc::now();

    match db
        .get_process(tenant_id, host_id, report.pid)
        .map_err(RegistryError::storage)?
    {
        Some(existing) if existing.same_instance(report) => {
            merge_resighting(db, existing, report, now).map(ItemOutcome::Updated)
        }
        Some(existing) => replace_instance(db, tenant_id, host_id, existing, report, now)
            .map(ItemOutcome::Replaced),
        None => match create_instance(db, tenant_id, host_id, report, now) {
            Ok(process) => Ok(ItemOutcome::Created(process)),
            Err(RegistryError::Conflict) => {
                // Lost the insert race to a concurrent snapshot. Re-read and
                // merge; the row is guaranteed live now.
                let existing = db
                    .get_process(tenant_id, host_id, report.pid)
                    .map_err(RegistryError::storage)?
                    .ok_or(RegistryError::Conflict)?;
                if existing.same_instance(report) {
                    merge_resighting(db, existing, report, now).map(ItemOutcome::Updated)
                } else {
                    replace_instance(db, tenant_id, host_id, existing, report, now)
                        .map(ItemOutcome::Replaced)
                }
            }
            Err(err) => Err(err),
        },
    }
}

fn create_instance(
    db: &Database,
    tenant_id: &str,
    host_id: &str,
    report: &ValidProcessReport,
    now: DateTime<Utc>,
) -> Result<Process, RegistryError> {
    let process = Process::from_report(tenant_id, host_id, report, now);
    match db.insert_process(&process) {
        Ok(()) => {
            db.insert_event(&process.id, EventKind::Seen, &EventPayload::default(), now)
                .map_err(RegistryError::storage)?;
            Ok(process)
        }
        Err(err) if is_unique_violation(&err) => Err(RegistryError::Conflict),
        Err(err) => Err(RegistryError::storage(err)),
    }
}

fn merge_resighting(
    db: &Database,
    mut existing: Process,
    report: &ValidProcessReport,
    now: DateTime<Utc>,
) -> Result<Process, RegistryError> {
    existing.apply_resighting(report, now);
    db.update_process(&existing).map_err(RegistryError::storage)?;
    Ok(existing)
}

/// The OS handed this pid to a different program instance. Close out the
/// old row with a `not_found` event (its exit was never observed, only its
/// absence) and give the slot to a fresh row with its own `seen` event.
fn replace_instance(
    db: &Database,
    tenant_id: &str,
    host_id: &str,
    old: Process,
    report: &ValidProcessReport,
    now: DateTime<Utc>,
) -> Result<Replacement, RegistryError> {
    db.insert_event(&old.id, EventKind::NotFound, &EventPayload::default(), now)
        .map_err(RegistryError::storage)?;
    db.retire_process(&old.id).map_err(RegistryError::storage)?;

    let process = create_instance(db, tenant_id, host_id, report, now)?;
    tracing::info!(
        tenant = tenant_id,
        pid = report.pid,
        old_process = %old.id,
        new_process = %process.id,
        "pid recycled, retired old instance"
    );
    Ok(Replacement {
        retired_process_id: old.id,
        process,
    })
}

/// All live processes for one machine. Resolves `machine_id` under the
/// caller's tenant first; unknown hosts are NotFound.
pub fn by_machine(
    db: &Database,
    tenant_id: &str,
    machine_id: &str,
) -> Result<Vec<Process>, RegistryError> {
    let host = host_registry::by_machine(db, tenant_id, machine_id)?;
    db.list_processes(tenant_id, &host.id)
        .map_err(RegistryError::storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{HostReport, ProcessStatus, MACHINE_ID_LENGTH};

    fn machine_id() -> String {
        "b".repeat(MACHINE_ID_LENGTH)
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        host_registry::upsert(
            &db,
            "tenant-a",
            &HostReport {
                machine_id: machine_id(),
                ..Default::default()
            },
        )
        .unwrap();
        db
    }

    fn report(pid: i64, create_time: DateTime<Utc>) -> ProcessReport {
        ProcessReport {
            pid: Some(pid),
            executable: Some("/usr/bin/postgres".into()),
            command_line: Some("postgres -D /var/lib/postgresql".into()),
            create_time: Some(create_time),
            status: Some(ProcessStatus::Running),
        }
    }

    #[test]
    fn first_sighting_creates_with_seen_event() {
        let db = setup();
        let outcome = reconcile(&db, "tenant-a", &machine_id(), &[report(100, Utc::now())]).unwrap();

        assert_eq!(outcome.created.len(), 1);
        assert!(outcome.updated.is_empty() && outcome.replaced.is_empty());

        let process = &outcome.created[0];
        assert!(!process.monitored);
        assert!(process.monitored_since.is_none());

        let events = db.events_for_process(&process.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Seen);
    }

    #[test]
    fn resighting_same_instance_merges_without_event() {
        let db = setup();
        let t1 = Utc::now();
        let first = reconcile(&db, "tenant-a", &machine_id(), &[report(100, t1)]).unwrap();
        let created = &first.created[0];

        let mut again = report(100, t1);
        again.status = Some(ProcessStatus::Sleep);
        let second = reconcile(&db, "tenant-a", &machine_id(), &[again]).unwrap();

        assert_eq!(second.updated.len(), 1);
        let updated = &second.updated[0];
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.status, ProcessStatus::Sleep);
        assert!(updated.last_seen_at >= created.last_seen_at);

        // Plain re-sighting appends nothing to the log.
        assert_eq!(db.events_for_process(&created.id).unwrap().len(), 1);
    }

    #[test]
    fn recycled_pid_retires_old_instance() {
        let db = setup();
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::minutes(5);

        let first = reconcile(&db, "tenant-a", &machine_id(), &[report(100, t1)]).unwrap();
        let old_id = first.created[0].id.clone();

        let second = reconcile(&db, "tenant-a", &machine_id(), &[report(100, t2)]).unwrap();
        assert_eq!(second.replaced.len(), 1);
        let replacement = &second.replaced[0];
        assert_eq!(replacement.retired_process_id, old_id);
        assert_ne!(replacement.process.id, old_id);
        assert_eq!(replacement.process.create_time, t2);

        // Old lineage closed out with not_found, new one opened with seen.
        let old_events = db.events_for_process(&old_id).unwrap();
        assert_eq!(old_events.len(), 2);
        assert_eq!(old_events[1].kind, EventKind::NotFound);

        let new_events = db.events_for_process(&replacement.process.id).unwrap();
        assert_eq!(new_events.len(), 1);
        assert_eq!(new_events[0].kind, EventKind::Seen);

        // Only the new instance is live.
        let live = by_machine(&db, "tenant-a", &machine_id()).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, replacement.process.id);
    }

    #[test]
    fn invalid_item_does_not_sink_the_batch() {
        let db = setup();
        let t = Utc::now();
        let missing_pid = ProcessReport {
            executable: Some("/bin/true".into()),
            command_line: Some("true".into()),
            create_time: Some(t),
            ..Default::default()
        };
        let batch = vec![report(1, t), missing_pid, report(3, t)];

        let outcome = reconcile(&db, "tenant-a", &machine_id(), &batch).unwrap();
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 1);
        assert_eq!(outcome.errors[0].field, "pid");

        let live = by_machine(&db, "tenant-a", &machine_id()).unwrap();
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn unknown_machine_is_not_found() {
        let db = setup();
        assert!(matches!(
            reconcile(&db, "tenant-a", &"c".repeat(MACHINE_ID_LENGTH), &[]),
            Err(RegistryError::NotFound)
        ));
        // Another tenant cannot reach this machine either.
        assert!(matches!(
            by_machine(&db, "tenant-b", &machine_id()),
            Err(RegistryError::NotFound)
        ));
    }
}
