//! Host registry: idempotent upsert of per-tenant host records.

use chrono::Utc;
use fleet_core::{Host, HostReport, RegistryError};

use crate::db::{is_unique_violation, Database};

/// Create-or-update the host row for `(tenant, machine_id)`.
///
/// Fields the report omits keep their stored values; `last_probe_at` is
/// always bumped, `first_seen` is set once on creation and never touched
/// again. Losing an insert race to a concurrent report degrades to the
/// update path, so the call never fails with "already exists".
pub fn upsert(db: &Database, tenant_id: &str, report: &HostReport) -> Result<Host, RegistryError> {
    report.validate()?;
    db.ensure_tenant(tenant_id).map_err(RegistryError::storage)?;

    let now = Utc::now();
    if let Some(mut host) = db
        .get_host(tenant_id, &report.machine_id)
        .map_err(RegistryError::storage)?
    {
        host.apply_report(report, now);
        db.update_host(&host).map_err(RegistryError::storage)?;
        return Ok(host);
    }

    let host = Host::from_report(tenant_id, report, now);
    match db.insert_host(&host) {
        Ok(()) => {
            tracing::info!(
                tenant = tenant_id,
                machine_id = %report.machine_id,
                "registered new host"
            );
            Ok(host)
        }
        Err(err) if is_unique_violation(&err) => {
            // A concurrent first report won the insert; merge into its row.
            let mut existing = db
                .get_host(tenant_id, &report.machine_id)
                .map_err(RegistryError::storage)?
                .ok_or(RegistryError::Conflict)?;
            existing.apply_report(report, now);
            db.update_host(&existing).map_err(RegistryError::storage)?;
            Ok(existing)
        }
        Err(err) => Err(RegistryError::storage(err)),
    }
}

pub fn by_machine(
    db: &Database,
    tenant_id: &str,
    machine_id: &str,
) -> Result<Host, RegistryError> {
    db.get_host(tenant_id, machine_id)
        .map_err(RegistryError::storage)?
        .ok_or(RegistryError::NotFound)
}

pub fn list(db: &Database, tenant_id: &str) -> Result<Vec<Host>, RegistryError> {
    db.list_hosts(tenant_id).map_err(RegistryError::storage)
}
