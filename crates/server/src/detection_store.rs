//! Detection configuration store.
//!
//! One config per process, upserted in place. Listings are windowed by the
//! owning process's `last_seen_at`: an agent that stopped reporting should
//! not keep surfacing its configs as actionable. Stale configs are hidden,
//! never deleted; there is deliberately no delete operation at all, because
//! the agent has no protocol to learn that a config vanished server-side.

use chrono::{DateTime, Duration, Utc};
use fleet_core::{DetectionConfig, DetectionConfigPatch, RegistryError};

use crate::db::{is_unique_violation, Database};
use crate::host_registry;

/// Default staleness window for "active" listings.
pub fn default_cutoff() -> DateTime<Utc> {
    Utc::now() - Duration::days(1)
}

/// Create or update the single config for a process. The first write sets
/// `created_at`; every later write patches only the supplied fields and
/// bumps `modified_at`. A toggle enabled without its threshold is accepted
/// as-is (inert until the threshold arrives).
pub fn upsert(
    db: &Database,
    tenant_id: &str,
    process_id: &str,
    patch: &DetectionConfigPatch,
) -> Result<DetectionConfig, RegistryError> {
    let process = db
        .get_process_by_id(tenant_id, process_id)
        .map_err(RegistryError::storage)?
        .ok_or(RegistryError::NotFound)?;

    let now = Utc::now();
    if let Some(mut existing) = db
        .get_config_for_process(tenant_id, &process.id)
        .map_err(RegistryError::storage)?
    {
        existing.apply_patch(patch, now);
        db.update_config(&existing).map_err(RegistryError::storage)?;
        return Ok(existing);
    }

    let mut config = DetectionConfig::new(tenant_id, &process.id, now);
    config.apply_patch(patch, now);
    match db.insert_config(&config) {
        Ok(()) => {
            tracing::info!(
                tenant = tenant_id,
                process = process_id,
                "created detection config"
            );
            Ok(config)
        }
        Err(err) if is_unique_violation(&err) => {
            // Concurrent first write; patch the row that won.
            let mut existing = db
                .get_config_for_process(tenant_id, &process.id)
                .map_err(RegistryError::storage)?
                .ok_or(RegistryError::Conflict)?;
            existing.apply_patch(patch, now);
            db.update_config(&existing).map_err(RegistryError::storage)?;
            Ok(existing)
        }
        Err(err) => Err(RegistryError::storage(err)),
    }
}

pub fn get(
    db: &Database,
    tenant_id: &str,
    config_id: &str,
) -> Result<DetectionConfig, RegistryError> {
    db.get_config(tenant_id, config_id)
        .map_err(RegistryError::storage)?
        .ok_or(RegistryError::NotFound)
}

/// Configs whose process reported at or after `cutoff`.
pub fn list_active(
    db: &Database,
    tenant_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<DetectionConfig>, RegistryError> {
    db.list_active_configs(tenant_id, cutoff)
        .map_err(RegistryError::storage)
}

/// Same window, scoped to one machine.
pub fn by_machine(
    db: &Database,
    tenant_id: &str,
    machine_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<DetectionConfig>, RegistryError> {
    let host = host_registry::by_machine(db, tenant_id, machine_id)?;
    db.configs_for_host(tenant_id, &host.id, cutoff)
        .map_err(RegistryError::storage)
}
