//! Host records and agent host reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Agents identify themselves with a fixed-length platform machine id
/// (the 32-hex-char machine GUID on Linux and equivalents elsewhere).
pub const MACHINE_ID_LENGTH: usize = 32;

/// A monitored machine as stored. `machine_id` is the external
/// reconciliation key, unique per tenant; `id` is the stable opaque key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub tenant_id: String,
    pub machine_id: String,
    pub public_ip_address: Option<String>,
    pub hostname: Option<String>,
    pub last_boot_at: Option<DateTime<Utc>>,
    pub operating_system: Option<String>,
    pub platform: Option<String>,
    pub platform_family: Option<String>,
    pub platform_version: Option<String>,
    pub kernel_version: Option<String>,
    pub kernel_architecture: Option<String>,
    pub virtualization_system: Option<String>,
    pub virtualization_role: Option<String>,
    /// Set on first registration, never changed afterwards.
    pub first_seen: DateTime<Utc>,
    /// Bumped on every successful report.
    pub last_probe_at: DateTime<Utc>,
}

/// One host status report from an agent. Everything but `machine_id` is
/// optional: agents on restricted platforms omit fields they cannot read,
/// and an omitted field must leave the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostReport {
    pub machine_id: String,
    #[serde(default)]
    pub public_ip_address: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub last_boot_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub operating_system: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub platform_family: Option<String>,
    #[serde(default)]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub kernel_version: Option<String>,
    #[serde(default)]
    pub kernel_architecture: Option<String>,
    #[serde(default)]
    pub virtualization_system: Option<String>,
    #[serde(default)]
    pub virtualization_role: Option<String>,
}

impl HostReport {
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.machine_id.len() != MACHINE_ID_LENGTH {
            return Err(RegistryError::validation(
                "machine_id",
                format!("must be exactly {} characters", MACHINE_ID_LENGTH),
            ));
        }
        Ok(())
    }
}

impl Host {
    /// Build a brand new host row from the first report for a machine id.
    pub fn from_report(tenant_id: &str, report: &HostReport, now: DateTime<Utc>) -> Self {
        let mut host = Host {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            machine_id: report.machine_id.clone(),
            public_ip_address: None,
            hostname: None,
            last_boot_at: None,
            operating_system: None,
            platform: None,
            platform_family: None,
            platform_version: None,
            kernel_version: None,
            kernel_architecture: None,
            virtualization_system: None,
            virtualization_role: None,
            first_seen: now,
            last_probe_at: now,
        };
        host.apply_report(report, now);
        host
    }

    /// Merge a report into an existing row. Only fields the report carries
    /// are replaced; `first_seen` is never touched.
    pub fn apply_report(&mut self, report: &HostReport, now: DateTime<Utc>) {
        if let Some(v) = &report.public_ip_address {
            self.public_ip_address = Some(v.clone());
        }
        if let Some(v) = &report.hostname {
            self.hostname = Some(v.clone());
        }
        if let Some(v) = report.last_boot_at {
            self.last_boot_at = Some(v);
        }
        if let Some(v) = &report.operating_system {
            self.operating_system = Some(v.clone());
        }
        if let Some(v) = &report.platform {
            self.platform = Some(v.clone());
        }
        if let Some(v) = &report.platform_family {
            self.platform_family = Some(v.clone());
        }
        if let Some(v) = &report.platform_version {
            self.platform_version = Some(v.clone());
        }
        if let Some(v) = &report.kernel_version {
            self.kernel_version = Some(v.clone());
        }
        if let Some(v) = &report.kernel_architecture {
            self.kernel_architecture = Some(v.clone());
        }
        if let Some(v) = &report.virtualization_system {
            self.virtualization_system = Some(v.clone());
        }
        if let Some(v) = &report.virtualization_role {
            self.virtualization_role = Some(v.clone());
        }
        self.last_probe_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_id() -> String {
        "a".repeat(MACHINE_ID_LENGTH)
    }

    #[test]
    fn report_merge_keeps_absent_fields() {
        let now = Utc::now();
        let full = HostReport {
            machine_id: machine_id(),
            hostname: Some("web-1".into()),
            operating_system: Some("linux".into()),
            kernel_version: Some("6.1.0".into()),
            ..Default::default()
        };
        let mut host = Host::from_report("tenant-a", &full, now);
        assert_eq!(host.hostname.as_deref(), Some("web-1"));

        let later = now + chrono::Duration::seconds(30);
        let partial = HostReport {
            machine_id: machine_id(),
            kernel_version: Some("6.1.1".into()),
            ..Default::default()
        };
        host.apply_report(&partial, later);

        // Supplied field replaced, absent fields untouched.
        assert_eq!(host.kernel_version.as_deref(), Some("6.1.1"));
        assert_eq!(host.hostname.as_deref(), Some("web-1"));
        assert_eq!(host.operating_system.as_deref(), Some("linux"));
        assert_eq!(host.first_seen, now);
        assert_eq!(host.last_probe_at, later);
    }

    #[test]
    fn machine_id_length_is_enforced() {
        let report = HostReport {
            machine_id: "short".into(),
            ..Default::default()
        };
        assert!(matches!(
            report.validate(),
            Err(RegistryError::Validation { .. })
        ));
    }
}
