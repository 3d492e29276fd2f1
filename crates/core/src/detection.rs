//! Per-process detection configuration.
//!
//! Exactly one config per process. A toggle enabled without its threshold
//! is a valid-but-inert configuration, accepted silently: the agent simply
//! has nothing to compare against until the threshold arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub id: String,
    pub tenant_id: String,
    pub process_id: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub detect_signals: bool,
    pub detect_thresholds: bool,
    pub detect_suspected_hangs: bool,
    pub cpu_threshold: Option<i64>,
    pub memory_threshold: Option<i64>,
    /// Seconds a process may sit unresponsive before the agent flags a hang.
    pub suspected_hang_duration: Option<i64>,
    pub restart_on_signal: bool,
    pub restart_on_cpu_threshold: bool,
    pub restart_on_memory_threshold: bool,
    pub restart_on_suspected_hang: bool,
}

/// Partial update for a config. Absent fields keep their stored values;
/// this is the only write shape the API accepts, so a dashboard can flip
/// one toggle without resending the whole config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionConfigPatch {
    #[serde(default)]
    pub detect_signals: Option<bool>,
    #[serde(default)]
    pub detect_thresholds: Option<bool>,
    #[serde(default)]
    pub detect_suspected_hangs: Option<bool>,
    #[serde(default)]
    pub cpu_threshold: Option<i64>,
    #[serde(default)]
    pub memory_threshold: Option<i64>,
    #[serde(default)]
    pub suspected_hang_duration: Option<i64>,
    #[serde(default)]
    pub restart_on_signal: Option<bool>,
    #[serde(default)]
    pub restart_on_cpu_threshold: Option<bool>,
    #[serde(default)]
    pub restart_on_memory_threshold: Option<bool>,
    #[serde(default)]
    pub restart_on_suspected_hang: Option<bool>,
}

impl DetectionConfig {
    /// A fresh config with everything off except `restart_on_signal`,
    /// which agents expect on by default.
    pub fn new(tenant_id: &str, process_id: &str, now: DateTime<Utc>) -> Self {
        DetectionConfig {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            process_id: process_id.to_string(),
            created_at: now,
            modified_at: now,
            detect_signals: false,
            detect_thresholds: false,
            detect_suspected_hangs: false,
            cpu_threshold: None,
            memory_threshold: None,
            suspected_hang_duration: None,
            restart_on_signal: true,
            restart_on_cpu_threshold: false,
            restart_on_memory_threshold: false,
            restart_on_suspected_hang: false,
        }
    }

    /// Apply a patch, bumping `modified_at`. `created_at` is immutable.
    pub fn apply_patch(&mut self, patch: &DetectionConfigPatch, now: DateTime<Utc>) {
        if let Some(v) = patch.detect_signals {
            self.detect_signals = v;
        }
        if let Some(v) = patch.detect_thresholds {
            self.detect_thresholds = v;
        }
        if let Some(v) = patch.detect_suspected_hangs {
            self.detect_suspected_hangs = v;
        }
        if let Some(v) = patch.cpu_threshold {
            self.cpu_threshold = Some(v);
        }
        if let Some(v) = patch.memory_threshold {
            self.memory_threshold = Some(v);
        }
        if let Some(v) = patch.suspected_hang_duration {
            self.suspected_hang_duration = Some(v);
        }
        if let Some(v) = patch.restart_on_signal {
            self.restart_on_signal = v;
        }
        if let Some(v) = patch.restart_on_cpu_threshold {
            self.restart_on_cpu_threshold = v;
        }
        if let Some(v) = patch.restart_on_memory_threshold {
            self.restart_on_memory_threshold = v;
        }
        if let Some(v) = patch.restart_on_suspected_hang {
            self.restart_on_suspected_hang = v;
        }
        self.modified_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_touches_only_supplied_fields() {
        let created = Utc::now();
        let mut config = DetectionConfig::new("tenant-a", "proc-1", created);
        assert!(config.restart_on_signal);

        let later = created + chrono::Duration::seconds(5);
        let patch = DetectionConfigPatch {
            detect_thresholds: Some(true),
            cpu_threshold: Some(90),
            ..Default::default()
        };
        config.apply_patch(&patch, later);

        assert!(config.detect_thresholds);
        assert_eq!(config.cpu_threshold, Some(90));
        assert!(config.restart_on_signal);
        assert!(!config.detect_signals);
        assert_eq!(config.created_at, created);
        assert_eq!(config.modified_at, later);
    }

    #[test]
    fn toggle_without_threshold_is_accepted() {
        // Inert configuration: hang detection on, no duration set.
        let now = Utc::now();
        let mut config = DetectionConfig::new("tenant-a", "proc-1", now);
        let patch = DetectionConfigPatch {
            detect_suspected_hangs: Some(true),
            ..Default::default()
        };
        config.apply_patch(&patch, now);
        assert!(config.detect_suspected_hangs);
        assert_eq!(config.suspected_hang_duration, None);
    }
}
