//! Process records and per-snapshot process reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// OS scheduler state of a process, as reported by the agent. The wire and
/// storage form is the single-letter code the OS tooling uses (R/S/T/I/Z/W/L).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProcessStatus {
    Running,
    Sleep,
    Stop,
    Idle,
    Zombie,
    Wait,
    Lock,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "R",
            ProcessStatus::Sleep => "S",
            ProcessStatus::Stop => "T",
            ProcessStatus::Idle => "I",
            ProcessStatus::Zombie => "Z",
            ProcessStatus::Wait => "W",
            ProcessStatus::Lock => "L",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "R" => Some(ProcessStatus::Running),
            "S" => Some(ProcessStatus::Sleep),
            "T" => Some(ProcessStatus::Stop),
            "I" => Some(ProcessStatus::Idle),
            "Z" => Some(ProcessStatus::Zombie),
            "W" => Some(ProcessStatus::Wait),
            "L" => Some(ProcessStatus::Lock),
            _ => None,
        }
    }
}

impl TryFrom<String> for ProcessStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ProcessStatus::from_code(&value)
            .ok_or_else(|| format!("unknown process status '{}'", value))
    }
}

impl From<ProcessStatus> for String {
    fn from(status: ProcessStatus) -> Self {
        status.as_str().to_string()
    }
}

/// One OS process instance on one host. `(tenant_id, host_id, pid)` is the
/// live reconciliation key; `create_time` disambiguates pid reuse, so two
/// rows may share a pid across the lifetime of a host but never concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: String,
    pub tenant_id: String,
    pub host_id: String,
    pub pid: i64,
    pub executable: String,
    pub command_line: String,
    pub create_time: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub monitored: bool,
    pub monitored_since: Option<DateTime<Utc>>,
    pub status: ProcessStatus,
    /// True once a newer instance recycled this row's pid. Retired rows keep
    /// their event history but no longer hold the live reconciliation key.
    pub retired: bool,
}

/// One entry of an agent process snapshot. Fields are optional at the wire
/// level so a malformed entry can be rejected on its own without sinking
/// the rest of the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessReport {
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub command_line: Option<String>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<ProcessStatus>,
}

/// A `ProcessReport` with its required fields proven present.
#[derive(Debug, Clone)]
pub struct ValidProcessReport {
    pub pid: i64,
    pub executable: String,
    pub command_line: String,
    pub create_time: DateTime<Utc>,
    pub status: ProcessStatus,
}

impl ProcessReport {
    /// Check the required fields. `status` defaults to Running when omitted,
    /// matching what agents report for a freshly sampled process.
    pub fn validate(&self) -> Result<ValidProcessReport, RegistryError> {
        let pid = self
            .pid
            .ok_or_else(|| RegistryError::validation("pid", "required"))?;
        if pid < 0 {
            return Err(RegistryError::validation("pid", "must be non-negative"));
        }
        let executable = match &self.executable {
            Some(e) if !e.is_empty() => e.clone(),
            _ => return Err(RegistryError::validation("executable", "required")),
        };
        let command_line = match &self.command_line {
            Some(c) if !c.is_empty() => c.clone(),
            _ => return Err(RegistryError::validation("command_line", "required")),
        };
        let create_time = self
            .create_time
            .ok_or_else(|| RegistryError::validation("create_time", "required"))?;
        Ok(ValidProcessReport {
            pid,
            executable,
            command_line,
            create_time,
            status: self.status.unwrap_or(ProcessStatus::Running),
        })
    }
}

impl Process {
    pub fn from_report(
        tenant_id: &str,
        host_id: &str,
        report: &ValidProcessReport,
        now: DateTime<Utc>,
    ) -> Self {
        Process {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            host_id: host_id.to_string(),
            pid: report.pid,
            executable: report.executable.clone(),
            command_line: report.command_line.clone(),
            create_time: report.create_time,
            last_seen_at: now,
            monitored: false,
            monitored_since: None,
            status: report.status,
            retired: false,
        }
    }

    /// True when a report describes this same OS process instance.
    pub fn same_instance(&self, report: &ValidProcessReport) -> bool {
        self.pid == report.pid && self.create_time == report.create_time
    }

    /// Merge a re-sighting of this instance. Identity fields (`pid`,
    /// `create_time`) are left alone; callers must have checked
    /// `same_instance` first.
    pub fn apply_resighting(&mut self, report: &ValidProcessReport, now: DateTime<Utc>) {
        self.executable = report.executable.clone();
        self.command_line = report.command_line.clone();
        self.status = report.status;
        self.last_seen_at = now;
    }
}
