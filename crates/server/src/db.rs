// SQLite persistence layer.
//
// All cross-row invariants live here as UNIQUE constraints:
//   hosts(tenant_id, machine_id), processes(tenant_id, host_id, pid),
//   detection_configs(process_id). Components catch constraint races with
// `is_unique_violation` and retry as a read-modify-write.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fleet_core::{
    DetectionConfig, EventKind, EventPayload, Host, Process, ProcessEvent, ProcessStatus,
};
use rusqlite::{params, Connection};

pub struct Database {
    conn: Mutex<Connection>,
}

/// True when an INSERT lost a race against the table's UNIQUE constraint.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_ts(column: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_opt_ts(column: usize, raw: Option<String>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    match raw {
        Some(s) => parse_ts(column, &s).map(Some),
        None => Ok(None),
    }
}

fn decode_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                tenant_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hosts (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                machine_id TEXT NOT NULL,
                public_ip_address TEXT,
                hostname TEXT,
                last_boot_at TEXT,
                operating_system TEXT,
                platform TEXT,
                platform_family TEXT,
                platform_version TEXT,
                kernel_version TEXT,
                kernel_architecture TEXT,
                virtualization_system TEXT,
                virtualization_role TEXT,
                first_seen TEXT NOT NULL,
                last_probe_at TEXT NOT NULL,
                UNIQUE (tenant_id, machine_id)
            );

            -- retired marks rows whose pid was recycled by a newer process
            -- instance; they keep their event history but leave the live
            -- reconciliation key, enforced by the partial unique index below.
            CREATE TABLE IF NOT EXISTS processes (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                host_id TEXT NOT NULL,
                pid INTEGER NOT NULL,
                executable TEXT NOT NULL,
                command_line TEXT NOT NULL,
                create_time TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                monitored INTEGER NOT NULL DEFAULT 0,
                monitored_since TEXT,
                status TEXT NOT NULL,
                retired INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (host_id) REFERENCES hosts(id)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_processes_live_key
                ON processes(tenant_id, host_id, pid) WHERE retired = 0;

            -- Append-only. seq is the monotonic tiebreaker for events that
            -- share a created_at timestamp.
            CREATE TABLE IF NOT EXISTS process_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                process_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL,
                caught_signal INTEGER,
                cpu_usage INTEGER,
                memory_usage INTEGER,
                exit_code INTEGER,
                core_dump_location TEXT,
                FOREIGN KEY (process_id) REFERENCES processes(id)
            );

            CREATE TABLE IF NOT EXISTS detection_configs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                process_id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                detect_signals INTEGER NOT NULL DEFAULT 0,
                detect_thresholds INTEGER NOT NULL DEFAULT 0,
                detect_suspected_hangs INTEGER NOT NULL DEFAULT 0,
                cpu_threshold INTEGER,
                memory_threshold INTEGER,
                suspected_hang_duration INTEGER,
                restart_on_signal INTEGER NOT NULL DEFAULT 1,
                restart_on_cpu_threshold INTEGER NOT NULL DEFAULT 0,
                restart_on_memory_threshold INTEGER NOT NULL DEFAULT 0,
                restart_on_suspected_hang INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (process_id) REFERENCES processes(id)
            );

            CREATE INDEX IF NOT EXISTS idx_hosts_tenant
                ON hosts(tenant_id);

            CREATE INDEX IF NOT EXISTS idx_processes_host
                ON processes(tenant_id, host_id);

            CREATE INDEX IF NOT EXISTS idx_events_process
                ON process_events(process_id, created_at);

            CREATE INDEX IF NOT EXISTS idx_configs_tenant
                ON detection_configs(tenant_id);
        "#,
        )?;
        Ok(())
    }

    // Tenant operations

    /// Provision the tenant row on first sight. Idempotent.
    pub fn ensure_tenant(&self, tenant_id: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO tenants (tenant_id, created_at) VALUES (?1, ?2)",
            params![tenant_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // Host operations

    pub fn get_host(
        &self,
        tenant_id: &str,
        machine_id: &str,
    ) -> Result<Option<Host>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM hosts WHERE tenant_id = ?1 AND machine_id = ?2",
            HOST_COLUMNS
        ))?;
        let mut rows = stmt.query(params![tenant_id, machine_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_host(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_hosts(&self, tenant_id: &str) -> Result<Vec<Host>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM hosts WHERE tenant_id = ?1 ORDER BY machine_id",
            HOST_COLUMNS
        ))?;
        let mut rows = stmt.query(params![tenant_id])?;
        let mut hosts = Vec::new();
        while let Some(row) = rows.next()? {
            hosts.push(Self::row_to_host(row)?);
        }
        Ok(hosts)
    }

    pub fn insert_host(&self, host: &Host) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO hosts
               (id, tenant_id, machine_id, public_ip_address, hostname, last_boot_at,
                operating_system, platform, platform_family, platform_version,
                kernel_version, kernel_architecture, virtualization_system,
                virtualization_role, first_seen, last_probe_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"#,
            params![
                host.id,
                host.tenant_id,
                host.machine_id,
                host.public_ip_address,
                host.hostname,
                host.last_boot_at.map(|t| t.to_rfc3339()),
                host.operating_system,
                host.platform,
                host.platform_family,
                host.platform_version,
                host.kernel_version,
                host.kernel_architecture,
                host.virtualization_system,
                host.virtualization_role,
                host.first_seen.to_rfc3339(),
                host.last_probe_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update_host(&self, host: &Host) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"UPDATE hosts SET
                public_ip_address = ?2, hostname = ?3, last_boot_at = ?4,
                operating_system = ?5, platform = ?6, platform_family = ?7,
                platform_version = ?8, kernel_version = ?9, kernel_architecture = ?10,
                virtualization_system = ?11, virtualization_role = ?12,
                last_probe_at = ?13
               WHERE id = ?1"#,
            params![
                host.id,
                host.public_ip_address,
                host.hostname,
                host.last_boot_at.map(|t| t.to_rfc3339()),
                host.operating_system,
                host.platform,
                host.platform_family,
                host.platform_version,
                host.kernel_version,
                host.kernel_architecture,
                host.virtualization_system,
                host.virtualization_role,
                host.last_probe_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_host(row: &rusqlite::Row) -> Result<Host, rusqlite::Error> {
        Ok(Host {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            machine_id: row.get(2)?,
            public_ip_address: row.get(3)?,
            hostname: row.get(4)?,
            last_boot_at: parse_opt_ts(5, row.get(5)?)?,
            operating_system: row.get(6)?,
            platform: row.get(7)?,
            platform_family: row.get(8)?,
            platform_version: row.get(9)?,
            kernel_version: row.get(10)?,
            kernel_architecture: row.get(11)?,
            virtualization_system: row.get(12)?,
            virtualization_role: row.get(13)?,
            first_seen: parse_ts(14, &row.get::<_, String>(14)?)?,
            last_probe_at: parse_ts(15, &row.get::<_, String>(15)?)?,
        })
    }

    // Process operations

    /// Look up the live (non-retired) instance holding `(tenant, host, pid)`.
    pub fn get_process(
        &self,
        tenant_id: &str,
        host_id: &str,
        pid: i64,
    ) -> Result<Option<Process>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM processes
             WHERE tenant_id = ?1 AND host_id = ?2 AND pid = ?3 AND retired = 0",
            PROCESS_COLUMNS
        ))?;
        let mut rows = stmt.query(params![tenant_id, host_id, pid])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_process(row)?)),
            None => Ok(None),
        }
    }

    pub fn get_process_by_id(
        &self,
        tenant_id: &str,
        process_id: &str,
    ) -> Result<Option<Process>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM processes WHERE tenant_id = ?1 AND id = ?2",
            PROCESS_COLUMNS
        ))?;
        let mut rows = stmt.query(params![tenant_id, process_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_process(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_processes(
        &self,
        tenant_id: &str,
        host_id: &str,
    ) -> Result<Vec<Process>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM processes
             WHERE tenant_id = ?1 AND host_id = ?2 AND retired = 0 ORDER BY pid",
            PROCESS_COLUMNS
        ))?;
        let mut rows = stmt.query(params![tenant_id, host_id])?;
        let mut processes = Vec::new();
        while let Some(row) = rows.next()? {
            processes.push(Self::row_to_process(row)?);
        }
        Ok(processes)
    }

    pub fn insert_process(&self, process: &Process) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO processes
               (id, tenant_id, host_id, pid, executable, command_line, create_time,
                last_seen_at, monitored, monitored_since, status, retired)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                process.id,
                process.tenant_id,
                process.host_id,
                process.pid,
                process.executable,
                process.command_line,
                process.create_time.to_rfc3339(),
                process.last_seen_at.to_rfc3339(),
                process.monitored,
                process.monitored_since.map(|t| t.to_rfc3339()),
                process.status.as_str(),
                process.retired,
            ],
        )?;
        Ok(())
    }

    pub fn update_process(&self, process: &Process) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"UPDATE processes SET
                executable = ?2, command_line = ?3, create_time = ?4, last_seen_at = ?5,
                monitored = ?6, monitored_since = ?7, status = ?8, retired = ?9
               WHERE id = ?1"#,
            params![
                process.id,
                process.executable,
                process.command_line,
                process.create_time.to_rfc3339(),
                process.last_seen_at.to_rfc3339(),
                process.monitored,
                process.monitored_since.map(|t| t.to_rfc3339()),
                process.status.as_str(),
                process.retired,
            ],
        )?;
        Ok(())
    }

    /// Retire a superseded process row so a fresh instance can take the
    /// `(tenant, host, pid)` slot. The row and its event history are kept.
    pub fn retire_process(&self, process_id: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE processes SET retired = 1 WHERE id = ?1",
            params![process_id],
        )?;
        Ok(())
    }

    fn row_to_process(row: &rusqlite::Row) -> Result<Process, rusqlite::Error> {
        let status_code: String = row.get(10)?;
        let status = ProcessStatus::from_code(&status_code)
            .ok_or_else(|| decode_error(10, format!("unknown status '{}'", status_code)))?;
        Ok(Process {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            host_id: row.get(2)?,
            pid: row.get(3)?,
            executable: row.get(4)?,
            command_line: row.get(5)?,
            create_time: parse_ts(6, &row.get::<_, String>(6)?)?,
            last_seen_at: parse_ts(7, &row.get::<_, String>(7)?)?,
            monitored: row.get(8)?,
            monitored_since: parse_opt_ts(9, row.get(9)?)?,
            status,
            retired: row.get(11)?,
        })
    }

    // Event operations (append-only)

    pub fn insert_event(
        &self,
        process_id: &str,
        kind: EventKind,
        payload: &EventPayload,
        created_at: DateTime<Utc>,
    ) -> Result<ProcessEvent, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            r#"INSERT INTO process_events
               (id, process_id, kind, created_at, caught_signal, cpu_usage,
                memory_usage, exit_code, core_dump_location)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                id,
                process_id,
                kind.code(),
                created_at.to_rfc3339(),
                payload.caught_signal,
                payload.cpu_usage,
                payload.memory_usage,
                payload.exit_code,
                payload.core_dump_location,
            ],
        )?;
        let seq = conn.last_insert_rowid();
        Ok(ProcessEvent {
            id,
            process_id: process_id.to_string(),
            kind,
            created_at,
            seq,
            payload: payload.clone(),
        })
    }

    pub fn events_for_process(
        &self,
        process_id: &str,
    ) -> Result<Vec<ProcessEvent>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM process_events WHERE process_id = ?1 ORDER BY created_at, seq",
            EVENT_COLUMNS
        ))?;
        let mut rows = stmt.query(params![process_id])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(Self::row_to_event(row)?);
        }
        Ok(events)
    }

    pub fn latest_event(
        &self,
        process_id: &str,
    ) -> Result<Option<ProcessEvent>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM process_events WHERE process_id = ?1
             ORDER BY created_at DESC, seq DESC LIMIT 1",
            EVENT_COLUMNS
        ))?;
        let mut rows = stmt.query(params![process_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_event(row)?)),
            None => Ok(None),
        }
    }

    pub fn events_for_host(&self, host_id: &str) -> Result<Vec<ProcessEvent>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.process_id, e.kind, e.created_at, e.caught_signal, e.cpu_usage,
                    e.memory_usage, e.exit_code, e.core_dump_location, e.seq
             FROM process_events e
             JOIN processes p ON p.id = e.process_id
             WHERE p.host_id = ?1
             ORDER BY e.created_at, e.seq",
        )?;
        let mut rows = stmt.query(params![host_id])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(Self::row_to_event(row)?);
        }
        Ok(events)
    }

    fn row_to_event(row: &rusqlite::Row) -> Result<ProcessEvent, rusqlite::Error> {
        let kind_code: String = row.get(2)?;
        let kind = EventKind::from_code(&kind_code)
            .ok_or_else(|| decode_error(2, format!("unknown event kind '{}'", kind_code)))?;
        Ok(ProcessEvent {
            id: row.get(0)?,
            process_id: row.get(1)?,
            kind,
            created_at: parse_ts(3, &row.get::<_, String>(3)?)?,
            payload: EventPayload {
                caught_signal: row.get(4)?,
                cpu_usage: row.get(5)?,
                memory_usage: row.get(6)?,
                exit_code: row.get(7)?,
                core_dump_location: row.get(8)?,
            },
            seq: row.get(9)?,
        })
    }

    // Detection config operations

    pub fn get_config_for_process(
        &self,
        tenant_id: &str,
        process_id: &str,
    ) -> Result<Option<DetectionConfig>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM detection_configs WHERE tenant_id = ?1 AND process_id = ?2",
            CONFIG_COLUMNS
        ))?;
        let mut rows = stmt.query(params![tenant_id, process_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_config(row)?)),
            None => Ok(None),
        }
    }

    pub fn get_config(
        &self,
        tenant_id: &str,
        config_id: &str,
    ) -> Result<Option<DetectionConfig>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM detection_configs WHERE tenant_id = ?1 AND id = ?2",
            CONFIG_COLUMNS
        ))?;
        let mut rows = stmt.query(params![tenant_id, config_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_config(row)?)),
            None => Ok(None),
        }
    }

    pub fn insert_config(&self, config: &DetectionConfig) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO detection_configs
               (id, tenant_id, process_id, created_at, modified_at,
                detect_signals, detect_thresholds, detect_suspected_hangs,
                cpu_threshold, memory_threshold, suspected_hang_duration,
                restart_on_signal, restart_on_cpu_threshold,
                restart_on_memory_threshold, restart_on_suspected_hang)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                config.id,
                config.tenant_id,
                config.process_id,
                config.created_at.to_rfc3339(),
                config.modified_at.to_rfc3339(),
                config.detect_signals,
                config.detect_thresholds,
                config.detect_suspected_hangs,
                config.cpu_threshold,
                config.memory_threshold,
                config.suspected_hang_duration,
                config.restart_on_signal,
                config.restart_on_cpu_threshold,
                config.restart_on_memory_threshold,
                config.restart_on_suspected_hang,
            ],
        )?;
        Ok(())
    }

    pub fn update_config(&self, config: &DetectionConfig) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"UPDATE detection_configs SET
                modified_at = ?2,
                detect_signals = ?3, detect_thresholds = ?4, detect_suspected_hangs = ?5,
                cpu_threshold = ?6, memory_threshold = ?7, suspected_hang_duration = ?8,
                restart_on_signal = ?9, restart_on_cpu_threshold = ?10,
                restart_on_memory_threshold = ?11, restart_on_suspected_hang = ?12
               WHERE id = ?1"#,
            params![
                config.id,
                config.modified_at.to_rfc3339(),
                config.detect_signals,
                config.detect_thresholds,
                config.detect_suspected_hangs,
                config.cpu_threshold,
                config.memory_threshold,
                config.suspected_hang_duration,
                config.restart_on_signal,
                config.restart_on_cpu_threshold,
                config.restart_on_memory_threshold,
                config.restart_on_suspected_hang,
            ],
        )?;
        Ok(())
    }

    /// Configs whose owning process reported within the staleness window.
    pub fn list_active_configs(
        &self,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DetectionConfig>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM detection_configs c
             JOIN processes p ON p.id = c.process_id
             WHERE c.tenant_id = ?1 AND p.last_seen_at >= ?2
             ORDER BY c.created_at, c.id",
            CONFIG_COLUMNS_QUALIFIED
        ))?;
        let mut rows = stmt.query(params![tenant_id, cutoff.to_rfc3339()])?;
        let mut configs = Vec::new();
        while let Some(row) = rows.next()? {
            configs.push(Self::row_to_config(row)?);
        }
        Ok(configs)
    }

    pub fn configs_for_host(
        &self,
        tenant_id: &str,
        host_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DetectionConfig>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM detection_configs c
             JOIN processes p ON p.id = c.process_id
             WHERE c.tenant_id = ?1 AND p.host_id = ?2 AND p.last_seen_at >= ?3
             ORDER BY c.created_at, c.id",
            CONFIG_COLUMNS_QUALIFIED
        ))?;
        let mut rows = stmt.query(params![tenant_id, host_id, cutoff.to_rfc3339()])?;
        let mut configs = Vec::new();
        while let Some(row) = rows.next()? {
            configs.push(Self::row_to_config(row)?);
        }
        Ok(configs)
    }

    fn row_to_config(row: &rusqlite::Row) -> Result<DetectionConfig, rusqlite::Error> {
        Ok(DetectionConfig {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            process_id: row.get(2)?,
            created_at: parse_ts(3, &row.get::<_, String>(3)?)?,
            modified_at: parse_ts(4, &row.get::<_, String>(4)?)?,
            detect_signals: row.get(5)?,
            detect_thresholds: row.get(6)?,
            detect_suspected_hangs: row.get(7)?,
            cpu_threshold: row.get(8)?,
            memory_threshold: row.get(9)?,
            suspected_hang_duration: row.get(10)?,
            restart_on_signal: row.get(11)?,
            restart_on_cpu_threshold: row.get(12)?,
            restart_on_memory_threshold: row.get(13)?,
            restart_on_suspected_hang: row.get(14)?,
        })
    }
}

const HOST_COLUMNS: &str = "id, tenant_id, machine_id, public_ip_address, hostname, last_boot_at, \
     operating_system, platform, platform_family, platform_version, kernel_version, \
     kernel_architecture, virtualization_system, virtualization_role, first_seen, last_probe_at";

const PROCESS_COLUMNS: &str = "id, tenant_id, host_id, pid, executable, command_line, \
     create_time, last_seen_at, monitored, monitored_since, status, retired";

const EVENT_COLUMNS: &str = "id, process_id, kind, created_at, caught_signal, cpu_usage, \
     memory_usage, exit_code, core_dump_location, seq";

const CONFIG_COLUMNS: &str = "id, tenant_id, process_id, created_at, modified_at, \
     detect_signals, detect_thresholds, detect_suspected_hangs, cpu_threshold, \
     memory_threshold, suspected_hang_duration, restart_on_signal, \
     restart_on_cpu_threshold, restart_on_memory_threshold, restart_on_suspected_hang";

const CONFIG_COLUMNS_QUALIFIED: &str =
    "c.id, c.tenant_id, c.process_id, c.created_at, c.modified_at, \
     c.detect_signals, c.detect_thresholds, c.detect_suspected_hangs, c.cpu_threshold, \
     c.memory_threshold, c.suspected_hang_duration, c.restart_on_signal, \
     c.restart_on_cpu_threshold, c.restart_on_memory_threshold, c.restart_on_suspected_hang";

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::HostReport;

    fn seed_host(db: &Database, tenant: &str, machine_id: &str) -> Host {
        let report = HostReport {
            machine_id: machine_id.to_string(),
            hostname: Some("db-test".into()),
            ..Default::default()
        };
        let host = Host::from_report(tenant, &report, Utc::now());
        db.insert_host(&host).unwrap();
        host
    }

    #[test]
    fn host_machine_id_unique_per_tenant() {
        let db = Database::open_in_memory().unwrap();
        let machine_id = "m".repeat(32);
        seed_host(&db, "tenant-a", &machine_id);

        let dup = Host::from_report(
            "tenant-a",
            &HostReport {
                machine_id: machine_id.clone(),
                ..Default::default()
            },
            Utc::now(),
        );
        let err = db.insert_host(&dup).unwrap_err();
        assert!(is_unique_violation(&err));

        // Same machine id under another tenant is a different row.
        seed_host(&db, "tenant-b", &machine_id);
        assert_eq!(db.list_hosts("tenant-a").unwrap().len(), 1);
        assert_eq!(db.list_hosts("tenant-b").unwrap().len(), 1);
    }

    fn seed_process(db: &Database, tenant: &str, host_id: &str, process_id: &str) {
        let process = Process {
            id: process_id.to_string(),
            tenant_id: tenant.to_string(),
            host_id: host_id.to_string(),
            pid: 4242,
            executable: "/usr/sbin/nginx".into(),
            command_line: "nginx -g daemon off;".into(),
            create_time: Utc::now(),
            last_seen_at: Utc::now(),
            monitored: false,
            monitored_since: None,
            status: ProcessStatus::Running,
            retired: false,
        };
        db.insert_process(&process).unwrap();
    }

    #[test]
    fn event_seq_breaks_created_at_ties() {
        let db = Database::open_in_memory().unwrap();
        let host = seed_host(&db, "tenant-a", &"m".repeat(32));
        seed_process(&db, "tenant-a", &host.id, "proc-1");
        let ts = Utc::now();
        let first = db
            .insert_event("proc-1", EventKind::Seen, &EventPayload::default(), ts)
            .unwrap();
        let second = db
            .insert_event(
                "proc-1",
                EventKind::CaughtSignal,
                &EventPayload {
                    caught_signal: Some(9),
                    ..Default::default()
                },
                ts,
            )
            .unwrap();
        assert!(second.seq > first.seq);

        let latest = db.latest_event("proc-1").unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.kind, EventKind::CaughtSignal);
    }
}
