//! SQLite-backed store
//!
//! One table per record type. Commands keep their fields as columns so the
//! history can be filtered in SQL; session steps are stored as a JSON body.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info};

use crate::domain::{Command, CommandId, CommandStatus, Device, Session, Sim};

use super::store::{Store, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    status      TEXT NOT NULL,
    last_seen   TEXT,
    sim_count   INTEGER NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sims (
    id               TEXT PRIMARY KEY,
    device_id        TEXT NOT NULL REFERENCES devices(id),
    phone_number     TEXT NOT NULL,
    carrier          TEXT NOT NULL,
    daily_quota      INTEGER NOT NULL,
    used_today       INTEGER NOT NULL DEFAULT 0,
    last_reset_date  TEXT NOT NULL,
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ussd_commands (
    id             INTEGER PRIMARY KEY,
    code           TEXT NOT NULL,
    type           TEXT NOT NULL,
    carrier        TEXT NOT NULL,
    device_id      TEXT NOT NULL,
    sim_id         TEXT NOT NULL REFERENCES sims(id),
    status         TEXT NOT NULL,
    auto_executed  INTEGER NOT NULL DEFAULT 0,
    result         TEXT,
    executed_at    TEXT,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ussd_commands_status ON ussd_commands(status);

CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT PRIMARY KEY,
    sim_id      TEXT NOT NULL REFERENCES sims(id),
    status      TEXT NOT NULL,
    body        TEXT NOT NULL
);
"#;

/// Store persisting to a SQLite database file
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        debug!(path = %path.as_ref().display(), "SqliteStore::open: called");
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let store = Self::init(conn)?;
        info!(path = %path.as_ref().display(), "Opened SQLite store");
        Ok(store)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("SqliteStore::open_in_memory: called");
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }
}

fn parse_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            reason: format!("bad timestamp {:?}: {}", raw, e),
        })
}

fn parse_enum<T: std::str::FromStr<Err = String>>(table: &'static str, raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(|reason| StoreError::Corrupt { table, reason })
}

struct DeviceRow {
    id: String,
    name: String,
    status: String,
    last_seen: Option<String>,
    sim_count: u32,
    created_at: String,
}

impl TryFrom<DeviceRow> for Device {
    type Error = StoreError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        Ok(Device {
            id: row.id,
            name: row.name,
            status: parse_enum("devices", &row.status)?,
            last_seen: row.last_seen.as_deref().map(|s| parse_ts("devices", s)).transpose()?,
            sim_count: row.sim_count,
            created_at: parse_ts("devices", &row.created_at)?,
        })
    }
}

struct SimRow {
    id: String,
    device_id: String,
    phone_number: String,
    carrier: String,
    daily_quota: u32,
    used_today: u32,
    last_reset_date: String,
    created_at: String,
}

impl TryFrom<SimRow> for Sim {
    type Error = StoreError;

    fn try_from(row: SimRow) -> Result<Self, Self::Error> {
        let last_reset_date = row
            .last_reset_date
            .parse::<NaiveDate>()
            .map_err(|e| StoreError::Corrupt {
                table: "sims",
                reason: format!("bad date {:?}: {}", row.last_reset_date, e),
            })?;
        Ok(Sim {
            id: row.id,
            device_id: row.device_id,
            phone_number: row.phone_number,
            carrier: parse_enum("sims", &row.carrier)?,
            daily_quota: row.daily_quota,
            used_today: row.used_today,
            last_reset_date,
            created_at: parse_ts("sims", &row.created_at)?,
        })
    }
}

struct CommandRow {
    id: i64,
    code: String,
    command_type: String,
    carrier: String,
    device_id: String,
    sim_id: String,
    status: String,
    auto_executed: bool,
    result: Option<String>,
    executed_at: Option<String>,
    created_at: String,
}

impl TryFrom<CommandRow> for Command {
    type Error = StoreError;

    fn try_from(row: CommandRow) -> Result<Self, Self::Error> {
        let id = CommandId::try_from(row.id).map_err(|_| StoreError::Corrupt {
            table: "ussd_commands",
            reason: format!("negative id {}", row.id),
        })?;
        Ok(Command {
            id,
            code: row.code,
            command_type: parse_enum("ussd_commands", &row.command_type)?,
            carrier: parse_enum("ussd_commands", &row.carrier)?,
            device_id: row.device_id,
            sim_id: row.sim_id,
            status: parse_enum("ussd_commands", &row.status)?,
            auto_executed: row.auto_executed,
            result: row.result,
            executed_at: row
                .executed_at
                .as_deref()
                .map(|s| parse_ts("ussd_commands", s))
                .transpose()?,
            created_at: parse_ts("ussd_commands", &row.created_at)?,
        })
    }
}

// Devices, SIMs and commands upsert with ON CONFLICT DO UPDATE: they are
// referenced by foreign keys, and INSERT OR REPLACE would delete the row first.
impl Store for SqliteStore {
    fn load_devices(&self) -> Result<Vec<Device>, StoreError> {
        debug!("SqliteStore::load_devices: called");
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, status, last_seen, sim_count, created_at FROM devices ORDER BY created_at")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DeviceRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    status: row.get(2)?,
                    last_seen: row.get(3)?,
                    sim_count: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Device::try_from).collect()
    }

    fn load_sims(&self) -> Result<Vec<Sim>, StoreError> {
        debug!("SqliteStore::load_sims: called");
        let mut stmt = self.conn.prepare(
            "SELECT id, device_id, phone_number, carrier, daily_quota, used_today, last_reset_date, created_at \
             FROM sims ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SimRow {
                    id: row.get(0)?,
                    device_id: row.get(1)?,
                    phone_number: row.get(2)?,
                    carrier: row.get(3)?,
                    daily_quota: row.get(4)?,
                    used_today: row.get(5)?,
                    last_reset_date: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Sim::try_from).collect()
    }

    fn load_commands(&self) -> Result<Vec<Command>, StoreError> {
        debug!("SqliteStore::load_commands: called");
        let mut stmt = self.conn.prepare(
            "SELECT id, code, type, carrier, device_id, sim_id, status, auto_executed, result, executed_at, created_at \
             FROM ussd_commands ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CommandRow {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    command_type: row.get(2)?,
                    carrier: row.get(3)?,
                    device_id: row.get(4)?,
                    sim_id: row.get(5)?,
                    status: row.get(6)?,
                    auto_executed: row.get(7)?,
                    result: row.get(8)?,
                    executed_at: row.get(9)?,
                    created_at: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Command::try_from).collect()
    }

    fn load_sessions(&self) -> Result<Vec<Session>, StoreError> {
        debug!("SqliteStore::load_sessions: called");
        let mut stmt = self.conn.prepare("SELECT body FROM sessions ORDER BY id")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }

    fn persist_device(&mut self, device: &Device) -> Result<(), StoreError> {
        debug!(device_id = %device.id, "SqliteStore::persist_device: called");
        self.conn.execute(
            "INSERT INTO devices (id, name, status, last_seen, sim_count, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(id) DO UPDATE SET name = ?2, status = ?3, last_seen = ?4, sim_count = ?5",
            params![
                device.id,
                device.name,
                device.status.to_string(),
                device.last_seen.map(|t| t.to_rfc3339()),
                device.sim_count,
                device.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn persist_sim(&mut self, sim: &Sim) -> Result<(), StoreError> {
        debug!(sim_id = %sim.id, "SqliteStore::persist_sim: called");
        self.conn.execute(
            "INSERT INTO sims (id, device_id, phone_number, carrier, daily_quota, used_today, last_reset_date, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(id) DO UPDATE SET phone_number = ?3, carrier = ?4, daily_quota = ?5, \
             used_today = ?6, last_reset_date = ?7",
            params![
                sim.id,
                sim.device_id,
                sim.phone_number,
                sim.carrier.to_string(),
                sim.daily_quota,
                sim.used_today,
                sim.last_reset_date.to_string(),
                sim.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn persist_sim_usage(&mut self, sim_id: &str, used_today: u32) -> Result<(), StoreError> {
        debug!(%sim_id, used_today, "SqliteStore::persist_sim_usage: called");
        let changed = self.conn.execute(
            "UPDATE sims SET used_today = ?2 WHERE id = ?1",
            params![sim_id, used_today],
        )?;
        if changed == 0 {
            return Err(StoreError::Missing {
                kind: "sim",
                id: sim_id.to_string(),
            });
        }
        Ok(())
    }

    fn persist_command(&mut self, command: &Command) -> Result<(), StoreError> {
        debug!(command_id = command.id, "SqliteStore::persist_command: called");
        self.conn.execute(
            "INSERT INTO ussd_commands \
             (id, code, type, carrier, device_id, sim_id, status, auto_executed, result, executed_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(id) DO UPDATE SET status = ?7, auto_executed = ?8, result = ?9, executed_at = ?10",
            params![
                command.id as i64,
                command.code,
                command.command_type.to_string(),
                command.carrier.to_string(),
                command.device_id,
                command.sim_id,
                command.status.to_string(),
                command.auto_executed,
                command.result,
                command.executed_at.map(|t| t.to_rfc3339()),
                command.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn persist_command_status(
        &mut self,
        id: CommandId,
        status: CommandStatus,
        result: Option<&str>,
        executed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        debug!(command_id = id, %status, "SqliteStore::persist_command_status: called");
        let changed = self.conn.execute(
            "UPDATE ussd_commands SET status = ?2, result = ?3, executed_at = ?4 WHERE id = ?1",
            params![id as i64, status.to_string(), result, executed_at.map(|t| t.to_rfc3339())],
        )?;
        if changed == 0 {
            return Err(StoreError::Missing {
                kind: "command",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn persist_session(&mut self, session: &Session) -> Result<(), StoreError> {
        debug!(session_id = %session.id, status = %session.status, "SqliteStore::persist_session: called");
        let body = serde_json::to_string(session)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO sessions (id, sim_id, status, body) VALUES (?1, ?2, ?3, ?4)",
            params![session.id, session.sim_id, session.status.to_string(), body],
        )?;
        Ok(())
    }
}
