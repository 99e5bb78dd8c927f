use r2d2_sqlite::rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

pub const RUNTIME_MODULE: &str = "quill.runtime";
pub const SETTINGS_MODULE: &str = "quill.settings";

pub fn log_event(
    conn: &Connection,
    level: &str,
    code: Option<&str>,
    module: &str,
    message: &str,
    explain: Option<&str>,
    data: Option<Value>,
) -> rusqlite::Result<()> {
    let id = Uuid::new_v4().to_string();
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let data_str = data.map(|v| v.to_string());
    conn.execute(
        "INSERT INTO event_log (id, ts, level, code, module, message, explain, data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![id, ts, level, code, module, message, explain, data_str],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: String,
    pub ts: i64,
    pub level: String,
    pub code: Option<String>,
    pub module: String,
    pub message: String,
    pub explain: Option<String>,
    pub data: Option<Value>,
}

/// Most recent journal entries, newest first.
pub fn recent_events(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, ts, level, code, module, message, explain, data FROM event_log ORDER BY ts DESC, rowid DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        let data_str: Option<String> = row.get(7)?;
        Ok(EventRecord {
            id: row.get(0)?,
            ts: row.get(1)?,
            level: row.get(2)?,
            code: row.get(3)?,
            module: row.get(4)?,
            message: row.get(5)?,
            explain: row.get(6)?,
            data: data_str.and_then(|raw| serde_json::from_str(&raw).ok()),
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Stable digest standing in for user text in journal payloads.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
