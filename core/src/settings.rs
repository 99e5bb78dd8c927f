//! Settings port: the user-facing configuration snapshot and its stores.
//!
//! Operations read a fresh [`Settings`] at the start of every call and never
//! cache it, so a `set` only affects calls that start afterwards.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64_ENGINE;
use base64::Engine;
use r2d2_sqlite::rusqlite::{self, params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tokio::task::spawn_blocking;

use crate::db::DbPool;
use crate::errors::{QuillError, QuillResult};
use crate::logging::{log_event, SETTINGS_MODULE};

pub const DEFAULT_CLOUD_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_TARGET_LANG: &str = "en";
pub const DEFAULT_SUMMARY_SENTENCES: usize = 3;

const CLOUD_CREDENTIAL: &str = "cloud";
const KEY_CLOUD_FALLBACK: &str = "quill.use_cloud_fallback";
const KEY_CLOUD_MODEL: &str = "quill.cloud_model";
const KEY_TARGET_LANG: &str = "quill.default_target_lang";
const KEY_SUMMARY_SENTENCES: &str = "quill.max_summary_sentences";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub use_cloud_fallback: bool,
    pub cloud_api_key: String,
    pub cloud_model: String,
    pub default_target_lang: String,
    pub max_summary_sentences: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_cloud_fallback: false,
            cloud_api_key: String::new(),
            cloud_model: DEFAULT_CLOUD_MODEL.to_string(),
            default_target_lang: DEFAULT_TARGET_LANG.to_string(),
            max_summary_sentences: DEFAULT_SUMMARY_SENTENCES,
        }
    }
}

impl Settings {
    /// Replace blank or zero values with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.cloud_model.trim().is_empty() {
            self.cloud_model = DEFAULT_CLOUD_MODEL.to_string();
        }
        if self.default_target_lang.trim().is_empty() {
            self.default_target_lang = DEFAULT_TARGET_LANG.to_string();
        }
        if self.max_summary_sentences == 0 {
            self.max_summary_sentences = DEFAULT_SUMMARY_SENTENCES;
        }
        self
    }

    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.use_cloud_fallback {
            self.use_cloud_fallback = v;
        }
        if let Some(v) = patch.cloud_api_key {
            self.cloud_api_key = v.trim().to_string();
        }
        if let Some(v) = patch.cloud_model {
            self.cloud_model = v.trim().to_string();
        }
        if let Some(v) = patch.default_target_lang {
            self.default_target_lang = v.trim().to_string();
        }
        if let Some(v) = patch.max_summary_sentences {
            self.max_summary_sentences = v;
        }
    }

    /// Copy safe to print: the API key is reduced to its last four characters.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.cloud_api_key.is_empty() {
            let tail: String = {
                let chars: Vec<char> = copy.cloud_api_key.chars().collect();
                chars[chars.len().saturating_sub(4)..].iter().collect()
            };
            copy.cloud_api_key = format!("****{tail}");
        }
        copy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub use_cloud_fallback: Option<bool>,
    pub cloud_api_key: Option<String>,
    pub cloud_model: Option<String>,
    pub default_target_lang: Option<String>,
    pub max_summary_sentences: Option<usize>,
}

impl SettingsPatch {
    fn changed_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.use_cloud_fallback.is_some() {
            keys.push("useCloudFallback");
        }
        if self.cloud_api_key.is_some() {
            keys.push("cloudApiKey");
        }
        if self.cloud_model.is_some() {
            keys.push("cloudModel");
        }
        if self.default_target_lang.is_some() {
            keys.push("defaultTargetLang");
        }
        if self.max_summary_sentences.is_some() {
            keys.push("maxSummarySentences");
        }
        keys
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current settings with defaults filled in.
    async fn get(&self) -> QuillResult<Settings>;

    async fn set(&self, patch: SettingsPatch) -> QuillResult<()>;
}

/// Process-local store, used by tests and hosts without persistence.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    inner: RwLock<Settings>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self) -> QuillResult<Settings> {
        let guard = self
            .inner
            .read()
            .map_err(|err| QuillError::Settings(err.to_string()))?;
        Ok(guard.clone().normalized())
    }

    async fn set(&self, patch: SettingsPatch) -> QuillResult<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|err| QuillError::Settings(err.to_string()))?;
        guard.apply(patch);
        Ok(())
    }
}

/// Store backed by the `app_settings` and `credentials` tables.
#[derive(Clone)]
pub struct SqliteSettingsStore {
    pool: DbPool,
}

impl SqliteSettingsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn get(&self) -> QuillResult<Settings> {
        let pool = self.pool.clone();
        spawn_blocking(move || {
            let conn = pool.get()?;
            read_settings(&conn)
        })
        .await
        .map_err(|err| QuillError::Settings(err.to_string()))?
        .map_err(|err| QuillError::Settings(format!("{err:#}")))
    }

    async fn set(&self, patch: SettingsPatch) -> QuillResult<()> {
        let pool = self.pool.clone();
        spawn_blocking(move || {
            let conn = pool.get()?;
            write_settings(&conn, patch)
        })
        .await
        .map_err(|err| QuillError::Settings(err.to_string()))?
        .map_err(|err| QuillError::Settings(format!("{err:#}")))
    }
}

fn read_settings(conn: &rusqlite::Connection) -> Result<Settings> {
    let defaults = Settings::default();
    let settings = Settings {
        use_cloud_fallback: read_value(conn, KEY_CLOUD_FALLBACK)?
            .unwrap_or(defaults.use_cloud_fallback),
        cloud_api_key: load_secret(conn)?.unwrap_or_default(),
        cloud_model: read_value(conn, KEY_CLOUD_MODEL)?.unwrap_or(defaults.cloud_model),
        default_target_lang: read_value(conn, KEY_TARGET_LANG)?
            .unwrap_or(defaults.default_target_lang),
        max_summary_sentences: read_value(conn, KEY_SUMMARY_SENTENCES)?
            .unwrap_or(defaults.max_summary_sentences),
    };
    Ok(settings.normalized())
}

/// Apply the whole patch or none of it.
fn write_settings(conn: &rusqlite::Connection, patch: SettingsPatch) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let changed = patch.changed_keys();

    let tx = conn.unchecked_transaction()?;
    if let Some(v) = patch.use_cloud_fallback {
        upsert_value(&tx, KEY_CLOUD_FALLBACK, &v, now)?;
    }
    if let Some(v) = patch.cloud_model {
        upsert_value(&tx, KEY_CLOUD_MODEL, v.trim(), now)?;
    }
    if let Some(v) = patch.default_target_lang {
        upsert_value(&tx, KEY_TARGET_LANG, v.trim(), now)?;
    }
    if let Some(v) = patch.max_summary_sentences {
        upsert_value(&tx, KEY_SUMMARY_SENTENCES, &v, now)?;
    }
    if let Some(api_key) = patch.cloud_api_key {
        store_secret(&tx, api_key.trim(), now)?;
    }
    tx.commit()?;

    if !changed.is_empty() {
        let _ = log_event(
            conn,
            "info",
            Some("CFG-0001"),
            SETTINGS_MODULE,
            "Settings updated",
            Some("Settings port received a partial update"),
            Some(json!({ "keys": changed })),
        );
    }
    Ok(())
}

fn read_value<T: serde::de::DeserializeOwned>(
    conn: &rusqlite::Connection,
    key: &str,
) -> Result<Option<T>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM app_settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| serde_json::from_str(&v).ok()))
}

fn upsert_value<T: Serialize + ?Sized>(
    conn: &rusqlite::Connection,
    key: &str,
    value: &T,
    now: i64,
) -> Result<()> {
    let encoded = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO app_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, encoded, now],
    )?;
    Ok(())
}

fn store_secret(conn: &rusqlite::Connection, secret: &str, now: i64) -> Result<()> {
    if secret.is_empty() {
        conn.execute(
            "DELETE FROM credentials WHERE provider_id = ?1",
            params![CLOUD_CREDENTIAL],
        )?;
        return Ok(());
    }
    let encoded = B64_ENGINE.encode(secret.as_bytes());
    conn.execute(
        "INSERT INTO credentials (provider_id, secret, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(provider_id) DO UPDATE SET secret = excluded.secret, updated_at = excluded.updated_at",
        params![CLOUD_CREDENTIAL, encoded, now],
    )?;
    Ok(())
}

fn load_secret(conn: &rusqlite::Connection) -> Result<Option<String>> {
    let secret: Option<String> = conn
        .query_row(
            "SELECT secret FROM credentials WHERE provider_id = ?1",
            params![CLOUD_CREDENTIAL],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(s) = secret {
        let decoded = B64_ENGINE
            .decode(s.as_bytes())
            .map_err(|_| anyhow!("Failed to decode stored credential"))?;
        let value = String::from_utf8(decoded)
            .map_err(|_| anyhow!("Stored credential was not valid UTF-8"))?;
        Ok(Some(value))
    } else {
        Ok(None)
    }
}
