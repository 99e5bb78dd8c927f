use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::PathBuf;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_db(workspace_dir: PathBuf) -> Result<DbPool> {
    std::fs::create_dir_all(&workspace_dir)
        .with_context(|| format!("failed to create {}", workspace_dir.display()))?;
    let db_path = workspace_dir.join("quill.db");
    let mgr = SqliteConnectionManager::file(&db_path);
    let pool = Pool::new(mgr)?;
    {
        let conn = pool.get()?;
        apply_migrations(&conn)?;
    }
    Ok(pool)
}

/// Single-connection pool over a private in-memory database. Every pooled
/// connection to `:memory:` would otherwise see its own empty database.
pub fn init_memory_db() -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(1)
        .build(SqliteConnectionManager::memory())?;
    {
        let conn = pool.get()?;
        apply_migrations(&conn)?;
    }
    Ok(pool)
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    let migrations: &[(&str, &str)] = &[
        (
            "0001_settings.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0001_settings.sql"
            )),
        ),
        (
            "0002_event_log.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0002_event_log.sql"
            )),
        ),
    ];

    for (name, sql) in migrations {
        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration {name}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(pool: &DbPool) -> Vec<String> {
        let conn = pool.get().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn memory_db_has_schema() {
        let pool = init_memory_db().unwrap();
        assert_eq!(tables(&pool), vec!["app_settings", "credentials", "event_log"]);
    }

    #[test]
    fn file_db_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        init_db(dir.path().to_path_buf()).unwrap();
        let pool = init_db(dir.path().to_path_buf()).unwrap();
        assert!(dir.path().join("quill.db").exists());
        assert_eq!(tables(&pool).len(), 3);
    }
}
