use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite, SqlitePool};

use crate::config::{self, DatabaseConfig};

/// Opens (creating if needed) the catalog database and applies the schema.
pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let url = cfg.url.as_str();
    config::ensure_sqlite_parent_dir(url)?;
    if !Sqlite::database_exists(url).await.unwrap_or(false) {
        tracing::info!("Creating SQLite database at {}", url);
        Sqlite::create_database(url).await?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        // per-connection pragmas; init_db only reaches one pooled connection
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout=10000;").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(url)
        .await?;
    init_db(&pool).await?;
    Ok(pool)
}

// (pragma, required). Purge relies on cascading deletes, so foreign keys must stick.
const PRAGMAS: [(&str, bool); 5] = [
    ("PRAGMA journal_mode=WAL;", false),
    ("PRAGMA synchronous=NORMAL;", false),
    ("PRAGMA foreign_keys=ON;", true),
    ("PRAGMA busy_timeout=10000;", false),
    ("PRAGMA temp_store=MEMORY;", false),
];

const INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS idx_roms_platform ON roms(platform_id)",
    "CREATE INDEX IF NOT EXISTS idx_roms_igdb ON roms(igdb_id)",
    "CREATE INDEX IF NOT EXISTS idx_roms_moby ON roms(moby_id)",
    "CREATE INDEX IF NOT EXISTS idx_firmware_platform ON firmware(platform_id)",
];

/// Creates the catalog schema. Safe to run on every start.
pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    for (pragma, required) in PRAGMAS {
        match sqlx::query(pragma).execute(pool).await {
            Ok(_) => {}
            Err(e) if required => return Err(e.into()),
            Err(e) => tracing::warn!("{} failed: {}", pragma.trim_end_matches(';'), e),
        }
    }

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS platforms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fs_slug TEXT NOT NULL UNIQUE,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            igdb_id INTEGER NULL,
            moby_id INTEGER NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    // provider matches are stored as JSON documents next to their id column
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS roms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_id INTEGER NOT NULL,
            file_name TEXT NOT NULL,
            file_name_no_tags TEXT NOT NULL,
            file_name_no_ext TEXT NOT NULL,
            file_extension TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size_bytes INTEGER NOT NULL DEFAULT 0,
            name TEXT NOT NULL,
            regions TEXT NOT NULL DEFAULT '[]',
            languages TEXT NOT NULL DEFAULT '[]',
            revision TEXT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            multi INTEGER NOT NULL DEFAULT 0,
            files TEXT NOT NULL DEFAULT '[]',
            igdb_id INTEGER NULL,
            moby_id INTEGER NULL,
            igdb_metadata TEXT NULL,
            moby_metadata TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            UNIQUE(platform_id, file_name),
            FOREIGN KEY(platform_id) REFERENCES platforms(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS firmware (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_id INTEGER NOT NULL,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            UNIQUE(platform_id, file_name),
            FOREIGN KEY(platform_id) REFERENCES platforms(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    for index in INDEXES {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}
