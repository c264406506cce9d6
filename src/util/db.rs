use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Row, SqlitePool,
};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// Embedded schema migrations, applied in order and tracked in `_import_migrations`.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "catalogue tables",
        r#"
        CREATE TABLE IF NOT EXISTS hotels (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            address     TEXT,
            description TEXT,
            phone       TEXT,
            email       TEXT,
            website     TEXT,
            latitude    REAL NOT NULL,
            longitude   REAL NOT NULL,
            price       INTEGER,
            rating      REAL,
            images      TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE TABLE IF NOT EXISTS hotel_rooms (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            hotel_id    INTEGER NOT NULL REFERENCES hotels(id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            description TEXT,
            price       INTEGER NOT NULL,
            max_guests  INTEGER NOT NULL DEFAULT 2,
            status      TEXT NOT NULL DEFAULT 'available',
            images      TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (hotel_id, name)
        );
        CREATE TABLE IF NOT EXISTS checkin_places (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL UNIQUE,
            address         TEXT,
            description     TEXT,
            latitude        REAL NOT NULL,
            longitude       REAL NOT NULL,
            operating_hours TEXT NOT NULL DEFAULT '[]',
            is_free         INTEGER NOT NULL DEFAULT 0,
            price           INTEGER,
            status          TEXT NOT NULL DEFAULT 'active',
            images          TEXT NOT NULL DEFAULT '[]',
            created_at      TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at      TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE TABLE IF NOT EXISTS categories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE COLLATE NOCASE,
            description TEXT,
            image       TEXT,
            created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE TABLE IF NOT EXISTS cuisines (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            category_id   INTEGER REFERENCES categories(id) ON DELETE SET NULL,
            name          TEXT NOT NULL UNIQUE,
            description   TEXT,
            price         INTEGER,
            is_vegetarian INTEGER NOT NULL DEFAULT 0,
            status        TEXT NOT NULL DEFAULT 'available',
            image         TEXT,
            created_at    TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at    TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    ),
    (
        2,
        "room amenities",
        r#"
        CREATE TABLE IF NOT EXISTS amenities (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            name       TEXT NOT NULL UNIQUE COLLATE NOCASE,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE TABLE IF NOT EXISTS room_amenity (
            room_id    INTEGER NOT NULL REFERENCES hotel_rooms(id) ON DELETE CASCADE,
            amenity_id INTEGER NOT NULL REFERENCES amenities(id) ON DELETE CASCADE,
            PRIMARY KEY (room_id, amenity_id)
        );
        "#,
    ),
    (
        3,
        "imported asset sources",
        r#"
        CREATE TABLE IF NOT EXISTS imported_assets (
            owner_table TEXT NOT NULL,
            owner_id    INTEGER NOT NULL,
            source_url  TEXT NOT NULL,
            reference   TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (owner_table, owner_id, source_url)
        );
        "#,
    ),
];

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("invalid DATABASE_URL")?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options)
            .await
            .context("failed to open database")?;
        info!("connected to db");

        let db = Self { pool };
        if crate::util::env::env_flag("AUTO_MIGRATE", true) {
            db.run_migrations().await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(db)
    }

    /// Private in-memory database with the schema applied. A single connection
    /// that never idles out, since the data lives and dies with it.
    pub async fn connect_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _import_migrations (
                version      INTEGER PRIMARY KEY,
                description  TEXT NOT NULL,
                installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
             )",
        )
        .execute(&self.pool)
        .await?;

        let applied: HashSet<i64> = sqlx::query("SELECT version FROM _import_migrations")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| r.try_get::<i64, _>(0))
            .collect::<Result<_, _>>()?;

        for &(version, description, sql) in MIGRATIONS {
            if applied.contains(&version) {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("migration {version} ({description}) failed"))?;
            sqlx::query("INSERT INTO _import_migrations (version, description) VALUES (?, ?)")
                .bind(version)
                .bind(description)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            info!(version, description, "applied migration");
        }
        Ok(())
    }

    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = Db::connect_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _import_migrations")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
        assert_eq!(db.count_rows("hotels").await.unwrap(), 0);
        assert!(db.ping().await);
    }
}
