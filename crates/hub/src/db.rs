use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::reading::{Reading, SourceKind};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPlantation {
    pub id: String,
    pub name: String,
    pub source: SourceKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredReading {
    pub ts: i64,
    pub temperature: Option<f64>,
    pub humidity: f64,
    pub light: f64,
    pub irrigation: bool,
    pub illumination: bool,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:agro.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let in_memory = db_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?;
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // every in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Settings blobs
    // ----------------------------

    pub async fn get_setting(&self, name: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT blob FROM settings WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("get_setting({name}) failed"))?;
        Ok(row.map(|r| r.get::<String, _>("blob")))
    }

    pub async fn put_setting(&self, name: &str, blob: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (name, blob, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
              blob=excluded.blob,
              updated_at=excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(blob)
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .with_context(|| format!("put_setting({name}) failed"))?;
        Ok(())
    }

    /// All stored blobs keyed by name; absent names are simply missing.
    pub async fn load_settings(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT name, blob FROM settings")
            .fetch_all(&self.pool)
            .await
            .context("load_settings failed")?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("name"), r.get::<String, _>("blob")))
            .collect())
    }

    // ----------------------------
    // Plantations
    // ----------------------------

    pub async fn upsert_plantation(&self, id: &str, name: &str, source: SourceKind) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO plantations (id, name, source, created_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              name=excluded.name,
              source=excluded.source
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(source.as_str())
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .context("upsert_plantation failed")?;
        Ok(())
    }

    /// Returns `false` if no such plantation was stored.
    pub async fn delete_plantation(&self, id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM plantations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete_plantation failed")?;
        Ok(res.rows_affected() > 0)
    }

    /// Stored plantations in creation order. Rows with an unrecognised
    /// source are skipped.
    pub async fn load_plantations(&self) -> Result<Vec<StoredPlantation>> {
        let rows = sqlx::query("SELECT id, name, source FROM plantations ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .context("load_plantations failed")?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let id: String = r.get("id");
                let raw: String = r.get("source");
                match SourceKind::from_str_lossy(&raw) {
                    Some(source) => Some(StoredPlantation {
                        id,
                        name: r.get("name"),
                        source,
                    }),
                    None => {
                        tracing::warn!(plantation = %id, source = %raw, "skipping plantation with unknown source");
                        None
                    }
                }
            })
            .collect())
    }

    // ----------------------------
    // Readings
    // ----------------------------

    pub async fn insert_reading(&self, plantation_id: &str, r: &Reading) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO readings (ts, plantation_id, temperature, humidity, light, irrigation, illumination)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(r.timestamp.unix_timestamp())
        .bind(plantation_id)
        .bind(r.temperature)
        .bind(r.humidity)
        .bind(r.light)
        .bind(r.irrigation_active)
        .bind(r.illumination_active)
        .execute(&self.pool)
        .await
        .context("insert_reading failed")?;
        Ok(())
    }

    /// Newest first.
    pub async fn recent_readings(&self, plantation_id: &str, limit: i64) -> Result<Vec<StoredReading>> {
        let rows = sqlx::query(
            r#"
            SELECT ts, temperature, humidity, light, irrigation, illumination
            FROM readings
            WHERE plantation_id = ?
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(plantation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_readings failed")?;

        Ok(rows
            .into_iter()
            .map(|r| StoredReading {
                ts: r.get("ts"),
                temperature: r.get("temperature"),
                humidity: r.get("humidity"),
                light: r.get("light"),
                irrigation: r.get("irrigation"),
                illumination: r.get("illumination"),
            })
            .collect())
    }
}

fn now_ts() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

// ===========================================================================
// Tests
// ===========================================================================
