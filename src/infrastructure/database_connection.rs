// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create database file directory if it doesn't exist
        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Soft-delete cascade relies on foreign keys being enforced
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests.
    ///
    /// A single pooled connection, since every SQLite `:memory:` connection
    /// is its own database.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_listings_sql = r#"
            CREATE TABLE IF NOT EXISTS listings (
                listing_id TEXT PRIMARY KEY,
                make TEXT,
                model TEXT,
                seller_type TEXT,
                fuel TEXT,
                gearbox TEXT,
                price_eur INTEGER,
                mileage_km INTEGER,
                first_registration_year INTEGER,
                title TEXT,
                subtitle TEXT,
                location_text TEXT,
                image_url TEXT,
                detail_url TEXT,
                page_no INTEGER,
                index_in_page INTEGER,
                fingerprint TEXT NOT NULL,
                first_seen_at DATETIME NOT NULL,
                last_seen_at DATETIME NOT NULL,
                change_count INTEGER NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                is_available BOOLEAN NOT NULL DEFAULT 1,
                unavailable_at DATETIME,
                last_availability_check_at DATETIME
            )
        "#;

        let create_details_sql = r#"
            CREATE TABLE IF NOT EXISTS listing_details (
                listing_id TEXT PRIMARY KEY,
                power_kw INTEGER,
                doors INTEGER,
                color TEXT,
                interior TEXT,
                previous_owners INTEGER,
                financing_note TEXT,
                equipment TEXT,
                seller_name TEXT,
                seller_phone TEXT,
                description TEXT,
                price_quality_label TEXT,
                score REAL,
                fingerprint TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (listing_id) REFERENCES listings (listing_id) ON DELETE CASCADE
            )
        "#;

        let create_geo_cache_sql = r#"
            CREATE TABLE IF NOT EXISTS geo_cache (
                query TEXT PRIMARY KEY,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                source TEXT NOT NULL,
                quality TEXT NOT NULL,
                resolved_at DATETIME NOT NULL
            )
        "#;

        let create_distances_sql = r#"
            CREATE TABLE IF NOT EXISTS listing_distances (
                listing_id TEXT PRIMARY KEY,
                destination_query TEXT NOT NULL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                distance_km REAL NOT NULL,
                quality TEXT NOT NULL,
                computed_at DATETIME NOT NULL,
                FOREIGN KEY (listing_id) REFERENCES listings (listing_id) ON DELETE CASCADE
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_listings_first_seen_at ON listings (first_seen_at);
            CREATE INDEX IF NOT EXISTS idx_listings_unavailable_at ON listings (unavailable_at);
            CREATE INDEX IF NOT EXISTS idx_listings_availability_check
                ON listings (is_available, last_availability_check_at);
        "#;

        sqlx::query(create_listings_sql).execute(&self.pool).await?;
        sqlx::query(create_details_sql).execute(&self.pool).await?;
        sqlx::query(create_geo_cache_sql).execute(&self.pool).await?;
        sqlx::query(create_distances_sql).execute(&self.pool).await?;
        for statement in create_indexes_sql.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&self.pool).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_database_connection() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let database_url = format!("sqlite:{}", db_path.display());

        let db = DatabaseConnection::new(&database_url).await?;
        db.migrate().await?;

        // Migration is idempotent
        db.migrate().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
            .fetch_one(db.pool())
            .await?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_in_memory_connection() -> Result<()> {
        let db = DatabaseConnection::new_in_memory().await?;
        db.migrate().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM geo_cache")
            .fetch_one(db.pool())
            .await?;
        assert_eq!(count, 0);
        Ok(())
    }
}
