//! Repository for the geocode cache and per-listing distance snapshots.
//!
//! The geocoder is the only writer of both tables. `geo_cache` is a
//! permanent memoization table keyed by the exact normalized query string;
//! entries are never expired. `listing_distances` holds the latest snapshot
//! per listing and is overwritten on recomputation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::domain::geo::{GeoPoint, GeoQuality, ListingDistance};

/// One resolved entry of the geocode cache
#[derive(Debug, Clone)]
pub struct GeoCacheEntry {
    pub query: String,
    pub point: GeoPoint,
    pub source: String,
    pub quality: GeoQuality,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct GeoRepository {
    pool: Arc<SqlitePool>,
}

impl GeoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Cache lookup by exact normalized query string
    pub async fn get_cached(&self, query: &str) -> Result<Option<GeoCacheEntry>> {
        let row = sqlx::query("SELECT * FROM geo_cache WHERE query = ?")
            .bind(query)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(row.map(|row| GeoCacheEntry {
            query: row.get("query"),
            point: GeoPoint::new(row.get("lat"), row.get("lon")),
            source: row.get("source"),
            quality: GeoQuality::parse(row.get::<String, _>("quality").as_str()),
            resolved_at: row.get("resolved_at"),
        }))
    }

    /// Store one resolved query. Write-once per key: a concurrent duplicate
    /// resolution keeps the first entry.
    pub async fn put_cached(&self, entry: &GeoCacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO geo_cache (query, lat, lon, source, quality, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(query) DO NOTHING
            "#,
        )
        .bind(&entry.query)
        .bind(entry.point.lat)
        .bind(entry.point.lon)
        .bind(&entry.source)
        .bind(entry.quality.as_str())
        .bind(entry.resolved_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite the distance snapshot for one listing
    pub async fn put_distance(&self, distance: &ListingDistance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO listing_distances
                (listing_id, destination_query, lat, lon, distance_km, quality, computed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(listing_id) DO UPDATE SET
                destination_query = excluded.destination_query,
                lat = excluded.lat,
                lon = excluded.lon,
                distance_km = excluded.distance_km,
                quality = excluded.quality,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(&distance.listing_id)
        .bind(&distance.destination_query)
        .bind(distance.destination.lat)
        .bind(distance.destination.lon)
        .bind(distance.distance_km)
        .bind(distance.quality.as_str())
        .bind(distance.computed_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Latest distance snapshot for one listing
    pub async fn get_distance(&self, listing_id: &str) -> Result<Option<ListingDistance>> {
        let row = sqlx::query("SELECT * FROM listing_distances WHERE listing_id = ?")
            .bind(listing_id)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(row.map(|row| ListingDistance {
            listing_id: row.get("listing_id"),
            destination_query: row.get("destination_query"),
            destination: GeoPoint::new(row.get("lat"), row.get("lon")),
            distance_km: row.get("distance_km"),
            quality: GeoQuality::parse(row.get::<String, _>("quality").as_str()),
            computed_at: row.get("computed_at"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;

    async fn repository() -> GeoRepository {
        let db = DatabaseConnection::new_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        // listing_distances references listings; seed one row
        sqlx::query(
            "INSERT INTO listings (listing_id, fingerprint, first_seen_at, last_seen_at)
             VALUES ('A1', 'fp', ?, ?)",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .unwrap();
        GeoRepository::new(db.pool().clone())
    }

    #[tokio::test]
    async fn cache_is_write_once_per_key() {
        let repo = repository().await;
        let entry = GeoCacheEntry {
            query: "20147 Milano".to_string(),
            point: GeoPoint::new(45.45, 9.12),
            source: "nominatim".to_string(),
            quality: GeoQuality::PostalCode,
            resolved_at: Utc::now(),
        };
        repo.put_cached(&entry).await.unwrap();

        let duplicate = GeoCacheEntry {
            point: GeoPoint::new(0.0, 0.0),
            ..entry.clone()
        };
        repo.put_cached(&duplicate).await.unwrap();

        let stored = repo.get_cached("20147 Milano").await.unwrap().unwrap();
        assert_eq!(stored.point, GeoPoint::new(45.45, 9.12));
    }

    #[tokio::test]
    async fn distance_snapshot_is_overwritten() {
        let repo = repository().await;
        let mut distance = ListingDistance {
            listing_id: "A1".to_string(),
            destination_query: "20147 Milano".to_string(),
            destination: GeoPoint::new(45.45, 9.12),
            distance_km: 12.5,
            quality: GeoQuality::PostalCode,
            computed_at: Utc::now(),
        };
        repo.put_distance(&distance).await.unwrap();

        distance.distance_km = 14.0;
        repo.put_distance(&distance).await.unwrap();

        let stored = repo.get_distance("A1").await.unwrap().unwrap();
        assert!((stored.distance_km - 14.0).abs() < 1e-9);
    }
}
