//! Repository for listing persistence with change-data-capture semantics.
//!
//! Sole writer of the `listings` and `listing_details` tables. Every upsert
//! batch is classified three ways against the store (inserted, updated,
//! unchanged) by comparing content fingerprints, so downstream stages only
//! process genuinely new records.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::listing::{ListingDetail, ListingSummary, StoredListing};
use crate::domain::report::UpsertReport;
use crate::domain::rules::SellerType;

/// Rows per statement; bounded by SQLite's bind-variable limit
const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Clone)]
pub struct ListingRepository {
    pool: Arc<SqlitePool>,
    batch_size: usize,
}

impl ListingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(pool: SqlitePool, batch_size: usize) -> Self {
        Self {
            pool: Arc::new(pool),
            batch_size: batch_size.max(1),
        }
    }

    // ===============================
    // SUMMARY CDC
    // ===============================

    /// Classify and persist one batch of summary records.
    ///
    /// Phases per chunk, inside a single transaction: conflict-free insert
    /// capturing genuinely new identifiers; one batched fingerprint
    /// comparison for the remainder; in-place update for changed records
    /// (`change_count` incremented, nullable incoming values never regress
    /// stored non-null values); a `last_seen_at` touch for unchanged ones.
    pub async fn upsert_summaries(&self, batch: &[ListingSummary]) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();

        for chunk in dedupe_by_id(batch, |r| &r.listing_id).chunks(self.batch_size) {
            let chunk_report = self
                .upsert_summary_chunk(chunk)
                .await
                .with_context(|| format!("Summary upsert chunk of {} records failed", chunk.len()))?;
            report.merge(chunk_report);
        }

        debug!(
            "Summary upsert: {} inserted, {} updated, {} unchanged",
            report.inserted.len(),
            report.updated.len(),
            report.unchanged.len()
        );

        Ok(report)
    }

    async fn upsert_summary_chunk(&self, chunk: &[&ListingSummary]) -> Result<UpsertReport> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Phase 1: conflict-free insert of the whole chunk; RETURNING yields
        // exactly the identifiers that were genuinely new.
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT INTO listings (listing_id, make, model, seller_type, fuel, gearbox, \
             price_eur, mileage_km, first_registration_year, title, subtitle, location_text, \
             image_url, detail_url, page_no, index_in_page, fingerprint, first_seen_at, last_seen_at) ",
        );
        qb.push_values(chunk, |mut b, record| {
            b.push_bind(&record.listing_id)
                .push_bind(&record.make)
                .push_bind(&record.model)
                .push_bind(record.seller_type.map(SellerType::as_str))
                .push_bind(&record.fuel)
                .push_bind(&record.gearbox)
                .push_bind(record.price_eur)
                .push_bind(record.mileage_km)
                .push_bind(record.first_registration_year)
                .push_bind(&record.title)
                .push_bind(&record.subtitle)
                .push_bind(&record.location_text)
                .push_bind(&record.image_url)
                .push_bind(&record.detail_url)
                .push_bind(record.page_no)
                .push_bind(record.index_in_page)
                .push_bind(record.fingerprint())
                .push_bind(now)
                .push_bind(now);
        });
        qb.push(" ON CONFLICT(listing_id) DO NOTHING RETURNING listing_id");

        let inserted: HashSet<String> = qb
            .build()
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|row| row.get::<String, _>(0))
            .collect();

        // Phase 2: one batched fingerprint comparison for the remainder
        let existing: Vec<&&ListingSummary> = chunk
            .iter()
            .filter(|r| !inserted.contains(&r.listing_id))
            .collect();

        let stored_fingerprints = if existing.is_empty() {
            HashMap::new()
        } else {
            let mut qb: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("SELECT listing_id, fingerprint FROM listings WHERE listing_id IN (");
            let mut separated = qb.separated(", ");
            for record in &existing {
                separated.push_bind(&record.listing_id);
            }
            qb.push(")");

            qb.build()
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|row| (row.get::<String, _>(0), row.get::<String, _>(1)))
                .collect::<HashMap<_, _>>()
        };

        let mut report = UpsertReport::default();
        report.inserted = chunk
            .iter()
            .filter(|r| inserted.contains(&r.listing_id))
            .map(|r| r.listing_id.clone())
            .collect();

        let mut unchanged_ids = Vec::new();

        // Phase 3: update changed records in place
        for record in existing {
            let fingerprint = record.fingerprint();
            match stored_fingerprints.get(&record.listing_id) {
                Some(stored) if *stored == fingerprint => {
                    unchanged_ids.push(record.listing_id.clone());
                }
                Some(_) => {
                    sqlx::query(
                        r#"
                        UPDATE listings SET
                            make = COALESCE(?, make),
                            model = COALESCE(?, model),
                            seller_type = COALESCE(?, seller_type),
                            fuel = COALESCE(?, fuel),
                            gearbox = COALESCE(?, gearbox),
                            price_eur = COALESCE(?, price_eur),
                            mileage_km = COALESCE(?, mileage_km),
                            first_registration_year = COALESCE(?, first_registration_year),
                            title = COALESCE(?, title),
                            subtitle = COALESCE(?, subtitle),
                            location_text = COALESCE(?, location_text),
                            image_url = COALESCE(?, image_url),
                            detail_url = COALESCE(?, detail_url),
                            page_no = ?,
                            index_in_page = ?,
                            fingerprint = ?,
                            change_count = change_count + 1,
                            last_seen_at = ?
                        WHERE listing_id = ?
                        "#,
                    )
                    .bind(&record.make)
                    .bind(&record.model)
                    .bind(record.seller_type.map(SellerType::as_str))
                    .bind(&record.fuel)
                    .bind(&record.gearbox)
                    .bind(record.price_eur)
                    .bind(record.mileage_km)
                    .bind(record.first_registration_year)
                    .bind(&record.title)
                    .bind(&record.subtitle)
                    .bind(&record.location_text)
                    .bind(&record.image_url)
                    .bind(&record.detail_url)
                    .bind(record.page_no)
                    .bind(record.index_in_page)
                    .bind(&fingerprint)
                    .bind(now)
                    .bind(&record.listing_id)
                    .execute(&mut *tx)
                    .await?;
                    report.updated.push(record.listing_id.clone());
                }
                None => {
                    // Row vanished between phases; should not happen inside
                    // one transaction
                    warn!("Listing {} missing during fingerprint comparison", record.listing_id);
                    unchanged_ids.push(record.listing_id.clone());
                }
            }
        }

        // Phase 4: touch last_seen_at for unchanged records
        if !unchanged_ids.is_empty() {
            let mut qb: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("UPDATE listings SET last_seen_at = ");
            qb.push_bind(now);
            qb.push(" WHERE listing_id IN (");
            let mut separated = qb.separated(", ");
            for id in &unchanged_ids {
                separated.push_bind(id);
            }
            qb.push(")");
            qb.build().execute(&mut *tx).await?;
        }
        report.unchanged = unchanged_ids;

        tx.commit().await?;
        Ok(report)
    }

    // ===============================
    // DETAIL CDC
    // ===============================

    /// Three-way upsert for detail records, keyed by the same identifier but
    /// with their own field set and fingerprint.
    pub async fn upsert_details(&self, batch: &[ListingDetail]) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();

        for chunk in dedupe_by_id(batch, |r| &r.listing_id).chunks(self.batch_size) {
            let chunk_report = self
                .upsert_detail_chunk(chunk)
                .await
                .with_context(|| format!("Detail upsert chunk of {} records failed", chunk.len()))?;
            report.merge(chunk_report);
        }

        Ok(report)
    }

    async fn upsert_detail_chunk(&self, chunk: &[&ListingDetail]) -> Result<UpsertReport> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT INTO listing_details (listing_id, power_kw, doors, color, interior, \
             previous_owners, financing_note, equipment, seller_name, seller_phone, description, \
             price_quality_label, score, fingerprint, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut b, record| {
            b.push_bind(&record.listing_id)
                .push_bind(record.power_kw)
                .push_bind(record.doors)
                .push_bind(&record.color)
                .push_bind(&record.interior)
                .push_bind(record.previous_owners)
                .push_bind(&record.financing_note)
                .push_bind(record.equipment_csv())
                .push_bind(&record.seller_name)
                .push_bind(&record.seller_phone)
                .push_bind(&record.description)
                .push_bind(&record.price_quality_label)
                .push_bind(record.score)
                .push_bind(record.fingerprint())
                .push_bind(now)
                .push_bind(now);
        });
        qb.push(" ON CONFLICT(listing_id) DO NOTHING RETURNING listing_id");

        let inserted: HashSet<String> = qb
            .build()
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|row| row.get::<String, _>(0))
            .collect();

        let existing: Vec<&&ListingDetail> = chunk
            .iter()
            .filter(|r| !inserted.contains(&r.listing_id))
            .collect();

        let stored_fingerprints = if existing.is_empty() {
            HashMap::new()
        } else {
            let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
                "SELECT listing_id, fingerprint FROM listing_details WHERE listing_id IN (",
            );
            let mut separated = qb.separated(", ");
            for record in &existing {
                separated.push_bind(&record.listing_id);
            }
            qb.push(")");

            qb.build()
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|row| (row.get::<String, _>(0), row.get::<String, _>(1)))
                .collect::<HashMap<_, _>>()
        };

        let mut report = UpsertReport::default();
        report.inserted = chunk
            .iter()
            .filter(|r| inserted.contains(&r.listing_id))
            .map(|r| r.listing_id.clone())
            .collect();

        for record in existing {
            let fingerprint = record.fingerprint();
            match stored_fingerprints.get(&record.listing_id) {
                Some(stored) if *stored == fingerprint => {
                    sqlx::query("UPDATE listing_details SET updated_at = ? WHERE listing_id = ?")
                        .bind(now)
                        .bind(&record.listing_id)
                        .execute(&mut *tx)
                        .await?;
                    report.unchanged.push(record.listing_id.clone());
                }
                _ => {
                    sqlx::query(
                        r#"
                        UPDATE listing_details SET
                            power_kw = COALESCE(?, power_kw),
                            doors = COALESCE(?, doors),
                            color = COALESCE(?, color),
                            interior = COALESCE(?, interior),
                            previous_owners = COALESCE(?, previous_owners),
                            financing_note = COALESCE(?, financing_note),
                            equipment = COALESCE(?, equipment),
                            seller_name = COALESCE(?, seller_name),
                            seller_phone = COALESCE(?, seller_phone),
                            description = COALESCE(?, description),
                            price_quality_label = COALESCE(?, price_quality_label),
                            score = COALESCE(?, score),
                            fingerprint = ?,
                            updated_at = ?
                        WHERE listing_id = ?
                        "#,
                    )
                    .bind(record.power_kw)
                    .bind(record.doors)
                    .bind(&record.color)
                    .bind(&record.interior)
                    .bind(record.previous_owners)
                    .bind(&record.financing_note)
                    .bind(record.equipment_csv())
                    .bind(&record.seller_name)
                    .bind(&record.seller_phone)
                    .bind(&record.description)
                    .bind(&record.price_quality_label)
                    .bind(record.score)
                    .bind(&fingerprint)
                    .bind(now)
                    .bind(&record.listing_id)
                    .execute(&mut *tx)
                    .await?;
                    report.updated.push(record.listing_id.clone());
                }
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    // ===============================
    // READS & AVAILABILITY BOOKKEEPING
    // ===============================

    /// Get one stored listing by identifier
    pub async fn get_listing(&self, listing_id: &str) -> Result<Option<StoredListing>> {
        let row = sqlx::query("SELECT * FROM listings WHERE listing_id = ?")
            .bind(listing_id)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(row.map(|row| map_listing_row(&row)))
    }

    /// Get stored listings for a set of identifiers
    pub async fn get_listings_by_ids(&self, ids: &[String]) -> Result<Vec<StoredListing>> {
        let mut listings = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.batch_size) {
            let mut qb: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("SELECT * FROM listings WHERE listing_id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            qb.push(")");

            listings.extend(
                qb.build()
                    .fetch_all(&*self.pool)
                    .await?
                    .iter()
                    .map(map_listing_row),
            );
        }
        Ok(listings)
    }

    /// Get the stored detail row for one listing
    pub async fn get_detail(&self, listing_id: &str) -> Result<Option<ListingDetail>> {
        let row = sqlx::query("SELECT * FROM listing_details WHERE listing_id = ?")
            .bind(listing_id)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(row.map(|row| ListingDetail {
            listing_id: row.get("listing_id"),
            power_kw: row.get("power_kw"),
            doors: row.get("doors"),
            color: row.get("color"),
            interior: row.get("interior"),
            previous_owners: row.get("previous_owners"),
            financing_note: row.get("financing_note"),
            equipment: row
                .get::<Option<String>, _>("equipment")
                .map(|csv| csv.split(", ").map(|s| s.to_string()).collect())
                .unwrap_or_default(),
            seller_name: row.get("seller_name"),
            seller_phone: row.get("seller_phone"),
            description: row.get("description"),
            price_quality_label: row.get("price_quality_label"),
            score: row.get("score"),
        }))
    }

    /// Currently-available listings ordered oldest-checked-first, capped.
    ///
    /// Records never checked sort before all checked ones.
    pub async fn verification_candidates(&self, limit: u32) -> Result<Vec<StoredListing>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM listings
            WHERE is_active = 1 AND is_available = 1
            ORDER BY last_availability_check_at IS NOT NULL, last_availability_check_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.iter().map(map_listing_row).collect())
    }

    /// Mark one listing withdrawn. Returns `false` when the listing was
    /// already unavailable, enforcing the once-only transition.
    pub async fn mark_unavailable(&self, listing_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET is_available = 0, unavailable_at = ?, last_availability_check_at = ?
            WHERE listing_id = ? AND is_available = 1
            "#,
        )
        .bind(at)
        .bind(at)
        .bind(listing_id)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record an availability check that did not flip the state
    pub async fn touch_availability_check(&self, listing_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE listings SET last_availability_check_at = ? WHERE listing_id = ?")
            .bind(at)
            .bind(listing_id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    /// Listings first seen inside the window and still available
    pub async fn new_listings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredListing>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM listings
            WHERE first_seen_at >= ? AND first_seen_at < ?
              AND is_active = 1 AND is_available = 1
            ORDER BY first_seen_at ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.iter().map(map_listing_row).collect())
    }

    /// Listings withdrawn inside the window
    pub async fn withdrawn_listings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredListing>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM listings
            WHERE unavailable_at >= ? AND unavailable_at < ?
            ORDER BY unavailable_at ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.iter().map(map_listing_row).collect())
    }
}

/// Keep the first occurrence per identifier; a results page occasionally
/// repeats a promoted listing.
fn dedupe_by_id<'a, T>(batch: &'a [T], id: impl Fn(&T) -> &String) -> Vec<&'a T> {
    let mut seen = HashSet::new();
    batch.iter().filter(|r| seen.insert(id(r).clone())).collect()
}

fn map_listing_row(row: &sqlx::sqlite::SqliteRow) -> StoredListing {
    StoredListing {
        summary: ListingSummary {
            listing_id: row.get("listing_id"),
            make: row.get("make"),
            model: row.get("model"),
            seller_type: row
                .get::<Option<String>, _>("seller_type")
                .as_deref()
                .and_then(SellerType::parse),
            fuel: row.get("fuel"),
            gearbox: row.get("gearbox"),
            price_eur: row.get("price_eur"),
            mileage_km: row.get("mileage_km"),
            first_registration_year: row.get("first_registration_year"),
            title: row.get("title"),
            subtitle: row.get("subtitle"),
            location_text: row.get("location_text"),
            image_url: row.get("image_url"),
            detail_url: row.get("detail_url"),
            page_no: row.get("page_no"),
            index_in_page: row.get("index_in_page"),
        },
        fingerprint: row.get("fingerprint"),
        first_seen_at: row.get("first_seen_at"),
        last_seen_at: row.get("last_seen_at"),
        change_count: row.get("change_count"),
        is_active: row.get("is_active"),
        is_available: row.get("is_available"),
        unavailable_at: row.get("unavailable_at"),
        last_availability_check_at: row.get("last_availability_check_at"),
    }
}
