//! Geocoding with permanent caching and process-wide call pacing.
//!
//! Lookups are cache-first against `geo_cache`; a hit never touches the
//! provider. Misses go through one injected rate limiter shared by every
//! caller in the process (enrichment and re-verification alike), with a
//! small bounded retry on transient failure. Distance to the configured
//! reference point is computed with the haversine formula and persisted as
//! the latest snapshot per listing.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::config::GeocodeConfig;
use super::geo_repository::{GeoCacheEntry, GeoRepository};
use crate::domain::geo::{GeoPoint, GeoQuality, ListingDistance, LocationQuery};

/// Process-wide pacing for provider calls. Injected, never ambient.
pub type GeoRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Build the shared limiter from the configured minimum inter-call delay
pub fn build_rate_limiter(min_interval_ms: u64) -> Result<Arc<GeoRateLimiter>> {
    let quota = Quota::with_period(Duration::from_millis(min_interval_ms.max(1)))
        .context("Geocode pacing interval must be positive")?;
    Ok(Arc::new(RateLimiter::direct(quota)))
}

/// One provider hit
#[derive(Debug, Clone)]
pub struct ProviderHit {
    pub point: GeoPoint,
    pub quality: GeoQuality,
    pub source: String,
}

/// Request/response lookup against an external geocode service
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Resolve a free-text query. `Ok(None)` is a definitive miss;
    /// `Err` is a transient failure worth retrying.
    async fn lookup(&self, query: &str) -> Result<Option<ProviderHit>>;
}

/// Nominatim-compatible JSON provider
pub struct NominatimProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    lat: String,
    lon: String,
    #[serde(default)]
    addresstype: Option<String>,
}

impl NominatimProvider {
    pub fn new(config: &GeocodeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create geocode HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    fn quality_from(addresstype: Option<&str>) -> GeoQuality {
        match addresstype {
            Some("postcode") => GeoQuality::PostalCode,
            Some("city") | Some("town") | Some("village") | Some("municipality") => GeoQuality::City,
            Some("house") | Some("building") | Some("residential") | Some("road") => GeoQuality::Address,
            _ => GeoQuality::Unknown,
        }
    }
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
    async fn lookup(&self, query: &str) -> Result<Option<ProviderHit>> {
        let response: Vec<NominatimResponse> = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .with_context(|| format!("Geocode request failed for '{}'", query))?
            .error_for_status()
            .with_context(|| format!("Geocode provider rejected '{}'", query))?
            .json()
            .await
            .context("Failed to parse geocode response")?;

        let Some(hit) = response.first() else {
            return Ok(None);
        };

        let lat: f64 = hit.lat.parse().context("Invalid latitude in response")?;
        let lon: f64 = hit.lon.parse().context("Invalid longitude in response")?;

        Ok(Some(ProviderHit {
            point: GeoPoint::new(lat, lon),
            quality: Self::quality_from(hit.addresstype.as_deref()),
            source: "nominatim".to_string(),
        }))
    }
}

/// Cached, paced geocoder plus distance computation
pub struct Geocoder {
    provider: Arc<dyn GeocodeProvider>,
    repo: GeoRepository,
    limiter: Arc<GeoRateLimiter>,
    max_retries: u32,
    retry_base_delay: Duration,
    reference_query: String,
    reference: OnceCell<Option<GeoPoint>>,
}

impl Geocoder {
    pub fn new(
        provider: Arc<dyn GeocodeProvider>,
        repo: GeoRepository,
        limiter: Arc<GeoRateLimiter>,
        config: &GeocodeConfig,
    ) -> Self {
        Self {
            provider,
            repo,
            limiter,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(500),
            reference_query: config.reference_query.clone(),
            reference: OnceCell::new(),
        }
    }

    /// Resolve a location to coordinates, cache-first.
    ///
    /// A definitive provider miss returns `Ok(None)` and is not cached;
    /// retrying it on a later cycle is deliberate.
    pub async fn resolve(&self, location: &LocationQuery) -> Result<Option<GeoCacheEntry>> {
        let Some(query) = location.normalized_query() else {
            return Ok(None);
        };
        self.resolve_query(&query).await
    }

    async fn resolve_query(&self, query: &str) -> Result<Option<GeoCacheEntry>> {
        if let Some(cached) = self.repo.get_cached(query).await? {
            debug!("Geocode cache hit for '{}'", query);
            return Ok(Some(cached));
        }

        let Some(hit) = self.lookup_with_retry(query).await? else {
            debug!("Geocode miss for '{}'", query);
            return Ok(None);
        };

        let entry = GeoCacheEntry {
            query: query.to_string(),
            point: hit.point,
            source: hit.source,
            quality: hit.quality,
            resolved_at: Utc::now(),
        };
        self.repo.put_cached(&entry).await?;

        Ok(Some(entry))
    }

    async fn lookup_with_retry(&self, query: &str) -> Result<Option<ProviderHit>> {
        let mut attempt = 0;
        loop {
            // Every attempt pays the process-wide pacing toll
            self.limiter.until_ready().await;

            match self.provider.lookup(query).await {
                Ok(hit) => return Ok(hit),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.retry_base_delay * 2u32.pow(attempt - 1);
                    let jitter = Duration::from_millis(fastrand::u64(0..250));
                    warn!(
                        "Geocode lookup for '{}' failed (attempt {}): {}; retrying in {:?}",
                        query, attempt, e, backoff + jitter
                    );
                    tokio::time::sleep(backoff + jitter).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The fixed reference point, geocoded once per process and cached like
    /// any other query.
    pub async fn reference_point(&self) -> Result<Option<GeoPoint>> {
        let reference = self
            .reference
            .get_or_try_init(|| async {
                let entry = self.resolve_query(&self.reference_query).await?;
                if entry.is_none() {
                    warn!(
                        "Reference point '{}' could not be geocoded; distances disabled",
                        self.reference_query
                    );
                }
                Ok::<_, anyhow::Error>(entry.map(|e| e.point))
            })
            .await?;
        Ok(*reference)
    }

    /// Resolve a listing's location and persist the distance snapshot.
    ///
    /// Returns `Ok(None)` when either endpoint cannot be resolved; the
    /// caller skips distance for that listing without failing the batch.
    pub async fn compute_distance(
        &self,
        listing_id: &str,
        location: &LocationQuery,
    ) -> Result<Option<ListingDistance>> {
        let Some(reference) = self.reference_point().await? else {
            return Ok(None);
        };

        let Some(destination) = self.resolve(location).await? else {
            return Ok(None);
        };

        let distance = ListingDistance {
            listing_id: listing_id.to_string(),
            destination_query: destination.query.clone(),
            destination: destination.point,
            distance_km: reference.distance_km(&destination.point),
            quality: destination.quality,
            computed_at: Utc::now(),
        };
        self.repo.put_distance(&distance).await?;

        Ok(Some(distance))
    }
}
