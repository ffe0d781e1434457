//! Detail enrichment stage.
//!
//! For every newly inserted, validator-accepted record this stage opens the
//! detail page, parses the extended field set, computes the desirability
//! score, feeds the detail CDC engine and resolves the listing's distance
//! from the reference point. Every per-listing failure is recovered locally:
//! the summary row keeps counting as inserted, only the enrichment is
//! skipped.

#![allow(clippy::uninlined_format_args)]

use chrono::{Datelike, Utc};
use scraper::Html;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::geo::{ListingDistance, LocationQuery};
use crate::domain::listing::{ListingDetail, ListingSummary};
use crate::domain::score::ScoringConfig;
use crate::infrastructure::geocoder::Geocoder;
use crate::infrastructure::listing_repository::ListingRepository;
use crate::infrastructure::page_source::ListingPageSource;
use crate::infrastructure::parsing::{ContextualParser, DetailPageParser, DetailParseContext};

/// One listing with everything the notifier renders
#[derive(Debug, Clone)]
pub struct EnrichedListing {
    pub summary: ListingSummary,
    pub detail: Option<ListingDetail>,
    pub distance: Option<ListingDistance>,
}

/// Counters for one enrichment batch
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichmentStats {
    pub details_fetched: usize,
    pub detail_failures: usize,
    pub distances_computed: usize,
}

pub struct DetailEnricher {
    source: Arc<dyn ListingPageSource>,
    parser: DetailPageParser,
    repository: ListingRepository,
    geocoder: Arc<Geocoder>,
    scoring: ScoringConfig,
    base_url: String,
}

impl DetailEnricher {
    pub fn new(
        source: Arc<dyn ListingPageSource>,
        parser: DetailPageParser,
        repository: ListingRepository,
        geocoder: Arc<Geocoder>,
        scoring: ScoringConfig,
        base_url: String,
    ) -> Self {
        Self {
            source,
            parser,
            repository,
            geocoder,
            scoring,
            base_url,
        }
    }

    /// Enrich a batch of accepted, newly inserted records sequentially.
    ///
    /// Returns the enriched listings plus counters; failed listings come
    /// back with `detail: None` so the caller can still render a summary.
    pub async fn enrich_batch(
        &self,
        records: Vec<ListingSummary>,
    ) -> (Vec<EnrichedListing>, EnrichmentStats) {
        let mut stats = EnrichmentStats::default();
        let mut enriched = Vec::with_capacity(records.len());
        let mut details = Vec::new();

        for summary in records {
            let (detail, location) = match self.fetch_and_parse(&summary).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Detail enrichment failed for {}: {:#}", summary.listing_id, e);
                    stats.detail_failures += 1;
                    // The summary still counts as inserted; fall back to the
                    // tile's location text for the distance lookup.
                    let location = location_from_summary(&summary);
                    let distance = self.resolve_distance(&summary.listing_id, &location).await;
                    if distance.is_some() {
                        stats.distances_computed += 1;
                    }
                    enriched.push(EnrichedListing { summary, detail: None, distance });
                    continue;
                }
            };

            stats.details_fetched += 1;

            let distance = self.resolve_distance(&summary.listing_id, &location).await;
            if distance.is_some() {
                stats.distances_computed += 1;
            }

            details.push(detail.clone());
            enriched.push(EnrichedListing {
                summary,
                detail: Some(detail),
                distance,
            });
        }

        // Feed the detail CDC engine in one batch
        if !details.is_empty() {
            if let Err(e) = self.repository.upsert_details(&details).await {
                warn!("Detail upsert failed for batch of {}: {:#}", details.len(), e);
            }
        }

        (enriched, stats)
    }

    async fn fetch_and_parse(
        &self,
        summary: &ListingSummary,
    ) -> anyhow::Result<(ListingDetail, LocationQuery)> {
        let url = summary
            .detail_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("listing has no detail URL"))?;

        let page = self.source.detail_page(url).await?;

        // Parse synchronously and drop the DOM before the next await point
        let (mut detail, location) = {
            let html = Html::parse_document(&page);
            let context = DetailParseContext::new(&summary.listing_id, url, &self.base_url);
            let detail = self.parser.parse_with_context(&html, &context)?;
            let mut location = self.parser.extract_location(&html);
            if location.normalized_query().is_none() {
                location = location_from_summary(summary);
            }
            (detail, location)
        };

        let score = self.scoring.compute(summary, &detail, Utc::now().year());
        detail.score = score;
        debug!(
            "Enriched {} (score: {:?})",
            summary.listing_id, detail.score
        );

        Ok((detail, location))
    }

    async fn resolve_distance(
        &self,
        listing_id: &str,
        location: &LocationQuery,
    ) -> Option<ListingDistance> {
        match self.geocoder.compute_distance(listing_id, location).await {
            Ok(distance) => distance,
            Err(e) => {
                // Geocode failure skips distance for this listing only
                warn!("Distance computation failed for {}: {:#}", listing_id, e);
                None
            }
        }
    }
}

/// Location fragments from the tile's free-text location line
fn location_from_summary(summary: &ListingSummary) -> LocationQuery {
    let text = summary.location_text.as_deref().unwrap_or_default();
    let (postal_code, place) = split_postal_code(text);
    LocationQuery {
        map_link_query: None,
        postal_code,
        place,
    }
}

fn split_postal_code(text: &str) -> (Option<String>, Option<String>) {
    let mut postal = None;
    let mut rest = Vec::new();
    for token in text.split_whitespace() {
        if postal.is_none() && token.len() == 5 && token.chars().all(|c| c.is_ascii_digit()) {
            postal = Some(token.to_string());
        } else {
            rest.push(token);
        }
    }
    let place = (!rest.is_empty()).then(|| rest.join(" "));
    (postal, place)
}
