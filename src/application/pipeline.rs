//! One crawl-validate-persist-enrich-notify cycle.
//!
//! Pages are consumed lazily until the pagination state reports no further
//! page or the configured cap is reached; a page that fails to fetch or
//! parse is logged and skipped rather than aborting the crawl. The upsert
//! runs as one batch; if the batch fails, it is retried with halving
//! bisection so a poison record costs one row, not the cycle.

#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use scraper::Html;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::enricher::DetailEnricher;
use super::notifications::NotificationService;
use super::validator::Validator;
use crate::domain::listing::ListingSummary;
use crate::domain::report::{CycleReport, UpsertReport};
use crate::infrastructure::listing_repository::ListingRepository;
use crate::infrastructure::page_source::ListingPageSource;
use crate::infrastructure::parsing::{ContextualParser, ListingPageParser, ParseContext};
use crate::infrastructure::retry::retry_with_halving;

pub struct CrawlPipeline {
    source: Arc<dyn ListingPageSource>,
    list_parser: ListingPageParser,
    validator: Validator,
    repository: ListingRepository,
    enricher: DetailEnricher,
    notifications: Arc<NotificationService>,
    base_url: String,
    max_pages: u32,
    bisection_depth: u32,
}

impl CrawlPipeline {
    pub fn new(
        source: Arc<dyn ListingPageSource>,
        list_parser: ListingPageParser,
        validator: Validator,
        repository: ListingRepository,
        enricher: DetailEnricher,
        notifications: Arc<NotificationService>,
        base_url: String,
        max_pages: u32,
        bisection_depth: u32,
    ) -> Self {
        Self {
            source,
            list_parser,
            validator,
            repository,
            enricher,
            notifications,
            base_url,
            max_pages,
            bisection_depth,
        }
    }

    /// Run one full cycle. Individual page and record failures are absorbed;
    /// an error return means the cycle itself could not proceed.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4().to_string();
        let mut report = CycleReport::new(cycle_id.clone(), Utc::now());
        info!("Cycle {} started", cycle_id);

        // Stage 1+2: crawl pages lazily, extract and collect the batch
        let batch = self.crawl_pages(cancel, &mut report).await;
        report.records_seen = batch.len();

        if batch.is_empty() {
            info!("Cycle {}: no records extracted", cycle_id);
            report.completed_at = Some(Utc::now());
            return Ok(report);
        }

        // Stage 3: validate with itemized diagnostics
        let validation = self.validator.validate_batch(&batch);
        report.accepted = validation.accepted.len();
        report.rejected = validation.rejected.len();

        // Stage 4: CDC upsert, bisecting on batch failure
        report.upsert = match self.repository.upsert_summaries(&batch).await {
            Ok(upsert) => upsert,
            Err(e) => {
                warn!(
                    "Cycle {}: batch upsert failed, retrying with halving: {:#}",
                    cycle_id, e
                );
                self.upsert_with_bisection(&batch, &mut report).await
            }
        };

        // Stage 5: enrich only inserted ∩ accepted
        let accepted: HashSet<&str> = validation.accepted.iter().map(String::as_str).collect();
        let to_enrich: Vec<ListingSummary> = batch
            .iter()
            .filter(|r| {
                report.upsert.inserted.contains(&r.listing_id)
                    && accepted.contains(r.listing_id.as_str())
            })
            .cloned()
            .collect();

        let (enriched, stats) = self.enricher.enrich_batch(to_enrich).await;
        report.details_fetched = stats.details_fetched;
        report.detail_failures = stats.detail_failures;
        report.distances_computed = stats.distances_computed;

        // Stage 6: notify
        report.notifications_sent = self.notifications.notify_new(&enriched).await;

        report.completed_at = Some(Utc::now());
        info!(
            "Cycle {} finished: {} seen, {} inserted, {} updated, {} unchanged, {} notified",
            cycle_id,
            report.records_seen,
            report.upsert.inserted.len(),
            report.upsert.updated.len(),
            report.upsert.unchanged.len(),
            report.notifications_sent
        );

        Ok(report)
    }

    async fn crawl_pages(
        &self,
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) -> Vec<ListingSummary> {
        let mut batch = Vec::new();

        for page_no in 1..=self.max_pages {
            if cancel.is_cancelled() {
                info!("Crawl cancelled at page {}", page_no);
                break;
            }

            let page = match self.source.search_page(page_no).await {
                Ok(page) => page,
                Err(e) => {
                    // Partial-failure tolerance: log and try the next page
                    warn!("Fetching page {} failed: {:#}", page_no, e);
                    report.errors.push(format!("page {}: {:#}", page_no, e));
                    continue;
                }
            };

            let (records, has_next) = {
                let html = Html::parse_document(&page);
                let context = ParseContext::new(page_no, &self.base_url);
                let records = match self.list_parser.parse_with_context(&html, &context) {
                    Ok(records) => records,
                    Err(e) => {
                        warn!("Extraction on page {} failed: {}", page_no, e);
                        report.errors.push(format!("page {}: {}", page_no, e));
                        Vec::new()
                    }
                };
                (records, self.list_parser.pagination_status(&html).has_next())
            };

            report.pages_crawled += 1;
            batch.extend(records);

            if !has_next {
                break;
            }
        }

        batch
    }

    async fn upsert_with_bisection(
        &self,
        batch: &[ListingSummary],
        report: &mut CycleReport,
    ) -> UpsertReport {
        let repository = &self.repository;
        let outcome = retry_with_halving(
            batch,
            self.bisection_depth,
            &|chunk: Vec<ListingSummary>| {
                async move { repository.upsert_summaries(&chunk).await }.boxed()
            },
            &|acc: &mut UpsertReport, r| acc.merge(r),
        )
        .await;

        if !outcome.failures.is_empty() {
            let summary = format!(
                "{} records could not be persisted this cycle",
                outcome.failures.len()
            );
            warn!("{}", summary);
            for (index, error) in &outcome.failures {
                report.errors.push(format!(
                    "upsert of {} failed: {}",
                    batch[*index].listing_id, error
                ));
            }
            self.notifications.notify_operator(&summary).await;
        }

        outcome.result
    }
}
