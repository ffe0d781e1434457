//! Availability re-verification.
//!
//! A capped-batch pass over currently-available records that still satisfy
//! the acceptance rules, ordered oldest-checked-first. Each record's detail
//! page is re-opened and probed for the withdrawal signature; a confirmed
//! gone flips `is_available` exactly once and stamps `unavailable_at`. An
//! inconclusive probe neither confirms nor denies availability.

#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use chrono::Utc;
use scraper::Html;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::notifications::NotificationService;
use super::validator::Validator;
use crate::infrastructure::listing_repository::ListingRepository;
use crate::infrastructure::page_source::ListingPageSource;
use crate::infrastructure::parsing::{AvailabilityProbe, DetailPageParser};

/// Counters for one re-verification pass
#[derive(Debug, Clone, Copy, Default)]
pub struct VerificationReport {
    pub checked: usize,
    pub gone: usize,
    pub inconclusive: usize,
    pub errors: usize,
}

pub struct AvailabilityChecker {
    source: Arc<dyn ListingPageSource>,
    parser: DetailPageParser,
    repository: ListingRepository,
    validator: Validator,
    notifications: Arc<NotificationService>,
    batch_size: u32,
}

impl AvailabilityChecker {
    pub fn new(
        source: Arc<dyn ListingPageSource>,
        parser: DetailPageParser,
        repository: ListingRepository,
        validator: Validator,
        notifications: Arc<NotificationService>,
        batch_size: u32,
    ) -> Self {
        Self {
            source,
            parser,
            repository,
            validator,
            notifications,
            batch_size,
        }
    }

    /// Run one capped-batch pass.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();
        let candidates = self.repository.verification_candidates(self.batch_size).await?;

        info!("Re-verification pass over {} candidates", candidates.len());

        for stored in candidates {
            if cancel.is_cancelled() {
                break;
            }

            let now = Utc::now();
            let listing_id = stored.summary.listing_id.clone();

            // A record that no longer satisfies the rules leaves the pass;
            // its check timestamp still advances so the queue rotates.
            if !self.validator.validate(&stored.summary).is_accepted() {
                self.repository.touch_availability_check(&listing_id, now).await?;
                continue;
            }

            let Some(url) = stored.summary.detail_url.clone() else {
                self.repository.touch_availability_check(&listing_id, now).await?;
                continue;
            };

            let page = match self.source.detail_page(&url).await {
                Ok(page) => page,
                Err(e) => {
                    // A fetch failure proves nothing about availability
                    warn!("Re-verification fetch failed for {}: {:#}", listing_id, e);
                    report.errors += 1;
                    self.repository.touch_availability_check(&listing_id, now).await?;
                    continue;
                }
            };

            let probe = {
                let html = Html::parse_document(&page);
                self.parser.detect_availability(&html)
            };
            report.checked += 1;

            match probe {
                AvailabilityProbe::Gone => {
                    let transitioned = self.repository.mark_unavailable(&listing_id, now).await?;
                    if transitioned {
                        report.gone += 1;
                        info!("Listing {} withdrawn", listing_id);
                        self.notifications.notify_withdrawal(&stored).await;
                    }
                }
                AvailabilityProbe::Available => {
                    self.repository.touch_availability_check(&listing_id, now).await?;
                }
                AvailabilityProbe::Inconclusive => {
                    report.inconclusive += 1;
                    self.repository.touch_availability_check(&listing_id, now).await?;
                }
            }
        }

        info!(
            "Re-verification done: {} checked, {} gone, {} inconclusive, {} errors",
            report.checked, report.gone, report.inconclusive, report.errors
        );

        Ok(report)
    }
}
