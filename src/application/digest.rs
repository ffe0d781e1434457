//! Daily digest: one aggregate message covering the day's new and
//! withdrawn records.

#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::fmt::Write as _;

use super::validator::Validator;
use crate::domain::listing::StoredListing;
use crate::infrastructure::listing_repository::ListingRepository;

pub struct DigestBuilder {
    repository: ListingRepository,
    validator: Validator,
}

impl DigestBuilder {
    pub fn new(repository: ListingRepository, validator: Validator) -> Self {
        Self { repository, validator }
    }

    /// Render the digest for the day window ending at `window_end`.
    ///
    /// New records are included only while still eligible (available and
    /// passing the acceptance rules); withdrawn records are included by
    /// their withdrawal timestamp.
    pub async fn render(&self, window_end: DateTime<Utc>) -> Result<String> {
        let window_start = window_end - Duration::hours(24);

        let new_listings: Vec<StoredListing> = self
            .repository
            .new_listings_between(window_start, window_end)
            .await?
            .into_iter()
            .filter(|listing| self.validator.validate(&listing.summary).is_accepted())
            .collect();

        let withdrawn = self
            .repository
            .withdrawn_listings_between(window_start, window_end)
            .await?;

        let mut message = String::from("<b>Daily digest</b>\n");

        if new_listings.is_empty() && withdrawn.is_empty() {
            message.push_str("No new or withdrawn listings in the last 24 hours.");
            return Ok(message);
        }

        if !new_listings.is_empty() {
            let _ = writeln!(message, "\nNew ({}):", new_listings.len());
            for listing in &new_listings {
                message.push_str(&digest_line(listing));
                message.push('\n');
            }
        }

        if !withdrawn.is_empty() {
            let _ = writeln!(message, "\nWithdrawn ({}):", withdrawn.len());
            for listing in &withdrawn {
                message.push_str(&digest_line(listing));
                message.push('\n');
            }
        }

        Ok(message.trim_end().to_string())
    }
}

fn digest_line(listing: &StoredListing) -> String {
    let title = listing
        .summary
        .title
        .as_deref()
        .unwrap_or(&listing.summary.listing_id);
    match listing.summary.price_eur {
        Some(price) => format!("• {}, {} €", title, price),
        None => format!("• {}", title),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::listing::ListingSummary;
    use crate::domain::rules::AcceptanceRules;
    use crate::infrastructure::database_connection::DatabaseConnection;

    async fn setup() -> (ListingRepository, DigestBuilder) {
        let db = DatabaseConnection::new_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let repository = ListingRepository::new(db.pool().clone());
        let builder = DigestBuilder::new(
            repository.clone(),
            Validator::new(AcceptanceRules::default()),
        );
        (repository, builder)
    }

    fn record(id: &str, title: &str) -> ListingSummary {
        let mut r = ListingSummary::new(id);
        r.title = Some(title.to_string());
        r.price_eur = Some(8000);
        r
    }

    #[tokio::test]
    async fn digest_covers_new_and_withdrawn_records() {
        let (repository, builder) = setup().await;

        repository
            .upsert_summaries(&[record("A1", "Fiat Panda"), record("B2", "VW Golf")])
            .await
            .unwrap();
        repository.mark_unavailable("B2", Utc::now()).await.unwrap();

        let digest = builder.render(Utc::now()).await.unwrap();
        assert!(digest.contains("New (1):"), "digest was: {}", digest);
        assert!(digest.contains("Fiat Panda"));
        assert!(digest.contains("Withdrawn (1):"));
        assert!(digest.contains("VW Golf"));
    }

    #[tokio::test]
    async fn quiet_day_still_renders_a_digest() {
        let (_repository, builder) = setup().await;
        let digest = builder.render(Utc::now()).await.unwrap();
        assert!(digest.contains("No new or withdrawn listings"));
    }

    #[tokio::test]
    async fn records_outside_the_window_are_excluded() {
        let (repository, builder) = setup().await;
        repository
            .upsert_summaries(&[record("A1", "Fiat Panda")])
            .await
            .unwrap();

        // A window that ended two days ago predates the record
        let digest = builder.render(Utc::now() - Duration::days(2)).await.unwrap();
        assert!(digest.contains("No new or withdrawn listings"));
    }
}
