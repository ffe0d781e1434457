//! Notification fan-out.
//!
//! Renders one message per accepted, newly inserted record (summary +
//! detail + distance), attempts the image path first and falls back to
//! text-only. Delivery is sequential per recipient; one recipient's failure
//! never blocks the next. A volume guard collapses oversized batches into a
//! single summary notice.

#![allow(clippy::uninlined_format_args)]

use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use super::enricher::EnrichedListing;
use crate::domain::listing::StoredListing;
use crate::infrastructure::config::NotificationConfig;
use crate::infrastructure::http_client::HttpClient;
use crate::infrastructure::notifier::NotificationChannel;

pub struct NotificationService {
    channel: Arc<dyn NotificationChannel>,
    http: Arc<HttpClient>,
    config: NotificationConfig,
}

impl NotificationService {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        http: Arc<HttpClient>,
        config: NotificationConfig,
    ) -> Self {
        Self { channel, http, config }
    }

    /// Notify all recipients about newly accepted listings.
    ///
    /// Returns the number of messages delivered.
    pub async fn notify_new(&self, listings: &[EnrichedListing]) -> usize {
        if listings.is_empty() || self.config.recipients.is_empty() {
            return 0;
        }

        // Volume guard: a schema change or bulk backfill must not turn into
        // a notification storm.
        if listings.len() > self.config.volume_guard_threshold {
            info!(
                "Volume guard: {} new listings exceed threshold {}, sending summary notice",
                listings.len(),
                self.config.volume_guard_threshold
            );
            let text = format!(
                "\u{26a0} {} new matching listings in one cycle; individual notices suppressed.",
                listings.len()
            );
            return self.broadcast_text(&text).await;
        }

        let mut sent = 0;
        for listing in listings {
            let message = render_listing_message(listing);
            let image = match listing.summary.image_url.as_deref() {
                Some(url) => match self.http.get_bytes(url).await {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        // Image fetch failure degrades to text-only
                        warn!(
                            "Image fetch failed for {}: {:#}",
                            listing.summary.listing_id, e
                        );
                        None
                    }
                },
                None => None,
            };

            for recipient in &self.config.recipients {
                let delivered = match image.clone() {
                    Some(bytes) => match self.channel.send_photo(*recipient, bytes, &message).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(
                                "Photo delivery to {} failed, falling back to text: {:#}",
                                recipient, e
                            );
                            self.send_text_logged(*recipient, &message).await
                        }
                    },
                    None => self.send_text_logged(*recipient, &message).await,
                };
                if delivered {
                    sent += 1;
                }
            }
        }
        sent
    }

    /// Individual withdrawal notice
    pub async fn notify_withdrawal(&self, listing: &StoredListing) -> usize {
        if !self.config.notify_withdrawals {
            return 0;
        }
        let title = listing
            .summary
            .title
            .as_deref()
            .unwrap_or(&listing.summary.listing_id);
        let text = format!("\u{274c} Withdrawn: {}", escape_html(title));
        self.broadcast_text(&text).await
    }

    /// Deliver the daily digest to every recipient
    pub async fn send_digest(&self, digest: &str) -> usize {
        self.broadcast_text(digest).await
    }

    /// Operator-facing alert for batch-level and fatal failures
    pub async fn notify_operator(&self, text: &str) {
        let Some(operator) = self.config.operator_recipient else {
            return;
        };
        if let Err(e) = self.channel.send_text(operator, text).await {
            warn!("Operator alert delivery failed: {:#}", e);
        }
    }

    async fn broadcast_text(&self, text: &str) -> usize {
        let mut sent = 0;
        for recipient in &self.config.recipients {
            if self.send_text_logged(*recipient, text).await {
                sent += 1;
            }
        }
        sent
    }

    async fn send_text_logged(&self, recipient: i64, text: &str) -> bool {
        match self.channel.send_text(recipient, text).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Delivery to {} failed: {:#}", recipient, e);
                false
            }
        }
    }
}

/// Render the per-listing message: summary, detail and distance combined,
/// with an inline action link to the listing.
pub fn render_listing_message(listing: &EnrichedListing) -> String {
    let summary = &listing.summary;
    let mut message = String::new();

    let title = summary.title.as_deref().unwrap_or("New listing");
    let _ = writeln!(message, "<b>{}</b>", escape_html(title));

    let mut facts = Vec::new();
    if let Some(price) = summary.price_eur {
        facts.push(format!("{} €", group_thousands(price)));
    }
    if let Some(year) = summary.first_registration_year {
        facts.push(year.to_string());
    }
    if let Some(mileage) = summary.mileage_km {
        facts.push(format!("{} km", group_thousands(mileage)));
    }
    if let Some(fuel) = summary.fuel.as_deref() {
        facts.push(fuel.to_string());
    }
    if let Some(gearbox) = summary.gearbox.as_deref() {
        facts.push(gearbox.to_string());
    }
    if !facts.is_empty() {
        let _ = writeln!(message, "{}", escape_html(&facts.join(" · ")));
    }

    if let Some(detail) = &listing.detail {
        if let Some(power) = detail.power_kw {
            let _ = writeln!(message, "Power: {} kW", power);
        }
        if let Some(owners) = detail.previous_owners {
            let _ = writeln!(message, "Previous owners: {}", owners);
        }
        if let Some(label) = detail.price_quality_label.as_deref() {
            let _ = writeln!(message, "Price rating: {}", escape_html(label));
        }
        if let Some(score) = detail.score {
            let _ = writeln!(message, "Score: {:.0}%", score * 100.0);
        }
    }

    match (&listing.distance, summary.location_text.as_deref()) {
        (Some(distance), Some(location)) => {
            let _ = writeln!(
                message,
                "{} ({:.0} km away)",
                escape_html(location),
                distance.distance_km
            );
        }
        (Some(distance), None) => {
            let _ = writeln!(message, "{:.0} km away", distance.distance_km);
        }
        (None, Some(location)) => {
            let _ = writeln!(message, "{}", escape_html(location));
        }
        (None, None) => {}
    }

    if let Some(url) = summary.detail_url.as_deref() {
        let _ = write!(message, "<a href=\"{}\">Open listing</a>", url);
    }

    message.trim_end().to_string()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn group_thousands(value: i64) -> String {
    let digits = value.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::listing::{ListingDetail, ListingSummary};
    use crate::infrastructure::http_client::HttpClientConfig;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        texts: Mutex<Vec<(i64, String)>>,
        fail_for: Option<i64>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send_text(&self, recipient: i64, text: &str) -> Result<()> {
            if self.fail_for == Some(recipient) {
                anyhow::bail!("recipient unreachable");
            }
            self.texts.lock().unwrap().push((recipient, text.to_string()));
            Ok(())
        }

        async fn send_photo(&self, _recipient: i64, _image: Vec<u8>, _caption: &str) -> Result<()> {
            anyhow::bail!("no photo support in this test channel");
        }
    }

    fn enriched(id: &str) -> EnrichedListing {
        let mut summary = ListingSummary::new(id);
        summary.title = Some("Fiat Panda 1.2".to_string());
        summary.price_eur = Some(8000);
        summary.mileage_km = Some(50_000);
        summary.first_registration_year = Some(2018);
        summary.detail_url = Some(format!("https://m.example/listing/{id}"));
        let mut detail = ListingDetail::new(id);
        detail.score = Some(0.72);
        EnrichedListing {
            summary,
            detail: Some(detail),
            distance: None,
        }
    }

    fn service(channel: Arc<RecordingChannel>, recipients: Vec<i64>, threshold: usize) -> NotificationService {
        let http = Arc::new(HttpClient::new(HttpClientConfig::default()).unwrap());
        NotificationService::new(
            channel,
            http,
            NotificationConfig {
                bot_token: String::new(),
                recipients,
                operator_recipient: None,
                volume_guard_threshold: threshold,
                notify_withdrawals: true,
            },
        )
    }

    #[tokio::test]
    async fn one_failing_recipient_does_not_block_the_next() {
        let channel = Arc::new(RecordingChannel {
            fail_for: Some(1),
            ..RecordingChannel::default()
        });
        let svc = service(channel.clone(), vec![1, 2], 10);

        let sent = svc.notify_new(&[enriched("A1")]).await;
        assert_eq!(sent, 1);

        let texts = channel.texts.lock().unwrap();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, 2);
    }

    #[tokio::test]
    async fn volume_guard_collapses_large_batches() {
        let channel = Arc::new(RecordingChannel::default());
        let svc = service(channel.clone(), vec![1], 2);

        let batch: Vec<EnrichedListing> =
            (0..5).map(|i| enriched(&format!("L{i}"))).collect();
        let sent = svc.notify_new(&batch).await;
        assert_eq!(sent, 1, "a single summary notice replaces per-item delivery");

        let texts = channel.texts.lock().unwrap();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].1.contains("5 new matching listings"));
    }

    #[tokio::test]
    async fn rendered_message_combines_summary_detail_and_link() {
        let listing = enriched("A1");
        let message = render_listing_message(&listing);
        assert!(message.contains("<b>Fiat Panda 1.2</b>"));
        assert!(message.contains("8.000 €"));
        assert!(message.contains("50.000 km"));
        assert!(message.contains("Score: 72%"));
        assert!(message.contains("<a href=\"https://m.example/listing/A1\">Open listing</a>"));
    }

    #[test]
    fn html_is_escaped_in_user_supplied_fields() {
        let mut listing = enriched("A1");
        listing.summary.title = Some("Fiat <Panda> & Co".to_string());
        let message = render_listing_message(&listing);
        assert!(message.contains("Fiat &lt;Panda&gt; &amp; Co"));
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(8000), "8.000");
        assert_eq!(group_thousands(123), "123");
        assert_eq!(group_thousands(1_234_567), "1.234.567");
    }
}
