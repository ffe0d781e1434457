//! Re-verification pass tests: gone detection, the once-only availability
//! transition and candidate selection.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use car_scout::application::{AvailabilityChecker, NotificationService, Validator};
use car_scout::domain::listing::ListingSummary;
use car_scout::domain::rules::AcceptanceRules;
use car_scout::infrastructure::config::NotificationConfig;
use car_scout::infrastructure::notifier::NotificationChannel;
use car_scout::infrastructure::page_source::ListingPageSource;
use car_scout::infrastructure::parsing::DetailPageParser;
use car_scout::infrastructure::{
    DatabaseConnection, HttpClient, HttpClientConfig, ListingRepository,
};

const LIVE_PAGE: &str = "<html><body><h1>Fiat Panda</h1></body></html>";
const GONE_PAGE: &str =
    r#"<html><body><h1><i>This listing is no longer available</i></h1></body></html>"#;

struct ScriptedSource {
    pages: Mutex<std::collections::HashMap<String, String>>,
}

#[async_trait]
impl ListingPageSource for ScriptedSource {
    async fn search_page(&self, _page_no: u32) -> Result<String> {
        anyhow::bail!("not used in this test");
    }

    async fn detail_page(&self, url: &str) -> Result<String> {
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no scripted page for {url}"))
    }
}

#[derive(Default)]
struct RecordingChannel {
    texts: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send_text(&self, _recipient: i64, text: &str) -> Result<()> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_photo(&self, _recipient: i64, _image: Vec<u8>, _caption: &str) -> Result<()> {
        Ok(())
    }
}

fn record(id: &str) -> ListingSummary {
    let mut r = ListingSummary::new(id);
    r.title = Some(format!("Listing {id}"));
    r.detail_url = Some(format!("https://m.example/listing/{id}"));
    r.price_eur = Some(8000);
    r
}

struct Harness {
    checker: AvailabilityChecker,
    repository: ListingRepository,
    source: Arc<ScriptedSource>,
    channel: Arc<RecordingChannel>,
}

async fn harness(rules: AcceptanceRules) -> Harness {
    let db = DatabaseConnection::new_in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let repository = ListingRepository::new(db.pool().clone());

    let source = Arc::new(ScriptedSource {
        pages: Mutex::new(std::collections::HashMap::new()),
    });
    let channel = Arc::new(RecordingChannel::default());
    let notifications = Arc::new(NotificationService::new(
        channel.clone(),
        Arc::new(HttpClient::new(HttpClientConfig::default()).unwrap()),
        NotificationConfig {
            recipients: vec![7],
            notify_withdrawals: true,
            ..NotificationConfig::default()
        },
    ));

    let checker = AvailabilityChecker::new(
        source.clone(),
        DetailPageParser::new().unwrap(),
        repository.clone(),
        Validator::new(rules),
        notifications,
        10,
    );

    Harness {
        checker,
        repository,
        source,
        channel,
    }
}

fn script(h: &Harness, id: &str, page: &str) {
    h.source
        .pages
        .lock()
        .unwrap()
        .insert(format!("https://m.example/listing/{id}"), page.to_string());
}

#[tokio::test]
async fn gone_listing_is_marked_withdrawn_and_not_reselected() {
    let h = harness(AcceptanceRules::default()).await;
    h.repository.upsert_summaries(&[record("A1")]).await.unwrap();
    script(&h, "A1", GONE_PAGE);

    let cancel = CancellationToken::new();
    let report = h.checker.run_pass(&cancel).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.gone, 1);

    let stored = h.repository.get_listing("A1").await.unwrap().unwrap();
    assert!(!stored.is_available);
    assert!(stored.unavailable_at.is_some());
    assert_eq!(h.channel.texts.lock().unwrap().len(), 1, "withdrawal notice sent");

    // The withdrawn record no longer satisfies is_available and is not
    // selected by the next pass.
    let report = h.checker.run_pass(&cancel).await.unwrap();
    assert_eq!(report.checked, 0);
    assert_eq!(report.gone, 0);
    assert_eq!(h.channel.texts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn live_listing_only_advances_check_timestamp() {
    let h = harness(AcceptanceRules::default()).await;
    h.repository.upsert_summaries(&[record("A1")]).await.unwrap();
    script(&h, "A1", LIVE_PAGE);

    let cancel = CancellationToken::new();
    let report = h.checker.run_pass(&cancel).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.gone, 0);

    let stored = h.repository.get_listing("A1").await.unwrap().unwrap();
    assert!(stored.is_available);
    assert!(stored.last_availability_check_at.is_some());
}

#[tokio::test]
async fn inconclusive_probe_flips_nothing() {
    let h = harness(AcceptanceRules::default()).await;
    h.repository.upsert_summaries(&[record("A1")]).await.unwrap();
    script(&h, "A1", "<html><body><p>interstitial</p></body></html>");

    let cancel = CancellationToken::new();
    let report = h.checker.run_pass(&cancel).await.unwrap();
    assert_eq!(report.inconclusive, 1);
    assert_eq!(report.gone, 0);

    let stored = h.repository.get_listing("A1").await.unwrap().unwrap();
    assert!(stored.is_available, "inconclusive neither confirms nor denies");
    assert!(stored.last_availability_check_at.is_some());
}

#[tokio::test]
async fn records_failing_the_rules_leave_the_pass() {
    let rules = AcceptanceRules {
        max_price_eur: Some(5000),
        ..AcceptanceRules::default()
    };
    let h = harness(rules).await;
    // price 8000 exceeds the 5000 cap, so the record is no longer eligible
    h.repository.upsert_summaries(&[record("A1")]).await.unwrap();
    script(&h, "A1", GONE_PAGE);

    let cancel = CancellationToken::new();
    let report = h.checker.run_pass(&cancel).await.unwrap();
    assert_eq!(report.checked, 0, "ineligible records are not probed");

    let stored = h.repository.get_listing("A1").await.unwrap().unwrap();
    assert!(stored.is_available);
}

#[tokio::test]
async fn fetch_failure_counts_as_error_and_rotates_queue() {
    let h = harness(AcceptanceRules::default()).await;
    h.repository.upsert_summaries(&[record("A1")]).await.unwrap();
    // No scripted page: the fetch fails

    let cancel = CancellationToken::new();
    let report = h.checker.run_pass(&cancel).await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.checked, 0);

    let stored = h.repository.get_listing("A1").await.unwrap().unwrap();
    assert!(stored.is_available);
    assert!(stored.last_availability_check_at.is_some());
}
