//! End-to-end crawl cycle tests against an in-memory store and stubbed
//! page source / notification channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use car_scout::application::{
    CrawlPipeline, DetailEnricher, NotificationService, Validator,
};
use car_scout::domain::geo::{GeoPoint, GeoQuality};
use car_scout::domain::rules::{AcceptanceRules, SellerType};
use car_scout::domain::score::ScoringConfig;
use car_scout::infrastructure::config::{GeocodeConfig, NotificationConfig};
use car_scout::infrastructure::geocoder::{
    build_rate_limiter, GeocodeProvider, Geocoder, ProviderHit,
};
use car_scout::infrastructure::notifier::NotificationChannel;
use car_scout::infrastructure::page_source::ListingPageSource;
use car_scout::infrastructure::parsing::{DetailPageParser, ListingPageParser};
use car_scout::infrastructure::{
    DatabaseConnection, GeoRepository, HttpClient, HttpClientConfig, ListingRepository,
};

fn search_page(price: &str) -> String {
    format!(
        r#"<html><body>
          <article data-listing-id="A1">
            <h2><a href="/listing/A1">Fiat Panda 1.2 Lounge</a></h2>
            <div class="listing-subtitle">EZ 06/2018, 50.000 km, Benzin, Schaltgetriebe</div>
            <div class="price-block">{price} &euro;</div>
            <div class="listing-location">20147 Milano</div>
            <span class="seller-type">Privat</span>
          </article>
          <div class="pagination-indicator">1 / 1</div>
        </body></html>"#
    )
}

const DETAIL_PAGE: &str = r#"<html><body>
  <h1>Fiat Panda 1.2 Lounge</h1>
  <span class="price-rating-label">Good price</span>
  <div class="technical-data"><dl>
    <div><dt>Power</dt><dd>51 kW</dd></div>
  </dl></div>
  <div class="location-block"><address>20147 Milano</address></div>
</body></html>"#;

struct StubSource {
    search_html: Mutex<String>,
    detail_fetches: AtomicUsize,
}

#[async_trait]
impl ListingPageSource for StubSource {
    async fn search_page(&self, _page_no: u32) -> Result<String> {
        Ok(self.search_html.lock().unwrap().clone())
    }

    async fn detail_page(&self, _url: &str) -> Result<String> {
        self.detail_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(DETAIL_PAGE.to_string())
    }
}

#[derive(Default)]
struct RecordingChannel {
    texts: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send_text(&self, recipient: i64, text: &str) -> Result<()> {
        self.texts.lock().unwrap().push((recipient, text.to_string()));
        Ok(())
    }

    async fn send_photo(&self, recipient: i64, _image: Vec<u8>, caption: &str) -> Result<()> {
        self.texts.lock().unwrap().push((recipient, caption.to_string()));
        Ok(())
    }
}

struct StubProvider;

#[async_trait]
impl GeocodeProvider for StubProvider {
    async fn lookup(&self, query: &str) -> Result<Option<ProviderHit>> {
        let point = if query.contains("20147") {
            GeoPoint::new(45.4520, 9.1280)
        } else {
            GeoPoint::new(45.4642, 9.1900)
        };
        Ok(Some(ProviderHit {
            point,
            quality: GeoQuality::PostalCode,
            source: "stub".to_string(),
        }))
    }
}

struct Harness {
    pipeline: CrawlPipeline,
    repository: ListingRepository,
    source: Arc<StubSource>,
    channel: Arc<RecordingChannel>,
    cancel: CancellationToken,
}

async fn harness() -> Harness {
    let db = DatabaseConnection::new_in_memory().await.unwrap();
    db.migrate().await.unwrap();

    let repository = ListingRepository::new(db.pool().clone());
    let geo_repository = GeoRepository::new(db.pool().clone());

    let source = Arc::new(StubSource {
        search_html: Mutex::new(search_page("8.000")),
        detail_fetches: AtomicUsize::new(0),
    });
    let channel = Arc::new(RecordingChannel::default());
    let http = Arc::new(HttpClient::new(HttpClientConfig::default()).unwrap());

    let geocode_config = GeocodeConfig {
        reference_query: "Milano Duomo".to_string(),
        min_interval_ms: 1,
        ..GeocodeConfig::default()
    };
    let geocoder = Arc::new(Geocoder::new(
        Arc::new(StubProvider),
        geo_repository,
        build_rate_limiter(1).unwrap(),
        &geocode_config,
    ));

    let rules = AcceptanceRules {
        min_first_registration_year: Some(2015),
        max_price_eur: Some(9000),
        max_mileage_km: Some(100_000),
        required_seller_type: Some(SellerType::Private),
        allowed_fuels: vec!["petrol".to_string()],
        strict: false,
    };
    let validator = Validator::new(rules);

    let notifications = Arc::new(NotificationService::new(
        channel.clone(),
        http,
        NotificationConfig {
            recipients: vec![7],
            volume_guard_threshold: 10,
            ..NotificationConfig::default()
        },
    ));

    let enricher = DetailEnricher::new(
        source.clone(),
        DetailPageParser::new().unwrap(),
        repository.clone(),
        geocoder,
        ScoringConfig::default(),
        "https://marketplace.example".to_string(),
    );

    let pipeline = CrawlPipeline::new(
        source.clone(),
        ListingPageParser::new().unwrap(),
        validator,
        repository.clone(),
        enricher,
        notifications,
        "https://marketplace.example".to_string(),
        5,
        4,
    );

    Harness {
        pipeline,
        repository,
        source,
        channel,
        cancel: CancellationToken::new(),
    }
}

#[tokio::test]
async fn first_cycle_inserts_enriches_and_notifies() {
    let h = harness().await;

    let report = h.pipeline.run_cycle(&h.cancel).await.unwrap();

    assert_eq!(report.records_seen, 1);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.upsert.inserted, vec!["A1"]);
    assert_eq!(report.details_fetched, 1);
    assert_eq!(report.distances_computed, 1);
    assert_eq!(report.notifications_sent, 1);

    let stored = h.repository.get_listing("A1").await.unwrap().unwrap();
    assert_eq!(stored.summary.price_eur, Some(8000));
    assert_eq!(stored.change_count, 0);

    let detail = h.repository.get_detail("A1").await.unwrap().unwrap();
    assert_eq!(detail.power_kw, Some(51));
    assert!(detail.score.is_some());

    let texts = h.channel.texts.lock().unwrap();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].0, 7);
    assert!(texts[0].1.contains("Fiat Panda"));
}

#[tokio::test]
async fn unchanged_second_cycle_stays_silent() {
    let h = harness().await;
    h.pipeline.run_cycle(&h.cancel).await.unwrap();

    let report = h.pipeline.run_cycle(&h.cancel).await.unwrap();

    assert_eq!(report.upsert.unchanged, vec!["A1"]);
    assert!(report.upsert.inserted.is_empty());
    assert!(report.upsert.updated.is_empty());
    assert_eq!(report.notifications_sent, 0, "unchanged records are not re-notified");
    assert_eq!(
        h.source.detail_fetches.load(Ordering::SeqCst),
        1,
        "detail enrichment runs only for newly inserted records"
    );
}

#[tokio::test]
async fn price_change_classifies_as_updated_without_renotifying() {
    let h = harness().await;
    h.pipeline.run_cycle(&h.cancel).await.unwrap();

    *h.source.search_html.lock().unwrap() = search_page("7.500");
    let report = h.pipeline.run_cycle(&h.cancel).await.unwrap();

    assert_eq!(report.upsert.updated, vec!["A1"]);
    assert_eq!(report.notifications_sent, 0);

    let stored = h.repository.get_listing("A1").await.unwrap().unwrap();
    assert_eq!(stored.summary.price_eur, Some(7500));
    assert_eq!(stored.change_count, 1);
}

#[tokio::test]
async fn cancelled_cycle_stops_before_crawling() {
    let h = harness().await;
    h.cancel.cancel();

    let report = h.pipeline.run_cycle(&h.cancel).await.unwrap();
    assert_eq!(report.records_seen, 0);
    assert_eq!(report.pages_crawled, 0);
}
