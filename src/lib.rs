//! Car Scout - Marketplace Listing Monitoring Pipeline
//!
//! A recurring crawler over a paginated marketplace search with
//! change-data-capture persistence, detail enrichment, cached geocoding
//! with distance computation, notification fan-out and a long-running
//! scheduler with a night window, daily digest and availability
//! re-verification.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use application::{
    AvailabilityChecker, CrawlPipeline, DetailEnricher, DigestBuilder, NotificationService,
    Scheduler, Validator,
};
use infrastructure::config::AppConfig;
use infrastructure::geocoder::{build_rate_limiter, Geocoder, NominatimProvider};
use infrastructure::notifier::{LogOnlyChannel, NotificationChannel, TelegramChannel};
use infrastructure::page_source::{HttpPageSource, ListingPageSource};
use infrastructure::parsing::{DetailPageParser, ListingPageParser};
use infrastructure::{ConfigManager, DatabaseConnection, GeoRepository, HttpClient, ListingRepository};

/// Wire every component from the configuration and drive the scheduler
/// until the cancellation signal fires.
pub async fn run(config: AppConfig, cancel: CancellationToken) -> Result<()> {
    let database_url = match &config.advanced.database_path {
        Some(path) => format!("sqlite:{}", path.display()),
        None => {
            let dir = ConfigManager::get_app_data_dir()?;
            format!("sqlite:{}", dir.join("car-scout.db").display())
        }
    };

    info!("Opening store at {}", database_url);
    let db = DatabaseConnection::new(&database_url).await?;
    db.migrate().await.context("Schema migration failed")?;

    let http = Arc::new(HttpClient::new(infrastructure::HttpClientConfig {
        timeout_seconds: config.advanced.request_timeout_seconds,
        max_requests_per_second: config.advanced.max_requests_per_second,
        ..infrastructure::HttpClientConfig::default()
    })?);

    let source: Arc<dyn ListingPageSource> =
        Arc::new(HttpPageSource::new(http.clone(), &config.user.search));

    let parsing = &config.advanced.parsing;
    let list_parser = ListingPageParser::with_config(&parsing.listing_selectors)?;
    let detail_parser = DetailPageParser::with_config(&parsing.detail_selectors, &parsing.gone_markers)?;
    let verify_parser = DetailPageParser::with_config(&parsing.detail_selectors, &parsing.gone_markers)?;

    let repository =
        ListingRepository::with_batch_size(db.pool().clone(), config.advanced.db_batch_size);
    let geo_repository = GeoRepository::new(db.pool().clone());

    let limiter = build_rate_limiter(config.user.geocode.min_interval_ms)?;
    let provider = Arc::new(NominatimProvider::new(&config.user.geocode)?);
    let geocoder = Arc::new(Geocoder::new(
        provider,
        geo_repository,
        limiter,
        &config.user.geocode,
    ));

    let channel: Arc<dyn NotificationChannel> = if config.user.notifications.bot_token.is_empty() {
        info!("No bot token configured; notifications run dry");
        Arc::new(LogOnlyChannel)
    } else {
        Arc::new(TelegramChannel::new(&config.user.notifications.bot_token)?)
    };
    let notifications = Arc::new(NotificationService::new(
        channel,
        http.clone(),
        config.user.notifications.clone(),
    ));

    let validator = Validator::new(config.user.rules.clone());

    let enricher = DetailEnricher::new(
        source.clone(),
        detail_parser,
        repository.clone(),
        geocoder,
        config.user.scoring.clone(),
        config.user.search.base_url.clone(),
    );

    let pipeline = CrawlPipeline::new(
        source.clone(),
        list_parser,
        validator.clone(),
        repository.clone(),
        enricher,
        notifications.clone(),
        config.user.search.base_url.clone(),
        config.user.search.max_pages,
        config.advanced.batch_bisection_depth,
    );

    let availability = AvailabilityChecker::new(
        source,
        verify_parser,
        repository.clone(),
        validator.clone(),
        notifications.clone(),
        config.user.schedule.verify_batch_size,
    );

    let digest = DigestBuilder::new(repository, validator);

    let mut scheduler = Scheduler::new(
        pipeline,
        availability,
        digest,
        notifications,
        config.user.schedule.clone(),
        cancel,
    );

    scheduler.run().await
}
