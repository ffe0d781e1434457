//! Infrastructure module - External system integrations
//!
//! Configuration, logging, HTTP, persistence, parsing, geocoding and
//! notification transport. Application services depend on these through the
//! traits exposed here; concrete implementations talk to the outside world.

pub mod config;
pub mod database_connection;
pub mod geo_repository;
pub mod geocoder;
pub mod http_client;
pub mod listing_repository;
pub mod logging;
pub mod notifier;
pub mod page_source;
pub mod parsing;
pub mod retry;

pub use config::{AppConfig, ConfigManager};
pub use database_connection::DatabaseConnection;
pub use geo_repository::GeoRepository;
pub use geocoder::Geocoder;
pub use http_client::{HttpClient, HttpClientConfig};
pub use listing_repository::ListingRepository;
pub use notifier::{NotificationChannel, TelegramChannel};
pub use page_source::{HttpPageSource, ListingPageSource};
