//! Domain module - Core business logic and entities
//!
//! This module contains the listing entities, acceptance rules, geographic
//! value objects and scoring logic that represent the core business rules
//! of the monitoring pipeline.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod geo;
pub mod listing;
pub mod report;
pub mod rules;
pub mod score;

// Re-export commonly used items for convenience
// Note: Be specific about re-exports to avoid ambiguous glob warnings
pub use geo::{GeoPoint, GeoQuality, ListingDistance, LocationQuery};
pub use listing::{ListingDetail, ListingSummary, StoredListing};
pub use report::{CycleReport, UpsertReport};
pub use rules::{AcceptanceRules, RejectReason, SellerType, Verdict};
