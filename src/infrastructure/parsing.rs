//! HTML parsing infrastructure for the marketplace crawl
//!
//! Trait-based HTML parsing with comprehensive error handling and
//! selector-configured extraction. Locator changes on the marketplace are a
//! configuration update here, not a pipeline change.

pub mod config;
pub mod context;
pub mod detail_page_parser;
pub mod error;
pub mod listing_page_parser;

// Re-export public types
pub use config::ParsingConfig;
pub use context::{DetailParseContext, ParseContext};
pub use detail_page_parser::{AvailabilityProbe, DetailPageParser};
pub use error::{ParsingError, ParsingResult};
pub use listing_page_parser::{ListingPageParser, PaginationStatus};

use scraper::Html;

/// Parser trait with context support
pub trait ContextualParser {
    type Output;
    type Context;

    /// Parse HTML with contextual information
    fn parse_with_context(&self, html: &Html, context: &Self::Context) -> ParsingResult<Self::Output>;
}
