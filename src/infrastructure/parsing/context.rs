//! Parsing context objects for HTML extraction.

/// Context information for search-results page parsing
#[derive(Debug, Clone)]
pub struct ParseContext {
    /// Current page being parsed (1-based)
    pub page_no: u32,

    /// Base URL for resolving relative links
    pub base_url: String,
}

impl ParseContext {
    pub fn new(page_no: u32, base_url: impl Into<String>) -> Self {
        Self {
            page_no,
            base_url: base_url.into(),
        }
    }
}

/// Context for detail-page parsing
#[derive(Debug, Clone)]
pub struct DetailParseContext {
    /// Listing the detail page belongs to
    pub listing_id: String,

    /// Detail page URL being parsed
    pub url: String,

    /// Base URL for resolving relative resources
    pub base_url: String,
}

impl DetailParseContext {
    pub fn new(listing_id: impl Into<String>, url: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            url: url.into(),
            base_url: base_url.into(),
        }
    }
}
