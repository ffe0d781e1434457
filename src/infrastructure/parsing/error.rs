//! Parsing error types with context-aware reporting.
//!
//! Extraction failures carry enough context (selectors tried, page number,
//! offending value) to diagnose marketplace layout changes from the logs.

use thiserror::Error;

pub type ParsingResult<T> = Result<T, ParsingError>;

#[derive(Error, Debug, Clone)]
pub enum ParsingError {
    #[error("Required field '{field}' not found in HTML")]
    RequiredFieldMissing {
        field: String,
        context: Option<String>,
    },

    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("No listings found on page {page_no}")]
    NoListingsFound {
        page_no: u32,
        tried_selectors: Vec<String>,
    },

    #[error("Listing validation failed: {reason}")]
    ListingValidationFailed {
        reason: String,
        field_errors: Vec<String>,
    },

    #[error("URL resolution failed: {url} - {reason}")]
    UrlResolutionFailed {
        url: String,
        reason: String,
        base_url: Option<String>,
    },

    #[error("Field extraction failed: {field} - {reason}")]
    FieldExtractionFailed {
        field: String,
        reason: String,
        attempted_selectors: Vec<String>,
    },
}

impl ParsingError {
    /// Create a required field missing error with context
    pub fn required_field_missing(field: &str, context: Option<&str>) -> Self {
        Self::RequiredFieldMissing {
            field: field.to_string(),
            context: context.map(|s| s.to_string()),
        }
    }

    /// Create a no listings found error with tried selectors
    pub fn no_listings_found(page_no: u32, tried_selectors: Vec<String>) -> Self {
        Self::NoListingsFound {
            page_no,
            tried_selectors,
        }
    }

    /// Create a field extraction failure with the selectors that were attempted
    pub fn field_extraction_failed(field: &str, reason: &str, attempted_selectors: Vec<String>) -> Self {
        Self::FieldExtractionFailed {
            field: field.to_string(),
            reason: reason.to_string(),
            attempted_selectors,
        }
    }
}
