//! Parsing configuration for HTML extraction
//!
//! Centralized configuration for CSS selectors and free-text extraction.
//! Every selector list is a fallback chain tried in order, so a marketplace
//! markup change is usually absorbed by appending a selector here.

use serde::{Deserialize, Serialize};

/// Main parsing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    /// Search-results page selectors
    pub listing_selectors: ListingPageSelectors,

    /// Detail page selectors
    pub detail_selectors: DetailPageSelectors,

    /// Markers identifying the "no longer available" page
    pub gone_markers: GoneMarkers,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            listing_selectors: ListingPageSelectors::default(),
            detail_selectors: DetailPageSelectors::default(),
            gone_markers: GoneMarkers::default(),
        }
    }
}

/// CSS selectors for search-results pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingPageSelectors {
    /// Selectors for listing tiles - multiple fallbacks
    pub listing_container: Vec<String>,

    /// Attribute names carrying the stable listing identifier, checked on the
    /// tile element itself
    pub listing_id_attrs: Vec<String>,

    /// Selectors for the detail page link
    pub detail_link: Vec<String>,

    /// Selectors for the listing title
    pub title: Vec<String>,

    /// Selectors for the subtitle line (registration, mileage, fuel, gearbox)
    pub subtitle: Vec<String>,

    /// Selectors for the price element
    pub price: Vec<String>,

    /// Attribute names carrying the numeric price on the tile or price element
    pub price_attrs: Vec<String>,

    /// Selectors for the location line
    pub location: Vec<String>,

    /// Selectors for the tile image
    pub image: Vec<String>,

    /// Selectors for the seller badge (private/dealer)
    pub seller_badge: Vec<String>,

    /// Selectors for the "page X of Y" indicator
    pub pagination_indicator: Vec<String>,

    /// Selectors for the "next page" control
    pub next_control: Vec<String>,
}

impl Default for ListingPageSelectors {
    fn default() -> Self {
        Self {
            listing_container: vec![
                "article[data-listing-id]".to_string(),
                ".result-item".to_string(),
                ".listing-card".to_string(),
                "li.search-result".to_string(),
            ],
            listing_id_attrs: vec![
                "data-listing-id".to_string(),
                "data-ad-id".to_string(),
                "data-id".to_string(),
            ],
            detail_link: vec![
                "a[href*='/listing/']".to_string(),
                "a[href*='/inserat/']".to_string(),
                "h2 a".to_string(),
                "a.result-link".to_string(),
            ],
            title: vec![
                ".listing-title".to_string(),
                "h2".to_string(),
                ".title".to_string(),
            ],
            subtitle: vec![
                ".listing-subtitle".to_string(),
                ".vehicle-data".to_string(),
                ".key-facts".to_string(),
            ],
            price: vec![
                ".price-block".to_string(),
                ".listing-price".to_string(),
                "[data-price]".to_string(),
            ],
            price_attrs: vec!["data-price".to_string()],
            location: vec![
                ".listing-location".to_string(),
                ".seller-location".to_string(),
                ".location".to_string(),
            ],
            image: vec![
                "img.listing-image".to_string(),
                ".image-block img".to_string(),
                "img".to_string(),
            ],
            seller_badge: vec![
                ".seller-type".to_string(),
                ".seller-badge".to_string(),
                ".dealer-badge".to_string(),
            ],
            pagination_indicator: vec![
                ".pagination-indicator".to_string(),
                ".page-counter".to_string(),
            ],
            next_control: vec![
                "button.pagination-next".to_string(),
                "a[rel='next']".to_string(),
                ".pagination .next".to_string(),
            ],
        }
    }
}

/// CSS selectors for detail pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailPageSelectors {
    /// Selectors for the detail page headline (used as a liveness signal)
    pub headline: Vec<String>,

    /// Selectors for technical-data rows; each row holds a label and a value
    pub tech_rows: Vec<String>,

    /// Selectors for the label element within a technical row
    pub tech_label: Vec<String>,

    /// Selectors for the value element within a technical row
    pub tech_value: Vec<String>,

    /// Selectors for equipment list items
    pub equipment_items: Vec<String>,

    /// Selectors for the financing note
    pub financing_note: Vec<String>,

    /// Selectors for the seller name
    pub seller_name: Vec<String>,

    /// Selectors for the seller phone (present after the reveal interaction)
    pub seller_phone: Vec<String>,

    /// Selectors for the free-text description
    pub description: Vec<String>,

    /// Selectors for the platform price-quality label
    pub price_quality_label: Vec<String>,

    /// Selectors for an embedded map link carrying a query parameter
    pub map_link: Vec<String>,
}

impl Default for DetailPageSelectors {
    fn default() -> Self {
        Self {
            headline: vec!["h1".to_string(), ".listing-headline".to_string()],
            tech_rows: vec![
                ".technical-data dl > div".to_string(),
                ".tech-details .row".to_string(),
                "dl.key-features > div".to_string(),
            ],
            tech_label: vec!["dt".to_string(), ".label".to_string()],
            tech_value: vec!["dd".to_string(), ".value".to_string()],
            equipment_items: vec![
                ".equipment-block li".to_string(),
                ".features li".to_string(),
            ],
            financing_note: vec![
                ".financing-offer".to_string(),
                ".finance-teaser".to_string(),
            ],
            seller_name: vec![".seller-info .name".to_string(), ".dealer-name".to_string()],
            seller_phone: vec![
                ".seller-info .phone".to_string(),
                "a[href^='tel:']".to_string(),
            ],
            description: vec![
                ".description-text".to_string(),
                "#listing-description".to_string(),
            ],
            price_quality_label: vec![
                ".price-rating-label".to_string(),
                ".price-assessment".to_string(),
            ],
            map_link: vec![
                "a[href*='maps']".to_string(),
                ".location-block a".to_string(),
            ],
        }
    }
}

/// Markers for the dedicated "no longer available" page.
///
/// The page has no stable id, only a recognizable shell: container elements
/// whose class carries a known prefix, and an italicized headline phrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoneMarkers {
    /// Selectors matching the gone-page container (attribute prefix selectors)
    pub container: Vec<String>,

    /// Selectors for the italicized headline to inspect
    pub headline: Vec<String>,

    /// Phrases (lowercase) confirming withdrawal when found in the headline
    pub phrases: Vec<String>,
}

impl Default for GoneMarkers {
    fn default() -> Self {
        Self {
            container: vec![
                "[class^='notfound-']".to_string(),
                "[class^='expired-']".to_string(),
                ".listing-expired".to_string(),
            ],
            headline: vec!["h1 i".to_string(), "h1 em".to_string(), ".headline i".to_string()],
            phrases: vec![
                "no longer available".to_string(),
                "nicht mehr verfügbar".to_string(),
                "non più disponibile".to_string(),
                "deleted".to_string(),
            ],
        }
    }
}
