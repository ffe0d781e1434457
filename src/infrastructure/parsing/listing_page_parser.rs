//! Search-results page parser
//!
//! Extracts one `ListingSummary` per result tile with fallback selector
//! chains and per-tile error recovery: a tile that cannot be extracted is
//! logged and skipped, never failing the whole page.

#![allow(clippy::uninlined_format_args)]

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::config::ListingPageSelectors;
use super::context::ParseContext;
use super::error::{ParsingError, ParsingResult};
use super::ContextualParser;
use crate::domain::listing::ListingSummary;
use crate::domain::rules::SellerType;

static REGISTRATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:0?[1-9]|1[0-2])/((?:19|20)\d{2})").expect("valid regex"));
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("valid regex"));
static MILEAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:[.,\u{2009}\s']\d{3})*|\d+)\s*km\b").expect("valid regex")
});
static PAGE_INDICATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(?:/|of|von|di)\s*(\d+)").expect("valid regex"));

/// Pagination state read from one results page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationStatus {
    /// "current / total" indicator, when the page carries one
    pub indicator: Option<(u32, u32)>,
    /// Enabled state of the "next" control, when the page carries one
    pub next_enabled: Option<bool>,
}

impl PaginationStatus {
    /// Whether a further page is indicated. The indicator wins over the
    /// next-control state; a page with neither reports no further page.
    pub fn has_next(&self) -> bool {
        if let Some((current, total)) = self.indicator {
            return current < total;
        }
        self.next_enabled.unwrap_or(false)
    }
}

/// Parser for extracting listing summaries from search-results pages
pub struct ListingPageParser {
    container_selectors: Vec<Selector>,
    listing_id_attrs: Vec<String>,
    detail_link_selectors: Vec<Selector>,
    title_selectors: Vec<Selector>,
    subtitle_selectors: Vec<Selector>,
    price_selectors: Vec<Selector>,
    price_attrs: Vec<String>,
    location_selectors: Vec<Selector>,
    image_selectors: Vec<Selector>,
    seller_badge_selectors: Vec<Selector>,
    pagination_indicator_selectors: Vec<Selector>,
    next_control_selectors: Vec<Selector>,
}

impl ListingPageParser {
    /// Create a new parser with default selectors
    pub fn new() -> ParsingResult<Self> {
        Self::with_config(&ListingPageSelectors::default())
    }

    /// Create parser with custom selector configuration
    pub fn with_config(selectors: &ListingPageSelectors) -> ParsingResult<Self> {
        Ok(Self {
            container_selectors: compile_selectors(&selectors.listing_container)?,
            listing_id_attrs: selectors.listing_id_attrs.clone(),
            detail_link_selectors: compile_selectors(&selectors.detail_link)?,
            title_selectors: compile_selectors(&selectors.title)?,
            subtitle_selectors: compile_selectors(&selectors.subtitle)?,
            price_selectors: compile_selectors(&selectors.price)?,
            price_attrs: selectors.price_attrs.clone(),
            location_selectors: compile_selectors(&selectors.location)?,
            image_selectors: compile_selectors(&selectors.image)?,
            seller_badge_selectors: compile_selectors(&selectors.seller_badge)?,
            pagination_indicator_selectors: compile_selectors(&selectors.pagination_indicator)?,
            next_control_selectors: compile_selectors(&selectors.next_control)?,
        })
    }

    /// Read the pagination state from a results page
    pub fn pagination_status(&self, html: &Html) -> PaginationStatus {
        let indicator = self
            .pagination_indicator_selectors
            .iter()
            .flat_map(|sel| html.select(sel))
            .find_map(|el| {
                let text = element_text(&el);
                PAGE_INDICATOR_RE.captures(&text).and_then(|caps| {
                    let current = caps.get(1)?.as_str().parse().ok()?;
                    let total = caps.get(2)?.as_str().parse().ok()?;
                    Some((current, total))
                })
            });

        let next_enabled = self
            .next_control_selectors
            .iter()
            .flat_map(|sel| html.select(sel))
            .next()
            .map(|el| {
                let value = el.value();
                value.attr("disabled").is_none()
                    && !value
                        .attr("class")
                        .map(|c| c.split_whitespace().any(|cls| cls == "disabled"))
                        .unwrap_or(false)
                    && !value
                        .attr("aria-disabled")
                        .map(|v| v == "true")
                        .unwrap_or(false)
            });

        PaginationStatus { indicator, next_enabled }
    }

    fn extract_listing_from_element(
        &self,
        element: &ElementRef<'_>,
        index: u32,
        context: &ParseContext,
    ) -> ParsingResult<ListingSummary> {
        let listing_id = self.extract_listing_id(element)?;

        let mut record = ListingSummary::new(listing_id);
        record.page_no = Some(context.page_no as i32);
        record.index_in_page = Some(index as i32);

        record.title = extract_text_with_fallbacks(element, &self.title_selectors);
        record.subtitle = extract_text_with_fallbacks(element, &self.subtitle_selectors);
        record.location_text = extract_text_with_fallbacks(element, &self.location_selectors);

        if let Some(title) = record.title.as_deref() {
            let mut words = title.split_whitespace();
            record.make = words.next().map(|s| s.to_string());
            record.model = words.next().map(|s| s.to_string());
        }

        record.detail_url = self
            .extract_detail_url(element, &context.base_url)
            .map_err(|e| {
                debug!("Detail link missing for listing: {}", e);
                e
            })
            .ok();

        record.image_url = self
            .image_selectors
            .iter()
            .find_map(|sel| element.select(sel).next())
            .and_then(|img| {
                img.value()
                    .attr("src")
                    .or_else(|| img.value().attr("data-src"))
                    .map(|s| s.to_string())
            });

        record.price_eur = self.extract_price(element);

        if let Some(subtitle) = record.subtitle.clone() {
            record.first_registration_year = extract_registration_year(&subtitle);
            record.mileage_km = extract_mileage_km(&subtitle);
            record.fuel = extract_fuel(&subtitle);
            record.gearbox = extract_gearbox(&subtitle);
        }

        record.seller_type = extract_text_with_fallbacks(element, &self.seller_badge_selectors)
            .and_then(|badge| SellerType::parse(&badge));

        Ok(record)
    }

    fn extract_listing_id(&self, element: &ElementRef<'_>) -> ParsingResult<String> {
        for attr in &self.listing_id_attrs {
            if let Some(value) = element.value().attr(attr) {
                let value = value.trim();
                if !value.is_empty() {
                    return Ok(value.to_string());
                }
            }
        }

        // Fallback: last path segment of the detail link
        for selector in &self.detail_link_selectors {
            if let Some(link) = element.select(selector).next() {
                if let Some(href) = link.value().attr("href") {
                    if let Some(segment) = href
                        .trim_end_matches('/')
                        .rsplit('/')
                        .next()
                        .filter(|s| !s.is_empty())
                    {
                        return Ok(segment.split('?').next().unwrap_or(segment).to_string());
                    }
                }
            }
        }

        Err(ParsingError::required_field_missing(
            "listing_id",
            Some("result tile"),
        ))
    }

    fn extract_detail_url(&self, element: &ElementRef<'_>, base_url: &str) -> ParsingResult<String> {
        let mut attempted = Vec::new();
        for (i, selector) in self.detail_link_selectors.iter().enumerate() {
            attempted.push(format!("detail_link_{}", i));
            if let Some(link) = element.select(selector).next() {
                if let Some(href) = link.value().attr("href") {
                    return resolve_url(href, base_url);
                }
            }
        }

        Err(ParsingError::field_extraction_failed(
            "detail_url",
            "No valid href attribute found",
            attempted,
        ))
    }

    fn extract_price(&self, element: &ElementRef<'_>) -> Option<i64> {
        // Attribute-carried price wins over display text
        for attr in &self.price_attrs {
            if let Some(value) = element.value().attr(attr) {
                if let Some(price) = parse_price(value) {
                    return Some(price);
                }
            }
        }

        for selector in &self.price_selectors {
            if let Some(el) = element.select(selector).next() {
                for attr in &self.price_attrs {
                    if let Some(value) = el.value().attr(attr) {
                        if let Some(price) = parse_price(value) {
                            return Some(price);
                        }
                    }
                }
                if let Some(price) = parse_price(&element_text(&el)) {
                    return Some(price);
                }
            }
        }

        None
    }
}

impl ContextualParser for ListingPageParser {
    type Output = Vec<ListingSummary>;
    type Context = ParseContext;

    /// Parse a results page, skipping tiles that fail to extract
    fn parse_with_context(&self, html: &Html, context: &Self::Context) -> ParsingResult<Self::Output> {
        debug!("Parsing results page {}", context.page_no);

        let mut listings = Vec::new();
        let mut tried_selectors = Vec::new();

        for (i, selector) in self.container_selectors.iter().enumerate() {
            tried_selectors.push(format!("container_selector_{}", i));

            let tiles: Vec<ElementRef<'_>> = html.select(selector).collect();
            if tiles.is_empty() {
                continue;
            }

            for (index, tile) in tiles.iter().enumerate() {
                match self.extract_listing_from_element(tile, index as u32, context) {
                    Ok(record) => listings.push(record),
                    Err(e) => {
                        warn!(
                            "Failed to extract listing at index {} on page {}: {}",
                            index, context.page_no, e
                        );
                        // Continue processing other tiles
                    }
                }
            }

            if !listings.is_empty() {
                break;
            }
        }

        if listings.is_empty() {
            return Err(ParsingError::no_listings_found(context.page_no, tried_selectors));
        }

        debug!(
            "Extracted {} listings from page {}",
            listings.len(),
            context.page_no
        );

        Ok(listings)
    }
}

/// Compile multiple selector strings into Selector objects
fn compile_selectors(selector_strings: &[String]) -> ParsingResult<Vec<Selector>> {
    let mut selectors = Vec::new();

    for selector_str in selector_strings {
        match Selector::parse(selector_str) {
            Ok(selector) => selectors.push(selector),
            Err(e) => {
                warn!("Failed to compile selector '{}': {}", selector_str, e);
            }
        }
    }

    if selectors.is_empty() {
        return Err(ParsingError::InvalidSelector {
            selector: selector_strings.join(", "),
            reason: "no selector in the fallback chain compiled".to_string(),
        });
    }

    Ok(selectors)
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Extract text content using multiple selectors as fallbacks
fn extract_text_with_fallbacks(element: &ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    for selector in selectors {
        if let Some(text) = element
            .select(selector)
            .next()
            .map(|e| element_text(&e))
            .filter(|text| !text.is_empty())
        {
            return Some(text);
        }
    }
    None
}

/// Resolve relative URLs to absolute URLs
fn resolve_url(href: &str, base_url: &str) -> ParsingResult<String> {
    if href.starts_with("http") {
        return Ok(href.to_string());
    }

    let base = Url::parse(base_url).map_err(|e| ParsingError::UrlResolutionFailed {
        url: base_url.to_string(),
        reason: format!("Invalid base URL: {}", e),
        base_url: None,
    })?;

    let resolved = base.join(href).map_err(|e| ParsingError::UrlResolutionFailed {
        url: href.to_string(),
        reason: format!("Failed to join URL: {}", e),
        base_url: Some(base_url.to_string()),
    })?;

    Ok(resolved.to_string())
}

/// Parse a price like "8.000 €", "€ 8,000" or an attribute value "8000"
pub(crate) fn parse_price(text: &str) -> Option<i64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    // Drop a cents suffix (separator followed by exactly two digits)
    let bytes = cleaned.as_bytes();
    let cleaned = if bytes.len() > 3
        && (bytes[bytes.len() - 3] == b'.' || bytes[bytes.len() - 3] == b',')
    {
        &cleaned[..cleaned.len() - 3]
    } else {
        cleaned.as_str()
    };

    let digits: String = cleaned.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn extract_registration_year(subtitle: &str) -> Option<i32> {
    if let Some(caps) = REGISTRATION_RE.captures(subtitle) {
        return caps.get(1)?.as_str().parse().ok();
    }
    YEAR_RE
        .captures(subtitle)
        .and_then(|caps| caps.get(1)?.as_str().parse().ok())
}

fn extract_mileage_km(subtitle: &str) -> Option<i64> {
    let caps = MILEAGE_RE.captures(subtitle)?;
    let digits: String = caps
        .get(1)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn extract_fuel(subtitle: &str) -> Option<String> {
    let lower = subtitle.to_lowercase();
    let table = [
        (&["petrol", "benzin", "benzina", "gasoline"][..], "petrol"),
        (&["diesel"][..], "diesel"),
        (&["electric", "elektro", "elettrica"][..], "electric"),
        (&["hybrid", "ibrida"][..], "hybrid"),
        (&["lpg", "autogas", "gpl"][..], "lpg"),
        (&["cng", "erdgas", "metano"][..], "cng"),
    ];
    for (needles, canonical) in table {
        if needles.iter().any(|needle| lower.contains(needle)) {
            return Some(canonical.to_string());
        }
    }
    None
}

fn extract_gearbox(subtitle: &str) -> Option<String> {
    let lower = subtitle.to_lowercase();
    if ["automatic", "automatik", "automatico"].iter().any(|n| lower.contains(n)) {
        return Some("automatic".to_string());
    }
    if ["manual", "schaltgetriebe", "manuale"].iter().any(|n| lower.contains(n)) {
        return Some("manual".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="results">
            <article data-listing-id="A1" data-price="8000">
              <h2><a href="/listing/A1">Fiat Panda 1.2 Lounge</a></h2>
              <div class="listing-subtitle">EZ 06/2018, 50.000 km, Benzin, Schaltgetriebe</div>
              <div class="price-block">8.000 &euro;</div>
              <div class="listing-location">20147 Milano</div>
              <img class="listing-image" src="https://img.example/a1.jpg"/>
              <span class="seller-type">Privat</span>
            </article>
            <article data-listing-id="B2">
              <h2><a href="/listing/B2">Volkswagen Golf VII</a></h2>
              <div class="listing-subtitle">EZ 03/2016, 120.000 km, Diesel, Automatik</div>
              <div class="price-block">9.500 &euro;</div>
              <span class="seller-type">Händler</span>
            </article>
            <article>
              <h2>Tile without identifier or link</h2>
            </article>
          </div>
          <div class="pagination-indicator">2 / 7</div>
          <button class="pagination-next">Next</button>
        </body></html>
    "#;

    fn parse_page() -> Vec<ListingSummary> {
        let parser = ListingPageParser::new().unwrap();
        let html = Html::parse_document(PAGE);
        let context = ParseContext::new(2, "https://marketplace.example");
        parser.parse_with_context(&html, &context).unwrap()
    }

    #[test]
    fn extracts_typed_fields_per_tile() {
        let listings = parse_page();
        assert_eq!(listings.len(), 2, "tile without identifier is skipped");

        let a1 = &listings[0];
        assert_eq!(a1.listing_id, "A1");
        assert_eq!(a1.price_eur, Some(8000));
        assert_eq!(a1.mileage_km, Some(50_000));
        assert_eq!(a1.first_registration_year, Some(2018));
        assert_eq!(a1.fuel.as_deref(), Some("petrol"));
        assert_eq!(a1.gearbox.as_deref(), Some("manual"));
        assert_eq!(a1.seller_type, Some(SellerType::Private));
        assert_eq!(a1.make.as_deref(), Some("Fiat"));
        assert_eq!(a1.model.as_deref(), Some("Panda"));
        assert_eq!(
            a1.detail_url.as_deref(),
            Some("https://marketplace.example/listing/A1")
        );
        assert_eq!(a1.page_no, Some(2));
        assert_eq!(a1.index_in_page, Some(0));

        let b2 = &listings[1];
        assert_eq!(b2.listing_id, "B2");
        assert_eq!(b2.seller_type, Some(SellerType::Dealer));
        assert_eq!(b2.fuel.as_deref(), Some("diesel"));
        assert_eq!(b2.gearbox.as_deref(), Some("automatic"));
        assert_eq!(b2.image_url, None, "missing image stays None");
    }

    #[test]
    fn pagination_indicator_wins() {
        let parser = ListingPageParser::new().unwrap();
        let html = Html::parse_document(PAGE);
        let status = parser.pagination_status(&html);
        assert_eq!(status.indicator, Some((2, 7)));
        assert!(status.has_next());
    }

    #[test]
    fn disabled_next_control_stops_pagination() {
        let parser = ListingPageParser::new().unwrap();
        let html = Html::parse_document(
            r#"<html><body>
                <article data-listing-id="A1"><h2><a href="/listing/A1">Fiat Panda</a></h2></article>
                <button class="pagination-next" disabled>Next</button>
            </body></html>"#,
        );
        let status = parser.pagination_status(&html);
        assert_eq!(status.indicator, None);
        assert_eq!(status.next_enabled, Some(false));
        assert!(!status.has_next());
    }

    #[test]
    fn page_without_pagination_reports_no_next() {
        let parser = ListingPageParser::new().unwrap();
        let html = Html::parse_document("<html><body></body></html>");
        assert!(!parser.pagination_status(&html).has_next());
    }

    #[test]
    fn empty_page_is_an_error() {
        let parser = ListingPageParser::new().unwrap();
        let html = Html::parse_document("<html><body><p>maintenance</p></body></html>");
        let context = ParseContext::new(1, "https://marketplace.example");
        assert!(parser.parse_with_context(&html, &context).is_err());
    }

    #[test]
    fn price_parsing_handles_separators_and_cents() {
        assert_eq!(parse_price("8.000 €"), Some(8000));
        assert_eq!(parse_price("€ 8,000"), Some(8000));
        assert_eq!(parse_price("1.234,00 €"), Some(1234));
        assert_eq!(parse_price("8000"), Some(8000));
        assert_eq!(parse_price("VB"), None);
    }
}
