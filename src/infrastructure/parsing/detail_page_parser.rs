//! Detail page parser
//!
//! Extracts the extended field set from a listing's detail page, the
//! location fragments used for geocoding, and the availability probe used by
//! the re-verification pass.

#![allow(clippy::uninlined_format_args)]

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::config::{DetailPageSelectors, GoneMarkers};
use super::context::DetailParseContext;
use super::error::{ParsingError, ParsingResult};
use super::ContextualParser;
use crate::domain::geo::LocationQuery;
use crate::domain::listing::ListingDetail;

static POWER_KW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*kW").expect("valid regex"));
static POSTAL_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{5})\b").expect("valid regex"));
static LEADING_INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)").expect("valid regex"));

/// Result of probing a detail page for the withdrawal signature.
///
/// A page that matches neither the live-listing shape nor the gone-page
/// shape is `Inconclusive`: it neither confirms nor denies availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityProbe {
    Available,
    Gone,
    Inconclusive,
}

/// Parser for listing detail pages
pub struct DetailPageParser {
    headline_selectors: Vec<Selector>,
    tech_row_selectors: Vec<Selector>,
    tech_label_selectors: Vec<Selector>,
    tech_value_selectors: Vec<Selector>,
    equipment_selectors: Vec<Selector>,
    financing_selectors: Vec<Selector>,
    seller_name_selectors: Vec<Selector>,
    seller_phone_selectors: Vec<Selector>,
    description_selectors: Vec<Selector>,
    price_label_selectors: Vec<Selector>,
    map_link_selectors: Vec<Selector>,
    location_selectors: Vec<Selector>,
    gone_container_selectors: Vec<Selector>,
    gone_headline_selectors: Vec<Selector>,
    gone_phrases: Vec<String>,
}

impl DetailPageParser {
    pub fn new() -> ParsingResult<Self> {
        Self::with_config(&DetailPageSelectors::default(), &GoneMarkers::default())
    }

    pub fn with_config(selectors: &DetailPageSelectors, gone: &GoneMarkers) -> ParsingResult<Self> {
        Ok(Self {
            headline_selectors: compile(&selectors.headline)?,
            tech_row_selectors: compile(&selectors.tech_rows)?,
            tech_label_selectors: compile(&selectors.tech_label)?,
            tech_value_selectors: compile(&selectors.tech_value)?,
            equipment_selectors: compile(&selectors.equipment_items)?,
            financing_selectors: compile(&selectors.financing_note)?,
            seller_name_selectors: compile(&selectors.seller_name)?,
            seller_phone_selectors: compile(&selectors.seller_phone)?,
            description_selectors: compile(&selectors.description)?,
            price_label_selectors: compile(&selectors.price_quality_label)?,
            map_link_selectors: compile(&selectors.map_link)?,
            location_selectors: compile(&["address".to_string(), ".location-block".to_string()])?,
            gone_container_selectors: compile(&gone.container)?,
            gone_headline_selectors: compile(&gone.headline)?,
            gone_phrases: gone.phrases.iter().map(|p| p.to_lowercase()).collect(),
        })
    }

    /// Probe the page for the "no longer available" signature.
    pub fn detect_availability(&self, html: &Html) -> AvailabilityProbe {
        let gone_container = self
            .gone_container_selectors
            .iter()
            .any(|sel| html.select(sel).next().is_some());

        let gone_phrase = self
            .gone_headline_selectors
            .iter()
            .flat_map(|sel| html.select(sel))
            .any(|el| {
                let text = element_text(&el).to_lowercase();
                self.gone_phrases.iter().any(|phrase| text.contains(phrase))
            });

        if gone_container || gone_phrase {
            return AvailabilityProbe::Gone;
        }

        // A live listing still renders its headline; a page with neither
        // signature (layout change, interstitial, truncated load) proves
        // nothing either way.
        let live = self
            .headline_selectors
            .iter()
            .any(|sel| html.select(sel).next().is_some());

        if live {
            AvailabilityProbe::Available
        } else {
            AvailabilityProbe::Inconclusive
        }
    }

    /// Extract the location fragments used to build the geocode query.
    pub fn extract_location(&self, html: &Html) -> LocationQuery {
        let map_link_query = self
            .map_link_selectors
            .iter()
            .flat_map(|sel| html.select(sel))
            .find_map(|el| {
                let href = el.value().attr("href")?;
                let parsed = Url::parse(href).ok()?;
                parsed
                    .query_pairs()
                    .find(|(key, _)| key == "q" || key == "query")
                    .map(|(_, value)| value.into_owned())
            });

        let location_text = self
            .location_selectors
            .iter()
            .flat_map(|sel| html.select(sel))
            .map(|el| element_text(&el))
            .find(|text| !text.is_empty());

        let (postal_code, place) = match location_text.as_deref() {
            Some(text) => {
                let postal = POSTAL_CODE_RE
                    .captures(text)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string());
                let place = match postal.as_deref() {
                    Some(zip) => {
                        let rest = text.replace(zip, " ");
                        let rest = rest.split_whitespace().collect::<Vec<_>>().join(" ");
                        (!rest.is_empty()).then_some(rest)
                    }
                    None => Some(text.to_string()),
                };
                (postal, place)
            }
            None => (None, None),
        };

        LocationQuery {
            map_link_query,
            postal_code,
            place,
        }
    }

    fn tech_fields(&self, html: &Html) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        for row_selector in &self.tech_row_selectors {
            for row in html.select(row_selector) {
                let label = first_text(&row, &self.tech_label_selectors);
                let value = first_text(&row, &self.tech_value_selectors);
                if let (Some(label), Some(value)) = (label, value) {
                    fields.push((label.to_lowercase(), value));
                }
            }
            if !fields.is_empty() {
                break;
            }
        }
        fields
    }
}

impl ContextualParser for DetailPageParser {
    type Output = ListingDetail;
    type Context = DetailParseContext;

    fn parse_with_context(&self, html: &Html, context: &Self::Context) -> ParsingResult<Self::Output> {
        debug!("Parsing detail page for listing {}", context.listing_id);

        if self
            .headline_selectors
            .iter()
            .all(|sel| html.select(sel).next().is_none())
        {
            return Err(ParsingError::required_field_missing(
                "headline",
                Some("detail page"),
            ));
        }

        let mut detail = ListingDetail::new(context.listing_id.clone());

        for (label, value) in self.tech_fields(html) {
            match label.as_str() {
                l if l.contains("power") || l.contains("leistung") || l.contains("potenza") => {
                    detail.power_kw = POWER_KW_RE
                        .captures(&value)
                        .and_then(|caps| caps.get(1))
                        .and_then(|m| m.as_str().parse().ok())
                        .or_else(|| leading_int(&value));
                }
                l if l.contains("door") || l.contains("türen") || l.contains("porte") => {
                    detail.doors = leading_int(&value);
                }
                l if l.contains("colour") || l.contains("color") || l.contains("farbe") => {
                    detail.color = Some(value);
                }
                l if l.contains("interior") || l.contains("innenausstattung") => {
                    detail.interior = Some(value);
                }
                l if l.contains("owner") || l.contains("halter") || l.contains("proprietari") => {
                    detail.previous_owners = leading_int(&value);
                }
                _ => {}
            }
        }

        detail.equipment = self
            .equipment_selectors
            .iter()
            .flat_map(|sel| html.select(sel))
            .map(|el| element_text(&el))
            .filter(|text| !text.is_empty())
            .collect();

        detail.financing_note = first_doc_text(html, &self.financing_selectors);
        detail.seller_name = first_doc_text(html, &self.seller_name_selectors);
        detail.seller_phone = first_doc_text(html, &self.seller_phone_selectors)
            .map(|phone| phone.trim_start_matches("tel:").trim().to_string());
        detail.description = first_doc_text(html, &self.description_selectors);
        detail.price_quality_label = first_doc_text(html, &self.price_label_selectors);

        if detail.seller_phone.is_none() {
            // The phone block only exists after the reveal interaction; its
            // absence is expected, not an extraction failure.
            debug!("No seller phone on detail page {}", context.url);
        }

        Ok(detail)
    }
}

fn compile(selector_strings: &[String]) -> ParsingResult<Vec<Selector>> {
    let mut selectors = Vec::new();
    for selector_str in selector_strings {
        match Selector::parse(selector_str) {
            Ok(selector) => selectors.push(selector),
            Err(e) => warn!("Failed to compile selector '{}': {}", selector_str, e),
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

fn first_text(element: &ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    for selector in selectors {
        if let Some(text) = element
            .select(selector)
            .next()
            .map(|e| element_text(&e))
            .filter(|t| !t.is_empty())
        {
            return Some(text);
        }
    }
    None
}

fn first_doc_text(html: &Html, selectors: &[Selector]) -> Option<String> {
    for selector in selectors {
        if let Some(text) = html
            .select(selector)
            .next()
            .map(|e| element_text(&e))
            .filter(|t| !t.is_empty())
        {
            return Some(text);
        }
    }
    None
}

fn leading_int(value: &str) -> Option<i32> {
    LEADING_INT_RE
        .captures(value)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL: &str = r#"
        <html><body>
          <h1>Fiat Panda 1.2 Lounge</h1>
          <span class="price-rating-label">Good price</span>
          <div class="technical-data"><dl>
            <div><dt>Power</dt><dd>51 kW (69 hp)</dd></div>
            <div><dt>Doors</dt><dd>5</dd></div>
            <div><dt>Colour</dt><dd>Rosso</dd></div>
            <div><dt>Previous owners</dt><dd>2</dd></div>
          </dl></div>
          <ul class="equipment-block">
            <li>Air conditioning</li>
            <li>Bluetooth</li>
          </ul>
          <div class="financing-offer">From 99 €/month</div>
          <div class="seller-info"><span class="name">Mario R.</span>
            <a href="tel:+39 333 123">+39 333 123</a></div>
          <div class="description-text">Well kept, garage car.</div>
          <div class="location-block">
            <address>20147 Milano</address>
            <a href="https://maps.example/maps?q=Via+Roma+1+Milano">map</a>
          </div>
        </body></html>
    "#;

    fn parser() -> DetailPageParser {
        DetailPageParser::new().unwrap()
    }

    fn context() -> DetailParseContext {
        DetailParseContext::new("A1", "https://marketplace.example/listing/A1", "https://marketplace.example")
    }

    #[test]
    fn extracts_extended_field_set() {
        let html = Html::parse_document(DETAIL);
        let detail = parser().parse_with_context(&html, &context()).unwrap();

        assert_eq!(detail.listing_id, "A1");
        assert_eq!(detail.power_kw, Some(51));
        assert_eq!(detail.doors, Some(5));
        assert_eq!(detail.color.as_deref(), Some("Rosso"));
        assert_eq!(detail.previous_owners, Some(2));
        assert_eq!(detail.equipment, vec!["Air conditioning", "Bluetooth"]);
        assert_eq!(detail.financing_note.as_deref(), Some("From 99 €/month"));
        assert_eq!(detail.seller_name.as_deref(), Some("Mario R."));
        assert_eq!(detail.seller_phone.as_deref(), Some("+39 333 123"));
        assert_eq!(detail.price_quality_label.as_deref(), Some("Good price"));
        assert_eq!(detail.description.as_deref(), Some("Well kept, garage car."));
    }

    #[test]
    fn location_prefers_map_link_query() {
        let html = Html::parse_document(DETAIL);
        let location = parser().extract_location(&html);
        assert_eq!(location.map_link_query.as_deref(), Some("Via Roma 1 Milano"));
        assert_eq!(location.postal_code.as_deref(), Some("20147"));
        assert_eq!(location.place.as_deref(), Some("Milano"));
    }

    #[test]
    fn live_page_probes_available() {
        let html = Html::parse_document(DETAIL);
        assert_eq!(parser().detect_availability(&html), AvailabilityProbe::Available);
    }

    #[test]
    fn gone_page_detected_by_class_prefix() {
        let html = Html::parse_document(
            r#"<html><body><div class="notfound-shell"><p>gone</p></div></body></html>"#,
        );
        assert_eq!(parser().detect_availability(&html), AvailabilityProbe::Gone);
    }

    #[test]
    fn gone_page_detected_by_italic_headline_phrase() {
        let html = Html::parse_document(
            r#"<html><body><h1><i>This listing is no longer available</i></h1></body></html>"#,
        );
        assert_eq!(parser().detect_availability(&html), AvailabilityProbe::Gone);
    }

    #[test]
    fn unrecognized_page_is_inconclusive() {
        let html = Html::parse_document(r#"<html><body><p>503</p></body></html>"#);
        assert_eq!(parser().detect_availability(&html), AvailabilityProbe::Inconclusive);
    }

    #[test]
    fn missing_headline_fails_parse_but_not_probe() {
        let html = Html::parse_document(r#"<html><body><p>shell</p></body></html>"#);
        assert!(parser().parse_with_context(&html, &context()).is_err());
    }
}
