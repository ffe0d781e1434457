//! Listing entities shared across the crawl, persistence and notification stages.
//!
//! `ListingSummary` is the shape produced by the search-results extractor,
//! `ListingDetail` the extended shape produced by the detail-page parser.
//! Both carry a content fingerprint over their change-relevant fields so the
//! repository can classify observations cheaply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rules::SellerType;

/// Summary record extracted from one tile on a search-results page.
///
/// All fields except the identifier are optional: a tile with a missing or
/// unparsable field is stored with `None` rather than dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSummary {
    /// Stable external identifier, primary key in the store
    pub listing_id: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub seller_type: Option<SellerType>,
    pub fuel: Option<String>,
    pub gearbox: Option<String>,
    pub price_eur: Option<i64>,
    pub mileage_km: Option<i64>,
    pub first_registration_year: Option<i32>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub location_text: Option<String>,
    pub image_url: Option<String>,
    pub detail_url: Option<String>,
    /// Position on the results page. Volatile between crawls, excluded from
    /// the fingerprint.
    pub page_no: Option<i32>,
    pub index_in_page: Option<i32>,
}

impl ListingSummary {
    /// Minimal record carrying only the identifier
    pub fn new(listing_id: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            make: None,
            model: None,
            seller_type: None,
            fuel: None,
            gearbox: None,
            price_eur: None,
            mileage_km: None,
            first_registration_year: None,
            title: None,
            subtitle: None,
            location_text: None,
            image_url: None,
            detail_url: None,
            page_no: None,
            index_in_page: None,
        }
    }

    /// Content fingerprint over the change-relevant field set.
    ///
    /// Page position (`page_no`, `index_in_page`) is deliberately left out:
    /// a listing that merely moves on the results page is not a content
    /// change. The encoding tags every field so `None` and `""` never
    /// collide.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hash_opt_str(&mut hasher, "make", self.make.as_deref());
        hash_opt_str(&mut hasher, "model", self.model.as_deref());
        hash_opt_str(
            &mut hasher,
            "seller_type",
            self.seller_type.map(SellerType::as_str),
        );
        hash_opt_str(&mut hasher, "fuel", self.fuel.as_deref());
        hash_opt_str(&mut hasher, "gearbox", self.gearbox.as_deref());
        hash_opt_i64(&mut hasher, "price_eur", self.price_eur);
        hash_opt_i64(&mut hasher, "mileage_km", self.mileage_km);
        hash_opt_i64(
            &mut hasher,
            "first_registration_year",
            self.first_registration_year.map(i64::from),
        );
        hash_opt_str(&mut hasher, "title", self.title.as_deref());
        hash_opt_str(&mut hasher, "subtitle", self.subtitle.as_deref());
        hash_opt_str(&mut hasher, "location_text", self.location_text.as_deref());
        hash_opt_str(&mut hasher, "image_url", self.image_url.as_deref());
        hash_opt_str(&mut hasher, "detail_url", self.detail_url.as_deref());
        hasher.finalize().to_hex().to_string()
    }
}

/// Extended record extracted from a listing's detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDetail {
    pub listing_id: String,
    pub power_kw: Option<i32>,
    pub doors: Option<i32>,
    pub color: Option<String>,
    pub interior: Option<String>,
    pub previous_owners: Option<i32>,
    pub financing_note: Option<String>,
    /// Equipment list as shown on the page, order preserved
    pub equipment: Vec<String>,
    pub seller_name: Option<String>,
    pub seller_phone: Option<String>,
    pub description: Option<String>,
    /// Platform-provided price-quality label ("good price" etc.), used as a
    /// score bonus/malus
    pub price_quality_label: Option<String>,
    /// Normalized desirability score in [0, 1], computed after parsing
    pub score: Option<f64>,
}

impl ListingDetail {
    pub fn new(listing_id: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            power_kw: None,
            doors: None,
            color: None,
            interior: None,
            previous_owners: None,
            financing_note: None,
            equipment: Vec::new(),
            seller_name: None,
            seller_phone: None,
            description: None,
            price_quality_label: None,
            score: None,
        }
    }

    /// Content fingerprint over the extracted detail fields.
    ///
    /// The derived score is excluded: it is a function of other fields and
    /// must not trigger spurious change classifications on its own.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hash_opt_i64(&mut hasher, "power_kw", self.power_kw.map(i64::from));
        hash_opt_i64(&mut hasher, "doors", self.doors.map(i64::from));
        hash_opt_str(&mut hasher, "color", self.color.as_deref());
        hash_opt_str(&mut hasher, "interior", self.interior.as_deref());
        hash_opt_i64(
            &mut hasher,
            "previous_owners",
            self.previous_owners.map(i64::from),
        );
        hash_opt_str(&mut hasher, "financing_note", self.financing_note.as_deref());
        hasher.update(b"equipment:");
        for item in &self.equipment {
            hasher.update(item.as_bytes());
            hasher.update(b"\x1f");
        }
        hash_opt_str(&mut hasher, "seller_name", self.seller_name.as_deref());
        hash_opt_str(&mut hasher, "seller_phone", self.seller_phone.as_deref());
        hash_opt_str(&mut hasher, "description", self.description.as_deref());
        hash_opt_str(
            &mut hasher,
            "price_quality_label",
            self.price_quality_label.as_deref(),
        );
        hasher.finalize().to_hex().to_string()
    }

    /// Equipment list serialized for the store (single TEXT column)
    pub fn equipment_csv(&self) -> Option<String> {
        if self.equipment.is_empty() {
            None
        } else {
            Some(self.equipment.join(", "))
        }
    }
}

/// A listing row as persisted, bookkeeping fields included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredListing {
    pub summary: ListingSummary,
    pub fingerprint: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub change_count: i64,
    pub is_active: bool,
    pub is_available: bool,
    pub unavailable_at: Option<DateTime<Utc>>,
    pub last_availability_check_at: Option<DateTime<Utc>>,
}

fn hash_opt_str(hasher: &mut blake3::Hasher, tag: &str, value: Option<&str>) {
    hasher.update(tag.as_bytes());
    hasher.update(b":");
    match value {
        Some(v) => {
            hasher.update(b"1");
            hasher.update(v.as_bytes());
        }
        None => {
            hasher.update(b"0");
        }
    }
    hasher.update(b"\x1e");
}

fn hash_opt_i64(hasher: &mut blake3::Hasher, tag: &str, value: Option<i64>) {
    hasher.update(tag.as_bytes());
    hasher.update(b":");
    match value {
        Some(v) => {
            hasher.update(b"1");
            hasher.update(&v.to_le_bytes());
        }
        None => {
            hasher.update(b"0");
        }
    }
    hasher.update(b"\x1e");
}
