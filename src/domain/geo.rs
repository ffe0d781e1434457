//! Geographic value objects and great-circle distance.
//!
//! The geocoder resolves free-text locations into `GeoPoint`s; distance to
//! the configured reference point is computed with the haversine formula.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Resolved coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to `other` in kilometers
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);

        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }
}

/// How precisely a geocode result matched the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoQuality {
    Address,
    PostalCode,
    City,
    Unknown,
}

impl GeoQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::PostalCode => "zip",
            Self::City => "city",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "address" => Self::Address,
            "zip" => Self::PostalCode,
            "city" => Self::City,
            _ => Self::Unknown,
        }
    }
}

/// Location fragments extracted from a listing, turned into one geocode query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationQuery {
    /// Query parameter lifted from an embedded map link, if the page had one
    pub map_link_query: Option<String>,
    pub postal_code: Option<String>,
    pub place: Option<String>,
}

impl LocationQuery {
    /// Deterministic query construction: map-link query wins, then postal
    /// code + place, then place alone, then postal code alone. Whitespace is
    /// collapsed so cache keys are stable across cosmetic differences.
    pub fn normalized_query(&self) -> Option<String> {
        let raw = if let Some(q) = self.map_link_query.as_deref().filter(|q| !q.trim().is_empty()) {
            q.to_string()
        } else {
            match (
                self.postal_code.as_deref().filter(|z| !z.trim().is_empty()),
                self.place.as_deref().filter(|p| !p.trim().is_empty()),
            ) {
                (Some(zip), Some(place)) => format!("{} {}", zip, place),
                (None, Some(place)) => place.to_string(),
                (Some(zip), None) => zip.to_string(),
                (None, None) => return None,
            }
        };

        let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            None
        } else {
            Some(normalized)
        }
    }
}

/// Latest distance snapshot for one listing. Overwritten on recomputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingDistance {
    pub listing_id: String,
    pub destination_query: String,
    pub destination: GeoPoint,
    pub distance_km: f64,
    pub quality: GeoQuality,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_milan_to_rome() {
        let milan = GeoPoint::new(45.4642, 9.1900);
        let rome = GeoPoint::new(41.9028, 12.4964);
        let d = milan.distance_km(&rome);
        // Published great-circle distance is ~477 km
        assert!((d - 477.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = GeoPoint::new(48.1, 11.5);
        assert!(p.distance_km(&p) < 1e-9);
    }

    #[test]
    fn query_priority_prefers_map_link() {
        let q = LocationQuery {
            map_link_query: Some("Via Roma 1, Milano".to_string()),
            postal_code: Some("20147".to_string()),
            place: Some("Milano".to_string()),
        };
        assert_eq!(q.normalized_query().as_deref(), Some("Via Roma 1, Milano"));
    }

    #[test]
    fn query_falls_back_through_zip_place_combinations() {
        let q = LocationQuery {
            map_link_query: None,
            postal_code: Some("20147".to_string()),
            place: Some("Milano".to_string()),
        };
        assert_eq!(q.normalized_query().as_deref(), Some("20147 Milano"));

        let q = LocationQuery {
            map_link_query: None,
            postal_code: None,
            place: Some("  Milano ".to_string()),
        };
        assert_eq!(q.normalized_query().as_deref(), Some("Milano"));

        let q = LocationQuery {
            map_link_query: None,
            postal_code: Some("20147".to_string()),
            place: None,
        };
        assert_eq!(q.normalized_query().as_deref(), Some("20147"));

        assert_eq!(LocationQuery::default().normalized_query(), None);
    }

    #[test]
    fn normalization_collapses_whitespace() {
        let q = LocationQuery {
            map_link_query: None,
            postal_code: Some(" 20147 ".to_string()),
            place: Some("Milano   Lorenteggio".to_string()),
        };
        assert_eq!(q.normalized_query().as_deref(), Some("20147 Milano Lorenteggio"));
    }
}
