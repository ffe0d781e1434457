//! Acceptance rules applied to freshly extracted summary records.
//!
//! The rules are pure predicates over the numeric and categorical fields of a
//! `ListingSummary`. Evaluation collects every violated rule instead of
//! stopping at the first, so rejections can be logged with itemized reasons.

use serde::{Deserialize, Serialize};

use super::listing::ListingSummary;

/// Seller classification as shown on the listing tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SellerType {
    Private,
    Dealer,
}

impl SellerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Dealer => "dealer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "private" | "privat" | "privato" => Some(Self::Private),
            "dealer" | "händler" | "haendler" | "rivenditore" => Some(Self::Dealer),
            _ => None,
        }
    }
}

/// Why a record was rejected by the rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    TooOld { year: i32, min_year: i32 },
    TooExpensive { price_eur: i64, max_price_eur: i64 },
    MileageTooHigh { mileage_km: i64, max_mileage_km: i64 },
    WrongSellerType { seller_type: SellerType, required: SellerType },
    FuelNotAllowed { fuel: String },
    MissingField { field: &'static str },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooOld { year, min_year } => {
                write!(f, "first registration {} before minimum {}", year, min_year)
            }
            Self::TooExpensive { price_eur, max_price_eur } => {
                write!(f, "price {} EUR above maximum {}", price_eur, max_price_eur)
            }
            Self::MileageTooHigh { mileage_km, max_mileage_km } => {
                write!(f, "mileage {} km above maximum {}", mileage_km, max_mileage_km)
            }
            Self::WrongSellerType { seller_type, required } => {
                write!(f, "seller type {} but {} required", seller_type.as_str(), required.as_str())
            }
            Self::FuelNotAllowed { fuel } => write!(f, "fuel '{}' not in allowed set", fuel),
            Self::MissingField { field } => write!(f, "required field '{}' missing", field),
        }
    }
}

/// Outcome of evaluating one record against the rules
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Verdict {
    Accepted,
    Rejected(Vec<RejectReason>),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Domain acceptance thresholds, externally configured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceRules {
    /// Minimum first-registration year (inclusive)
    pub min_first_registration_year: Option<i32>,
    /// Maximum asking price in EUR (inclusive)
    pub max_price_eur: Option<i64>,
    /// Maximum mileage in km (inclusive)
    pub max_mileage_km: Option<i64>,
    /// Required seller type, `None` accepts both
    pub required_seller_type: Option<SellerType>,
    /// Allowed fuels (lowercase); empty set accepts any fuel
    pub allowed_fuels: Vec<String>,
    /// In strict mode a missing field that a rule needs is itself a rejection
    pub strict: bool,
}

impl Default for AcceptanceRules {
    fn default() -> Self {
        Self {
            min_first_registration_year: None,
            max_price_eur: None,
            max_mileage_km: None,
            required_seller_type: None,
            allowed_fuels: Vec::new(),
            strict: false,
        }
    }
}

impl AcceptanceRules {
    /// Evaluate one summary record. Pure; collects every violated rule.
    pub fn evaluate(&self, record: &ListingSummary) -> Verdict {
        let mut reasons = Vec::new();

        if let Some(min_year) = self.min_first_registration_year {
            match record.first_registration_year {
                Some(year) if year < min_year => reasons.push(RejectReason::TooOld { year, min_year }),
                Some(_) => {}
                None if self.strict => {
                    reasons.push(RejectReason::MissingField { field: "first_registration_year" });
                }
                None => {}
            }
        }

        if let Some(max_price_eur) = self.max_price_eur {
            match record.price_eur {
                Some(price_eur) if price_eur > max_price_eur => {
                    reasons.push(RejectReason::TooExpensive { price_eur, max_price_eur });
                }
                Some(_) => {}
                None if self.strict => {
                    reasons.push(RejectReason::MissingField { field: "price_eur" });
                }
                None => {}
            }
        }

        if let Some(max_mileage_km) = self.max_mileage_km {
            match record.mileage_km {
                Some(mileage_km) if mileage_km > max_mileage_km => {
                    reasons.push(RejectReason::MileageTooHigh { mileage_km, max_mileage_km });
                }
                Some(_) => {}
                None if self.strict => {
                    reasons.push(RejectReason::MissingField { field: "mileage_km" });
                }
                None => {}
            }
        }

        if let Some(required) = self.required_seller_type {
            match record.seller_type {
                Some(seller_type) if seller_type != required => {
                    reasons.push(RejectReason::WrongSellerType { seller_type, required });
                }
                Some(_) => {}
                None if self.strict => {
                    reasons.push(RejectReason::MissingField { field: "seller_type" });
                }
                None => {}
            }
        }

        if !self.allowed_fuels.is_empty() {
            match record.fuel.as_deref() {
                Some(fuel) => {
                    let fuel = fuel.to_lowercase();
                    if !self.allowed_fuels.iter().any(|allowed| allowed.to_lowercase() == fuel) {
                        reasons.push(RejectReason::FuelNotAllowed { fuel });
                    }
                }
                None if self.strict => {
                    reasons.push(RejectReason::MissingField { field: "fuel" });
                }
                None => {}
            }
        }

        if reasons.is_empty() {
            Verdict::Accepted
        } else {
            Verdict::Rejected(reasons)
        }
    }
}
