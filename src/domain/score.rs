//! Desirability scoring for enriched listings.
//!
//! The score is a weighted combination of price-affordability, age and
//! mileage sub-scores, each mapped linearly to [0, 1] against a configured
//! cap. Sub-scores whose input field is missing are excluded and the
//! remaining weights renormalized. A small bonus or malus keyed to the
//! platform's price-quality label is applied last, and the result clamped
//! back into [0, 1].

use serde::{Deserialize, Serialize};

use super::listing::{ListingDetail, ListingSummary};

/// Caps and weights for the desirability score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Price at (or above) which the price sub-score reaches 0
    pub price_cap_eur: i64,
    /// Age in years at (or above) which the age sub-score reaches 0
    pub age_cap_years: i32,
    /// Mileage at (or above) which the mileage sub-score reaches 0
    pub mileage_cap_km: i64,
    pub price_weight: f64,
    pub age_weight: f64,
    pub mileage_weight: f64,
    /// Additive adjustment per price-quality label (lowercase substring match)
    pub label_adjustments: Vec<LabelAdjustment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelAdjustment {
    pub label_contains: String,
    pub adjustment: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            price_cap_eur: 20_000,
            age_cap_years: 15,
            mileage_cap_km: 200_000,
            price_weight: 0.5,
            age_weight: 0.25,
            mileage_weight: 0.25,
            label_adjustments: vec![
                LabelAdjustment { label_contains: "very good".to_string(), adjustment: 0.05 },
                LabelAdjustment { label_contains: "good".to_string(), adjustment: 0.02 },
                LabelAdjustment { label_contains: "increased".to_string(), adjustment: -0.05 },
                LabelAdjustment { label_contains: "high".to_string(), adjustment: -0.05 },
            ],
        }
    }
}

impl ScoringConfig {
    /// Compute the normalized score for one listing.
    ///
    /// Returns `None` when every sub-score input is missing.
    pub fn compute(
        &self,
        summary: &ListingSummary,
        detail: &ListingDetail,
        current_year: i32,
    ) -> Option<f64> {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        if let Some(price) = summary.price_eur {
            weighted_sum += self.price_weight * linear_sub_score(price as f64, self.price_cap_eur as f64);
            weight_total += self.price_weight;
        }

        if let Some(year) = summary.first_registration_year {
            let age = (current_year - year).max(0);
            weighted_sum += self.age_weight * linear_sub_score(age as f64, self.age_cap_years as f64);
            weight_total += self.age_weight;
        }

        if let Some(mileage) = summary.mileage_km {
            weighted_sum +=
                self.mileage_weight * linear_sub_score(mileage as f64, self.mileage_cap_km as f64);
            weight_total += self.mileage_weight;
        }

        if weight_total <= 0.0 {
            return None;
        }

        let mut score = weighted_sum / weight_total;

        if let Some(label) = detail.price_quality_label.as_deref() {
            let label = label.to_lowercase();
            // First matching adjustment wins; the table is ordered most
            // specific first ("very good" before "good").
            if let Some(adj) = self
                .label_adjustments
                .iter()
                .find(|a| label.contains(&a.label_contains.to_lowercase()))
            {
                score += adj.adjustment;
            }
        }

        Some(score.clamp(0.0, 1.0))
    }
}

/// 1.0 at zero, 0.0 at the cap, linear in between
fn linear_sub_score(value: f64, cap: f64) -> f64 {
    if cap <= 0.0 {
        return 0.0;
    }
    (1.0 - value / cap).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(price: Option<i64>, year: Option<i32>, mileage: Option<i64>) -> ListingSummary {
        let mut s = ListingSummary::new("A1");
        s.price_eur = price;
        s.first_registration_year = year;
        s.mileage_km = mileage;
        s
    }

    #[test]
    fn all_sub_scores_present() {
        let cfg = ScoringConfig::default();
        let s = summary(Some(10_000), Some(2021), Some(100_000));
        let score = cfg.compute(&s, &ListingDetail::new("A1"), 2026).unwrap();
        // price 0.5, age (5y/15y) -> 2/3, mileage 0.5; weights 0.5/0.25/0.25
        let expected = 0.5 * 0.5 + (2.0 / 3.0) * 0.25 + 0.5 * 0.25;
        assert!((score - expected).abs() < 1e-9, "got {}", score);
    }

    #[test]
    fn missing_sub_scores_renormalize_weights() {
        let cfg = ScoringConfig::default();
        let s = summary(Some(10_000), None, None);
        let score = cfg.compute(&s, &ListingDetail::new("A1"), 2026).unwrap();
        // Only the price sub-score remains, so it is the score
        assert!((score - 0.5).abs() < 1e-9, "got {}", score);
    }

    #[test]
    fn no_inputs_yields_no_score() {
        let cfg = ScoringConfig::default();
        let s = summary(None, None, None);
        assert_eq!(cfg.compute(&s, &ListingDetail::new("A1"), 2026), None);
    }

    #[test]
    fn label_bonus_applies_and_clamps() {
        let cfg = ScoringConfig::default();
        let s = summary(Some(0), Some(2026), Some(0));
        let mut d = ListingDetail::new("A1");
        d.price_quality_label = Some("Very good price".to_string());
        // Perfect sub-scores already at 1.0; the bonus must not push past it
        let score = cfg.compute(&s, &d, 2026).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn specific_label_takes_precedence_over_substring() {
        let cfg = ScoringConfig::default();
        let s = summary(Some(10_000), None, None);
        let mut d = ListingDetail::new("A1");
        d.price_quality_label = Some("VERY GOOD".to_string());
        let with_very_good = cfg.compute(&s, &d, 2026).unwrap();
        d.price_quality_label = Some("good".to_string());
        let with_good = cfg.compute(&s, &d, 2026).unwrap();
        assert!(with_very_good > with_good);
    }

    #[test]
    fn values_beyond_cap_floor_at_zero() {
        let cfg = ScoringConfig::default();
        let s = summary(Some(50_000), None, None);
        let score = cfg.compute(&s, &ListingDetail::new("A1"), 2026).unwrap();
        assert_eq!(score, 0.0);
    }
}
