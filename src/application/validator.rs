//! Validation stage: applies the acceptance rules to extracted records and
//! collects itemized rejection diagnostics.

use tracing::debug;

use crate::domain::listing::ListingSummary;
use crate::domain::rules::{AcceptanceRules, RejectReason, Verdict};

/// One rejected record with its reasons, kept for diagnostics
#[derive(Debug, Clone)]
pub struct RejectedRecord {
    pub listing_id: String,
    pub reasons: Vec<RejectReason>,
}

/// Outcome of validating one batch
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedRecord>,
}

impl ValidationReport {
    pub fn is_accepted(&self, listing_id: &str) -> bool {
        self.accepted.iter().any(|id| id == listing_id)
    }
}

/// Applies the configured acceptance rules. Never mutates the store.
#[derive(Clone)]
pub struct Validator {
    rules: AcceptanceRules,
}

impl Validator {
    pub fn new(rules: AcceptanceRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &AcceptanceRules {
        &self.rules
    }

    /// Evaluate a single record
    pub fn validate(&self, record: &ListingSummary) -> Verdict {
        self.rules.evaluate(record)
    }

    /// Evaluate a batch, logging every rejection with its reasons
    pub fn validate_batch(&self, records: &[ListingSummary]) -> ValidationReport {
        let mut report = ValidationReport::default();

        for record in records {
            match self.rules.evaluate(record) {
                Verdict::Accepted => report.accepted.push(record.listing_id.clone()),
                Verdict::Rejected(reasons) => {
                    let itemized: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
                    debug!(
                        "Rejected listing {}: {}",
                        record.listing_id,
                        itemized.join("; ")
                    );
                    report.rejected.push(RejectedRecord {
                        listing_id: record.listing_id.clone(),
                        reasons,
                    });
                }
            }
        }

        report
    }
}
