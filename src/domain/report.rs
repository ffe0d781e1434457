//! Reports returned by the CDC engine and the crawl cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Three-way classification of one upsert batch.
///
/// `inserted ∪ updated ∪ unchanged` partitions the batch exactly; downstream
/// stages only process `inserted`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsertReport {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
}

impl UpsertReport {
    pub fn total(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.unchanged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Merge another report into this one (used when a batch is chunked)
    pub fn merge(&mut self, other: UpsertReport) {
        self.inserted.extend(other.inserted);
        self.updated.extend(other.updated);
        self.unchanged.extend(other.unchanged);
    }
}

/// Summary of one full crawl-validate-persist-enrich-notify cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pages_crawled: u32,
    pub records_seen: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub upsert: UpsertReport,
    pub details_fetched: usize,
    pub detail_failures: usize,
    pub distances_computed: usize,
    pub notifications_sent: usize,
    pub errors: Vec<String>,
}

impl CycleReport {
    pub fn new(cycle_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            started_at,
            completed_at: None,
            pages_crawled: 0,
            records_seen: 0,
            accepted: 0,
            rejected: 0,
            upsert: UpsertReport::default(),
            details_fetched: 0,
            detail_failures: 0,
            distances_computed: 0,
            notifications_sent: 0,
            errors: Vec::new(),
        }
    }
}
