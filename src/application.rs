//! Application module - Use-case services
//!
//! The services that drive the pipeline: validation, the crawl cycle,
//! detail enrichment, notification fan-out, the daily digest, availability
//! re-verification and the scheduler that sequences them.

pub mod availability;
pub mod digest;
pub mod enricher;
pub mod notifications;
pub mod pipeline;
pub mod scheduler;
pub mod validator;

pub use availability::{AvailabilityChecker, VerificationReport};
pub use digest::DigestBuilder;
pub use enricher::{DetailEnricher, EnrichedListing};
pub use notifications::NotificationService;
pub use pipeline::CrawlPipeline;
pub use scheduler::{Scheduler, SchedulerState};
pub use validator::{ValidationReport, Validator};
