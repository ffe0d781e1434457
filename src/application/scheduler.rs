//! Scheduler / run-loop.
//!
//! One long-lived loop per crawler instance. Daytime ticks run one full
//! pipeline cycle; inside the night window crawling pauses and the daily
//! digest is emitted exactly once; re-verification runs as its own tick on
//! a separate cadence. At most one pass executes per tick, and the shared
//! cancellation signal is checked at every sleep increment.

#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::availability::AvailabilityChecker;
use super::digest::DigestBuilder;
use super::notifications::NotificationService;
use super::pipeline::CrawlPipeline;
use crate::infrastructure::config::ScheduleConfig;

/// Run-loop states. There is no terminal state short of external shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Crawling,
    NightPaused,
    Verifying,
}

pub struct Scheduler {
    pipeline: CrawlPipeline,
    availability: AvailabilityChecker,
    digest: DigestBuilder,
    notifications: Arc<NotificationService>,
    schedule: ScheduleConfig,
    cancel: CancellationToken,
    state: SchedulerState,
    last_digest_date: Option<NaiveDate>,
    next_verification_at: DateTime<Utc>,
}

impl Scheduler {
    pub fn new(
        pipeline: CrawlPipeline,
        availability: AvailabilityChecker,
        digest: DigestBuilder,
        notifications: Arc<NotificationService>,
        schedule: ScheduleConfig,
        cancel: CancellationToken,
    ) -> Self {
        let next_verification_at =
            Utc::now() + ChronoDuration::minutes(schedule.verify_interval_minutes as i64);
        Self {
            pipeline,
            availability,
            digest,
            notifications,
            schedule,
            cancel,
            state: SchedulerState::Idle,
            last_digest_date: None,
            next_verification_at,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Drive the loop until the cancellation signal fires.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Scheduler started (crawl every {} min, night {}–{} h, verify every {} min)",
            self.schedule.crawl_interval_minutes,
            self.schedule.night_start_hour,
            self.schedule.night_end_hour,
            self.schedule.verify_interval_minutes
        );

        while !self.cancel.is_cancelled() {
            let local_now = Local::now();

            if self.schedule.is_night_hour(local_now.hour()) {
                self.night_tick(local_now.date_naive()).await;
                continue;
            }

            if Utc::now() >= self.next_verification_at {
                self.verification_tick().await;
                continue;
            }

            self.crawl_tick().await;
        }

        self.state = SchedulerState::Idle;
        info!("Scheduler stopped");
        Ok(())
    }

    /// Night window: no crawling; the digest goes out once on the first
    /// tick of the window, then the loop just sleeps in short increments.
    async fn night_tick(&mut self, today: NaiveDate) {
        self.state = SchedulerState::NightPaused;

        if self.last_digest_date != Some(today) {
            info!("Night window entered, emitting daily digest");
            match self.digest.render(Utc::now()).await {
                Ok(message) => {
                    self.notifications.send_digest(&message).await;
                }
                Err(e) => {
                    error!("Daily digest failed: {:#}", e);
                    self.notifications
                        .notify_operator(&format!("Daily digest failed: {e:#}"))
                        .await;
                }
            }
            self.last_digest_date = Some(today);
        }

        self.sleep_checked(Duration::from_secs(self.schedule.sleep_increment_seconds))
            .await;
    }

    async fn verification_tick(&mut self) {
        self.state = SchedulerState::Verifying;

        if let Err(e) = self.availability.run_pass(&self.cancel).await {
            error!("Re-verification pass failed: {:#}", e);
            self.notifications
                .notify_operator(&format!("Re-verification pass failed: {e:#}"))
                .await;
        }

        self.next_verification_at =
            Utc::now() + ChronoDuration::minutes(self.schedule.verify_interval_minutes as i64);
        self.state = SchedulerState::Idle;
    }

    async fn crawl_tick(&mut self) {
        self.state = SchedulerState::Crawling;

        match self.pipeline.run_cycle(&self.cancel).await {
            Ok(report) => {
                if !report.errors.is_empty() {
                    info!(
                        "Cycle {} completed with {} recovered errors",
                        report.cycle_id,
                        report.errors.len()
                    );
                }
            }
            Err(e) => {
                // Fatal for the cycle, not for the process: alert and keep
                // the loop alive for the next scheduled cycle.
                error!("Crawl cycle failed: {:#}", e);
                self.notifications
                    .notify_operator(&format!("Crawl cycle failed: {e:#}"))
                    .await;
            }
        }

        self.state = SchedulerState::Idle;
        self.sleep_interval(Duration::from_secs(self.schedule.crawl_interval_minutes * 60))
            .await;
    }

    /// Sleep the full interval in increments, checking cancellation at each
    async fn sleep_interval(&self, total: Duration) {
        let increment = Duration::from_secs(self.schedule.sleep_increment_seconds.max(1));
        let mut remaining = total;
        while !remaining.is_zero() && !self.cancel.is_cancelled() {
            let step = remaining.min(increment);
            self.sleep_checked(step).await;
            remaining = remaining.saturating_sub(step);
        }
    }

    async fn sleep_checked(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_sleep_returns_promptly() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        // A cancelled token must win the select immediately; an hour-long
        // sleep here would hang the test suite if it did not.
        let schedule = ScheduleConfig::default();
        let long = Duration::from_secs(schedule.crawl_interval_minutes * 60);

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(long) => {}
        }
        assert!(cancel.is_cancelled());
    }
}
