//! The poll-loop jobs. Each tick reads the preference store fresh, so a
//! change made anywhere is picked up on the next minute.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::history::DeliveryStatus;
use crate::interfaces::scheduler::ScheduledJob;
use crate::preferences::NotificationPreference;
use crate::services::checkin::CheckInService;

/// Summary of one pass, mostly for tests and debug logs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub users: usize,
    pub sent: usize,
    pub failed: usize,
    pub errors: usize,
}

pub struct CheckInJob {
    service: Arc<CheckInService>,
    interval: Duration,
}

impl CheckInJob {
    pub fn new(service: Arc<CheckInService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let users = self
            .service
            .stores()
            .preferences
            .list_whatsapp_recipients()
            .await?;
        let mut report = TickReport {
            users: users.len(),
            ..Default::default()
        };
        for pref in users {
            if let Err(err) = self.process_user(&pref, now, &mut report).await {
                report.errors += 1;
                warn!(user_id = %pref.user_id, error = %err, "check-in tick failed for user");
            }
        }
        debug!(?report, "check-in tick");
        Ok(report)
    }

    async fn process_user(
        &self,
        pref: &NotificationPreference,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        if !pref.checkin_reminder {
            return Ok(());
        }
        let schedule = self
            .service
            .stores()
            .preferences
            .get_or_create_schedule(&pref.user_id)
            .await?;
        if !schedule.enabled {
            return Ok(());
        }
        let local = self.service.local_minute(pref, now)?;
        if schedule.skip_weekends && local.is_weekend() {
            return Ok(());
        }
        if !pref.allows_day(local.weekday) || !pref.allows_hour(local.time.hour()) {
            return Ok(());
        }
        let document = schedule.document();
        for slot in document.slots_at(local.time) {
            match self
                .service
                .ask(pref, &slot.types, schedule.randomize, &local, "scheduled")
                .await?
            {
                Some(DeliveryStatus::Failed) => report.failed += 1,
                Some(_) => report.sent += 1,
                None => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduledJob for CheckInJob {
    fn name(&self) -> &str {
        "checkins"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<()> {
        self.tick_at(self.service.now()).await.map(|_| ())
    }
}

pub struct MorningReminderJob {
    service: Arc<CheckInService>,
    interval: Duration,
}

impl MorningReminderJob {
    pub fn new(service: Arc<CheckInService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let users = self
            .service
            .stores()
            .preferences
            .list_whatsapp_recipients()
            .await?;
        let mut report = TickReport {
            users: users.len(),
            ..Default::default()
        };
        for pref in users.iter().filter(|pref| pref.morning_reminder) {
            match self.process_user(pref, now).await {
                Ok(Some(DeliveryStatus::Failed)) => report.failed += 1,
                Ok(Some(_)) => report.sent += 1,
                Ok(None) => {}
                Err(err) => {
                    report.errors += 1;
                    warn!(user_id = %pref.user_id, error = %err, "morning reminder failed for user");
                }
            }
        }
        debug!(?report, "morning tick");
        Ok(report)
    }

    async fn process_user(
        &self,
        pref: &NotificationPreference,
        now: DateTime<Utc>,
    ) -> Result<Option<DeliveryStatus>> {
        let local = self.service.local_minute(pref, now)?;
        if local.time != pref.morning_time {
            return Ok(None);
        }
        self.service.send_morning_reminder(pref, &local).await
    }
}

#[async_trait]
impl ScheduledJob for MorningReminderJob {
    fn name(&self) -> &str {
        "morning_reminder"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<()> {
        self.tick_at(self.service.now()).await.map(|_| ())
    }
}

const SECONDS_PER_DAY: i64 = 86_400;

/// Drops notification history older than the retention window.
pub struct HistoryCleanupJob {
    service: Arc<CheckInService>,
    retention_days: u32,
    interval: Duration,
}

impl HistoryCleanupJob {
    pub fn new(service: Arc<CheckInService>, retention_days: u32, interval: Duration) -> Self {
        Self {
            service,
            retention_days: retention_days.max(1),
            interval,
        }
    }

    /// Returns the number of rows removed.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now.timestamp() - i64::from(self.retention_days) * SECONDS_PER_DAY;
        let removed = self.service.stores().history.prune_before(cutoff).await?;
        if removed > 0 {
            info!(removed, retention_days = self.retention_days, "pruned notification history");
        }
        Ok(removed)
    }
}

#[async_trait]
impl ScheduledJob for HistoryCleanupJob {
    fn name(&self) -> &str {
        "history_cleanup"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<()> {
        self.tick_at(self.service.now()).await.map(|_| ())
    }
}
