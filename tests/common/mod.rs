#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use checkin_bot::config::{Config, SchedulerConfig, WhatsAppConfig};
use checkin_bot::daemon::{build_state, AppState};
use checkin_bot::domains::checkin::{CheckInType, TimeOfDay};
use checkin_bot::domains::schedule::ScheduleSlot;
use checkin_bot::error::{CheckinError, Result};
use checkin_bot::interfaces::clock::Clock;
use checkin_bot::interfaces::messaging::MessageSender;
use checkin_bot::preferences::{CheckInSchedule, NotificationPreference};
use checkin_bot::services::checkin::Stores;

pub const TOKEN: &str = "token";
pub const VERIFY_TOKEN: &str = "hub-secret";

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    fn channel(&self) -> &str {
        "recording"
    }

    async fn send(&self, to: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), text.to_string()));
        Ok(())
    }
}

pub struct FailingSender;

#[async_trait]
impl MessageSender for FailingSender {
    fn channel(&self) -> &str {
        "failing"
    }

    async fn send(&self, _to: &str, _text: &str) -> Result<()> {
        Err(CheckinError::Http("provider unavailable".to_string()))
    }
}

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Monday 2026-01-05 at `hour:minute` UTC.
pub fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, hour, minute, 0).unwrap()
}

/// Saturday 2026-01-10 at `hour:minute` UTC.
pub fn saturday_at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 10, hour, minute, 0).unwrap()
}

pub fn test_config() -> Config {
    Config {
        scheduler: Some(SchedulerConfig {
            poll_seconds: Some(60),
            default_timezone: Some("UTC".to_string()),
            trend_days: Some(7),
            randomize_seed: Some(7),
            history_retention_days: Some(7),
        }),
        whatsapp: Some(WhatsAppConfig {
            verify_token: Some(VERIFY_TOKEN.to_string()),
            ..Default::default()
        }),
        notifier: None,
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub clock: Arc<FixedClock>,
}

impl TestApp {
    pub async fn new(sender: Arc<dyn MessageSender>, now: DateTime<Utc>) -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("checkin.db");
        let clock = Arc::new(FixedClock::new(now));
        let state = build_state(
            db_path.to_str().unwrap(),
            TOKEN,
            &test_config(),
            sender,
            clock.clone(),
        )
        .await
        .unwrap();
        Self { dir, state, clock }
    }

    pub fn db_path(&self) -> String {
        self.dir.path().join("checkin.db").to_string_lossy().to_string()
    }

    pub fn stores(&self) -> &Stores {
        self.state.service.stores()
    }

    /// A WhatsApp user reachable every day at every hour, in UTC.
    pub async fn enroll(&self, user_id: &str, phone: &str) -> NotificationPreference {
        let mut pref = NotificationPreference::defaults_for(user_id);
        pref.whatsapp_enabled = true;
        pref.whatsapp_number = Some(phone.to_string());
        pref.start_hour = 0;
        pref.end_hour = 23;
        pref.allowed_days = (0..=6).collect();
        pref.timezone = "UTC".to_string();
        self.stores()
            .preferences
            .save_preferences(&pref)
            .await
            .unwrap()
    }

    pub async fn enable_schedule(&self, user_id: &str, slots: Vec<ScheduleSlot>) -> CheckInSchedule {
        let mut schedule = CheckInSchedule::defaults_for(user_id);
        schedule.enabled = true;
        schedule.schedules = slots;
        self.stores()
            .preferences
            .save_schedule(&schedule)
            .await
            .unwrap()
    }
}

pub fn slot(hour: u32, minute: u32, types: &[CheckInType]) -> ScheduleSlot {
    ScheduleSlot {
        time: TimeOfDay::new(hour, minute).unwrap(),
        types: types.to_vec(),
    }
}
