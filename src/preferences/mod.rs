use chrono_tz::Tz;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};

use crate::db::{self, now_ts, SqlitePool, SqlitePooledConn};
use crate::domains::checkin::TimeOfDay;
use crate::domains::schedule::{default_slots, ScheduleDocument, ScheduleSlot};
use crate::error::{CheckinError, Result};

mod schema;
use schema::{checkin_schedules, notification_preferences};

pub const DEFAULT_TIMEZONE: &str = "Europe/Paris";
pub const DEFAULT_FREQUENCY: &str = "3x_daily";

/// Per-user notification settings. Days use 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: String,
    pub is_enabled: bool,
    pub push_enabled: bool,
    pub email_enabled: bool,
    pub whatsapp_enabled: bool,
    pub whatsapp_number: Option<String>,
    pub morning_reminder: bool,
    pub checkin_reminder: bool,
    pub start_hour: i32,
    pub end_hour: i32,
    pub allowed_days: Vec<u32>,
    pub timezone: String,
    pub morning_time: TimeOfDay,
    pub updated_at: i64,
}

impl NotificationPreference {
    pub fn defaults_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            is_enabled: true,
            push_enabled: true,
            email_enabled: true,
            whatsapp_enabled: false,
            whatsapp_number: None,
            morning_reminder: true,
            checkin_reminder: true,
            start_hour: 9,
            end_hour: 18,
            allowed_days: vec![1, 2, 3, 4, 5],
            timezone: DEFAULT_TIMEZONE.to_string(),
            morning_time: TimeOfDay::new(8, 30).unwrap_or(TimeOfDay::on_the_hour(8)),
            updated_at: 0,
        }
    }

    /// True when the poll loop may deliver WhatsApp messages to this user.
    pub fn is_whatsapp_recipient(&self) -> bool {
        self.is_enabled && self.whatsapp_enabled && self.whatsapp_number.is_some()
    }

    pub fn tz(&self) -> Option<Tz> {
        self.timezone.parse().ok()
    }

    pub fn allows_day(&self, weekday_from_sunday: u32) -> bool {
        self.allowed_days.contains(&weekday_from_sunday)
    }

    pub fn allows_hour(&self, hour: u32) -> bool {
        let hour = hour as i32;
        hour >= self.start_hour && hour <= self.end_hour
    }

    pub fn validate(&self) -> Result<()> {
        for hour in [self.start_hour, self.end_hour] {
            if !(0..=23).contains(&hour) {
                return Err(CheckinError::Validation(format!(
                    "hour {hour} is outside 0..=23"
                )));
            }
        }
        if self.start_hour > self.end_hour {
            return Err(CheckinError::Validation(format!(
                "start_hour {} is after end_hour {}",
                self.start_hour, self.end_hour
            )));
        }
        if let Some(day) = self.allowed_days.iter().find(|day| **day > 6) {
            return Err(CheckinError::Validation(format!(
                "allowed day {day} is outside 0..=6"
            )));
        }
        if self.tz().is_none() {
            return Err(CheckinError::Validation(format!(
                "unknown timezone '{}'",
                self.timezone
            )));
        }
        if self.whatsapp_enabled && self.whatsapp_number.is_none() {
            return Err(CheckinError::Validation(
                "whatsapp_enabled requires a whatsapp_number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update accepted by `PATCH /preferences/{user_id}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PreferencePatch {
    pub is_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub email_enabled: Option<bool>,
    pub whatsapp_enabled: Option<bool>,
    pub whatsapp_number: Option<String>,
    pub morning_reminder: Option<bool>,
    pub checkin_reminder: Option<bool>,
    pub start_hour: Option<i32>,
    pub end_hour: Option<i32>,
    pub allowed_days: Option<Vec<u32>>,
    pub timezone: Option<String>,
    pub morning_time: Option<TimeOfDay>,
}

impl PreferencePatch {
    pub fn apply(self, mut pref: NotificationPreference) -> Result<NotificationPreference> {
        if let Some(v) = self.is_enabled {
            pref.is_enabled = v;
        }
        if let Some(v) = self.push_enabled {
            pref.push_enabled = v;
        }
        if let Some(v) = self.email_enabled {
            pref.email_enabled = v;
        }
        if let Some(v) = self.whatsapp_enabled {
            pref.whatsapp_enabled = v;
        }
        if let Some(v) = self.whatsapp_number {
            pref.whatsapp_number = normalize_phone(&v);
        }
        if let Some(v) = self.morning_reminder {
            pref.morning_reminder = v;
        }
        if let Some(v) = self.checkin_reminder {
            pref.checkin_reminder = v;
        }
        if let Some(v) = self.start_hour {
            pref.start_hour = v;
        }
        if let Some(v) = self.end_hour {
            pref.end_hour = v;
        }
        if let Some(mut days) = self.allowed_days {
            days.sort_unstable();
            days.dedup();
            pref.allowed_days = days;
        }
        if let Some(v) = self.timezone {
            pref.timezone = v.trim().to_string();
        }
        if let Some(v) = self.morning_time {
            pref.morning_time = v;
        }
        pref.validate()?;
        Ok(pref)
    }
}

/// Check-in slots of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInSchedule {
    pub user_id: String,
    pub enabled: bool,
    pub frequency: String,
    pub schedules: Vec<ScheduleSlot>,
    pub randomize: bool,
    pub skip_weekends: bool,
}

impl CheckInSchedule {
    pub fn defaults_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            enabled: false,
            frequency: DEFAULT_FREQUENCY.to_string(),
            schedules: default_slots(),
            randomize: true,
            skip_weekends: false,
        }
    }

    pub fn document(&self) -> ScheduleDocument {
        ScheduleDocument::new(self.schedules.clone())
    }

    pub fn validate(&self) -> Result<()> {
        self.document().validate_for(self.enabled)
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = notification_preferences)]
struct PreferenceRow {
    user_id: String,
    is_enabled: bool,
    push_enabled: bool,
    email_enabled: bool,
    whatsapp_enabled: bool,
    whatsapp_number: Option<String>,
    morning_reminder: bool,
    checkin_reminder: bool,
    start_hour: i32,
    end_hour: i32,
    allowed_days: String,
    timezone: String,
    morning_time: String,
    updated_at: i64,
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = checkin_schedules)]
struct ScheduleRow {
    user_id: String,
    enabled: bool,
    frequency: String,
    schedules_json: String,
    randomize: bool,
    skip_weekends: bool,
    created_at: i64,
    updated_at: i64,
}

pub struct PreferenceStore {
    pool: SqlitePool,
}

impl PreferenceStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = db::open_pool(sqlite_path.as_ref()).await?;
        Ok(Self { pool })
    }

    pub async fn find_preferences(&self, user_id: &str) -> Result<Option<NotificationPreference>> {
        let mut conn = self.conn().await?;
        let row: Option<PreferenceRow> = notification_preferences::table
            .filter(notification_preferences::user_id.eq(user_id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        row.map(map_preference_row).transpose()
    }

    /// Stored preferences, or the defaults when the user never saved any.
    pub async fn get_preferences(&self, user_id: &str) -> Result<NotificationPreference> {
        Ok(self
            .find_preferences(user_id)
            .await?
            .unwrap_or_else(|| NotificationPreference::defaults_for(user_id)))
    }

    pub async fn save_preferences(
        &self,
        pref: &NotificationPreference,
    ) -> Result<NotificationPreference> {
        pref.validate()?;
        let mut saved = pref.clone();
        saved.updated_at = now_ts();
        let row = preference_row(&saved);
        let mut conn = self.conn().await?;
        diesel::replace_into(notification_preferences::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok(saved)
    }

    /// Applies a patch and returns `(old, new)`.
    pub async fn update_preferences(
        &self,
        user_id: &str,
        patch: PreferencePatch,
    ) -> Result<(NotificationPreference, NotificationPreference)> {
        let old = self.get_preferences(user_id).await?;
        let new = patch.apply(old.clone())?;
        let new = self.save_preferences(&new).await?;
        Ok((old, new))
    }

    /// Users the poll loop may message over WhatsApp.
    pub async fn list_whatsapp_recipients(&self) -> Result<Vec<NotificationPreference>> {
        let mut conn = self.conn().await?;
        let rows: Vec<PreferenceRow> = notification_preferences::table
            .filter(notification_preferences::is_enabled.eq(true))
            .filter(notification_preferences::whatsapp_enabled.eq(true))
            .filter(notification_preferences::whatsapp_number.is_not_null())
            .order(notification_preferences::user_id.asc())
            .load(&mut conn)
            .await
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        rows.into_iter().map(map_preference_row).collect()
    }

    pub async fn find_by_whatsapp_number(
        &self,
        phone: &str,
    ) -> Result<Option<NotificationPreference>> {
        let Some(digits) = normalize_phone(phone) else {
            return Ok(None);
        };
        let mut conn = self.conn().await?;
        let row: Option<PreferenceRow> = notification_preferences::table
            .filter(notification_preferences::whatsapp_number.eq(digits))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        row.map(map_preference_row).transpose()
    }

    pub async fn find_schedule(&self, user_id: &str) -> Result<Option<CheckInSchedule>> {
        let mut conn = self.conn().await?;
        let row: Option<ScheduleRow> = checkin_schedules::table
            .filter(checkin_schedules::user_id.eq(user_id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        row.map(map_schedule_row).transpose()
    }

    /// Reads the schedule, inserting the defaults on first access.
    pub async fn get_or_create_schedule(&self, user_id: &str) -> Result<CheckInSchedule> {
        if let Some(schedule) = self.find_schedule(user_id).await? {
            return Ok(schedule);
        }
        let defaults = CheckInSchedule::defaults_for(user_id);
        let row = schedule_row(&defaults, now_ts())?;
        let mut conn = self.conn().await?;
        diesel::insert_or_ignore_into(checkin_schedules::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        drop(conn);
        self.find_schedule(user_id)
            .await?
            .ok_or_else(|| CheckinError::NotFound(format!("schedule for {user_id}")))
    }

    pub async fn save_schedule(&self, schedule: &CheckInSchedule) -> Result<CheckInSchedule> {
        schedule.validate()?;
        let now = now_ts();
        let created_at = self
            .find_schedule_created_at(&schedule.user_id)
            .await?
            .unwrap_or(now);
        let mut row = schedule_row(schedule, now)?;
        row.created_at = created_at;
        let mut conn = self.conn().await?;
        diesel::replace_into(checkin_schedules::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok(schedule.clone())
    }

    async fn find_schedule_created_at(&self, user_id: &str) -> Result<Option<i64>> {
        let mut conn = self.conn().await?;
        checkin_schedules::table
            .filter(checkin_schedules::user_id.eq(user_id))
            .select(checkin_schedules::created_at)
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| CheckinError::Runtime(e.to_string()))
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        db::conn(&self.pool).await
    }
}

/// Digits only, as the messaging provider reports senders.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

fn preference_row(pref: &NotificationPreference) -> PreferenceRow {
    PreferenceRow {
        user_id: pref.user_id.clone(),
        is_enabled: pref.is_enabled,
        push_enabled: pref.push_enabled,
        email_enabled: pref.email_enabled,
        whatsapp_enabled: pref.whatsapp_enabled,
        whatsapp_number: pref.whatsapp_number.clone(),
        morning_reminder: pref.morning_reminder,
        checkin_reminder: pref.checkin_reminder,
        start_hour: pref.start_hour,
        end_hour: pref.end_hour,
        allowed_days: pref
            .allowed_days
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(","),
        timezone: pref.timezone.clone(),
        morning_time: pref.morning_time.to_string(),
        updated_at: pref.updated_at,
    }
}

fn map_preference_row(row: PreferenceRow) -> Result<NotificationPreference> {
    let allowed_days = row
        .allowed_days
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map_err(|e| CheckinError::Serialization(format!("allowed_days: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(NotificationPreference {
        user_id: row.user_id,
        is_enabled: row.is_enabled,
        push_enabled: row.push_enabled,
        email_enabled: row.email_enabled,
        whatsapp_enabled: row.whatsapp_enabled,
        whatsapp_number: row.whatsapp_number,
        morning_reminder: row.morning_reminder,
        checkin_reminder: row.checkin_reminder,
        start_hour: row.start_hour,
        end_hour: row.end_hour,
        allowed_days,
        timezone: row.timezone,
        morning_time: row.morning_time.parse()?,
        updated_at: row.updated_at,
    })
}

fn schedule_row(schedule: &CheckInSchedule, now: i64) -> Result<ScheduleRow> {
    Ok(ScheduleRow {
        user_id: schedule.user_id.clone(),
        enabled: schedule.enabled,
        frequency: schedule.frequency.clone(),
        schedules_json: schedule.document().to_json()?,
        randomize: schedule.randomize,
        skip_weekends: schedule.skip_weekends,
        created_at: now,
        updated_at: now,
    })
}

fn map_schedule_row(row: ScheduleRow) -> Result<CheckInSchedule> {
    let doc = ScheduleDocument::parse(&row.schedules_json)?;
    Ok(CheckInSchedule {
        user_id: row.user_id,
        enabled: row.enabled,
        frequency: row.frequency,
        schedules: doc.slots,
        randomize: row.randomize,
        skip_weekends: row.skip_weekends,
    })
}
