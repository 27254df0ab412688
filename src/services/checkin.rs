use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checkins::{BehaviorCheckIn, CheckInStore, TypeTrend};
use crate::composer::QuestionComposer;
use crate::conversation::{ConversationStore, RepromptReason, Transition};
use crate::domains::checkin::{CheckInType, TimeOfDay, TriggeredBy};
use crate::error::{CheckinError, Result};
use crate::history::{truncate_to_minute, DeliveryStatus, NotificationHistoryStore, NotificationKind};
use crate::interfaces::clock::Clock;
use crate::preferences::{NotificationPreference, PreferenceStore};
use crate::services::messaging::Dispatcher;

const TREND_KEYWORDS: [&str; 7] = [
    "tendance",
    "trend",
    "évolution",
    "evolution",
    "analyse",
    "rapport",
    "pattern",
];
const SECONDS_PER_DAY: i64 = 86_400;

/// The stores every part of the daemon shares. They all sit on the same
/// SQLite file.
#[derive(Clone)]
pub struct Stores {
    pub preferences: Arc<PreferenceStore>,
    pub history: Arc<NotificationHistoryStore>,
    pub conversations: Arc<ConversationStore>,
    pub checkins: Arc<CheckInStore>,
}

impl Stores {
    pub async fn open(db_path: &str) -> Result<Self> {
        Ok(Self {
            preferences: Arc::new(PreferenceStore::new(db_path).await?),
            history: Arc::new(NotificationHistoryStore::new(db_path).await?),
            conversations: Arc::new(ConversationStore::new(db_path).await?),
            checkins: Arc::new(CheckInStore::new(db_path).await?),
        })
    }
}

/// One instant seen from a user's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMinute {
    pub date: NaiveDate,
    pub time: TimeOfDay,
    /// 0 = Sunday.
    pub weekday: u32,
    pub day_ordinal: u32,
    /// UTC unix seconds of the minute.
    pub scheduled_for: i64,
}

impl LocalMinute {
    pub fn at(now: DateTime<Utc>, tz: Tz) -> Result<Self> {
        let local = now.with_timezone(&tz);
        Ok(Self {
            date: local.date_naive(),
            time: TimeOfDay::new(local.hour(), local.minute())?,
            weekday: local.weekday().num_days_from_sunday(),
            day_ordinal: local.num_days_from_ce().max(0) as u32,
            scheduled_for: truncate_to_minute(now.timestamp()),
        })
    }

    /// Ledger key for a check-in asked at this wall-clock minute. A local
    /// time repeated by a DST change maps to the same key.
    pub fn checkin_key(&self) -> String {
        format!("{}T{}", self.date, self.time)
    }

    /// Ledger key for once-a-day messages.
    pub fn day_key(&self) -> String {
        self.date.to_string()
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self.weekday, 0 | 6)
    }
}

/// Result of one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InboundOutcome {
    /// No user owns the sender's number.
    Ignored,
    /// The user was not waiting on a check-in.
    NotHandled,
    Recorded {
        #[serde(rename = "type")]
        check_in_type: CheckInType,
        value: i32,
    },
    Reprompted {
        #[serde(rename = "type")]
        check_in_type: CheckInType,
        reason: RepromptReason,
    },
    Trends,
}

pub struct CheckInService {
    stores: Stores,
    composer: Arc<QuestionComposer>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    default_tz: Tz,
    trend_days: u32,
}

impl CheckInService {
    pub fn new(
        stores: Stores,
        composer: Arc<QuestionComposer>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        default_tz: Tz,
        trend_days: u32,
    ) -> Self {
        Self {
            stores,
            composer,
            dispatcher,
            clock,
            default_tz,
            trend_days: trend_days.max(1),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn trend_days(&self) -> u32 {
        self.trend_days
    }

    /// The user's timezone, or the daemon default when it does not parse.
    pub fn timezone_for(&self, pref: &NotificationPreference) -> Tz {
        pref.tz().unwrap_or(self.default_tz)
    }

    pub fn local_minute(&self, pref: &NotificationPreference, now: DateTime<Utc>) -> Result<LocalMinute> {
        LocalMinute::at(now, self.timezone_for(pref))
    }

    /// Claims the check-in row for this local minute and asks one question
    /// from `types`. `None` when the minute was already claimed.
    pub async fn ask(
        &self,
        pref: &NotificationPreference,
        types: &[CheckInType],
        randomize: bool,
        local: &LocalMinute,
        source: &str,
    ) -> Result<Option<DeliveryStatus>> {
        let Some(to) = pref.whatsapp_number.as_deref() else {
            return Ok(None);
        };
        let Some(check_in_type) = self.composer.pick_type(types, randomize, local.day_ordinal)
        else {
            return Ok(None);
        };
        let question = self.composer.question(check_in_type);

        let slot_key = local.checkin_key();
        let Some(entry) = self
            .stores
            .history
            .claim(
                &pref.user_id,
                NotificationKind::CheckIn,
                &slot_key,
                local.scheduled_for,
                Some(&question),
                self.clock.now().timestamp(),
            )
            .await?
        else {
            debug!(user_id = %pref.user_id, slot_key = %slot_key, "check-in already claimed");
            return Ok(None);
        };

        if let Err(err) = self
            .stores
            .conversations
            .set_awaiting(&pref.user_id, check_in_type, source)
            .await
        {
            self.stores.history.mark_failed(entry.id, &err.to_string()).await?;
            return Err(err);
        }

        let status = self.dispatcher.deliver(&entry, to, &question).await?;
        if status == DeliveryStatus::Failed {
            self.stores.conversations.clear(&pref.user_id).await?;
        }
        Ok(Some(status))
    }

    pub async fn send_morning_reminder(
        &self,
        pref: &NotificationPreference,
        local: &LocalMinute,
    ) -> Result<Option<DeliveryStatus>> {
        let Some(to) = pref.whatsapp_number.as_deref() else {
            return Ok(None);
        };
        let trends = self.trends(&pref.user_id).await?;
        let message = self.composer.morning_message(&trends, self.trend_days);
        let Some(entry) = self
            .stores
            .history
            .claim(
                &pref.user_id,
                NotificationKind::MorningReminder,
                &local.day_key(),
                local.scheduled_for,
                Some(&message),
                self.clock.now().timestamp(),
            )
            .await?
        else {
            debug!(user_id = %pref.user_id, "morning reminder already claimed");
            return Ok(None);
        };
        Ok(Some(self.dispatcher.deliver(&entry, to, &message).await?))
    }

    /// Asks a check-in right now, outside the user's slots. Goes through the
    /// same ledger, so it shares the current local minute with scheduled
    /// check-ins.
    pub async fn trigger(
        &self,
        user_id: &str,
        check_in_type: Option<CheckInType>,
    ) -> Result<Option<DeliveryStatus>> {
        let pref = self.stores.preferences.get_preferences(user_id).await?;
        if !pref.is_whatsapp_recipient() {
            return Err(CheckinError::Validation(format!(
                "user {user_id} has no active WhatsApp channel"
            )));
        }
        let local = self.local_minute(&pref, self.clock.now())?;
        let types: Vec<CheckInType> = match check_in_type {
            Some(t) => vec![t],
            None => CheckInType::ALL.to_vec(),
        };
        info!(user_id, "manual check-in trigger");
        self.ask(&pref, &types, true, &local, "manual").await
    }

    pub async fn record_manual(
        &self,
        user_id: &str,
        check_in_type: CheckInType,
        value: i32,
    ) -> Result<BehaviorCheckIn> {
        self.stores
            .checkins
            .record(
                user_id,
                check_in_type,
                value,
                TriggeredBy::Manual,
                self.clock.now().timestamp(),
            )
            .await
    }

    pub async fn trends(&self, user_id: &str) -> Result<Vec<TypeTrend>> {
        let since = self.clock.now().timestamp() - i64::from(self.trend_days) * SECONDS_PER_DAY;
        self.stores.checkins.trends(user_id, since).await
    }

    /// Routes one inbound message from `phone`.
    pub async fn handle_inbound(&self, phone: &str, text: &str) -> Result<InboundOutcome> {
        let Some(pref) = self.stores.preferences.find_by_whatsapp_number(phone).await? else {
            debug!(phone, "message from unknown number");
            return Ok(InboundOutcome::Ignored);
        };
        let to = pref.whatsapp_number.clone().unwrap_or_else(|| phone.to_string());
        let user_id = pref.user_id.as_str();

        if is_trends_request(text) {
            let trends = self.trends(user_id).await?;
            let message = self.composer.trends_message(&trends, self.trend_days);
            self.reply(user_id, &to, &message).await;
            return Ok(InboundOutcome::Trends);
        }

        let state = self.stores.conversations.get(user_id).await?;
        match state.on_message(text) {
            Transition::NotHandled => Ok(InboundOutcome::NotHandled),
            Transition::Answered {
                check_in_type,
                value,
            } => {
                self.stores
                    .checkins
                    .record(
                        user_id,
                        check_in_type,
                        value,
                        TriggeredBy::Scheduled,
                        self.clock.now().timestamp(),
                    )
                    .await?;
                self.stores.conversations.clear(user_id).await?;
                info!(user_id, check_in_type = %check_in_type, value, "check-in recorded");
                let feedback = self.composer.feedback(check_in_type, value);
                self.reply(user_id, &to, &feedback).await;
                Ok(InboundOutcome::Recorded {
                    check_in_type,
                    value,
                })
            }
            Transition::Reprompt {
                check_in_type,
                reason,
            } => {
                debug!(user_id, ?reason, "unusable check-in answer");
                let message = self.composer.reprompt(reason);
                self.reply(user_id, &to, &message).await;
                Ok(InboundOutcome::Reprompted {
                    check_in_type,
                    reason,
                })
            }
        }
    }

    async fn reply(&self, user_id: &str, to: &str, text: &str) {
        if let Err(err) = self.dispatcher.reply(to, text).await {
            warn!(user_id, error = %err, "reply failed");
        }
    }
}

pub fn is_trends_request(text: &str) -> bool {
    let lowered = text.to_lowercase();
    TREND_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn local_minute_follows_timezone() {
        // 2026-01-05 is a Monday; 08:00 UTC is 09:00 in Paris in winter.
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 42).unwrap();
        let local = LocalMinute::at(now, chrono_tz::Europe::Paris).unwrap();
        assert_eq!(local.time.to_string(), "09:00");
        assert_eq!(local.weekday, 1);
        assert!(!local.is_weekend());
        assert_eq!(local.scheduled_for, now.timestamp() - 42);
        assert_eq!(local.checkin_key(), "2026-01-05T09:00");
        assert_eq!(local.day_key(), "2026-01-05");

        let tokyo = LocalMinute::at(now, chrono_tz::Asia::Tokyo).unwrap();
        assert_eq!(tokyo.time.to_string(), "17:00");
    }

    #[test]
    fn repeated_local_hour_shares_a_key() {
        // Paris falls back from 03:00 CEST to 02:00 CET on 2026-10-25.
        let first = Utc.with_ymd_and_hms(2026, 10, 25, 0, 30, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 10, 25, 1, 30, 0).unwrap();
        let a = LocalMinute::at(first, chrono_tz::Europe::Paris).unwrap();
        let b = LocalMinute::at(second, chrono_tz::Europe::Paris).unwrap();
        assert_eq!(a.time.to_string(), "02:30");
        assert_eq!(a.checkin_key(), b.checkin_key());
        assert_ne!(a.scheduled_for, b.scheduled_for);
    }

    #[test]
    fn trend_keywords_in_either_language() {
        assert!(is_trends_request("Mes tendances ?"));
        assert!(is_trends_request("show TRENDS"));
        assert!(is_trends_request("analyse"));
        assert!(is_trends_request("Mon ÉVOLUTION"));
        assert!(is_trends_request("un rapport stp"));
        assert!(is_trends_request("any pattern?"));
        assert!(!is_trends_request("7"));
    }
}
