use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::db::{self, SqlitePool, SqlitePooledConn};
use crate::error::{CheckinError, Result};

mod schema;
use schema::notification_history;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    #[serde(rename = "checkin")]
    CheckIn,
    MorningReminder,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::CheckIn => "checkin",
            NotificationKind::MorningReminder => "morning_reminder",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = CheckinError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "checkin" => Ok(NotificationKind::CheckIn),
            "morning_reminder" => Ok(NotificationKind::MorningReminder),
            other => Err(CheckinError::Serialization(format!(
                "unknown notification kind '{other}'"
            ))),
        }
    }
}

/// `Pending` moves to `Sent` or `Failed` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = CheckinError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(CheckinError::Serialization(format!(
                "unknown delivery status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i32,
    pub user_id: String,
    pub kind: NotificationKind,
    /// Local date (and slot time for check-ins) the row stands for.
    pub slot_key: String,
    pub scheduled_for: i64,
    pub status: DeliveryStatus,
    pub content: Option<String>,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub error: Option<String>,
}

#[derive(Queryable)]
struct HistoryRow {
    id: i32,
    user_id: String,
    kind: String,
    slot_key: String,
    scheduled_for: i64,
    status: String,
    content: Option<String>,
    created_at: i64,
    sent_at: Option<i64>,
    error: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = notification_history)]
struct NewHistory<'a> {
    user_id: &'a str,
    kind: &'a str,
    slot_key: &'a str,
    scheduled_for: i64,
    status: &'a str,
    content: Option<&'a str>,
    created_at: i64,
}

pub struct NotificationHistoryStore {
    pool: SqlitePool,
}

impl NotificationHistoryStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = db::open_pool(sqlite_path.as_ref()).await?;
        Ok(Self { pool })
    }

    /// Inserts the pending row for a slot. Returns `None` when a row for the
    /// same (user, kind, slot key) already exists, in which case the caller
    /// must not send. `scheduled_for` is the UTC minute the send happens in.
    pub async fn claim(
        &self,
        user_id: &str,
        kind: NotificationKind,
        slot_key: &str,
        scheduled_for: i64,
        content: Option<&str>,
        created_at: i64,
    ) -> Result<Option<HistoryEntry>> {
        let new = NewHistory {
            user_id,
            kind: kind.as_str(),
            slot_key,
            scheduled_for: truncate_to_minute(scheduled_for),
            status: DeliveryStatus::Pending.as_str(),
            content,
            created_at,
        };

        let mut conn = self.conn().await?;
        let inserted = diesel::insert_or_ignore_into(notification_history::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        if inserted == 0 {
            return Ok(None);
        }
        drop(conn);
        self.find(user_id, kind, slot_key).await
    }

    pub async fn find(
        &self,
        user_id: &str,
        kind: NotificationKind,
        slot_key: &str,
    ) -> Result<Option<HistoryEntry>> {
        let mut conn = self.conn().await?;
        let row: Option<HistoryRow> = notification_history::table
            .filter(notification_history::user_id.eq(user_id))
            .filter(notification_history::kind.eq(kind.as_str()))
            .filter(notification_history::slot_key.eq(slot_key))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        row.map(map_row).transpose()
    }

    pub async fn mark_sent(&self, id: i32, sent_at: i64) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            notification_history::table
                .filter(notification_history::id.eq(id))
                .filter(notification_history::status.eq(DeliveryStatus::Pending.as_str())),
        )
        .set((
            notification_history::status.eq(DeliveryStatus::Sent.as_str()),
            notification_history::sent_at.eq(Some(sent_at)),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok(updated > 0)
    }

    pub async fn mark_failed(&self, id: i32, error: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            notification_history::table
                .filter(notification_history::id.eq(id))
                .filter(notification_history::status.eq(DeliveryStatus::Pending.as_str())),
        )
        .set((
            notification_history::status.eq(DeliveryStatus::Failed.as_str()),
            notification_history::error.eq(Some(error)),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok(updated > 0)
    }

    pub async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut conn = self.conn().await?;
        let mut query = notification_history::table
            .filter(notification_history::user_id.eq(user_id))
            .into_boxed();
        if limit > 0 {
            query = query.limit(limit as i64);
        }
        let rows: Vec<HistoryRow> = query
            .order((
                notification_history::scheduled_for.desc(),
                notification_history::id.desc(),
            ))
            .load(&mut conn)
            .await
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        rows.into_iter().map(map_row).collect()
    }

    /// Deletes rows scheduled before `cutoff`, whatever their status.
    pub async fn prune_before(&self, cutoff: i64) -> Result<usize> {
        let mut conn = self.conn().await?;
        diesel::delete(
            notification_history::table.filter(notification_history::scheduled_for.lt(cutoff)),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| CheckinError::Runtime(e.to_string()))
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        db::conn(&self.pool).await
    }
}

pub fn truncate_to_minute(ts: i64) -> i64 {
    ts - ts.rem_euclid(60)
}

fn map_row(row: HistoryRow) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.id,
        user_id: row.user_id,
        kind: row.kind.parse()?,
        slot_key: row.slot_key,
        scheduled_for: row.scheduled_for,
        status: row.status.parse()?,
        content: row.content,
        created_at: row.created_at,
        sent_at: row.sent_at,
        error: row.error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_minute_boundary() {
        assert_eq!(truncate_to_minute(1_700_000_059), 1_700_000_040);
        assert_eq!(truncate_to_minute(1_700_000_040), 1_700_000_040);
    }

    #[test]
    fn kinds_round_trip_through_text() {
        for kind in [NotificationKind::CheckIn, NotificationKind::MorningReminder] {
            assert_eq!(kind.as_str().parse::<NotificationKind>().unwrap(), kind);
        }
        assert!("sms".parse::<NotificationKind>().is_err());
    }
}
