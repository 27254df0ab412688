use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::db::{self, SqlitePool, SqlitePooledConn};
use crate::domains::checkin::{validate_value, CheckInType, TriggeredBy};
use crate::error::{CheckinError, Result};

mod schema;
use schema::behavior_checkins;

#[derive(Debug, Clone, Serialize)]
pub struct BehaviorCheckIn {
    pub id: i32,
    pub user_id: String,
    #[serde(rename = "type")]
    pub check_in_type: CheckInType,
    pub value: i32,
    pub triggered_by: TriggeredBy,
    pub created_at: i64,
}

/// Average and direction of one check-in type over a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeTrend {
    #[serde(rename = "type")]
    pub check_in_type: CheckInType,
    pub average: f64,
    pub count: usize,
    /// Last value minus first value in the window.
    pub delta: i32,
}

#[derive(Queryable)]
struct CheckInRow {
    id: i32,
    user_id: String,
    checkin_type: String,
    value: i32,
    triggered_by: String,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = behavior_checkins)]
struct NewCheckIn<'a> {
    user_id: &'a str,
    checkin_type: &'a str,
    value: i32,
    triggered_by: &'a str,
    created_at: i64,
}

pub struct CheckInStore {
    pool: SqlitePool,
}

impl CheckInStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = db::open_pool(sqlite_path.as_ref()).await?;
        Ok(Self { pool })
    }

    pub async fn record(
        &self,
        user_id: &str,
        check_in_type: CheckInType,
        value: i32,
        triggered_by: TriggeredBy,
        created_at: i64,
    ) -> Result<BehaviorCheckIn> {
        let value = validate_value(value)?;
        let new = NewCheckIn {
            user_id,
            checkin_type: check_in_type.as_str(),
            value,
            triggered_by: triggered_by.as_str(),
            created_at,
        };

        let mut conn = self.conn().await?;
        diesel::insert_into(behavior_checkins::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;

        let row: CheckInRow = behavior_checkins::table
            .filter(behavior_checkins::user_id.eq(user_id))
            .order(behavior_checkins::id.desc())
            .first(&mut conn)
            .await
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        map_row(row)
    }

    /// Oldest first.
    pub async fn list_since(&self, user_id: &str, since: i64) -> Result<Vec<BehaviorCheckIn>> {
        let mut conn = self.conn().await?;
        let rows: Vec<CheckInRow> = behavior_checkins::table
            .filter(behavior_checkins::user_id.eq(user_id))
            .filter(behavior_checkins::created_at.ge(since))
            .order((behavior_checkins::created_at.asc(), behavior_checkins::id.asc()))
            .load(&mut conn)
            .await
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        rows.into_iter().map(map_row).collect()
    }

    pub async fn trends(&self, user_id: &str, since: i64) -> Result<Vec<TypeTrend>> {
        let checkins = self.list_since(user_id, since).await?;
        Ok(summarize(&checkins))
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        db::conn(&self.pool).await
    }
}

/// Groups check-ins by type, in `CheckInType::ALL` order. Input must be
/// oldest first.
pub fn summarize(checkins: &[BehaviorCheckIn]) -> Vec<TypeTrend> {
    CheckInType::ALL
        .iter()
        .filter_map(|check_in_type| {
            let values: Vec<i32> = checkins
                .iter()
                .filter(|c| c.check_in_type == *check_in_type)
                .map(|c| c.value)
                .collect();
            let (first, last) = (values.as_slice().first()?, values.as_slice().last()?);
            let sum: i32 = values.iter().sum();
            Some(TypeTrend {
                check_in_type: *check_in_type,
                average: f64::from(sum) / values.len() as f64,
                count: values.len(),
                delta: last - first,
            })
        })
        .collect()
}

fn map_row(row: CheckInRow) -> Result<BehaviorCheckIn> {
    Ok(BehaviorCheckIn {
        id: row.id,
        user_id: row.user_id,
        check_in_type: row
            .checkin_type
            .parse()
            .map_err(|e: CheckinError| CheckinError::Serialization(e.to_string()))?,
        value: row.value,
        triggered_by: row.triggered_by.parse()?,
        created_at: row.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkin(check_in_type: CheckInType, value: i32, created_at: i64) -> BehaviorCheckIn {
        BehaviorCheckIn {
            id: 0,
            user_id: "u1".to_string(),
            check_in_type,
            value,
            triggered_by: TriggeredBy::Scheduled,
            created_at,
        }
    }

    #[test]
    fn summarize_averages_per_type() {
        let trends = summarize(&[
            checkin(CheckInType::Energy, 4, 1),
            checkin(CheckInType::Mood, 6, 2),
            checkin(CheckInType::Energy, 8, 3),
        ]);
        assert_eq!(trends.len(), 2);
        assert_eq!(trends[0].check_in_type, CheckInType::Mood);
        assert_eq!(trends[0].delta, 0);
        assert_eq!(trends[1].check_in_type, CheckInType::Energy);
        assert_eq!(trends[1].average, 6.0);
        assert_eq!(trends[1].delta, 4);
    }
}
