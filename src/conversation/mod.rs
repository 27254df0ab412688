use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::db::{self, now_ts, SqlitePool, SqlitePooledConn};
use crate::domains::checkin::{CheckInType, MAX_VALUE, MIN_VALUE};
use crate::error::{CheckinError, Result};

mod schema;
use schema::user_conversation_states;

const AWAITING_PREFIX: &str = "awaiting_checkin_";

static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

/// What the next inbound message from a user means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    AwaitingAnswer { check_in_type: CheckInType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepromptReason {
    NotANumber,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Not an answer; other handlers may take the message.
    NotHandled,
    /// Record the value and return to `Idle`.
    Answered { check_in_type: CheckInType, value: i32 },
    /// Keep waiting and tell the user what went wrong.
    Reprompt {
        check_in_type: CheckInType,
        reason: RepromptReason,
    },
}

impl ConversationState {
    pub fn tag(&self) -> Option<String> {
        match self {
            ConversationState::Idle => None,
            ConversationState::AwaitingAnswer { check_in_type } => {
                Some(format!("{AWAITING_PREFIX}{check_in_type}"))
            }
        }
    }

    /// Unknown tags read as `Idle`.
    pub fn from_tag(tag: &str) -> Self {
        tag.strip_prefix(AWAITING_PREFIX)
            .and_then(|raw| raw.parse().ok())
            .map(|check_in_type| ConversationState::AwaitingAnswer { check_in_type })
            .unwrap_or(ConversationState::Idle)
    }

    pub fn on_message(&self, text: &str) -> Transition {
        let ConversationState::AwaitingAnswer { check_in_type } = *self else {
            return Transition::NotHandled;
        };
        let Some(found) = FIRST_NUMBER.find(text) else {
            return Transition::Reprompt {
                check_in_type,
                reason: RepromptReason::NotANumber,
            };
        };
        match found.as_str().parse::<i32>() {
            Ok(value) if (MIN_VALUE..=MAX_VALUE).contains(&value) => Transition::Answered {
                check_in_type,
                value,
            },
            _ => Transition::Reprompt {
                check_in_type,
                reason: RepromptReason::OutOfRange,
            },
        }
    }

    pub fn next(&self, transition: &Transition) -> ConversationState {
        match transition {
            Transition::Answered { .. } => ConversationState::Idle,
            Transition::NotHandled | Transition::Reprompt { .. } => *self,
        }
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = user_conversation_states)]
struct StateRow {
    user_id: String,
    state: String,
    data: String,
    updated_at: i64,
}

pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = db::open_pool(sqlite_path.as_ref()).await?;
        Ok(Self { pool })
    }

    pub async fn get(&self, user_id: &str) -> Result<ConversationState> {
        let mut conn = self.conn().await?;
        let row: Option<StateRow> = user_conversation_states::table
            .filter(user_conversation_states::user_id.eq(user_id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok(row
            .map(|row| ConversationState::from_tag(&row.state))
            .unwrap_or(ConversationState::Idle))
    }

    /// Overwrites whatever the user was waiting on.
    pub async fn set_awaiting(
        &self,
        user_id: &str,
        check_in_type: CheckInType,
        source: &str,
    ) -> Result<()> {
        let now = now_ts();
        let state = ConversationState::AwaitingAnswer { check_in_type };
        let row = StateRow {
            user_id: user_id.to_string(),
            state: state.tag().unwrap_or_default(),
            data: json!({
                "type": check_in_type,
                "asked_at": now,
                "source": source,
            })
            .to_string(),
            updated_at: now,
        };
        let mut conn = self.conn().await?;
        diesel::replace_into(user_conversation_states::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok(())
    }

    pub async fn clear(&self, user_id: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            user_conversation_states::table.filter(user_conversation_states::user_id.eq(user_id)),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        db::conn(&self.pool).await
    }
}
