//! The daemon's configuration lives in a single `app_config` row of the
//! same SQLite file as the scheduling tables.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel::sqlite::SqliteConnection;

use crate::config::{default_config, Config};
use crate::db::{apply_sqlcipher_key_sync, ensure_parent_dir, now_ts};
use crate::error::{CheckinError, Result};

#[derive(QueryableByName)]
struct ConfigRow {
    #[diesel(sql_type = Text)]
    config_json: String,
}

fn open_conn(db_path: &str) -> Result<SqliteConnection> {
    ensure_parent_dir(db_path)?;
    let mut conn =
        SqliteConnection::establish(db_path).map_err(|e| CheckinError::Runtime(e.to_string()))?;
    apply_sqlcipher_key_sync(&mut conn)?;
    diesel::sql_query(
        "CREATE TABLE IF NOT EXISTS app_config (
            id INTEGER PRIMARY KEY,
            config_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    )
    .execute(&mut conn)
    .map_err(|e| CheckinError::Runtime(e.to_string()))?;
    Ok(conn)
}

pub fn load_config(db_path: &str) -> Result<Config> {
    let mut conn = open_conn(db_path)?;
    let row: Option<ConfigRow> =
        diesel::sql_query("SELECT config_json FROM app_config WHERE id = 1")
            .get_result(&mut conn)
            .optional()
            .map_err(|e| CheckinError::Config(e.to_string()))?;
    let Some(row) = row else {
        return Err(CheckinError::NotFound("stored config".to_string()));
    };
    let config: Config =
        serde_json::from_str(&row.config_json).map_err(|e| CheckinError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(db_path: &str, config: &Config) -> Result<()> {
    config.validate()?;
    let mut conn = open_conn(db_path)?;
    let config_json =
        serde_json::to_string(config).map_err(|e| CheckinError::Serialization(e.to_string()))?;

    diesel::sql_query(
        "INSERT INTO app_config (id, config_json, updated_at)
         VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET config_json = excluded.config_json, updated_at = excluded.updated_at",
    )
    .bind::<Text, _>(config_json)
    .bind::<BigInt, _>(now_ts())
    .execute(&mut conn)
    .map_err(|e| CheckinError::Runtime(e.to_string()))?;

    Ok(())
}

/// Loads the stored config, seeding the defaults on first run.
pub fn load_or_init(db_path: &str) -> Result<Config> {
    match load_config(db_path) {
        Ok(config) => Ok(config),
        Err(CheckinError::NotFound(_)) => {
            let config = default_config();
            save_config(db_path, &config)?;
            Ok(config)
        }
        Err(err) => Err(err),
    }
}
