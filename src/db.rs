use std::env;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;
use std::time::{SystemTime, UNIX_EPOCH};

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{CheckinError, Result};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
pub type SqlitePool = Pool<SqliteAsyncConn>;
pub type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

pub fn get_sqlcipher_key() -> Option<String> {
    env::var("CHECKIN_DB_KEY")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Silences SQLCipher's own logger; errors still surface through diesel.
pub fn configure_sqlcipher_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe {
        let mut db: *mut libsqlite3_sys::sqlite3 = std::ptr::null_mut();
        let rc = libsqlite3_sys::sqlite3_open(c":memory:".as_ptr(), &mut db);
        if rc != libsqlite3_sys::SQLITE_OK {
            if !db.is_null() {
                libsqlite3_sys::sqlite3_close(db);
            }
            return;
        }
        let mut err: *mut c_char = std::ptr::null_mut();
        let _ = libsqlite3_sys::sqlite3_exec(
            db,
            c"PRAGMA cipher_log_level = ERROR; PRAGMA cipher_log_source = NONE;".as_ptr(),
            None,
            std::ptr::null_mut(),
            &mut err,
        );
        if !err.is_null() {
            libsqlite3_sys::sqlite3_free(err as *mut _);
        }
        libsqlite3_sys::sqlite3_close(db);
    });
}

// PRAGMA does not take bound parameters.
fn key_pragma(key: &str) -> String {
    format!("PRAGMA key = '{}';", key.replace('\'', "''"))
}

pub fn apply_sqlcipher_key_sync(conn: &mut SqliteConnection) -> Result<()> {
    let Some(key) = get_sqlcipher_key() else {
        return Ok(());
    };
    diesel::RunQueryDsl::execute(diesel::sql_query(key_pragma(&key)), conn)
        .map_err(|e| CheckinError::Runtime(e.to_string()))?;
    diesel::RunQueryDsl::execute(diesel::sql_query("PRAGMA cipher_compatibility = 4"), conn)
        .map_err(|e| CheckinError::Runtime(e.to_string()))?;
    Ok(())
}

pub async fn apply_sqlcipher_key_async(conn: &mut SqliteAsyncConn) -> Result<()> {
    use diesel_async::RunQueryDsl as AsyncRunQueryDsl;

    let Some(key) = get_sqlcipher_key() else {
        return Ok(());
    };
    AsyncRunQueryDsl::execute(diesel::sql_query(key_pragma(&key)), conn)
        .await
        .map_err(|e| CheckinError::Runtime(e.to_string()))?;
    AsyncRunQueryDsl::execute(diesel::sql_query("PRAGMA cipher_compatibility = 4"), conn)
        .await
        .map_err(|e| CheckinError::Runtime(e.to_string()))?;
    Ok(())
}

pub fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CheckinError::Runtime(e.to_string()))?;
    }
    Ok(())
}

/// Creates the parent directory, applies pending migrations and builds the
/// connection pool every store shares.
pub async fn open_pool(sqlite_path: &str) -> Result<SqlitePool> {
    ensure_parent_dir(sqlite_path)?;
    run_migrations(sqlite_path).await?;

    let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
    Pool::builder()
        .build(manager)
        .await
        .map_err(|e| CheckinError::Runtime(e.to_string()))
}

pub async fn conn(pool: &SqlitePool) -> Result<SqlitePooledConn<'_>> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| CheckinError::Runtime(e.to_string()))?;
    apply_sqlcipher_key_async(&mut conn).await?;
    Ok(conn)
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = SqliteConnection::establish(&database_url)
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        apply_sqlcipher_key_sync(&mut conn)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok::<_, CheckinError>(())
    })
    .await
    .map_err(|e| CheckinError::Runtime(e.to_string()))??;
    Ok(())
}

pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
