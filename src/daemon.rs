use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Json, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::composer::QuestionComposer;
use crate::config::Config;
use crate::config_store;
use crate::domains::checkin::CheckInType;
use crate::domains::schedule::ScheduleDocument;
use crate::error::{CheckinError, Result};
use crate::interfaces::clock::{Clock, SystemClock};
use crate::interfaces::messaging::MessageSender;
use crate::preferences::PreferencePatch;
use crate::scheduler::jobs::{CheckInJob, HistoryCleanupJob, MorningReminderJob};
use crate::scheduler::Scheduler;
use crate::services::checkin::{CheckInService, InboundOutcome, Stores};
use crate::services::messaging::{Dispatcher, LogSender, WhatsAppSender};
use crate::services::notifier::{
    spawn_reload_listener, ChangeNotifier, HttpRelay, PreferenceChange, SchedulerEvent,
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CheckInService>,
    pub notifier: ChangeNotifier,
    pub token: String,
    pub verify_token: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct ScheduleUpdate {
    enabled: Option<bool>,
    frequency: Option<String>,
    /// Either `{"version": 1, "slots": [...]}` or a bare slot array.
    schedules: Option<Value>,
    randomize: Option<bool>,
    skip_weekends: Option<bool>,
}

#[derive(Deserialize)]
struct ManualCheckInRequest {
    user_id: String,
    #[serde(rename = "type")]
    check_in_type: String,
    value: i32,
}

#[derive(Deserialize)]
struct CheckInsQuery {
    user_id: String,
    days: Option<u32>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    user_id: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct TriggerRequest {
    user_id: String,
    #[serde(rename = "type")]
    check_in_type: Option<String>,
}

#[derive(Deserialize)]
struct EventStreamQuery {
    user_id: Option<String>,
}

/// One text message pulled out of a webhook payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: String,
    pub text: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/preferences/:user_id",
            get(get_preferences).patch(patch_preferences),
        )
        .route(
            "/checkin_schedule/:user_id",
            get(get_schedule).put(put_schedule),
        )
        .route("/checkins", post(record_checkin).get(list_checkins))
        .route("/history", get(history))
        .route("/trigger", post(trigger))
        .route("/reload", post(reload))
        .route("/events", get(events))
        .route(
            "/webhooks/whatsapp",
            get(verify_webhook).post(whatsapp_webhook),
        )
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn get_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    match state
        .service
        .stores()
        .preferences
        .get_preferences(&user_id)
        .await
    {
        Ok(pref) => (StatusCode::OK, Json(pref)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn patch_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(patch): Json<PreferencePatch>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    match state
        .service
        .stores()
        .preferences
        .update_preferences(&user_id, patch)
        .await
    {
        Ok((old, new)) => {
            if state.notifier.preferences_updated(&old, &new) {
                info!(user_id = %user_id, is_enabled = new.is_enabled, "preference change published");
            }
            (StatusCode::OK, Json(new)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn get_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    match state
        .service
        .stores()
        .preferences
        .get_or_create_schedule(&user_id)
        .await
    {
        Ok(schedule) => (StatusCode::OK, Json(schedule)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn put_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(update): Json<ScheduleUpdate>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let store = &state.service.stores().preferences;
    let old = match store.get_or_create_schedule(&user_id).await {
        Ok(schedule) => schedule,
        Err(err) => return error_response(err),
    };
    let mut new = old.clone();
    if let Some(raw) = update.schedules {
        match ScheduleDocument::parse(&raw.to_string()) {
            Ok(doc) => new.schedules = doc.slots,
            Err(err) => return error_response(err),
        }
    }
    if let Some(enabled) = update.enabled {
        new.enabled = enabled;
    }
    if let Some(frequency) = update.frequency {
        new.frequency = frequency;
    }
    if let Some(randomize) = update.randomize {
        new.randomize = randomize;
    }
    if let Some(skip_weekends) = update.skip_weekends {
        new.skip_weekends = skip_weekends;
    }
    match store.save_schedule(&new).await {
        Ok(saved) => {
            state.notifier.schedule_updated(&old, &saved);
            (StatusCode::OK, Json(saved)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn record_checkin(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ManualCheckInRequest>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let check_in_type = match payload.check_in_type.parse::<CheckInType>() {
        Ok(t) => t,
        Err(err) => return error_response(err),
    };
    match state
        .service
        .record_manual(&payload.user_id, check_in_type, payload.value)
        .await
    {
        Ok(checkin) => (StatusCode::CREATED, Json(checkin)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_checkins(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CheckInsQuery>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let days = query.days.unwrap_or(state.service.trend_days()).max(1);
    let since = state.service.now().timestamp() - i64::from(days) * 86_400;
    match state
        .service
        .stores()
        .checkins
        .list_since(&query.user_id, since)
        .await
    {
        Ok(checkins) => {
            let trends = crate::checkins::summarize(&checkins);
            (
                StatusCode::OK,
                Json(json!({"days": days, "checkins": checkins, "trends": trends})),
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let limit = query.limit.unwrap_or(50);
    match state
        .service
        .stores()
        .history
        .list_for_user(&query.user_id, limit)
        .await
    {
        Ok(entries) => (StatusCode::OK, Json(json!({"history": entries}))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<TriggerRequest>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let check_in_type = match payload.check_in_type.as_deref().map(str::parse::<CheckInType>) {
        Some(Ok(t)) => Some(t),
        Some(Err(err)) => return error_response(err),
        None => None,
    };
    match state.service.trigger(&payload.user_id, check_in_type).await {
        Ok(Some(status)) => (StatusCode::OK, Json(json!({"status": status}))).into_response(),
        Ok(None) => (
            StatusCode::CONFLICT,
            Json(json!({"status": "duplicate", "message": "a check-in was already sent this minute"})),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn reload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(change): Json<PreferenceChange>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    info!(user_id = %change.user_id, "preference change received");
    state.notifier.publish(SchedulerEvent::RemoteChange(change));
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventStreamQuery>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }

    let mut receiver = state.notifier.subscribe();
    let filter_user = query.user_id;

    let body = Body::from_stream(async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Some(filter) = &filter_user {
                        if event.user_id() != filter {
                            continue;
                        }
                    }
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    let line = format!("data: {}\n\n", payload);
                    yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(line));
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
    match (mode, token, state.verify_token.as_deref()) {
        (Some("subscribe"), Some(given), Some(expected)) if given == expected => {
            (StatusCode::OK, challenge).into_response()
        }
        _ => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "Verification failed".to_string(),
            }),
        )
            .into_response(),
    }
}

async fn whatsapp_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let messages = inbound_messages(&payload);
    let mut outcomes = Vec::with_capacity(messages.len());
    for message in messages {
        match state.service.handle_inbound(&message.from, &message.text).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                warn!(error = %err, "inbound message failed");
                return error_response(err);
            }
        }
    }
    if outcomes.iter().all(|o| *o == InboundOutcome::Ignored) {
        return (StatusCode::OK, Json(json!({"status": "ignored"}))).into_response();
    }
    (
        StatusCode::OK,
        Json(json!({"status": "ok", "results": outcomes})),
    )
        .into_response()
}

/// Accepts the Cloud API envelope (`entry[].changes[].value.messages[]`)
/// or a flat `{from|phoneNumber, text|messageText}` body.
pub fn inbound_messages(payload: &Value) -> Vec<InboundMessage> {
    if let Some(entries) = payload.get("entry").and_then(Value::as_array) {
        return entries
            .iter()
            .filter_map(|entry| entry.get("changes").and_then(Value::as_array))
            .flatten()
            .filter_map(|change| {
                change
                    .get("value")
                    .and_then(|value| value.get("messages"))
                    .and_then(Value::as_array)
            })
            .flatten()
            .filter_map(|message| {
                let from = message.get("from").and_then(Value::as_str)?;
                let text = message
                    .get("text")
                    .and_then(|text| text.get("body"))
                    .and_then(Value::as_str)?;
                Some(InboundMessage {
                    from: from.to_string(),
                    text: text.to_string(),
                })
            })
            .collect();
    }
    let from = payload
        .get("from")
        .or_else(|| payload.get("phoneNumber"))
        .and_then(Value::as_str);
    let text = payload
        .get("text")
        .or_else(|| payload.get("messageText"))
        .and_then(Value::as_str);
    match (from, text) {
        (Some(from), Some(text)) => vec![InboundMessage {
            from: from.to_string(),
            text: text.to_string(),
        }],
        _ => Vec::new(),
    }
}

fn error_response(err: CheckinError) -> Response {
    let status = match &err {
        CheckinError::Validation(_) => StatusCode::BAD_REQUEST,
        CheckinError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

const HISTORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// An empty token matches requests that carry no credentials at all.
fn warn_if_unauthenticated(token: &str) -> bool {
    let open = token.trim().is_empty();
    if open {
        warn!("no API token configured; every route accepts unauthenticated requests");
    }
    open
}

fn authorize(
    headers: &HeaderMap,
    token: &str,
) -> std::result::Result<(), (StatusCode, Json<ErrorResponse>)> {
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let bearer = header.strip_prefix("Bearer ").unwrap_or("");

    if bearer == token || api_key == token {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Unauthorized".to_string(),
            }),
        ))
    }
}

fn message_sender(config: &Config) -> Result<Arc<dyn MessageSender>> {
    match config.whatsapp_credentials() {
        Some((phone_number_id, access_token)) => Ok(Arc::new(WhatsAppSender::new(
            &config.whatsapp_api_url(),
            &phone_number_id,
            &access_token,
        )?)),
        None => {
            warn!("no WhatsApp credentials configured; messages will only be logged");
            Ok(Arc::new(LogSender))
        }
    }
}

/// Opens the stores and wires the check-in service around `sender` and
/// `clock`.
pub async fn build_state(
    db_path: &str,
    token: &str,
    config: &Config,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn Clock>,
) -> Result<AppState> {
    let stores = Stores::open(db_path).await?;
    let notifier = ChangeNotifier::default();
    let composer = Arc::new(match config.randomize_seed() {
        Some(seed) => QuestionComposer::seeded(seed),
        None => QuestionComposer::new(),
    });
    let dispatcher = Dispatcher::new(
        sender,
        stores.history.clone(),
        notifier.clone(),
        clock.clone(),
    );
    let service = Arc::new(CheckInService::new(
        stores,
        composer,
        dispatcher,
        clock,
        config.default_timezone(),
        config.trend_days(),
    ));
    Ok(AppState {
        service,
        notifier,
        token: token.to_string(),
        verify_token: config.verify_token(),
    })
}

fn load_config(db_path: &str, config_path: Option<&str>) -> Result<Config> {
    let config = match config_path {
        Some(path) => {
            let config = Config::from_file(path)?;
            config_store::save_config(db_path, &config)?;
            config
        }
        None => config_store::load_or_init(db_path)?,
    };
    Ok(config.resolve_env())
}

pub async fn run(host: &str, port: u16, db_path: &str, token: &str, config_path: Option<&str>) -> Result<()> {
    run_with_shutdown(
        host,
        port,
        db_path,
        token,
        config_path,
        futures::future::pending::<()>(),
    )
    .await
}

pub async fn run_with_shutdown<F>(
    host: &str,
    port: u16,
    db_path: &str,
    token: &str,
    config_path: Option<&str>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = load_config(db_path, config_path)?;
    warn_if_unauthenticated(token);
    let sender = message_sender(&config)?;
    let state = build_state(db_path, token, &config, sender, Arc::new(SystemClock)).await?;

    let mut background = vec![spawn_reload_listener(
        state.notifier.subscribe(),
        state.service.stores().conversations.clone(),
    )];
    if let Some(url) = config.sibling_url() {
        let relay = HttpRelay::new(
            &url,
            config.notifier_token(),
            Duration::from_secs(config.notifier_timeout_seconds()),
        )?;
        background.push(relay.spawn(state.notifier.subscribe()));
        info!(url = %url, "relaying preference changes");
    }

    let poll = Duration::from_secs(config.poll_seconds().max(1));
    let mut scheduler = Scheduler::new();
    scheduler.register_job(Arc::new(CheckInJob::new(state.service.clone(), poll)));
    scheduler.register_job(Arc::new(MorningReminderJob::new(state.service.clone(), poll)));
    scheduler.register_job(Arc::new(HistoryCleanupJob::new(
        state.service.clone(),
        config.history_retention_days(),
        HISTORY_CLEANUP_INTERVAL,
    )));
    scheduler.start();

    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CheckinError::Runtime(e.to_string()))?;
    info!(addr = %addr, "daemon listening");
    let shutdown = async move {
        shutdown.await;
        scheduler.stop().await;
        for handle in background {
            handle.abort();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CheckinError::Runtime(e.to_string()))?;

    Ok(())
}
