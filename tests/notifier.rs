mod common;

use std::sync::Arc;
use std::time::Duration;

use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;

use checkin_bot::conversation::ConversationState;
use checkin_bot::domains::checkin::CheckInType;
use checkin_bot::preferences::PreferencePatch;
use checkin_bot::services::notifier::{
    spawn_reload_listener, ChangeNotifier, HttpRelay, PreferenceChange, SchedulerEvent,
};

use common::{monday_at, RecordingSender, TestApp};

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn relay_posts_camel_case_change() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/reload")
                .header("authorization", "Bearer sibling-token")
                .json_body_partial(
                    r#"{"userId": "u1", "newPreferences": {"is_enabled": false}}"#,
                );
            then.status(200).json_body(json!({"ok": true}));
        })
        .await;

    let notifier = ChangeNotifier::new(16);
    let relay = HttpRelay::new(
        &server.url("/reload"),
        Some("sibling-token".to_string()),
        Duration::from_secs(2),
    )
    .unwrap();
    let handle = relay.spawn(notifier.subscribe());

    notifier.publish(SchedulerEvent::PreferencesChanged(PreferenceChange {
        user_id: "u1".to_string(),
        old_preferences: json!({"is_enabled": true}),
        new_preferences: json!({"is_enabled": false}),
        timestamp: 1_767_603_600,
    }));

    let mock = &mock;
    wait_for(|| async move { mock.hits_async().await >= 1 }).await;
    handle.abort();
}

#[tokio::test]
async fn relay_skips_remote_changes() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/reload");
            then.status(200);
        })
        .await;

    let notifier = ChangeNotifier::new(16);
    let relay = HttpRelay::new(&server.url("/reload"), None, Duration::from_secs(2)).unwrap();
    let handle = relay.spawn(notifier.subscribe());

    notifier.publish(SchedulerEvent::RemoteChange(PreferenceChange {
        user_id: "u1".to_string(),
        old_preferences: json!({}),
        new_preferences: json!({}),
        timestamp: 0,
    }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.hits_async().await, 0);
    handle.abort();
}

#[tokio::test]
async fn relay_failure_does_not_fail_the_update() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/reload");
            then.status(500);
        })
        .await;

    let app = TestApp::new(Arc::new(RecordingSender::default()), monday_at(9, 0)).await;
    let relay = HttpRelay::new(&server.url("/reload"), None, Duration::from_secs(2)).unwrap();
    let handle = relay.spawn(app.state.notifier.subscribe());

    for enabled in [false, true] {
        let (old, new) = app
            .stores()
            .preferences
            .update_preferences(
                "u1",
                PreferencePatch {
                    is_enabled: Some(enabled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        app.state.notifier.preferences_updated(&old, &new);
    }

    // The first patch changes the flag, the second restores it.
    let mock = &mock;
    wait_for(|| async move { mock.hits_async().await >= 2 }).await;
    assert!(!handle.is_finished());
    let pref = app.stores().preferences.get_preferences("u1").await.unwrap();
    assert!(pref.is_enabled);
    handle.abort();
}

#[tokio::test]
async fn disabling_a_user_clears_pending_question() {
    let app = TestApp::new(Arc::new(RecordingSender::default()), monday_at(9, 0)).await;
    let conversations = app.stores().conversations.clone();
    let handle = spawn_reload_listener(app.state.notifier.subscribe(), conversations.clone());

    conversations
        .set_awaiting("u1", CheckInType::Mood, "scheduled")
        .await
        .unwrap();
    app.state
        .notifier
        .publish(SchedulerEvent::RemoteChange(PreferenceChange {
            user_id: "u1".to_string(),
            old_preferences: json!({"is_enabled": true}),
            new_preferences: json!({"is_enabled": false}),
            timestamp: 0,
        }));

    wait_for(|| {
        let conversations = conversations.clone();
        async move { conversations.get("u1").await.unwrap() == ConversationState::Idle }
    })
    .await;
    handle.abort();
}
