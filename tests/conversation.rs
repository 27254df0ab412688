mod common;

use std::sync::Arc;

use checkin_bot::conversation::{ConversationState, RepromptReason};
use checkin_bot::domains::checkin::{CheckInType, TriggeredBy};
use checkin_bot::history::DeliveryStatus;
use checkin_bot::InboundOutcome;

use common::{monday_at, RecordingSender, TestApp};

const PHONE: &str = "33612345678";

async fn awaiting_energy() -> (Arc<RecordingSender>, TestApp) {
    let sender = Arc::new(RecordingSender::default());
    let app = TestApp::new(sender.clone(), monday_at(10, 15)).await;
    app.enroll("u1", PHONE).await;
    let status = app
        .state
        .service
        .trigger("u1", Some(CheckInType::Energy))
        .await
        .unwrap();
    assert_eq!(status, Some(DeliveryStatus::Sent));
    (sender, app)
}

#[tokio::test]
async fn answer_in_range_is_recorded() {
    let (sender, app) = awaiting_energy().await;

    let outcome = app
        .state
        .service
        .handle_inbound("+33 6 12 34 56 78", "8")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        InboundOutcome::Recorded {
            check_in_type: CheckInType::Energy,
            value: 8
        }
    );

    let checkins = app.stores().checkins.list_since("u1", 0).await.unwrap();
    assert_eq!(checkins.len(), 1);
    assert_eq!(checkins[0].check_in_type, CheckInType::Energy);
    assert_eq!(checkins[0].value, 8);
    assert_eq!(checkins[0].triggered_by, TriggeredBy::Scheduled);
    assert_eq!(
        app.stores().conversations.get("u1").await.unwrap(),
        ConversationState::Idle
    );

    let sent = sender.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].1.contains("Great"));
}

#[tokio::test]
async fn out_of_range_keeps_waiting() {
    let (sender, app) = awaiting_energy().await;

    let outcome = app.state.service.handle_inbound(PHONE, "15").await.unwrap();
    assert_eq!(
        outcome,
        InboundOutcome::Reprompted {
            check_in_type: CheckInType::Energy,
            reason: RepromptReason::OutOfRange
        }
    );
    assert!(app.stores().checkins.list_since("u1", 0).await.unwrap().is_empty());
    assert_eq!(
        app.stores().conversations.get("u1").await.unwrap(),
        ConversationState::AwaitingAnswer {
            check_in_type: CheckInType::Energy
        }
    );
    assert!(sender.sent()[1].1.contains("between 1 and 10"));

    // A later valid answer still lands on the same question.
    let outcome = app
        .state
        .service
        .handle_inbound(PHONE, "more like 4 today")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        InboundOutcome::Recorded {
            check_in_type: CheckInType::Energy,
            value: 4
        }
    );
}

#[tokio::test]
async fn text_without_number_reprompts() {
    let (_sender, app) = awaiting_energy().await;
    let outcome = app.state.service.handle_inbound(PHONE, "tired").await.unwrap();
    assert!(matches!(
        outcome,
        InboundOutcome::Reprompted {
            reason: RepromptReason::NotANumber,
            ..
        }
    ));
    assert!(app.stores().checkins.list_since("u1", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn idle_user_and_unknown_sender() {
    let sender = Arc::new(RecordingSender::default());
    let app = TestApp::new(sender.clone(), monday_at(10, 15)).await;
    app.enroll("u1", PHONE).await;

    let outcome = app.state.service.handle_inbound(PHONE, "7").await.unwrap();
    assert_eq!(outcome, InboundOutcome::NotHandled);

    let outcome = app
        .state
        .service
        .handle_inbound("33699999999", "7")
        .await
        .unwrap();
    assert_eq!(outcome, InboundOutcome::Ignored);
    assert!(sender.sent().is_empty());
    assert!(app.stores().checkins.list_since("u1", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn trends_command_summarizes_recent_check_ins() {
    let sender = Arc::new(RecordingSender::default());
    let app = TestApp::new(sender.clone(), monday_at(10, 0)).await;
    app.enroll("u1", PHONE).await;
    for value in [6, 8] {
        app.state
            .service
            .record_manual("u1", CheckInType::Mood, value)
            .await
            .unwrap();
    }

    let outcome = app
        .state
        .service
        .handle_inbound(PHONE, "Mes tendances")
        .await
        .unwrap();
    assert_eq!(outcome, InboundOutcome::Trends);
    assert!(sender.sent()[0].1.contains("Not enough data"));

    app.state
        .service
        .record_manual("u1", CheckInType::Mood, 7)
        .await
        .unwrap();
    let outcome = app
        .state
        .service
        .handle_inbound(PHONE, "mon évolution")
        .await
        .unwrap();
    assert_eq!(outcome, InboundOutcome::Trends);
    let sent = sender.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].1.contains("Mood"));
    assert!(sent[1].1.contains("7.0/10"));

    let recorded = app.stores().checkins.list_since("u1", 0).await.unwrap();
    assert!(recorded
        .iter()
        .all(|checkin| checkin.created_at == monday_at(10, 0).timestamp()));
}

#[tokio::test]
async fn check_ins_outside_the_trend_window_are_left_out() {
    let sender = Arc::new(RecordingSender::default());
    let app = TestApp::new(sender.clone(), monday_at(10, 0)).await;
    app.enroll("u1", PHONE).await;
    for value in [2, 3, 4] {
        app.state
            .service
            .record_manual("u1", CheckInType::Stress, value)
            .await
            .unwrap();
    }

    app.clock.set(monday_at(10, 0) + chrono::Duration::days(8));
    app.state
        .service
        .handle_inbound(PHONE, "trend")
        .await
        .unwrap();
    assert!(sender.sent()[0].1.contains("Not enough data"));
}

#[tokio::test]
async fn new_question_replaces_pending_one() {
    let (_sender, app) = awaiting_energy().await;
    app.clock.set(monday_at(10, 16));
    app.state
        .service
        .trigger("u1", Some(CheckInType::Focus))
        .await
        .unwrap();
    assert_eq!(
        app.stores().conversations.get("u1").await.unwrap(),
        ConversationState::AwaitingAnswer {
            check_in_type: CheckInType::Focus
        }
    );

    // Same minute: the ledger refuses a second check-in.
    let again = app
        .state
        .service
        .trigger("u1", Some(CheckInType::Stress))
        .await
        .unwrap();
    assert_eq!(again, None);
}
