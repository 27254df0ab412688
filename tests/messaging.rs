use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;

use checkin_bot::error::CheckinError;
use checkin_bot::interfaces::messaging::MessageSender;
use checkin_bot::services::messaging::WhatsAppSender;

#[tokio::test]
async fn whatsapp_sender_posts_text_message() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v21.0/1234567890/messages")
                .header("authorization", "Bearer access-token")
                .json_body(json!({
                    "messaging_product": "whatsapp",
                    "to": "33612345678",
                    "type": "text",
                    "text": {"body": "⚡ What's your energy level? (1-10)"}
                }));
            then.status(200)
                .json_body(json!({"messages": [{"id": "wamid.abc"}]}));
        })
        .await;

    let sender = WhatsAppSender::new(&server.url("/v21.0/"), "1234567890", "access-token").unwrap();
    assert_eq!(sender.channel(), "whatsapp");
    sender
        .send("33612345678", "⚡ What's your energy level? (1-10)")
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn whatsapp_error_status_is_an_http_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/1234567890/messages");
            then.status(401)
                .json_body(json!({"error": {"message": "Invalid OAuth access token"}}));
        })
        .await;

    let sender = WhatsAppSender::new(&server.base_url(), "1234567890", "expired").unwrap();
    let err = sender.send("33612345678", "hi").await.unwrap_err();
    match err {
        CheckinError::Http(message) => {
            assert!(message.contains("401"));
            assert!(message.contains("Invalid OAuth access token"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}
