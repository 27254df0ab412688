use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::error::{CheckinError, Result};

/// Thin HTTP client for the daemon's API.
pub struct DaemonClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl DaemonClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            token: token.into(),
            client,
        })
    }

    pub async fn health(&self) -> Result<Value> {
        self.get_json("/health", &[]).await
    }

    pub async fn preferences(&self, user_id: &str) -> Result<Value> {
        let path = format!("/preferences/{}", urlencoding::encode(user_id));
        self.get_json(&path, &[]).await
    }

    pub async fn update_preferences(&self, user_id: &str, patch: &Value) -> Result<Value> {
        let path = format!("/preferences/{}", urlencoding::encode(user_id));
        self.send_json(Method::PATCH, &path, patch).await
    }

    pub async fn schedule(&self, user_id: &str) -> Result<Value> {
        let path = format!("/checkin_schedule/{}", urlencoding::encode(user_id));
        self.get_json(&path, &[]).await
    }

    pub async fn trigger(&self, user_id: &str, check_in_type: Option<&str>) -> Result<Value> {
        let body = serde_json::json!({"user_id": user_id, "type": check_in_type});
        self.send_json(Method::POST, "/trigger", &body).await
    }

    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Value> {
        self.get_json(
            "/history",
            &[("user_id", user_id.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    pub async fn checkins(&self, user_id: &str, days: u32) -> Result<Value> {
        self.get_json(
            "/checkins",
            &[("user_id", user_id.to_string()), ("days", days.to_string())],
        )
        .await
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = join_url_with_query(&self.base_url, path, query);
        self.execute(self.client.get(url)).await
    }

    pub async fn send_json<T: Serialize>(&self, method: Method, path: &str, body: &T) -> Result<Value> {
        let url = join_url(&self.base_url, path);
        self.execute(self.client.request(method, url).json(body)).await
    }

    async fn execute(&self, mut request: RequestBuilder) -> Result<Value> {
        if !self.token.trim().is_empty() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", self.token));
        }
        let response = request
            .send()
            .await
            .map_err(|e| CheckinError::Http(e.to_string()))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| CheckinError::Serialization(e.to_string()))?;
        match status {
            s if s.is_success() => Ok(body),
            StatusCode::BAD_REQUEST => Err(CheckinError::Validation(error_text(&body))),
            StatusCode::NOT_FOUND => Err(CheckinError::NotFound(error_text(&body))),
            other => Err(CheckinError::Http(format!("{other}: {}", error_text(&body)))),
        }
    }
}

fn error_text(body: &Value) -> String {
    body.get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn join_url_with_query(base_url: &str, path: &str, query: &[(&str, String)]) -> String {
    let mut url = join_url(base_url, path);
    if !query.is_empty() {
        let query_string = query
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        url.push('?');
        url.push_str(&query_string);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_and_encodes_query() {
        assert_eq!(join_url("http://h:1/", "/health"), "http://h:1/health");
        assert_eq!(
            join_url_with_query("http://h:1", "history", &[("user_id", "a b".to_string())]),
            "http://h:1/history?user_id=a%20b"
        );
    }
}
