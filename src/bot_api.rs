//! HTTP client for the notetaker bot service.
//!
//! Covers scheduling, removal, batched status lookup, and the explicit
//! finalize call. All request and response bodies are snake_case JSON as
//! served by the backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::{ensure_success, send_with_retry, ApiError, RetryPolicy};
use crate::types::Config;

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleBotRequest {
    pub event_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub meet_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_on_join: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBotResponse {
    pub bot_id: String,
    #[serde(default)]
    pub attendee_response: Option<String>,
}

/// Per-link status detail. `state` is the backend's vocabulary
/// (scheduled, joining, running, ended, error).
#[derive(Debug, Clone, Deserialize)]
pub struct BotStatusDetail {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// Batched status response, keyed by meeting link.
#[derive(Debug, Default, Deserialize)]
pub struct BotStatusResponse {
    #[serde(default)]
    pub status: HashMap<String, String>,
    #[serde(default)]
    pub detail: HashMap<String, BotStatusDetail>,
}

#[derive(Debug, Serialize)]
struct BotStatusRequest<'a> {
    meet_links: &'a [String],
}

/// The bot service surface the engine depends on. Tests substitute an
/// in-memory impl; production wires [`BotServiceClient`].
#[async_trait]
pub trait BotServiceApi: Send + Sync {
    async fn schedule_bot(&self, req: &ScheduleBotRequest) -> Result<ScheduleBotResponse, ApiError>;
    async fn remove_bot(&self, bot_id: &str) -> Result<(), ApiError>;
    async fn bot_status(&self, meet_links: &[String]) -> Result<BotStatusResponse, ApiError>;
    async fn finalize_bot(&self, bot_id: &str) -> Result<(), ApiError>;
}

pub struct BotServiceClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl BotServiceClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.backend_base_url.trim_end_matches('/').to_string(),
            auth_token: config.backend_auth_token.clone(),
        }
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl BotServiceApi for BotServiceClient {
    async fn schedule_bot(&self, req: &ScheduleBotRequest) -> Result<ScheduleBotResponse, ApiError> {
        let request = self
            .authed(self.client.post(format!("{}/schedule-bot", self.base_url)))
            .json(req);
        // creation is not idempotent: a retry after a lost response would
        // put a second bot in the meeting
        let resp =
            ensure_success(send_with_retry(request, &RetryPolicy::single_attempt()).await?).await?;
        Ok(resp.json().await?)
    }

    async fn remove_bot(&self, bot_id: &str) -> Result<(), ApiError> {
        let request = self.authed(
            self.client
                .delete(format!("{}/schedule-bot/{}", self.base_url, bot_id)),
        );
        ensure_success(send_with_retry(request, &RetryPolicy::backoff_only()).await?).await?;
        Ok(())
    }

    async fn bot_status(&self, meet_links: &[String]) -> Result<BotStatusResponse, ApiError> {
        if meet_links.is_empty() {
            return Ok(BotStatusResponse::default());
        }
        let request = self
            .authed(self.client.post(format!("{}/bots/status", self.base_url)))
            .json(&BotStatusRequest { meet_links });
        let resp =
            ensure_success(send_with_retry(request, &RetryPolicy::backoff_only()).await?).await?;
        Ok(resp.json().await?)
    }

    async fn finalize_bot(&self, bot_id: &str) -> Result<(), ApiError> {
        let request = self.authed(
            self.client
                .post(format!("{}/bots/{}/finalize", self.base_url, bot_id)),
        );
        ensure_success(send_with_retry(request, &RetryPolicy::backoff_only()).await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_request_omits_absent_chat_message() {
        let req = ScheduleBotRequest {
            event_id: "e1".to_string(),
            title: "Standup".to_string(),
            start_time: chrono::Utc::now(),
            meet_link: "https://meet.google.com/abc-defg-hij".to_string(),
            chat_on_join: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("chat_on_join").is_none());
        assert_eq!(json["event_id"], "e1");
    }

    #[test]
    fn test_status_response_parses_both_maps() {
        let json = r#"{
            "status": {"https://meet.google.com/a": "bot-1"},
            "detail": {
                "https://meet.google.com/a": {"state": "running", "bot_id": "bot-1"},
                "https://meet.google.com/b": {"state": "ended"}
            }
        }"#;
        let resp: BotStatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status.len(), 1);
        let detail = &resp.detail["https://meet.google.com/b"];
        assert_eq!(detail.state.as_deref(), Some("ended"));
        assert!(detail.bot_id.is_none());
    }

    #[test]
    fn test_status_response_tolerates_missing_detail() {
        let resp: BotStatusResponse = serde_json::from_str(r#"{"status": {}}"#).unwrap();
        assert!(resp.detail.is_empty());
    }
}
