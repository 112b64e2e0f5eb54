//! Backend calendar proxy, the fallback event source.
//!
//! The bot service exposes a `GET /events` endpoint that reads the same
//! Google account server-side. It is consulted only when the direct
//! provider path fails wholesale, so a broken local token file does not
//! blank the event list.

use serde::Deserialize;

use crate::http::{ensure_success, send_with_retry, ApiError, RetryPolicy};
use crate::types::{CalendarRef, Config, Event, EventKey, FetchWindow};

/// Calendar id stamped on proxy-sourced events. The backend flattens all
/// calendars into one list, so dedup against direct-path events relies on
/// the composite key never colliding across sources.
pub const PROXY_CALENDAR_ID: &str = "backend-proxy";

#[derive(Debug, Deserialize)]
struct ProxyEventsResponse {
    #[serde(default)]
    events: Vec<RawProxyEvent>,
}

#[derive(Debug, Deserialize)]
struct RawProxyEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    meet_link: Option<String>,
    #[serde(default)]
    calendar_id: Option<String>,
}

pub struct ProxyClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ProxyClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.backend_base_url.trim_end_matches('/').to_string(),
            auth_token: config.backend_auth_token.clone(),
        }
    }

    pub async fn list_events(&self, window: &FetchWindow) -> Result<Vec<Event>, ApiError> {
        let mut request = self
            .client
            .get(format!("{}/events", self.base_url))
            .query(&[
                ("time_min", window.time_min.to_rfc3339()),
                ("time_max", window.time_max.to_rfc3339()),
            ]);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let resp = ensure_success(send_with_retry(request, &RetryPolicy::default()).await?).await?;
        let body: ProxyEventsResponse = resp.json().await?;

        Ok(body
            .events
            .into_iter()
            .filter_map(normalize_proxy_event)
            .collect())
    }
}

fn normalize_proxy_event(raw: RawProxyEvent) -> Option<Event> {
    let start = chrono::DateTime::parse_from_rfc3339(raw.start.as_deref()?)
        .ok()?
        .with_timezone(&chrono::Utc);
    let end = raw
        .end
        .as_deref()
        .and_then(|e| chrono::DateTime::parse_from_rfc3339(e).ok())
        .map(|e| e.with_timezone(&chrono::Utc));
    let calendar_id = raw
        .calendar_id
        .unwrap_or_else(|| PROXY_CALENDAR_ID.to_string());

    Some(Event {
        key: EventKey {
            event_id: raw.id,
            calendar_id: calendar_id.clone(),
        },
        calendar_name: calendar_id,
        title: raw.summary.unwrap_or_else(|| "(No title)".to_string()),
        start,
        end,
        meet_link: raw.meet_link.filter(|l| !l.is_empty()),
    })
}

/// The proxy appears to the aggregator as a single synthetic calendar.
pub fn proxy_calendar() -> CalendarRef {
    CalendarRef {
        id: PROXY_CALENDAR_ID.to_string(),
        display_name: "Backend proxy".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_proxy_event() {
        let raw: RawProxyEvent = serde_json::from_str(
            r#"{
                "id": "p1",
                "summary": "1:1",
                "start": "2026-08-29T16:00:00+00:00",
                "end": "2026-08-29T16:30:00+00:00",
                "meet_link": "https://meet.google.com/aaa-bbbb-ccc",
                "calendar_id": "primary"
            }"#,
        )
        .unwrap();
        let event = normalize_proxy_event(raw).unwrap();
        assert_eq!(event.key.calendar_id, "primary");
        assert_eq!(event.title, "1:1");
        assert!(event.meet_link.is_some());
    }

    #[test]
    fn test_normalize_proxy_event_defaults() {
        let raw: RawProxyEvent =
            serde_json::from_str(r#"{"id": "p2", "start": "2026-08-29T16:00:00Z"}"#).unwrap();
        let event = normalize_proxy_event(raw).unwrap();
        assert_eq!(event.key.calendar_id, PROXY_CALENDAR_ID);
        assert_eq!(event.title, "(No title)");
        assert!(event.end.is_none());
        assert!(event.meet_link.is_none());
    }

    #[test]
    fn test_normalize_proxy_event_bad_start_dropped() {
        let raw: RawProxyEvent =
            serde_json::from_str(r#"{"id": "p3", "start": "tomorrow"}"#).unwrap();
        assert!(normalize_proxy_event(raw).is_none());
    }
}
