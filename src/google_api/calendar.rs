//! Google Calendar endpoints: calendar list and event list, plus
//! normalization of the wire payloads into engine [`Event`]s.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::http::{ensure_success, send_with_retry, ApiError, RetryPolicy};
use crate::meet_link;
use crate::types::{CalendarRef, Event, EventKey, FetchWindow};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// One page of the calendarList endpoint.
#[derive(Debug, Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<RawCalendarEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCalendarEntry {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(rename = "summaryOverride", default)]
    summary_override: Option<String>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct EventListResponse {
    #[serde(default)]
    items: Vec<RawEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Raw event as returned by the events.list endpoint. Only the fields the
/// engine consumes are modeled; everything else is dropped at the boundary.
#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    start: Option<RawEventTime>,
    #[serde(default)]
    end: Option<RawEventTime>,
    #[serde(rename = "hangoutLink", default)]
    hangout_link: Option<String>,
    #[serde(rename = "conferenceData", default)]
    conference_data: Option<RawConferenceData>,
}

#[derive(Debug, Deserialize)]
struct RawEventTime {
    #[serde(rename = "dateTime", default)]
    date_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConferenceData {
    #[serde(rename = "entryPoints", default)]
    entry_points: Vec<RawEntryPoint>,
}

#[derive(Debug, Deserialize)]
struct RawEntryPoint {
    #[serde(rename = "entryPointType", default)]
    entry_point_type: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

/// Parse an event time. Timed events carry RFC 3339 `dateTime`; all-day
/// events carry a bare `date` which is pinned to midnight UTC.
fn parse_event_time(raw: &RawEventTime) -> Option<DateTime<Utc>> {
    if let Some(dt) = &raw.date_time {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(dt) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    if let Some(date) = &raw.date {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&format!("{}T00:00:00Z", date)) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    None
}

fn normalize_event(raw: RawEvent, calendar: &CalendarRef) -> Option<Event> {
    if raw.status.as_deref() == Some("cancelled") {
        return None;
    }
    let start = parse_event_time(raw.start.as_ref()?)?;
    let end = raw.end.as_ref().and_then(parse_event_time);

    // Structured conferencing fields first, then free text in priority order.
    let mut structured: Vec<&str> = Vec::new();
    if let Some(link) = raw.hangout_link.as_deref() {
        structured.push(link);
    }
    if let Some(conf) = &raw.conference_data {
        for ep in &conf.entry_points {
            if ep.entry_point_type.as_deref() == Some("video") {
                if let Some(uri) = ep.uri.as_deref() {
                    structured.push(uri);
                }
            }
        }
    }
    let texts = [
        raw.description.as_deref().unwrap_or(""),
        raw.location.as_deref().unwrap_or(""),
    ];
    let meet_link = meet_link::resolve(structured, texts);

    Some(Event {
        key: EventKey {
            event_id: raw.id,
            calendar_id: calendar.id.clone(),
        },
        calendar_name: calendar.display_name.clone(),
        title: raw.summary.unwrap_or_else(|| "(No title)".to_string()),
        start,
        end,
        meet_link,
    })
}

/// List all calendars the account can see, following pagination.
pub async fn list_calendars(client: &reqwest::Client) -> Result<Vec<CalendarRef>, ApiError> {
    let access_token = super::get_valid_access_token(client).await?;
    let policy = RetryPolicy::default();

    let mut calendars = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let mut request = client
            .get(format!("{}/users/me/calendarList", CALENDAR_API_BASE))
            .bearer_auth(&access_token)
            .query(&[("maxResults", "250")]);
        if let Some(token) = &page_token {
            request = request.query(&[("pageToken", token.as_str())]);
        }

        let resp = ensure_success(send_with_retry(request, &policy).await?).await?;
        let page: CalendarListResponse = resp.json().await?;

        for entry in page.items {
            if entry.deleted {
                continue;
            }
            let display_name = entry
                .summary_override
                .or(entry.summary)
                .unwrap_or_else(|| entry.id.clone());
            calendars.push(CalendarRef {
                id: entry.id,
                display_name,
            });
        }

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(calendars)
}

/// List events for a single calendar inside the fetch window, expanded to
/// single instances and ordered by start time by the server.
pub async fn list_events(
    client: &reqwest::Client,
    calendar: &CalendarRef,
    window: &FetchWindow,
) -> Result<Vec<Event>, ApiError> {
    let access_token = super::get_valid_access_token(client).await?;
    let policy = RetryPolicy::default();

    let encoded_id = urlencode(&calendar.id);
    let mut events = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let mut request = client
            .get(format!(
                "{}/calendars/{}/events",
                CALENDAR_API_BASE, encoded_id
            ))
            .bearer_auth(&access_token)
            .query(&[
                ("timeMin", window.time_min.to_rfc3339().as_str()),
                ("timeMax", window.time_max.to_rfc3339().as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
                ("maxResults", "250"),
            ]);
        if let Some(token) = &page_token {
            request = request.query(&[("pageToken", token.as_str())]);
        }

        let resp = ensure_success(send_with_retry(request, &policy).await?).await?;
        let page: EventListResponse = resp.json().await?;

        events.extend(
            page.items
                .into_iter()
                .filter_map(|raw| normalize_event(raw, calendar)),
        );

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(events)
}

/// Percent-encode a calendar id for use as a path segment. Calendar ids are
/// email-shaped, so only a small character set needs escaping.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'@' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_calendar() -> CalendarRef {
        CalendarRef {
            id: "primary".to_string(),
            display_name: "Work".to_string(),
        }
    }

    #[test]
    fn test_normalize_timed_event_with_hangout_link() {
        let raw: RawEvent = serde_json::from_str(
            r#"{
                "id": "evt1",
                "summary": "Standup",
                "start": {"dateTime": "2026-08-29T10:00:00-04:00"},
                "end": {"dateTime": "2026-08-29T10:30:00-04:00"},
                "hangoutLink": "https://meet.google.com/abc-defg-hij"
            }"#,
        )
        .unwrap();
        let event = normalize_event(raw, &test_calendar()).unwrap();
        assert_eq!(event.key.event_id, "evt1");
        assert_eq!(event.key.calendar_id, "primary");
        assert_eq!(event.title, "Standup");
        assert_eq!(
            event.meet_link.as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );
        assert_eq!(event.start.to_rfc3339(), "2026-08-29T14:00:00+00:00");
        assert!(event.end.is_some());
    }

    #[test]
    fn test_normalize_all_day_event() {
        let raw: RawEvent = serde_json::from_str(
            r#"{
                "id": "evt2",
                "summary": "Offsite",
                "start": {"date": "2026-08-30"},
                "end": {"date": "2026-08-31"}
            }"#,
        )
        .unwrap();
        let event = normalize_event(raw, &test_calendar()).unwrap();
        assert_eq!(event.start.to_rfc3339(), "2026-08-30T00:00:00+00:00");
        assert!(event.meet_link.is_none());
    }

    #[test]
    fn test_normalize_skips_cancelled() {
        let raw: RawEvent = serde_json::from_str(
            r#"{"id": "evt3", "status": "cancelled", "start": {"date": "2026-08-30"}}"#,
        )
        .unwrap();
        assert!(normalize_event(raw, &test_calendar()).is_none());
    }

    #[test]
    fn test_normalize_skips_missing_start() {
        let raw: RawEvent = serde_json::from_str(r#"{"id": "evt4", "summary": "Broken"}"#).unwrap();
        assert!(normalize_event(raw, &test_calendar()).is_none());
    }

    #[test]
    fn test_normalize_link_from_description() {
        let raw: RawEvent = serde_json::from_str(
            r#"{
                "id": "evt5",
                "summary": "Vendor sync",
                "start": {"dateTime": "2026-08-29T15:00:00Z"},
                "description": "Join here: https://acme.zoom.us/j/99887766"
            }"#,
        )
        .unwrap();
        let event = normalize_event(raw, &test_calendar()).unwrap();
        assert_eq!(
            event.meet_link.as_deref(),
            Some("https://acme.zoom.us/j/99887766")
        );
    }

    #[test]
    fn test_normalize_conference_entry_point() {
        let raw: RawEvent = serde_json::from_str(
            r#"{
                "id": "evt6",
                "summary": "Review",
                "start": {"dateTime": "2026-08-29T15:00:00Z"},
                "conferenceData": {
                    "entryPoints": [
                        {"entryPointType": "phone", "uri": "tel:+1-555-0100"},
                        {"entryPointType": "video", "uri": "https://meet.google.com/xyz-1234"}
                    ]
                }
            }"#,
        )
        .unwrap();
        let event = normalize_event(raw, &test_calendar()).unwrap();
        assert_eq!(
            event.meet_link.as_deref(),
            Some("https://meet.google.com/xyz-1234")
        );
    }

    #[test]
    fn test_urlencode_calendar_id() {
        assert_eq!(urlencode("team@example.com"), "team@example.com");
        assert_eq!(urlencode("a#b c"), "a%23b%20c");
    }
}
