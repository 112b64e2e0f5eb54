//! Multi-calendar event aggregation.
//!
//! Calendars are fetched concurrently. A calendar that errors contributes a
//! `SourceError` instead of aborting the cycle; the merged list only fails
//! wholesale when the direct path yields nothing and the proxy fallback
//! also fails. Duplicates are collapsed on the composite (event id,
//! calendar id) key with last writer wins, and the result is sorted by
//! start time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::error::{EngineError, SourceError};
use crate::http::ApiError;
use crate::proxy::{self, ProxyClient};
use crate::types::{CalendarRef, Config, Event, FetchWindow};

/// A provider of calendar events. The direct Google path and the backend
/// proxy both sit behind this seam so the merge logic can be exercised
/// against in-memory sources in tests.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn list_calendars(&self) -> Result<Vec<CalendarRef>, ApiError>;
    async fn list_events(
        &self,
        calendar: &CalendarRef,
        window: &FetchWindow,
    ) -> Result<Vec<Event>, ApiError>;
}

/// Direct Google Calendar API source.
pub struct GoogleSource {
    client: reqwest::Client,
}

impl GoogleSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CalendarSource for GoogleSource {
    async fn list_calendars(&self) -> Result<Vec<CalendarRef>, ApiError> {
        crate::google_api::calendar::list_calendars(&self.client).await
    }

    async fn list_events(
        &self,
        calendar: &CalendarRef,
        window: &FetchWindow,
    ) -> Result<Vec<Event>, ApiError> {
        crate::google_api::calendar::list_events(&self.client, calendar, window).await
    }
}

/// Backend proxy source. The backend flattens the account into one list,
/// so it presents a single synthetic calendar.
pub struct ProxySource {
    inner: ProxyClient,
}

impl ProxySource {
    pub fn new(inner: ProxyClient) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CalendarSource for ProxySource {
    async fn list_calendars(&self) -> Result<Vec<CalendarRef>, ApiError> {
        Ok(vec![proxy::proxy_calendar()])
    }

    async fn list_events(
        &self,
        _calendar: &CalendarRef,
        window: &FetchWindow,
    ) -> Result<Vec<Event>, ApiError> {
        self.inner.list_events(window).await
    }
}

/// Result of one aggregation cycle. `partial_failures` carries the
/// calendars that errored while the rest succeeded.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub events: Vec<Event>,
    pub partial_failures: Vec<SourceError>,
}

pub struct EventAggregator {
    primary: Arc<dyn CalendarSource>,
    fallback: Option<Arc<dyn CalendarSource>>,
    links_only: bool,
}

impl EventAggregator {
    pub fn new(
        primary: Arc<dyn CalendarSource>,
        fallback: Option<Arc<dyn CalendarSource>>,
        config: &Config,
    ) -> Self {
        Self {
            primary,
            fallback,
            links_only: config.links_only,
        }
    }

    /// Fetch and merge events from every calendar of the primary source.
    ///
    /// The fallback source is consulted at most once per call, and only
    /// when the primary path produces nothing at all.
    pub async fn fetch(&self, window: &FetchWindow) -> Result<FetchOutcome, EngineError> {
        match self.fetch_primary(window).await {
            Ok(outcome) => Ok(outcome),
            Err(primary_err) => {
                log::warn!("primary event fetch failed: {}", primary_err);
                self.fetch_fallback(window, primary_err).await
            }
        }
    }

    async fn fetch_primary(&self, window: &FetchWindow) -> Result<FetchOutcome, String> {
        let calendars = self
            .primary
            .list_calendars()
            .await
            .map_err(|e| format!("calendar list failed: {}", e))?;
        if calendars.is_empty() {
            return Ok(FetchOutcome {
                events: self.finish(Vec::new()),
                partial_failures: Vec::new(),
            });
        }

        let mut set = JoinSet::new();
        for (index, calendar) in calendars.iter().cloned().enumerate() {
            let source = Arc::clone(&self.primary);
            let window = window.clone();
            set.spawn(async move {
                let result = source.list_events(&calendar, &window).await;
                (index, calendar, result)
            });
        }

        // Collect by index so merge order (and thus last-writer-wins) does
        // not depend on task completion order.
        let mut slots: Vec<Option<(CalendarRef, Result<Vec<Event>, ApiError>)>> = Vec::new();
        slots.resize_with(calendars.len(), || None);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, calendar, result)) => slots[index] = Some((calendar, result)),
                Err(e) => {
                    log::error!("calendar fetch task panicked: {}", e);
                }
            }
        }

        let mut merged: Vec<Event> = Vec::new();
        let mut partial_failures = Vec::new();
        let mut succeeded = 0usize;
        for (calendar, result) in slots.into_iter().flatten() {
            match result {
                Ok(events) => {
                    succeeded += 1;
                    merged.extend(events);
                }
                Err(e) => partial_failures.push(SourceError {
                    calendar,
                    message: e.to_string(),
                }),
            }
        }

        if succeeded == 0 {
            return Err(format!(
                "all {} calendar fetches failed",
                partial_failures.len()
            ));
        }

        Ok(FetchOutcome {
            events: self.finish(merged),
            partial_failures,
        })
    }

    async fn fetch_fallback(
        &self,
        window: &FetchWindow,
        primary_err: String,
    ) -> Result<FetchOutcome, EngineError> {
        let Some(fallback) = &self.fallback else {
            return Err(EngineError::TotalFetchFailure(primary_err));
        };

        let calendar = proxy::proxy_calendar();
        match fallback.list_events(&calendar, window).await {
            Ok(events) => {
                log::info!("event fetch served by fallback source");
                Ok(FetchOutcome {
                    events: self.finish(events),
                    partial_failures: Vec::new(),
                })
            }
            Err(fallback_err) => Err(EngineError::TotalFetchFailure(format!(
                "{}; fallback failed: {}",
                primary_err, fallback_err
            ))),
        }
    }

    /// Dedup, filter, sort. Later entries replace earlier ones that share
    /// the composite key.
    fn finish(&self, events: Vec<Event>) -> Vec<Event> {
        let mut by_key: HashMap<crate::types::EventKey, usize> = HashMap::new();
        let mut ordered: Vec<Option<Event>> = Vec::with_capacity(events.len());
        for event in events {
            match by_key.get(&event.key) {
                Some(&slot) => ordered[slot] = Some(event),
                None => {
                    by_key.insert(event.key.clone(), ordered.len());
                    ordered.push(Some(event));
                }
            }
        }

        let mut result: Vec<Event> = ordered
            .into_iter()
            .flatten()
            .filter(|e| !self.links_only || e.meet_link.is_some())
            .collect();
        // Stable sort keeps first-seen order among events sharing a start.
        result.sort_by_key(|e| e.start);
        result
    }
}
