//! Error taxonomy for the reconciliation engine.
//!
//! Propagation policy: failures that would corrupt the user's mental model of
//! bot state (schedule/remove) are always surfaced; failures redundant with a
//! server-side safety mechanism (finalize) are swallowed by the caller;
//! failures local to one data source (a single calendar, a single stream
//! message) are isolated into `SourceError` values and never abort the cycle.

use serde::Serialize;
use thiserror::Error;

use crate::types::CalendarRef;

/// Crate-level errors surfaced to callers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Both the direct provider path and the proxy fallback failed.
    #[error("total fetch failure: {0}")]
    TotalFetchFailure(String),

    #[error("failed to schedule bot for event {event_id}: {message}")]
    ScheduleFailed { event_id: String, message: String },

    #[error("failed to remove bot for event {event_id}: {message}")]
    RemoveFailed { event_id: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Returns true if retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TotalFetchFailure(_)
                | EngineError::ScheduleFailed { .. }
                | EngineError::RemoveFailed { .. }
        )
    }
}

/// One calendar's failure within an otherwise successful fetch.
///
/// Recorded and returned alongside the events from healthy calendars; a
/// broken calendar must never hide events from the others.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceError {
    pub calendar: CalendarRef,
    pub message: String,
}
