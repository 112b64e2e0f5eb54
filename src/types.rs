//! Core domain types: calendar events, bot lifecycle records, transcript
//! utterances, and the engine configuration.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One calendar visible to the authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarRef {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

/// Composite identity of a calendar occurrence.
///
/// Event ids are unique only within their source calendar; the same id can
/// legitimately appear in two calendars and must be treated as two events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventKey {
    pub event_id: String,
    pub calendar_id: String,
}

/// A normalized calendar occurrence from one fetch cycle.
///
/// Events live only for one cycle: the next fetch replaces the canonical set
/// wholesale.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub key: EventKey,
    pub calendar_name: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub meet_link: Option<String>,
}

/// Coarse bot lifecycle state. Liveness is never stored; it is always
/// computed from the clock by the classifier, so stored and real state
/// cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BotState {
    Unscheduled,
    /// A bot exists for the event; it may be waiting, joining, or in-call.
    Scheduled,
    Ended,
}

/// Lifecycle record for a notetaking bot, keyed by the canonical event id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotRecord {
    /// Assigned by the bot service on creation; absent before scheduling.
    pub bot_id: Option<String>,
    pub state: BotState,
}

/// One unit of transcribed speech, append-only within a stream session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    /// Stable render key: the server-provided id when present, otherwise a
    /// deterministic composite of speaker, timestamp, and sequence position.
    pub key: String,
    pub speaker: String,
    pub text: String,
    pub timestamp_ms: Option<i64>,
}

/// Connectivity of the transcript push-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect budget exhausted; terminal for this stream handle.
    Failed,
}

/// Time bounds for one aggregation fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
}

impl FetchWindow {
    /// Window around `now` from the configured lookback/lookahead.
    pub fn around(now: DateTime<Utc>, config: &Config) -> Self {
        Self {
            time_min: now - Duration::hours(config.window_lookback_hours),
            time_max: now + Duration::days(config.window_lookahead_days),
        }
    }
}

/// Classifier output. `upcoming` is a superset of `live`: a live meeting
/// stays visible in the default view until its end time passes.
#[derive(Debug, Clone, Default)]
pub struct EventPartitions {
    pub live: Vec<Event>,
    pub upcoming: Vec<Event>,
    pub ended: Vec<Event>,
    /// The single event whose transcript stream should be open, if any.
    pub current_live: Option<Event>,
}

/// Snapshot of the bot map as exposed to read-only consumers.
pub type BotSnapshot = HashMap<String, BotRecord>;

// ============================================================================
// Configuration
// ============================================================================

/// Engine configuration, loaded from `~/.meetscribe/config.json`.
///
/// The heuristic time windows (liveness fallback, finalize grace) are
/// deliberately configuration rather than literals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the bot service (also the calendar proxy fallback).
    #[serde(default = "default_backend_base_url")]
    pub backend_base_url: String,
    /// Bearer token passed to the bot service, if it requires one.
    #[serde(default)]
    pub backend_auth_token: Option<String>,
    /// Seconds between aggregation refresh cycles.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Seconds between finalize sweeps.
    #[serde(default = "default_finalize_sweep_secs")]
    pub finalize_sweep_secs: u64,
    /// Minutes an end-time-less meeting is still considered live.
    #[serde(default = "default_live_fallback_minutes")]
    pub live_fallback_minutes: i64,
    /// Minutes after start before an end-time-less meeting is finalized.
    /// Shorter than the liveness fallback so finalize fires first.
    #[serde(default = "default_finalize_grace_minutes")]
    pub finalize_grace_minutes: i64,
    /// Drop events that resolve no meeting link.
    #[serde(default = "default_links_only")]
    pub links_only: bool,
    /// Per-request timeout applied to every network call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_window_lookback_hours")]
    pub window_lookback_hours: i64,
    #[serde(default = "default_window_lookahead_days")]
    pub window_lookahead_days: i64,
    #[serde(default)]
    pub stream: StreamReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        // serde defaults are the single source of truth
        serde_json::from_str("{}").expect("empty config object deserializes")
    }
}

impl Config {
    /// Path of the on-disk config file.
    pub fn path() -> std::path::PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".meetscribe")
            .join("config.json")
    }

    /// Load from disk; a missing file yields the defaults, a present but
    /// unparseable file is an error.
    pub fn load() -> Result<Self, crate::error::EngineError> {
        let path = Self::path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| {
            crate::error::EngineError::Configuration(format!(
                "{} is not valid config JSON: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn live_fallback_window(&self) -> Duration {
        Duration::minutes(self.live_fallback_minutes)
    }

    pub fn finalize_grace(&self) -> Duration {
        Duration::minutes(self.finalize_grace_minutes)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

/// Reconnect policy for the transcript push-stream: bounded exponential
/// backoff ending in a terminal `Failed` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamReconnectConfig {
    #[serde(default = "default_stream_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_stream_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_stream_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for StreamReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: default_stream_max_retries(),
            initial_backoff_ms: default_stream_initial_backoff_ms(),
            max_backoff_ms: default_stream_max_backoff_ms(),
        }
    }
}

fn default_backend_base_url() -> String {
    "http://localhost:8010".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_finalize_sweep_secs() -> u64 {
    60
}

fn default_live_fallback_minutes() -> i64 {
    120
}

fn default_finalize_grace_minutes() -> i64 {
    75
}

fn default_links_only() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_window_lookback_hours() -> i64 {
    12
}

fn default_window_lookahead_days() -> i64 {
    7
}

fn default_stream_max_retries() -> u32 {
    5
}

fn default_stream_initial_backoff_ms() -> u64 {
    1_000
}

fn default_stream_max_backoff_ms() -> u64 {
    30_000
}
