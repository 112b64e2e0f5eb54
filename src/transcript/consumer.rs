//! Transcript stream consumer.
//!
//! One [`TranscriptStream`] handle corresponds to one bot's SSE endpoint.
//! Utterances are appended strictly in arrival order; reconnects use
//! bounded exponential backoff and end in a terminal `Failed` status once
//! the budget is exhausted.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;

use super::sse::{SseEvent, SseParser};
use crate::types::{Config, StreamStatus, Utterance};

/// Utterance payload as pushed by the server. Field names vary by
/// transcription backend, hence the aliases; normalization confines that
/// mess to this boundary.
#[derive(Debug, Deserialize)]
struct RawUtterance {
    #[serde(default, alias = "speaker_name")]
    speaker: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    transcription: Option<RawTranscription>,
    #[serde(default, alias = "message_uuid")]
    id: Option<String>,
    #[serde(default)]
    timestamp_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawTranscription {
    #[serde(default)]
    transcript: Option<String>,
}

/// Normalize a raw payload, or drop it when no usable text survives.
/// `seq` is the arrival position, used in the fallback key so two
/// identical fragments never collide.
fn normalize_utterance(raw: RawUtterance, seq: usize) -> Option<Utterance> {
    let text = raw
        .text
        .or(raw.transcription.and_then(|t| t.transcript))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())?;
    let speaker = raw
        .speaker
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());
    let key = raw
        .id
        .unwrap_or_else(|| format!("{}:{}:{}", speaker, raw.timestamp_ms.unwrap_or(0), seq));
    Some(Utterance {
        key,
        speaker,
        text,
        timestamp_ms: raw.timestamp_ms,
    })
}

#[derive(Default)]
struct StreamInner {
    status: Mutex<StreamStatus>,
    utterances: Mutex<Vec<Utterance>>,
}

/// Handle to one bot's live transcript. Dropping via [`close`] tears the
/// background task down synchronously.
///
/// [`close`]: TranscriptStream::close
pub struct TranscriptStream {
    bot_id: String,
    inner: Arc<StreamInner>,
    task: JoinHandle<()>,
}

impl TranscriptStream {
    /// Open the stream for `bot_id` and start consuming in the background.
    pub fn open(config: &Config, bot_id: &str) -> Self {
        let inner = Arc::new(StreamInner::default());
        let url = format!(
            "{}/bots/{}/transcript/stream",
            config.backend_base_url.trim_end_matches('/'),
            bot_id
        );
        let worker = StreamWorker {
            url,
            auth_token: config.backend_auth_token.clone(),
            bot_id: bot_id.to_string(),
            reconnect: config.stream.clone(),
            connect_timeout: config.request_timeout(),
            inner: Arc::clone(&inner),
        };
        let task = tokio::spawn(worker.run());
        Self {
            bot_id: bot_id.to_string(),
            inner,
            task,
        }
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn status(&self) -> StreamStatus {
        *self.inner.status.lock()
    }

    /// Utterances received so far, in arrival order.
    pub fn utterances(&self) -> Vec<Utterance> {
        self.inner.utterances.lock().clone()
    }

    /// Stop consuming. Already-received utterances stay readable through
    /// this handle.
    pub fn close(&self) {
        self.task.abort();
        *self.inner.status.lock() = StreamStatus::Disconnected;
    }
}

impl Drop for TranscriptStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// What to do after a connection attempt fails or the stream drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectStep {
    /// Sleep this long, then reconnect.
    Backoff(std::time::Duration),
    /// Retry budget exhausted; the stream is terminally failed.
    GiveUp,
}

/// Reconnect policy: exponential backoff from the initial delay, capped,
/// giving up once `consecutive_failures` exceeds the retry budget. A clean
/// server-side close (zero failures) reconnects after the initial delay.
fn reconnect_step(
    consecutive_failures: u32,
    policy: &crate::types::StreamReconnectConfig,
) -> ReconnectStep {
    if consecutive_failures > policy.max_retries {
        return ReconnectStep::GiveUp;
    }
    let exponent = consecutive_failures.saturating_sub(1).min(16);
    let backoff = policy
        .initial_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(policy.max_backoff_ms);
    ReconnectStep::Backoff(std::time::Duration::from_millis(backoff))
}

struct StreamWorker {
    url: String,
    auth_token: Option<String>,
    bot_id: String,
    reconnect: crate::types::StreamReconnectConfig,
    connect_timeout: std::time::Duration,
    inner: Arc<StreamInner>,
}

impl StreamWorker {
    async fn run(self) {
        // No total request timeout; the stream is long-lived.
        let client = match reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                log::error!("transcript client build failed: {}", e);
                *self.inner.status.lock() = StreamStatus::Failed;
                return;
            }
        };

        let mut consecutive_failures: u32 = 0;
        loop {
            *self.inner.status.lock() = StreamStatus::Connecting;
            match self.consume_once(&client).await {
                Ok(()) => {
                    // clean disconnect (server closed); reconnect fresh
                    consecutive_failures = 0;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    log::warn!(
                        "transcript stream for bot {} dropped (attempt {}): {}",
                        self.bot_id,
                        consecutive_failures,
                        e
                    );
                }
            }
            *self.inner.status.lock() = StreamStatus::Disconnected;

            match reconnect_step(consecutive_failures, &self.reconnect) {
                ReconnectStep::GiveUp => {
                    log::error!(
                        "transcript stream for bot {} exhausted {} reconnect attempts",
                        self.bot_id,
                        self.reconnect.max_retries
                    );
                    *self.inner.status.lock() = StreamStatus::Failed;
                    return;
                }
                ReconnectStep::Backoff(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    async fn consume_once(&self, client: &reqwest::Client) -> Result<(), String> {
        let mut request = client.get(&self.url).header("Accept", "text/event-stream");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }

        *self.inner.status.lock() = StreamStatus::Connected;
        log::info!("transcript stream connected for bot {}", self.bot_id);

        let mut parser = SseParser::new();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            for event in parser.feed(&chunk) {
                ingest_event(&event, &self.inner.utterances);
            }
        }
        Ok(())
    }
}

/// Apply one SSE event to the utterance log. Keepalives and malformed
/// payloads are dropped without disturbing order.
fn ingest_event(event: &SseEvent, utterances: &Mutex<Vec<Utterance>>) {
    if event.event != "utterance" {
        return;
    }
    let raw: RawUtterance = match serde_json::from_str(&event.data) {
        Ok(raw) => raw,
        Err(e) => {
            log::debug!("dropping malformed utterance payload: {}", e);
            return;
        }
    };
    let mut log = utterances.lock();
    let seq = log.len();
    if let Some(utterance) = normalize_utterance(raw, seq) {
        log.push(utterance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utterance_event(data: &str) -> SseEvent {
        SseEvent {
            event: "utterance".to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_normalize_canonical_fields() {
        let raw: RawUtterance = serde_json::from_str(
            r#"{"id": "u1", "speaker": "Ada", "text": "hello", "timestamp_ms": 1500}"#,
        )
        .unwrap();
        let u = normalize_utterance(raw, 0).unwrap();
        assert_eq!(u.key, "u1");
        assert_eq!(u.speaker, "Ada");
        assert_eq!(u.text, "hello");
        assert_eq!(u.timestamp_ms, Some(1500));
    }

    #[test]
    fn test_normalize_aliased_fields() {
        let raw: RawUtterance = serde_json::from_str(
            r#"{
                "message_uuid": "m-9",
                "speaker_name": "Grace",
                "transcription": {"transcript": "nested text"}
            }"#,
        )
        .unwrap();
        let u = normalize_utterance(raw, 3).unwrap();
        assert_eq!(u.key, "m-9");
        assert_eq!(u.speaker, "Grace");
        assert_eq!(u.text, "nested text");
    }

    #[test]
    fn test_normalize_fallback_key_uses_sequence() {
        let mk = || RawUtterance {
            speaker: Some("Ada".to_string()),
            text: Some("same".to_string()),
            transcription: None,
            id: None,
            timestamp_ms: Some(1000),
        };
        let a = normalize_utterance(mk(), 0).unwrap();
        let b = normalize_utterance(mk(), 1).unwrap();
        assert_eq!(a.key, "Ada:1000:0");
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_normalize_drops_empty_text() {
        let raw: RawUtterance =
            serde_json::from_str(r#"{"speaker": "Ada", "text": "   "}"#).unwrap();
        assert!(normalize_utterance(raw, 0).is_none());
    }

    #[test]
    fn test_reconnect_backoff_doubles_to_cap() {
        let policy = crate::types::StreamReconnectConfig {
            max_retries: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        };
        let delays: Vec<ReconnectStep> =
            (1..=5).map(|n| reconnect_step(n, &policy)).collect();
        assert_eq!(
            delays,
            [1_000, 2_000, 4_000, 8_000, 16_000]
                .map(|ms| ReconnectStep::Backoff(std::time::Duration::from_millis(ms)))
        );
    }

    #[test]
    fn test_reconnect_backoff_respects_cap() {
        let policy = crate::types::StreamReconnectConfig {
            max_retries: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
        };
        assert_eq!(
            reconnect_step(8, &policy),
            ReconnectStep::Backoff(std::time::Duration::from_millis(5_000))
        );
    }

    #[test]
    fn test_reconnect_gives_up_past_budget() {
        let policy = crate::types::StreamReconnectConfig {
            max_retries: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        };
        assert_ne!(reconnect_step(5, &policy), ReconnectStep::GiveUp);
        assert_eq!(reconnect_step(6, &policy), ReconnectStep::GiveUp);
    }

    #[test]
    fn test_reconnect_after_clean_close_uses_initial_delay() {
        let policy = crate::types::StreamReconnectConfig::default();
        assert_eq!(
            reconnect_step(0, &policy),
            ReconnectStep::Backoff(std::time::Duration::from_millis(
                policy.initial_backoff_ms
            ))
        );
    }

    #[test]
    fn test_ingest_preserves_arrival_order() {
        let utterances = Mutex::new(Vec::new());
        ingest_event(&utterance_event(r#"{"speaker": "A", "text": "one"}"#), &utterances);
        ingest_event(
            &SseEvent {
                event: "ping".to_string(),
                data: "{}".to_string(),
            },
            &utterances,
        );
        ingest_event(&utterance_event("not json"), &utterances);
        ingest_event(&utterance_event(r#"{"speaker": "B", "text": "two"}"#), &utterances);

        let log = utterances.lock();
        let texts: Vec<&str> = log.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, ["one", "two"]);
    }
}
