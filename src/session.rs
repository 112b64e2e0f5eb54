//! Engine session: owns the refresh and finalize loops and the single
//! open transcript stream.
//!
//! Lock discipline: plain snapshots (events, failures, stream handle) sit
//! behind `parking_lot` mutexes and are never held across an await. The
//! tracker and finalizer run async work while locked, so they use the
//! tokio mutex.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::aggregator::{EventAggregator, GoogleSource, ProxySource};
use crate::bot_api::{BotServiceApi, BotServiceClient};
use crate::classify;
use crate::error::{EngineError, SourceError};
use crate::finalizer::FinalizationScheduler;
use crate::http;
use crate::lifecycle::BotLifecycleTracker;
use crate::proxy::ProxyClient;
use crate::transcript::TranscriptStream;
use crate::types::{
    BotRecord, Config, Event, EventPartitions, FetchWindow, StreamStatus, Utterance,
};

struct SessionState {
    events: parking_lot::Mutex<Vec<Event>>,
    failures: parking_lot::Mutex<Vec<SourceError>>,
    tracker: tokio::sync::Mutex<BotLifecycleTracker>,
    finalizer: tokio::sync::Mutex<FinalizationScheduler>,
    stream: parking_lot::Mutex<Option<TranscriptStream>>,
    /// Woken after each refresh cycle so the finalize sweep sees fresh
    /// data without waiting out its interval.
    changed: Notify,
}

pub struct Session {
    config: Config,
    aggregator: Arc<EventAggregator>,
    bot_api: Arc<dyn BotServiceApi>,
    state: Arc<SessionState>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Wire the production sources: direct Google Calendar primary,
    /// backend proxy fallback, backend bot service.
    pub fn new(config: Config) -> Self {
        let client = http::build_client(config.request_timeout());
        let primary = Arc::new(GoogleSource::new(client.clone()));
        let fallback = Arc::new(ProxySource::new(ProxyClient::new(client.clone(), &config)));
        let bot_api = Arc::new(BotServiceClient::new(client, &config));
        let aggregator = Arc::new(EventAggregator::new(primary, Some(fallback), &config));
        Self::with_sources(config, aggregator, bot_api)
    }

    /// Assemble from pre-built parts. Tests inject in-memory sources here.
    pub fn with_sources(
        config: Config,
        aggregator: Arc<EventAggregator>,
        bot_api: Arc<dyn BotServiceApi>,
    ) -> Self {
        let state = Arc::new(SessionState {
            events: parking_lot::Mutex::new(Vec::new()),
            failures: parking_lot::Mutex::new(Vec::new()),
            tracker: tokio::sync::Mutex::new(BotLifecycleTracker::new(Arc::clone(&bot_api))),
            finalizer: tokio::sync::Mutex::new(FinalizationScheduler::new(
                config.finalize_grace(),
            )),
            stream: parking_lot::Mutex::new(None),
            changed: Notify::new(),
        });
        Self {
            config,
            aggregator,
            bot_api,
            state,
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Start the background loops. Idempotent start is not supported;
    /// call once per session.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        let session = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(session.config.refresh_interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                session.refresh_cycle().await;
            }
        }));

        let session = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(session.config.finalize_sweep_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = session.state.changed.notified() => {}
                }
                session.finalize_sweep().await;
            }
        }));
    }

    /// One full refresh: fetch, status sync, classify, stream switch.
    pub async fn refresh_cycle(&self) {
        let now = Utc::now();
        let window = FetchWindow::around(now, &self.config);

        match self.aggregator.fetch(&window).await {
            Ok(outcome) => {
                for failure in &outcome.partial_failures {
                    log::warn!(
                        "calendar {} failed this cycle: {}",
                        failure.calendar.id,
                        failure.message
                    );
                }
                *self.state.events.lock() = outcome.events;
                *self.state.failures.lock() = outcome.partial_failures;
            }
            Err(e) => {
                // keep showing the previous canonical set
                log::error!("event fetch failed entirely, keeping stale events: {}", e);
            }
        }

        let events = self.state.events.lock().clone();
        let snapshot = {
            let mut tracker = self.state.tracker.lock().await;
            tracker.refresh_status(&events).await;
            tracker.snapshot()
        };

        let partitions = classify::classify(
            &events,
            &snapshot,
            Utc::now(),
            self.config.live_fallback_window(),
        );
        let desired_bot = partitions
            .current_live
            .as_ref()
            .and_then(|e| snapshot.get(&e.key.event_id))
            .and_then(|r| r.bot_id.clone());
        self.switch_stream(desired_bot);

        self.state.changed.notify_one();
    }

    /// Point the single transcript stream at `desired_bot`, tearing down
    /// whatever it was following before.
    fn switch_stream(&self, desired_bot: Option<String>) {
        let mut slot = self.state.stream.lock();
        let current_bot = slot.as_ref().map(|s| s.bot_id().to_string());
        if current_bot == desired_bot {
            return;
        }
        if let Some(stream) = slot.take() {
            log::info!("closing transcript stream for bot {}", stream.bot_id());
            stream.close();
        }
        if let Some(bot_id) = desired_bot {
            *slot = Some(TranscriptStream::open(&self.config, &bot_id));
        }
    }

    async fn finalize_sweep(&self) {
        let events = self.state.events.lock().clone();
        let snapshot = self.state.tracker.lock().await.snapshot();
        let swept = {
            let mut finalizer = self.state.finalizer.lock().await;
            finalizer
                .sweep(&events, &snapshot, Utc::now(), self.bot_api.as_ref())
                .await
        };
        if !swept.is_empty() {
            let mut tracker = self.state.tracker.lock().await;
            for bot_id in &swept {
                tracker.mark_ended(bot_id);
            }
        }
    }

    pub async fn schedule_bot(
        &self,
        event_id: &str,
        chat_on_join: Option<String>,
    ) -> Result<BotRecord, EngineError> {
        let event = self
            .state
            .events
            .lock()
            .iter()
            .find(|e| e.key.event_id == event_id)
            .cloned()
            .ok_or_else(|| EngineError::ScheduleFailed {
                event_id: event_id.to_string(),
                message: "unknown event".to_string(),
            })?;
        self.state
            .tracker
            .lock()
            .await
            .schedule(&event, chat_on_join)
            .await
    }

    pub async fn remove_bot(&self, event_id: &str) -> Result<(), EngineError> {
        self.state.tracker.lock().await.remove(event_id).await
    }

    /// Current classification of the last fetched event set.
    pub async fn partitions(&self) -> EventPartitions {
        let events = self.state.events.lock().clone();
        let snapshot = self.state.tracker.lock().await.snapshot();
        classify::classify(
            &events,
            &snapshot,
            Utc::now(),
            self.config.live_fallback_window(),
        )
    }

    pub fn partial_failures(&self) -> Vec<SourceError> {
        self.state.failures.lock().clone()
    }

    pub fn stream_status(&self) -> StreamStatus {
        self.state
            .stream
            .lock()
            .as_ref()
            .map(|s| s.status())
            .unwrap_or(StreamStatus::Disconnected)
    }

    /// Plain-text rendering of the live transcript so far.
    pub fn transcript_text(&self) -> String {
        let utterances = match self.state.stream.lock().as_ref() {
            Some(stream) => stream.utterances(),
            None => return String::new(),
        };
        format_transcript(&utterances)
    }

    /// Stop the loops and close the stream. Safe to call more than once.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(stream) = self.state.stream.lock().take() {
            stream.close();
        }
        log::info!("session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Render utterances one per line as `[HH:MM:SS] Speaker: text`, the
/// offset taken from the utterance timestamp. Timestamp-less utterances
/// drop the bracket.
fn format_transcript(utterances: &[Utterance]) -> String {
    let mut out = String::new();
    for u in utterances {
        match u.timestamp_ms {
            Some(ms) => {
                let total_secs = (ms.max(0)) / 1000;
                out.push_str(&format!(
                    "[{:02}:{:02}:{:02}] {}: {}\n",
                    total_secs / 3600,
                    (total_secs / 60) % 60,
                    total_secs % 60,
                    u.speaker,
                    u.text
                ));
            }
            None => out.push_str(&format!("{}: {}\n", u.speaker, u.text)),
        }
    }
    out
}
