//! Finalization sweep.
//!
//! Ensures every bot whose meeting is over receives at most one explicit
//! finalize request per process, even if the server-side ended signal never
//! arrives. The call is best effort: a failed request still counts as
//! triggered, since the server runs its own finalize safety net and a
//! retry storm helps nobody.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::bot_api::BotServiceApi;
use crate::types::{BotSnapshot, BotState, Event};

/// True once the meeting is over for finalization purposes: its end time
/// has passed, or it has no end time and the grace period since start has
/// elapsed.
pub fn should_finalize(event: &Event, now: DateTime<Utc>, grace: Duration) -> bool {
    match event.end {
        Some(end) => end <= now,
        None => now - event.start >= grace,
    }
}

pub struct FinalizationScheduler {
    grace: Duration,
    /// Bot ids already sent a finalize request this process.
    triggered: HashSet<String>,
}

impl FinalizationScheduler {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            triggered: HashSet::new(),
        }
    }

    /// Bot ids due for finalization at `now`. Every returned id is marked
    /// triggered before this returns, so concurrent or repeated sweeps
    /// cannot double-fire.
    fn collect_due(&mut self, events: &[Event], bots: &BotSnapshot, now: DateTime<Utc>) -> Vec<String> {
        let mut due = Vec::new();
        for event in events {
            let Some(record) = bots.get(&event.key.event_id) else {
                continue;
            };
            if record.state != BotState::Scheduled {
                continue;
            }
            let Some(bot_id) = &record.bot_id else {
                continue;
            };
            if !should_finalize(event, now, self.grace) {
                continue;
            }
            if self.triggered.insert(bot_id.clone()) {
                due.push(bot_id.clone());
            }
        }
        due
    }

    /// Run one sweep: request finalize for every due bot and return the
    /// ids swept, which the caller marks Ended locally.
    pub async fn sweep(
        &mut self,
        events: &[Event],
        bots: &BotSnapshot,
        now: DateTime<Utc>,
        api: &dyn BotServiceApi,
    ) -> Vec<String> {
        let due = self.collect_due(events, bots, now);
        for bot_id in &due {
            match api.finalize_bot(bot_id).await {
                Ok(()) => log::info!("finalized bot {}", bot_id),
                Err(e) => log::warn!("finalize request for bot {} failed: {}", bot_id, e),
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot_api::{BotStatusResponse, ScheduleBotRequest, ScheduleBotResponse};
    use crate::http::ApiError;
    use crate::types::{BotRecord, EventKey};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingApi {
        fail: bool,
        finalized: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BotServiceApi for RecordingApi {
        async fn schedule_bot(
            &self,
            _req: &ScheduleBotRequest,
        ) -> Result<ScheduleBotResponse, ApiError> {
            unreachable!("not used by finalizer tests")
        }

        async fn remove_bot(&self, _bot_id: &str) -> Result<(), ApiError> {
            unreachable!("not used by finalizer tests")
        }

        async fn bot_status(&self, _links: &[String]) -> Result<BotStatusResponse, ApiError> {
            unreachable!("not used by finalizer tests")
        }

        async fn finalize_bot(&self, bot_id: &str) -> Result<(), ApiError> {
            self.finalized.lock().push(bot_id.to_string());
            if self.fail {
                return Err(ApiError::RefreshFailed("finalize down".to_string()));
            }
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 29, 12, 0, 0).unwrap()
    }

    fn event(id: &str, start_offset_min: i64, duration_min: Option<i64>) -> Event {
        let start = now() + Duration::minutes(start_offset_min);
        Event {
            key: EventKey {
                event_id: id.to_string(),
                calendar_id: "primary".to_string(),
            },
            calendar_name: "primary".to_string(),
            title: id.to_string(),
            start,
            end: duration_min.map(|d| start + Duration::minutes(d)),
            meet_link: Some("https://meet.google.com/abc".to_string()),
        }
    }

    fn scheduled(entries: &[&str]) -> BotSnapshot {
        entries
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    BotRecord {
                        bot_id: Some(format!("bot-{}", id)),
                        state: BotState::Scheduled,
                    },
                )
            })
            .collect()
    }

    fn grace() -> Duration {
        Duration::minutes(75)
    }

    #[test]
    fn test_should_finalize_conditions() {
        let n = now();
        // end passed
        assert!(should_finalize(&event("a", -60, Some(30)), n, grace()));
        // still in progress
        assert!(!should_finalize(&event("b", -10, Some(30)), n, grace()));
        // no end, grace elapsed
        assert!(should_finalize(&event("c", -80, None), n, grace()));
        // no end, inside grace
        assert!(!should_finalize(&event("d", -70, None), n, grace()));
        // not started
        assert!(!should_finalize(&event("e", 30, Some(30)), n, grace()));
    }

    #[tokio::test]
    async fn test_sweep_finalizes_due_bots_once() {
        let api = RecordingApi::default();
        let mut scheduler = FinalizationScheduler::new(grace());
        let events = vec![event("a", -60, Some(30)), event("b", -10, Some(30))];
        let bots = scheduled(&["a", "b"]);

        let swept = scheduler.sweep(&events, &bots, now(), &api).await;
        assert_eq!(swept, ["bot-a"]);

        // repeated sweeps never re-fire for the same bot
        let swept = scheduler.sweep(&events, &bots, now(), &api).await;
        assert!(swept.is_empty());
        assert_eq!(api.finalized.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_skips_untracked_and_ended() {
        let api = RecordingApi::default();
        let mut scheduler = FinalizationScheduler::new(grace());
        let events = vec![event("a", -60, Some(30)), event("b", -60, Some(30))];
        let mut bots: BotSnapshot = HashMap::new();
        bots.insert(
            "b".to_string(),
            BotRecord {
                bot_id: Some("bot-b".to_string()),
                state: BotState::Ended,
            },
        );

        let swept = scheduler.sweep(&events, &bots, now(), &api).await;
        assert!(swept.is_empty());
        assert!(api.finalized.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_finalize_still_counts_as_triggered() {
        let api = RecordingApi {
            fail: true,
            ..Default::default()
        };
        let mut scheduler = FinalizationScheduler::new(grace());
        let events = vec![event("a", -60, Some(30))];
        let bots = scheduled(&["a"]);

        let swept = scheduler.sweep(&events, &bots, now(), &api).await;
        assert_eq!(swept, ["bot-a"]);
        let swept = scheduler.sweep(&events, &bots, now(), &api).await;
        assert!(swept.is_empty());
        assert_eq!(api.finalized.lock().len(), 1);
    }
}
