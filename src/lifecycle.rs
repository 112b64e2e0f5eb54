//! Bot lifecycle tracking.
//!
//! The tracker owns the event-id to bot-record map. It never stores
//! liveness; only whether a bot exists and whether its meeting has ended.
//! An Ended state is sticky for a given bot id, so a later status refresh
//! can never resurrect a bot the engine already saw finish.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::bot_api::{BotServiceApi, ScheduleBotRequest};
use crate::error::EngineError;
use crate::types::{BotRecord, BotSnapshot, BotState, Event};

#[derive(Debug, Clone)]
struct TrackedBot {
    meet_link: String,
    record: BotRecord,
}

pub struct BotLifecycleTracker {
    api: Arc<dyn BotServiceApi>,
    records: HashMap<String, TrackedBot>,
    /// Bot ids that have reached Ended. Sticky for process lifetime.
    ended_bots: HashSet<String>,
}

impl BotLifecycleTracker {
    pub fn new(api: Arc<dyn BotServiceApi>) -> Self {
        Self {
            api,
            records: HashMap::new(),
            ended_bots: HashSet::new(),
        }
    }

    /// Schedule a notetaker bot for an event. The event must carry a
    /// meeting link. On success the record is tracked immediately so the
    /// next classify pass sees it without waiting for a status refresh.
    pub async fn schedule(
        &mut self,
        event: &Event,
        chat_on_join: Option<String>,
    ) -> Result<BotRecord, EngineError> {
        let meet_link = event
            .meet_link
            .clone()
            .ok_or_else(|| EngineError::ScheduleFailed {
                event_id: event.key.event_id.clone(),
                message: "event has no meeting link".to_string(),
            })?;

        let request = ScheduleBotRequest {
            event_id: event.key.event_id.clone(),
            title: event.title.clone(),
            start_time: event.start,
            meet_link: meet_link.clone(),
            chat_on_join,
        };
        let resp =
            self.api
                .schedule_bot(&request)
                .await
                .map_err(|e| EngineError::ScheduleFailed {
                    event_id: event.key.event_id.clone(),
                    message: e.to_string(),
                })?;

        let record = BotRecord {
            bot_id: Some(resp.bot_id),
            state: BotState::Scheduled,
        };
        self.records.insert(
            event.key.event_id.clone(),
            TrackedBot {
                meet_link,
                record: record.clone(),
            },
        );
        log::info!("scheduled bot for event {}", event.key.event_id);
        Ok(record)
    }

    /// Remove the bot for an event. On failure the record is left as-is so
    /// the user can retry.
    pub async fn remove(&mut self, event_id: &str) -> Result<(), EngineError> {
        let bot_id = self
            .records
            .get(event_id)
            .and_then(|t| t.record.bot_id.clone())
            .ok_or_else(|| EngineError::RemoveFailed {
                event_id: event_id.to_string(),
                message: "no bot tracked for event".to_string(),
            })?;

        self.api
            .remove_bot(&bot_id)
            .await
            .map_err(|e| EngineError::RemoveFailed {
                event_id: event_id.to_string(),
                message: e.to_string(),
            })?;

        self.records.remove(event_id);
        log::info!("removed bot {} for event {}", bot_id, event_id);
        Ok(())
    }

    /// Refresh the whole map from one batched status call covering every
    /// linked event plus anything still tracked. A failed call leaves the
    /// previous map untouched; stale data beats a blank map.
    pub async fn refresh_status(&mut self, events: &[Event]) {
        // link -> event id, preferring the live event list over old records
        let mut link_owners: HashMap<String, String> = HashMap::new();
        for (event_id, tracked) in &self.records {
            link_owners
                .entry(tracked.meet_link.clone())
                .or_insert_with(|| event_id.clone());
        }
        for event in events {
            if let Some(link) = &event.meet_link {
                link_owners.insert(link.clone(), event.key.event_id.clone());
            }
        }
        if link_owners.is_empty() {
            self.records.clear();
            return;
        }

        let links: Vec<String> = link_owners.keys().cloned().collect();
        let resp = match self.api.bot_status(&links).await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("bot status refresh failed, keeping previous map: {}", e);
                return;
            }
        };

        let mut next: HashMap<String, TrackedBot> = HashMap::new();
        for (link, event_id) in link_owners {
            let detail = resp.detail.get(&link);
            let bot_id = detail
                .and_then(|d| d.bot_id.clone())
                .or_else(|| resp.status.get(&link).cloned());
            let server_state = detail.and_then(|d| d.state.as_deref());

            let has_bot = bot_id.is_some() || server_state.is_some();
            if !has_bot {
                continue;
            }

            let ended_on_server = matches!(server_state, Some("ended") | Some("error"));
            let ended_locally = bot_id
                .as_deref()
                .is_some_and(|id| self.ended_bots.contains(id));
            let state = if ended_on_server || ended_locally {
                if let Some(id) = &bot_id {
                    self.ended_bots.insert(id.clone());
                }
                BotState::Ended
            } else {
                BotState::Scheduled
            };

            next.insert(
                event_id,
                TrackedBot {
                    meet_link: link,
                    record: BotRecord { bot_id, state },
                },
            );
        }
        self.records = next;
    }

    /// Force a bot (and any record carrying it) to Ended. Called once
    /// finalize has been requested, without waiting for the server to
    /// report it.
    pub fn mark_ended(&mut self, bot_id: &str) {
        self.ended_bots.insert(bot_id.to_string());
        for tracked in self.records.values_mut() {
            if tracked.record.bot_id.as_deref() == Some(bot_id) {
                tracked.record.state = BotState::Ended;
            }
        }
    }

    pub fn state_for(&self, event_id: &str) -> BotState {
        self.records
            .get(event_id)
            .map(|t| t.record.state)
            .unwrap_or(BotState::Unscheduled)
    }

    pub fn snapshot(&self) -> BotSnapshot {
        self.records
            .iter()
            .map(|(event_id, tracked)| (event_id.clone(), tracked.record.clone()))
            .collect()
    }
}
