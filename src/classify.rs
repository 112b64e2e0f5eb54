//! Liveness classification.
//!
//! Liveness is derived from the clock on every call, never stored. An
//! event is live only while a non-ended bot is attached: without a bot
//! there is no transcript to show, so "live" would be meaningless.

use chrono::{DateTime, Duration, Utc};

use crate::types::{BotSnapshot, BotState, Event, EventPartitions};

fn bot_state(bots: &BotSnapshot, event: &Event) -> BotState {
    bots.get(&event.key.event_id)
        .map(|r| r.state)
        .unwrap_or(BotState::Unscheduled)
}

/// True while the meeting itself is plausibly in progress. Events with no
/// end time stay "in progress" for the fallback window after start.
fn in_progress(event: &Event, now: DateTime<Utc>, fallback: Duration) -> bool {
    if event.start > now {
        return false;
    }
    match event.end {
        Some(end) => now < end,
        None => now - event.start <= fallback,
    }
}

/// True until the meeting's end time passes. The liveness fallback window
/// does not apply here: an event with no end time is never "over" by the
/// clock alone, only by its bot ending.
fn not_over(event: &Event, now: DateTime<Utc>) -> bool {
    match event.end {
        Some(end) => now < end,
        None => true,
    }
}

/// Partition events by liveness at `now`.
///
/// `upcoming` is a superset of `live`: an in-progress meeting stays in the
/// default list until it is over. `current_live` is the earliest-starting
/// live event; ties keep input order, which is stable across cycles
/// because the aggregator sorts deterministically.
pub fn classify(
    events: &[Event],
    bots: &BotSnapshot,
    now: DateTime<Utc>,
    fallback: Duration,
) -> EventPartitions {
    let mut partitions = EventPartitions::default();

    for event in events {
        let state = bot_state(bots, event);
        let live = state == BotState::Scheduled && in_progress(event, now, fallback);

        if live {
            partitions.live.push(event.clone());
        }
        if not_over(event, now) && state != BotState::Ended {
            partitions.upcoming.push(event.clone());
        } else {
            partitions.ended.push(event.clone());
        }
    }

    partitions.current_live = partitions
        .live
        .iter()
        .min_by_key(|e| e.start)
        .cloned();

    partitions
}
