//! meetscribe: a headless meeting-notetaker engine.
//!
//! Aggregates calendar events from Google Calendar (with a backend proxy
//! fallback), tracks notetaker bots through their lifecycle, classifies
//! meeting liveness from the clock, sweeps overdue bots into
//! finalization, and consumes live transcripts over SSE.

pub mod aggregator;
pub mod bot_api;
pub mod classify;
pub mod error;
pub mod finalizer;
pub mod google_api;
pub mod http;
pub mod lifecycle;
pub mod meet_link;
pub mod proxy;
pub mod session;
pub mod transcript;
pub mod types;

pub use error::EngineError;
pub use session::Session;
pub use types::Config;
