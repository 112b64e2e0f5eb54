//! Live transcript ingestion over the bot service's SSE push-stream.

pub mod consumer;
pub mod sse;

pub use consumer::TranscriptStream;
