//! Streaming speech pipeline.
//!
//! Four stations run concurrently against one synthesis session:
//! ```text
//! ┌──────────┐    ┌─────────┐    ┌────────┐    ┌─────────┐    ┌──────────┐    ┌──────┐
//! │ Producer │───▶│ Chunker │───▶│ Sender │───▶│ Session │───▶│ Listener │───▶│ Sink │───▶ Player
//! └──────────┘    └─────────┘    └────────┘    └─────────┘    └──────────┘    └──────┘
//!       │              ▲                                            │
//!       ▼              │                                            ▼
//!  Sent Ledger ──── resync ◀──────────────────────────────── Received Ledger
//!                (on drop)
//! ```

pub mod chunker;
pub mod feed;
pub mod frame;
pub mod listener;
pub mod pipeline;
pub mod sender;
pub mod sink;

pub use chunker::ChunkerStation;
pub use feed::TokenFeed;
pub use frame::{AudioFrame, ChunkFrame, TextFrame, TextToken};
pub use listener::ListenerStation;
pub use pipeline::SpeechPipeline;
pub use sender::SenderStation;
pub use sink::{AudioOutput, CollectorOutput, ProcessAudioOutput, SinkStation};
