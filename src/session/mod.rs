//! Synthesis sessions: wire protocol, transport, life cycle and retries.

pub mod manager;
pub mod protocol;
pub mod state;
pub mod transport;

pub use manager::{
    AttemptOutcome, AttemptReport, InterruptHandle, SessionManager, SessionReport, SessionSettings,
    TeardownHandle,
};
pub use protocol::{InboundMessage, OutboundMessage, VoiceSettings};
pub use state::{CloseKind, SessionState};
pub use transport::{
    InboundChannel, OutboundChannel, SessionChannels, SessionConnector, WebSocketConnector,
};
