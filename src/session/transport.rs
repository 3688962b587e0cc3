//! Session transport: one bidirectional connection to the synthesis service.
//!
//! The connector produces a fresh pair of half-channels per attempt, so the
//! sender and listener stations can run concurrently on the same session.
//! Tests substitute scripted channels for the websocket implementation.

use crate::config::SynthesisConfig;
use crate::error::{Result, SpeakError};
use crate::session::protocol::{InboundMessage, OutboundMessage, session_url};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

/// Write half of a session.
#[async_trait::async_trait]
pub trait OutboundChannel: Send {
    async fn send(&mut self, message: &OutboundMessage) -> Result<()>;

    /// Closes the write half. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a session.
#[async_trait::async_trait]
pub trait InboundChannel: Send {
    /// Waits for the next protocol message.
    ///
    /// An unexpected close of the connection is reported as
    /// [`SpeakError::SessionDropped`]; every other failure keeps its own kind.
    async fn recv(&mut self) -> Result<InboundMessage>;
}

/// Both halves of one connected session.
pub struct SessionChannels {
    pub outbound: Box<dyn OutboundChannel>,
    pub inbound: Box<dyn InboundChannel>,
}

/// Opens sessions. Called once per attempt; sessions are never reused.
#[async_trait::async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<SessionChannels>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the streaming synthesis endpoint over a websocket.
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        Ok(Self {
            url: session_url(config)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait::async_trait]
impl SessionConnector for WebSocketConnector {
    async fn connect(&self) -> Result<SessionChannels> {
        tracing::debug!(url = %self.url, "connecting to synthesis service");
        let (stream, response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| SpeakError::Connect {
                    message: e.to_string(),
                })?;
        tracing::debug!(status = %response.status(), "synthesis session open");

        let (writer, reader) = stream.split();
        Ok(SessionChannels {
            outbound: Box::new(WsOutbound {
                writer,
                closed: false,
            }),
            inbound: Box::new(WsInbound { reader }),
        })
    }
}

struct WsOutbound {
    writer: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait::async_trait]
impl OutboundChannel for WsOutbound {
    async fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        self.writer
            .send(Message::text(message.to_json()))
            .await
            .map_err(classify)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.writer.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }
}

struct WsInbound {
    reader: SplitStream<WsStream>,
}

#[async_trait::async_trait]
impl InboundChannel for WsInbound {
    async fn recv(&mut self) -> Result<InboundMessage> {
        loop {
            match self.reader.next().await {
                Some(Ok(Message::Text(text))) => return InboundMessage::from_json(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) => format!(
                            "closed by service ({}): {}",
                            u16::from(frame.code),
                            frame.reason.as_str()
                        ),
                        None => "closed by service".to_string(),
                    };
                    return Err(SpeakError::SessionDropped { reason });
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Binary(data))) => {
                    tracing::trace!(bytes = data.len(), "ignoring binary frame");
                }
                Some(Err(e)) => return Err(classify(e)),
                None => {
                    return Err(SpeakError::SessionDropped {
                        reason: "connection ended without a final message".to_string(),
                    });
                }
            }
        }
    }
}

/// Maps websocket errors onto the session taxonomy: anything that means the
/// peer went away is a drop, the rest is a transport error.
fn classify(error: WsError) -> SpeakError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => SpeakError::SessionDropped {
            reason: error.to_string(),
        },
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            SpeakError::SessionDropped {
                reason: error.to_string(),
            }
        }
        WsError::Io(ref io)
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ) =>
        {
            SpeakError::SessionDropped {
                reason: error.to_string(),
            }
        }
        other => SpeakError::Transport {
            message: other.to_string(),
        },
    }
}
