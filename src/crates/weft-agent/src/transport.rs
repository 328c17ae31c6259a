//! Control-plane transports.
//!
//! The agent speaks JSON text frames over a websocket in production;
//! tests run the same session loop over in-process channels. A
//! connector yields a split sink/stream pair so the session loop can
//! read and write concurrently.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::errors::{AgentError, Result};
use crate::messages::{FromAgentMessage, ToAgentMessage};

#[async_trait]
pub trait TransportSink: Send {
    async fn send(&mut self, message: FromAgentMessage) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait TransportStream: Send {
    /// The next inbound message; `None` once the peer closed.
    async fn recv(&mut self) -> Result<Option<ToAgentMessage>>;
}

/// Dials a session. Called again with backoff after every transport
/// loss.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>)>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

pub struct WsRecv {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, message: FromAgentMessage) -> Result<()> {
        let json = serde_json::to_string(&message)?;
        self.sink
            .send(Message::Text(json))
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))
    }
}

#[async_trait]
impl TransportStream for WsRecv {
    async fn recv(&mut self) -> Result<Option<ToAgentMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).map(Some).map_err(Into::into);
                }
                // Protocol-level pings are answered by the websocket
                // layer; the control plane has its own PING message.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Binary(_))) | Some(Ok(Message::Frame(_))) => {
                    tracing::warn!("ignoring non-text frame on control channel");
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(AgentError::Transport(e.to_string())),
            }
        }
    }
}

/// Websocket connector for the control plane.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        WsConnector { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>)> {
        tracing::info!(url = %self.url, "connecting to fabric server");
        let (ws, _) = connect_async(&self.url)
            .await
            .map_err(|e| AgentError::Transport(format!("connect failed: {}", e)))?;
        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsRecv { stream })))
    }
}

/// In-process transport for tests: the far side plays the server.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<FromAgentMessage>,
}

pub struct ChannelRecv {
    rx: mpsc::UnboundedReceiver<ToAgentMessage>,
}

#[async_trait]
impl TransportSink for ChannelSink {
    async fn send(&mut self, message: FromAgentMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| AgentError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TransportStream for ChannelRecv {
    async fn recv(&mut self) -> Result<Option<ToAgentMessage>> {
        Ok(self.rx.recv().await)
    }
}

/// The server side of an in-process session.
pub struct ChannelServer {
    pub to_agent: mpsc::UnboundedSender<ToAgentMessage>,
    pub from_agent: mpsc::UnboundedReceiver<FromAgentMessage>,
}

/// Build a connected (agent transport, fake server) pair.
pub fn channel_transport() -> (Box<dyn TransportSink>, Box<dyn TransportStream>, ChannelServer) {
    let (from_tx, from_rx) = mpsc::unbounded_channel();
    let (to_tx, to_rx) = mpsc::unbounded_channel();
    (
        Box::new(ChannelSink { tx: from_tx }),
        Box::new(ChannelRecv { rx: to_rx }),
        ChannelServer {
            to_agent: to_tx,
            from_agent: from_rx,
        },
    )
}

/// A connector that hands out pre-built channel sessions, one per
/// connect call. Lets tests exercise reconnects.
pub struct ChannelConnector {
    sessions: parking_lot::Mutex<
        Vec<(Box<dyn TransportSink>, Box<dyn TransportStream>)>,
    >,
}

impl ChannelConnector {
    pub fn new() -> (std::sync::Arc<Self>, ChannelServer) {
        let (sink, stream, server) = channel_transport();
        let connector = std::sync::Arc::new(ChannelConnector {
            sessions: parking_lot::Mutex::new(vec![(sink, stream)]),
        });
        (connector, server)
    }

    /// Queue another session for the next connect (reconnect tests).
    pub fn push_session(&self) -> ChannelServer {
        let (sink, stream, server) = channel_transport();
        self.sessions.lock().insert(0, (sink, stream));
        server
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>)> {
        self.sessions
            .lock()
            .pop()
            .ok_or_else(|| AgentError::Transport("no session available".to_string()))
    }
}
