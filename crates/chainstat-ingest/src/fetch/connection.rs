//! Persistent bidirectional connections used by the windowed fetcher.
//!
//! A connection is split into a [`MessageSink`] for requests and a
//! [`MessageStream`] for responses so the fetcher can send while a read is
//! pending elsewhere in its loop.

use crate::{Error, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outgoing half of a connection.
pub trait MessageSink: Send {
    fn send(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Start a clean close handshake.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Incoming half of a connection.
pub trait MessageStream: Send {
    /// Next data message, `None` once the peer closed the connection.
    fn next_message(&mut self) -> impl Future<Output = Option<Result<Vec<u8>>>> + Send;
}

/// Establishes connections; called again on every reconnect.
pub trait Connector: Send + Sync {
    type Sink: MessageSink;
    type Stream: MessageStream;

    fn connect(&self) -> impl Future<Output = Result<(Self::Sink, Self::Stream)>> + Send;
}

/// Websocket [`Connector`].
#[derive(Debug, Clone)]
pub struct WsConnector {
    uri: String,
}

impl WsConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

impl Connector for WsConnector {
    type Sink = WsSink;
    type Stream = WsStream;

    async fn connect(&self) -> Result<(WsSink, WsStream)> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.uri.as_str()).await?;
        tracing::info!("Connected to {}", self.uri);
        let (sink, stream) = ws.split();
        Ok((WsSink { inner: sink }, WsStream { inner: stream }))
    }
}

pub struct WsSink {
    inner: SplitSink<Ws, Message>,
}

impl MessageSink for WsSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.inner.send(Message::text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await?;
        Ok(())
    }
}

pub struct WsStream {
    inner: SplitStream<Ws>,
}

impl MessageStream for WsStream {
    async fn next_message(&mut self) -> Option<Result<Vec<u8>>> {
        while let Some(message) = self.inner.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().as_bytes().to_vec())),
                Ok(Message::Binary(data)) => return Some(Ok(data.to_vec())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!("Peer closed connection: {:?}", frame);
                    return None;
                }
                // Pings are answered by tungstenite itself.
                Ok(_) => {}
                Err(e) => return Some(Err(Error::from(e))),
            }
        }
        None
    }
}
