//! Physical connection abstraction.
//!
//! Both bindings speak newline-free JSON text frames over a websocket; the
//! traits here keep the bindings and the supervisor testable without a
//! listening server.

use std::path::Path;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    connect_async, connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::WireError;

/// Write half of an established connection.
#[async_trait]
pub trait WireSink: Send {
    async fn send(&mut self, text: String) -> Result<(), WireError>;

    /// Initiate a graceful close. The read half observes the stream ending.
    async fn close(&mut self) -> Result<(), WireError>;
}

/// Read half of an established connection.
#[async_trait]
pub trait WireStream: Send {
    /// Next inbound text frame; `None` once the connection is gone.
    async fn next_text(&mut self) -> Option<Result<String, WireError>>;
}

/// Connection factory. One `connect` call per (re)connection attempt.
#[async_trait]
pub trait Wire: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn WireSink>, Box<dyn WireStream>), WireError>;
}

/// Production wire over `tokio-tungstenite`.
pub struct WsWire {
    endpoint: String,
    tls: Option<native_tls::TlsConnector>,
}

impl WsWire {
    /// Build a wire for the endpoint, trusting `certificate` (a PEM CA
    /// bundle) for `wss` endpoints signed by a private authority.
    pub fn new(endpoint: String, certificate: Option<&Path>) -> Result<Self, WireError> {
        let tls = match certificate {
            None => None,
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| WireError::Tls(e.to_string()))?;
                let ca = native_tls::Certificate::from_pem(&pem)
                    .map_err(|e| WireError::Tls(e.to_string()))?;
                let connector = native_tls::TlsConnector::builder()
                    .add_root_certificate(ca)
                    .build()
                    .map_err(|e| WireError::Tls(e.to_string()))?;
                Some(connector)
            }
        };
        Ok(Self { endpoint, tls })
    }
}

type WsSplitSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSplitStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[async_trait]
impl Wire for WsWire {
    async fn connect(&self) -> Result<(Box<dyn WireSink>, Box<dyn WireStream>), WireError> {
        let stream = match &self.tls {
            Some(connector) => {
                let connector = Connector::NativeTls(connector.clone());
                connect_async_tls_with_config(&self.endpoint, None, false, Some(connector))
                    .await
                    .map_err(|e| WireError::Connect(e.to_string()))?
                    .0
            }
            None => {
                connect_async(&self.endpoint)
                    .await
                    .map_err(|e| WireError::Connect(e.to_string()))?
                    .0
            }
        };
        let (write, read) = stream.split();
        Ok((Box::new(WsSink(write)), Box::new(WsStream(read))))
    }
}

struct WsSink(WsSplitSink);

#[async_trait]
impl WireSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), WireError> {
        self.0
            .send(Message::Text(text))
            .await
            .map_err(|e| WireError::Websocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), WireError> {
        self.0
            .close()
            .await
            .map_err(|e| WireError::Websocket(e.to_string()))
    }
}

struct WsStream(WsSplitStream);

#[async_trait]
impl WireStream for WsStream {
    async fn next_text(&mut self) -> Option<Result<String, WireError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => {
                    debug!("server closed connection");
                    return None;
                }
                // Control and binary frames carry no bus traffic.
                Ok(_) => continue,
                Err(e) => return Some(Err(WireError::Websocket(e.to_string()))),
            }
        }
    }
}
