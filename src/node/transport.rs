//! WebSocket transport layer.
//!
//! Connect to a node socket and hand out its send/receive halves. No
//! knowledge of the RPC protocol, subscriptions, or submission lifecycles.

use futures_util::{
    stream::{SplitSink, SplitStream},
    StreamExt,
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::ClientError;

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// A connected WebSocket transport.
///
/// Can only be constructed via `Transport::connect()`; if you have one, the
/// socket is up. Callers split it and own the halves: the sink side goes
/// behind a lock for concurrent writers, the stream side into a receiver
/// task.
pub struct Transport {
    sink: WsSink,
    stream: WsStream,
}

impl Transport {
    /// Connect to a node endpoint.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        debug!(url = %url, "Connecting to node socket");

        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Socket(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(url = %url, "Node socket connected");
        Ok(Self { sink, stream })
    }

    /// Split into separate sink and stream for concurrent send/receive.
    pub fn split(self) -> (WsSink, WsStream) {
        (self.sink, self.stream)
    }
}
