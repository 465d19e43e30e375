//! Client for the remote signing service.
//!
//! The service lives on its own websocket (default port 54345) and answers
//! JSON-RPC calls: `register`, `sign_atom`, `decrypt_ecies_payload`,
//! `get_public_key`. One request id per call; responses are routed by
//! matching id. The projection core never calls this — it is offered to
//! applications that keep their keys out of process.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::atom::{Atom, AtomPayload};
use crate::error::ClientError;
use crate::node::protocol::{decode_frame, encode_request, Incoming};
use crate::node::transport::{Transport, WsSink, WsStream};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ClientError>>>>>;

/// A connected remote signing identity.
pub struct RemoteIdentity {
    sink: Mutex<WsSink>,
    next_id: AtomicU64,
    pending: PendingMap,
    recv_task: tokio::task::JoinHandle<()>,
}

impl RemoteIdentity {
    /// Connect to the signing service.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let transport = Transport::connect(url).await?;
        let (sink, stream) = transport.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_for_recv = Arc::clone(&pending);
        let recv_task = tokio::spawn(async move {
            receiver_loop(stream, pending_for_recv).await;
        });

        Ok(Self {
            sink: Mutex::new(sink),
            next_id: AtomicU64::new(1),
            pending,
            recv_task,
        })
    }

    /// Register this client with the signing service.
    pub async fn register(&self) -> Result<(), ClientError> {
        self.call("register", json!({})).await.map(|_| ())
    }

    /// Ask the service to sign an atom; returns the signature value as the
    /// service encodes it.
    pub async fn sign_atom(&self, atom: &Atom) -> Result<Value, ClientError> {
        self.call("sign_atom", json!({ "atom": AtomPayload::from_atom(atom) }))
            .await
    }

    /// Decrypt an ECIES payload held by the service's key.
    pub async fn decrypt_ecies_payload(&self, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        let result = self
            .call("decrypt_ecies_payload", json!({ "payload": payload }))
            .await?;
        serde_json::from_value(result).map_err(ClientError::from)
    }

    /// Fetch the service's public key bytes.
    pub async fn get_public_key(&self) -> Result<Vec<u8>, ClientError> {
        let result = self.call("get_public_key", json!({})).await?;
        serde_json::from_value(result).map_err(ClientError::from)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = encode_request(id, method, params)?;

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, response_tx);

        {
            use futures_util::SinkExt;
            use tokio_tungstenite::tungstenite::protocol::Message;
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.send(Message::Text(frame)).await {
                self.pending.lock().await.remove(&id);
                return Err(ClientError::Socket(format!("Failed to send: {}", e)));
            }
        }

        debug!(id, method, "Signing service call");
        match response_rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::socket_closed()),
        }
    }
}

impl Drop for RemoteIdentity {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn receiver_loop(mut stream: WsStream, pending: PendingMap) {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::protocol::Message;

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match decode_frame(&text) {
                Ok(Incoming::Response { id, result }) => {
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(result.map_err(ClientError::from));
                    }
                }
                Ok(Incoming::Notification { method, .. }) => {
                    debug!(method = %method, "Ignoring signing service push");
                }
                Err(e) => warn!(error = %e, "Undecodable signing service frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Signing service socket error");
                break;
            }
        }
    }

    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(ClientError::socket_closed()));
    }
}
