//! One multiplexed RPC session over a node socket.
//!
//! A `NodeConnection` can only be created via `NodeConnection::open()`,
//! which returns only when the socket is ready. If you have one, you can
//! subscribe and submit. Connections do not reconnect: when the socket dies,
//! every stream it carried is errored and the connection is finished.

use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::atom::{Address, Atom, AtomUpdate, UpdateAction};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::node::protocol::{
    self, AtomUpdateNotification, Incoming, SubmissionStateNotification,
};
use crate::node::submission::{SubmissionProgress, SubmissionState};
use crate::node::transport::{Transport, WsSink, WsStream};

/// Configuration for one node connection.
#[derive(Debug, Clone)]
pub struct NodeConnectionConfig {
    pub url: String,
    /// Hard timeout for the socket to report ready.
    pub open_timeout: Duration,
    /// Hard timeout for an atom submission call.
    pub submit_timeout: Duration,
    /// Keepalive period once the socket is up.
    pub keepalive_interval: Duration,
    /// How long the active-work count may sit at zero before the socket is
    /// closed.
    pub idle_grace: Duration,
}

impl Default for NodeConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/rpc".to_string(),
            open_timeout: Duration::from_secs(5),
            submit_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
            idle_grace: Duration::from_secs(5),
        }
    }
}

impl From<&ClientConfig> for NodeConnectionConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            url: config.node_url.clone(),
            open_timeout: Duration::from_secs(config.open_timeout_secs),
            submit_timeout: Duration::from_secs(config.submit_timeout_secs),
            keepalive_interval: Duration::from_secs(config.keepalive_interval_secs),
            idle_grace: Duration::from_secs(config.idle_grace_secs),
        }
    }
}

/// A per-address atom-update push stream.
pub struct AtomUpdateStream {
    subscriber_id: u64,
    receiver: mpsc::UnboundedReceiver<Result<AtomUpdate, ClientError>>,
}

impl AtomUpdateStream {
    pub fn subscriber_id(&self) -> u64 {
        self.subscriber_id
    }

    /// Next update. `None` means the stream completed (unsubscribe); an
    /// `Err` item means it terminated abnormally (socket loss).
    pub async fn recv(&mut self) -> Option<Result<AtomUpdate, ClientError>> {
        self.receiver.recv().await
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<serde_json::Value, ClientError>>>;

#[derive(Default)]
struct SubscriptionTable {
    by_id: HashMap<u64, mpsc::UnboundedSender<Result<AtomUpdate, ClientError>>>,
    by_address: HashMap<String, u64>,
}

/// State shared between the connection handle and its tasks.
struct Shared {
    sink: Mutex<Option<WsSink>>,
    next_rpc_id: AtomicU64,
    pending: Mutex<PendingMap>,
    subscriptions: Mutex<SubscriptionTable>,
    submissions: Mutex<HashMap<u64, watch::Sender<SubmissionProgress>>>,
    /// Reference count of active work; drives the idle close.
    active: watch::Sender<i64>,
    closed_tx: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl Shared {
    fn retain(&self) {
        self.active.send_modify(|v| *v += 1);
    }

    fn release(&self) {
        self.active.send_modify(|v| {
            if *v > 0 {
                *v -= 1;
            }
        });
    }
}

/// A single multiplexed RPC session with a remote node.
pub struct NodeConnection {
    config: NodeConnectionConfig,
    shared: Arc<Shared>,
    next_subscriber_id: AtomicU64,
    recv_task: tokio::task::JoinHandle<()>,
    keepalive_task: tokio::task::JoinHandle<()>,
    idle_task: tokio::task::JoinHandle<()>,
}

impl NodeConnection {
    /// Open a connection to the node.
    ///
    /// Resolves only when the socket is ready; rejects on error or after the
    /// configured open timeout, in which case the half-open socket is torn
    /// down with the abandoned connect.
    pub async fn open(config: NodeConnectionConfig) -> Result<Self, ClientError> {
        info!(url = %config.url, "Opening node connection");

        let transport = match timeout(config.open_timeout, Transport::connect(&config.url)).await
        {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(url = %config.url, "Node socket open timed out");
                return Err(ClientError::Timeout("socket open".to_string()));
            }
        };
        let (sink, stream) = transport.split();

        let (active, _) = watch::channel(0i64);
        let (closed_tx, _) = broadcast::channel(4);
        let shared = Arc::new(Shared {
            sink: Mutex::new(Some(sink)),
            next_rpc_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(SubscriptionTable::default()),
            submissions: Mutex::new(HashMap::new()),
            active,
            closed_tx,
            closed: AtomicBool::new(false),
        });

        let recv_task = tokio::spawn(receiver_loop(stream, Arc::clone(&shared)));
        let keepalive_task = tokio::spawn(keepalive_loop(
            Arc::clone(&shared),
            config.keepalive_interval,
        ));
        let idle_task = tokio::spawn(idle_monitor(Arc::clone(&shared), config.idle_grace));

        info!(url = %config.url, "Node connection ready");

        Ok(Self {
            config,
            shared,
            next_subscriber_id: AtomicU64::new(1),
            recv_task,
            keepalive_task,
            idle_task,
        })
    }

    /// Subscribe to atom updates addressed to `address`.
    ///
    /// The very first bootstrap subscription of a session is conventionally
    /// opened with `first = true`: it does not count toward active work, so
    /// a connection carrying only that subscription still idles out. Every
    /// later subscription passes `first = false` and keeps the connection
    /// alive.
    pub async fn subscribe(
        &self,
        address: &Address,
        first: bool,
    ) -> Result<AtomUpdateStream, ClientError> {
        let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();

        {
            let mut table = self.shared.subscriptions.lock().await;
            table.by_id.insert(subscriber_id, sender.clone());
            table.by_address.insert(address.to_string(), subscriber_id);
        }

        debug!(subscriber_id, address = %address, "Subscribing");

        let result = rpc(
            &self.shared,
            protocol::ATOMS_SUBSCRIBE,
            json!({
                "subscriberId": subscriber_id,
                "query": { "destinationAddress": address.to_string() },
            }),
        )
        .await;

        match result {
            Ok(_) => {
                if !first {
                    self.shared.retain();
                }
                Ok(AtomUpdateStream {
                    subscriber_id,
                    receiver,
                })
            }
            Err(e) => {
                let mut table = self.shared.subscriptions.lock().await;
                table.by_id.remove(&subscriber_id);
                table.by_address.remove(address.as_str());
                let _ = sender.send(Err(ClientError::Subscription(e.to_string())));
                Err(e)
            }
        }
    }

    /// Cancel the subscription bound to `address` and complete its stream.
    ///
    /// The active-work count is decremented on the success and failure paths
    /// alike.
    pub async fn unsubscribe(&self, address: &Address) -> Result<(), ClientError> {
        let subscriber_id = {
            let mut table = self.shared.subscriptions.lock().await;
            let Some(id) = table.by_address.remove(address.as_str()) else {
                return Err(ClientError::Subscription(format!(
                    "no subscription for {}",
                    address
                )));
            };
            table.by_id.remove(&id);
            id
        };

        debug!(subscriber_id, address = %address, "Unsubscribing");

        let result = rpc(
            &self.shared,
            protocol::ATOMS_CANCEL,
            json!({ "subscriberId": subscriber_id }),
        )
        .await;
        self.shared.release();
        result.map(|_| ())
    }

    /// Unsubscribe every indexed address and force the active-work count to
    /// zero.
    pub async fn unsubscribe_all(&self) -> Result<(), ClientError> {
        let addresses: Vec<String> = {
            let table = self.shared.subscriptions.lock().await;
            table.by_address.keys().cloned().collect()
        };
        for address in addresses {
            if let Err(e) = self.unsubscribe(&Address::new(address.clone())).await {
                warn!(address = %address, error = %e, "Unsubscribe failed");
            }
        }
        self.shared.active.send_modify(|v| *v = 0);
        Ok(())
    }

    /// Submit an atom and track its lifecycle.
    ///
    /// The returned stream is last-value cached, starting at `CREATED`; it
    /// advances to `SUBMITTED` when the call is acknowledged and follows the
    /// node's push notifications from there. On call failure or timeout the
    /// stream errors and the whole socket is closed. The active-work count
    /// is incremented once the call settles and released again when the
    /// lifecycle reaches a terminal state.
    pub async fn submit_atom(
        &self,
        atom: &Atom,
    ) -> Result<watch::Receiver<SubmissionProgress>, ClientError> {
        let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let (state_tx, state_rx) = watch::channel(SubmissionProgress::State {
            state: SubmissionState::Created,
            message: None,
        });
        self.shared
            .submissions
            .lock()
            .await
            .insert(subscriber_id, state_tx);

        let payload = crate::atom::AtomPayload::from_atom(atom);
        debug!(subscriber_id, hid = %payload.hid, "Submitting atom");

        let shared = Arc::clone(&self.shared);
        let submit_timeout = self.config.submit_timeout;
        tokio::spawn(async move {
            let call = rpc(
                &shared,
                protocol::UNIVERSE_SUBMIT_ATOM_AND_SUBSCRIBE,
                json!({ "subscriberId": subscriber_id, "atom": payload }),
            );
            let result = timeout(submit_timeout, call).await;
            shared.retain();

            match result {
                Ok(Ok(_)) => {
                    if let Some(tx) = shared.submissions.lock().await.get(&subscriber_id) {
                        tx.send_replace(SubmissionProgress::State {
                            state: SubmissionState::Submitted,
                            message: None,
                        });
                    }
                }
                Ok(Err(e)) => fail_submission(&shared, subscriber_id, e.to_string()).await,
                Err(_) => {
                    let e = ClientError::Timeout("atom submission".to_string());
                    fail_submission(&shared, subscriber_id, e.to_string()).await;
                }
            }
        });

        Ok(state_rx)
    }

    /// Fetch a single atom by id.
    pub async fn get_atom_info(&self, id: &str) -> Result<Atom, ClientError> {
        let result = rpc(
            &self.shared,
            protocol::ATOMS_GET_ATOM_INFO,
            json!({ "id": id }),
        )
        .await?;
        let payload: crate::atom::AtomPayload = serde_json::from_value(result)?;
        let transported = payload.hid.clone();
        let (atom, hash_ok) = payload.into_atom_checked();
        if !hash_ok {
            warn!(transported = %transported, recomputed = %atom.hid(), "Atom hash mismatch");
        }
        Ok(atom)
    }

    /// Close the socket immediately. Every pending call, subscription, and
    /// submission stream is errored with "Socket closed" and a closed event
    /// is emitted.
    pub async fn close(&self) {
        close_shared(&self.shared).await;
    }

    /// Receiver for the closed event.
    pub fn closed(&self) -> broadcast::Receiver<()> {
        self.shared.closed_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Current active-work count.
    pub fn active_count(&self) -> i64 {
        *self.shared.active.borrow()
    }
}

impl Drop for NodeConnection {
    fn drop(&mut self) {
        self.recv_task.abort();
        self.keepalive_task.abort();
        self.idle_task.abort();
        debug!("Node connection dropped, tasks aborted");
    }
}

/// Error one submission stream and tear the whole session down. Submission
/// failure means the node's view of this socket can no longer be trusted.
async fn fail_submission(shared: &Arc<Shared>, subscriber_id: u64, message: String) {
    error!(subscriber_id, error = %message, "Atom submission failed, closing socket");
    if let Some(tx) = shared.submissions.lock().await.remove(&subscriber_id) {
        tx.send_replace(SubmissionProgress::Error(message));
    }
    close_shared(shared).await;
}

/// Issue one call and await its routed response.
async fn rpc(
    shared: &Arc<Shared>,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, ClientError> {
    let id = shared.next_rpc_id.fetch_add(1, Ordering::SeqCst);
    rpc_with_id(shared, id, method, params).await
}

async fn rpc_with_id(
    shared: &Arc<Shared>,
    id: u64,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, ClientError> {
    let frame = protocol::encode_request(id, method, params)?;

    let (response_tx, response_rx) = oneshot::channel();
    shared.pending.lock().await.insert(id, response_tx);

    {
        let mut sink = shared.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            shared.pending.lock().await.remove(&id);
            return Err(ClientError::socket_closed());
        };
        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::protocol::Message;
        if let Err(e) = sink.send(Message::Text(frame)).await {
            shared.pending.lock().await.remove(&id);
            return Err(ClientError::Socket(format!("Failed to send: {}", e)));
        }
    }

    match response_rx.await {
        Ok(result) => result,
        // The pending map was drained: the socket went away under us.
        Err(_) => Err(ClientError::socket_closed()),
    }
}

/// Receiver loop: owns the read half, routes responses and push
/// notifications, and tears the session down when the socket ends.
async fn receiver_loop(mut stream: WsStream, shared: Arc<Shared>) {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::protocol::Message;

    debug!("Receiver loop started");

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                // A frame we cannot make sense of means the session is no
                // longer trustworthy; malformed notifications are transport
                // errors.
                if let Err(e) = handle_frame(&shared, &text).await {
                    error!(error = %e, "Malformed frame, closing connection");
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                info!(frame = ?frame, "Node closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    debug!("Receiver loop ended");
    close_shared(&shared).await;
}

async fn handle_frame(shared: &Arc<Shared>, text: &str) -> Result<(), ClientError> {
    match protocol::decode_frame(text)? {
        Incoming::Response { id, result } => {
            let mut pending = shared.pending.lock().await;
            if let Some(tx) = pending.remove(&id) {
                let _ = tx.send(result.map_err(ClientError::from));
            } else {
                debug!(id, "Response for unknown call");
            }
        }
        Incoming::Notification { method, params } => match method.as_str() {
            protocol::NOTIFY_ATOM_UPDATE => {
                let note = serde_json::from_value(params)?;
                handle_atom_notification(shared, note).await;
            }
            protocol::NOTIFY_SUBMISSION_STATE => {
                let note = serde_json::from_value(params)?;
                handle_submission_notification(shared, note).await;
            }
            other => debug!(method = %other, "Unhandled notification"),
        },
    }
    Ok(())
}

async fn handle_atom_notification(shared: &Arc<Shared>, note: AtomUpdateNotification) {
    let table = shared.subscriptions.lock().await;
    let Some(sender) = table.by_id.get(&note.subscriber_id) else {
        debug!(subscriber_id = note.subscriber_id, "Atoms for unknown subscriber");
        return;
    };

    for payload in note.atoms {
        // The node currently only asserts STORE; DELETE is accepted if it
        // ever arrives.
        let action = payload.action.unwrap_or(UpdateAction::Store);
        let processed = payload.processed_data.clone();
        let transported = payload.hid.clone();
        let (atom, hash_ok) = payload.into_atom_checked();
        if !hash_ok {
            warn!(
                transported = %transported,
                recomputed = %atom.hid(),
                "Atom hash mismatch"
            );
        }
        let _ = sender.send(Ok(AtomUpdate {
            action,
            atom,
            processed,
        }));
    }
}

async fn handle_submission_notification(shared: &Arc<Shared>, note: SubmissionStateNotification) {
    let Some(state) = SubmissionState::parse(&note.value) else {
        warn!(value = %note.value, "Unknown submission state");
        return;
    };

    let mut submissions = shared.submissions.lock().await;
    if state.is_terminal() {
        // Removing the entry both completes the stream (sender dropped) and
        // guarantees the refcount is released exactly once.
        let Some(tx) = submissions.remove(&note.subscriber_id) else {
            debug!(subscriber_id = note.subscriber_id, "State for unknown submission");
            return;
        };
        if state.is_failure() {
            let error = ClientError::Submission {
                state: state.code().to_string(),
                message: note.message.unwrap_or_default(),
            };
            tx.send_replace(SubmissionProgress::Error(error.to_string()));
        } else {
            tx.send_replace(SubmissionProgress::State {
                state,
                message: note.message,
            });
        }
        drop(tx);
        shared.release();
    } else if let Some(tx) = submissions.get(&note.subscriber_id) {
        tx.send_replace(SubmissionProgress::State {
            state,
            message: note.message,
        });
    }
}

/// Periodic keepalive. A failed keepalive means the socket is gone; the
/// session is torn down rather than left half-dead.
async fn keepalive_loop(shared: Arc<Shared>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // the first tick completes immediately
    let mut closed_rx = shared.closed_tx.subscribe();

    loop {
        tokio::select! {
            _ = closed_rx.recv() => break,
            _ = ticker.tick() => {
                let id = shared.next_rpc_id.fetch_add(1, Ordering::SeqCst);
                match rpc_with_id(&shared, id, protocol::NETWORK_GET_SELF, json!({ "id": id })).await {
                    Ok(_) => debug!("Keepalive ok"),
                    Err(e) => {
                        warn!(error = %e, "Keepalive failed, closing");
                        close_shared(&shared).await;
                        break;
                    }
                }
            }
        }
    }
}

/// Watches the active-work count. When it sits at zero for the whole grace
/// window, the connection is closed; any re-activation during the window
/// cancels the close.
async fn idle_monitor(shared: Arc<Shared>, grace: Duration) {
    let mut active_rx = shared.active.subscribe();
    let mut closed_rx = shared.closed_tx.subscribe();

    loop {
        if *active_rx.borrow_and_update() != 0 {
            tokio::select! {
                _ = closed_rx.recv() => return,
                changed = active_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
            }
        }

        debug!(grace = ?grace, "Connection idle, arming close");
        tokio::select! {
            _ = closed_rx.recv() => return,
            _ = sleep(grace) => {
                if *active_rx.borrow() == 0 {
                    info!("Idle grace expired, closing connection");
                    close_shared(&shared).await;
                    return;
                }
            }
            changed = active_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                // Re-activated (or dropped back to zero again): re-evaluate.
            }
        }
    }
}

/// Tear the session down. Idempotent.
async fn close_shared(shared: &Arc<Shared>) {
    if shared.closed.swap(true, Ordering::SeqCst) {
        return;
    }
    info!("Closing node connection");

    if let Some(mut sink) = shared.sink.lock().await.take() {
        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::protocol::Message;
        let _ = sink.send(Message::Close(None)).await;
    }

    {
        let mut pending = shared.pending.lock().await;
        for (id, tx) in pending.drain() {
            debug!(id, "Failing pending call");
            let _ = tx.send(Err(ClientError::socket_closed()));
        }
    }

    {
        let mut table = shared.subscriptions.lock().await;
        for (subscriber_id, sender) in table.by_id.drain() {
            debug!(subscriber_id, "Failing subscription stream");
            let _ = sender.send(Err(ClientError::socket_closed()));
        }
        table.by_address.clear();
    }

    {
        let mut submissions = shared.submissions.lock().await;
        for (subscriber_id, tx) in submissions.drain() {
            debug!(subscriber_id, "Failing submission stream");
            tx.send_replace(SubmissionProgress::Error("Socket closed".to_string()));
        }
    }

    shared.active.send_modify(|v| *v = 0);
    let _ = shared.closed_tx.send(());
}
