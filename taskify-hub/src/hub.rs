//! Hub server core: shared state, WebSocket handler and request dispatch.
//!
//! Each connection gets a writer task fed by an unbounded channel and a
//! reader task that decodes [`ClientFrame`]s. Data requests run against the
//! shared [`HubTables`]; `subscribe` spawns a forwarder that copies the
//! table's change events into the connection's channel until the client
//! unsubscribes or goes away.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use taskify_proto::codec;
use taskify_proto::hub::{ClientFrame, FailureCode, HubReply, HubRequest, ServerFrame};
use taskify_proto::wire::Table;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::tables::{DEFAULT_EVENT_BUFFER, HubTables};

/// Default maximum accepted frame size in bytes (1 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

type ConnectionId = u64;

/// Shared hub state: the tables and the live connection registry.
pub struct HubState {
    /// Table storage and change channels.
    pub tables: HubTables,
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    next_connection: AtomicU64,
    max_frame_size: usize,
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

impl HubState {
    /// Creates a hub with empty tables and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_FRAME_SIZE, HubTables::new(DEFAULT_EVENT_BUFFER))
    }

    /// Creates a hub with a custom frame limit and table storage.
    #[must_use]
    pub fn with_config(max_frame_size: usize, tables: HubTables) -> Self {
        Self {
            tables,
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            max_frame_size,
        }
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Sends a Close frame to every connected client.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn_id, sender) in conns.iter() {
            tracing::info!(conn_id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    async fn register(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let conn_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(conn_id, sender);
        conn_id
    }

    async fn unregister(&self, conn_id: ConnectionId) {
        self.connections.write().await.remove(&conn_id);
    }
}

/// Change forwarders of one connection, aborted when dropped.
#[derive(Default)]
struct Subscriptions(HashMap<Table, JoinHandle<()>>);

impl Subscriptions {
    fn contains(&self, table: Table) -> bool {
        self.0.contains_key(&table)
    }

    fn insert(&mut self, table: Table, handle: JoinHandle<()>) {
        self.0.insert(table, handle);
    }

    fn remove(&mut self, table: Table) -> bool {
        self.0.remove(&table).inspect(JoinHandle::abort).is_some()
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for handle in self.0.values() {
            handle.abort();
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Register the connection's outbound channel.
/// 2. Spawn the writer and reader tasks.
/// 3. When either ends, abort the other and drop all subscriptions.
/// 4. Unregister.
pub async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = state.register(tx.clone()).await;
    tracing::info!(conn_id, "client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        let mut subscriptions = Subscriptions::default();
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text(conn_id, text.as_str(), &reader_state, &tx, &mut subscriptions)
                        .await;
                }
                Message::Close(_) => {
                    tracing::info!(conn_id, "received close frame");
                    break;
                }
                Message::Binary(_) => {
                    tracing::warn!(conn_id, "ignoring binary frame");
                }
                _ => {
                    // Ping and pong are answered by axum.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(conn_id).await;
    tracing::info!(conn_id, "client disconnected");
}

/// Decodes one client frame and answers it.
async fn handle_text(
    conn_id: ConnectionId,
    text: &str,
    state: &Arc<HubState>,
    tx: &mpsc::UnboundedSender<Message>,
    subscriptions: &mut Subscriptions,
) {
    let frame = match codec::decode_client(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(conn_id, error = %e, "failed to decode client frame");
            // Answer if the envelope at least names a request.
            if let Some(request_id) = salvage_request_id(text) {
                let reply = HubReply::failure(FailureCode::Malformed, e.to_string());
                send_frame(conn_id, tx, &ServerFrame::Reply { request_id, reply });
            }
            return;
        }
    };

    let ClientFrame {
        request_id,
        request,
    } = frame;
    let reply = match request {
        HubRequest::Subscribe { table } => {
            if !subscriptions.contains(table) {
                let events = state.tables.subscribe(table);
                subscriptions.insert(table, spawn_forwarder(conn_id, table, events, tx.clone()));
                tracing::debug!(conn_id, %table, "subscribed");
            }
            HubReply::Subscribed { table }
        }
        HubRequest::Unsubscribe { table } => {
            if subscriptions.remove(table) {
                tracing::debug!(conn_id, %table, "unsubscribed");
            }
            HubReply::Unsubscribed { table }
        }
        request => {
            tracing::debug!(conn_id, request_id, ?request, "executing request");
            state.tables.execute(request).await
        }
    };
    send_frame(conn_id, tx, &ServerFrame::Reply { request_id, reply });
}

/// Copies change events for `table` into the connection's channel.
fn spawn_forwarder(
    conn_id: ConnectionId,
    table: Table,
    mut events: broadcast::Receiver<taskify_proto::feed::ChangeEvent>,
    tx: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if !send_frame(conn_id, &tx, &ServerFrame::Change { event }) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(conn_id, %table, skipped, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Encodes and queues a frame. Returns `false` once the writer is gone.
fn send_frame(conn_id: ConnectionId, tx: &mpsc::UnboundedSender<Message>, frame: &ServerFrame) -> bool {
    match codec::encode_server(frame) {
        Ok(text) => tx.send(Message::Text(text.into())).is_ok(),
        Err(e) => {
            tracing::error!(conn_id, error = %e, "failed to encode server frame");
            true
        }
    }
}

fn salvage_request_id(text: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("request_id")?
        .as_u64()
}

/// Starts the hub on `addr` with empty tables.
///
/// Returns the bound address and the server task handle.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(HubState::new())).await
}

/// Starts the hub on `addr` with the given state.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<HubState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound_addr, handle))
}

#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<HubState>>,
) -> impl axum::response::IntoResponse {
    ws.max_message_size(state.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}
