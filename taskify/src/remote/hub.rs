//! WebSocket client for a `taskify-hub` server.
//!
//! Implements [`TableClient`] and [`ChangeFeed`] over one WebSocket
//! connection. Requests are matched to replies by `request_id`; change
//! events are fanned out to per-table broadcast channels.
//!
//! The client does not reconnect on its own. When the connection drops,
//! pending requests fail with [`RemoteError::Unavailable`] and every feed
//! receiver observes `Closed`, which moves listeners to `Reconnecting`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use taskify_proto::codec;
use taskify_proto::feed::ChangeEvent;
use taskify_proto::hub::{ClientFrame, FailureCode, HubReply, HubRequest, ServerFrame};
use taskify_proto::wire::{Query, Row, Table};
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{RemoteError, TableClient};
use crate::feed::ChangeFeed;

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<HubReply>>>>;
type FeedMap = Arc<Mutex<HashMap<Table, broadcast::Sender<ChangeEvent>>>>;

/// Connection settings for [`HubClient`].
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Timeout for establishing the WebSocket connection.
    pub connect_timeout: Duration,
    /// Timeout for each request's reply.
    pub request_timeout: Duration,
    /// Per-table event buffer before a subscriber lags.
    pub event_buffer: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            event_buffer: 256,
        }
    }
}

/// A connection to a hub server.
pub struct HubClient {
    url: String,
    ws_sender: tokio::sync::Mutex<WsSender>,
    pending: PendingMap,
    feeds: FeedMap,
    next_request: AtomicU64,
    connected: Arc<AtomicBool>,
    options: HubOptions,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl HubClient {
    /// Connects to the hub at `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Unavailable`] if the connection times out or
    /// cannot be established.
    pub async fn connect(url: &str, options: HubOptions) -> Result<Self, RemoteError> {
        let (ws_stream, _response) = tokio::time::timeout(options.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "hub connect timed out");
                RemoteError::Unavailable(format!("connect to {url} timed out"))
            })?
            .map_err(|e| {
                tracing::warn!(url, error = %e, "hub connect failed");
                RemoteError::Unavailable(format!("connect to {url} failed: {e}"))
            })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let feeds: FeedMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&pending),
            Arc::clone(&feeds),
            Arc::clone(&connected),
        ));

        tracing::info!(url, "connected to hub");

        Ok(Self {
            url: url.to_string(),
            ws_sender: tokio::sync::Mutex::new(ws_sender),
            pending,
            feeds,
            next_request: AtomicU64::new(1),
            connected,
            options,
            reader_handle,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the WebSocket connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Sends a close frame. Pending requests and feeds are released by the
    /// reader when the server acknowledges.
    pub async fn close(&self) {
        let mut sender = self.ws_sender.lock().await;
        if let Err(e) = sender.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "close frame not sent");
        }
    }

    /// Sends one request and waits for its reply.
    async fn request(&self, request: HubRequest) -> Result<HubReply, RemoteError> {
        if !self.is_connected() {
            return Err(RemoteError::Unavailable("hub connection closed".to_string()));
        }
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let text = codec::encode_client(&ClientFrame {
            request_id,
            request,
        })
        .map_err(|e| RemoteError::rejected(FailureCode::Malformed, e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);

        let sent = {
            let mut sender = self.ws_sender.lock().await;
            sender.send(Message::text(text)).await
        };
        if let Err(e) = sent {
            self.pending.lock().remove(&request_id);
            self.connected.store(false, Ordering::Relaxed);
            tracing::warn!(error = %e, "hub send failed");
            return Err(RemoteError::Unavailable(format!("send failed: {e}")));
        }

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(HubReply::Failure { code, message })) => {
                Err(RemoteError::Rejected { code, message })
            }
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RemoteError::Unavailable(
                "hub connection closed before reply".to_string(),
            )),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                tracing::warn!(request_id, "hub request timed out");
                Err(RemoteError::Unavailable("hub request timed out".to_string()))
            }
        }
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

fn unexpected(reply: &HubReply) -> RemoteError {
    RemoteError::rejected(FailureCode::Malformed, format!("unexpected reply: {reply:?}"))
}

impl TableClient for HubClient {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, RemoteError> {
        match self
            .request(HubRequest::Select {
                query: query.clone(),
            })
            .await?
        {
            HubReply::Rows { rows } => Ok(rows),
            other => Err(unexpected(&other)),
        }
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, RemoteError> {
        match self.request(HubRequest::Insert { table, row }).await? {
            HubReply::Row { row } => Ok(row),
            other => Err(unexpected(&other)),
        }
    }

    async fn update(&self, table: Table, id: &str, row: Row) -> Result<Row, RemoteError> {
        let request = HubRequest::Update {
            table,
            id: id.to_string(),
            row,
        };
        match self.request(request).await? {
            HubReply::Row { row } => Ok(row),
            other => Err(unexpected(&other)),
        }
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), RemoteError> {
        let request = HubRequest::Delete {
            table,
            id: id.to_string(),
        };
        match self.request(request).await? {
            HubReply::Ack => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

impl ChangeFeed for HubClient {
    /// Subscribes locally first so no event published between the hub's
    /// `Subscribed` reply and this call returning is missed.
    async fn subscribe(&self, table: Table) -> Result<broadcast::Receiver<ChangeEvent>, RemoteError> {
        let rx = {
            let mut feeds = self.feeds.lock();
            feeds
                .entry(table)
                .or_insert_with(|| broadcast::channel(self.options.event_buffer).0)
                .subscribe()
        };
        match self.request(HubRequest::Subscribe { table }).await? {
            HubReply::Subscribed { .. } => Ok(rx),
            other => Err(unexpected(&other)),
        }
    }

    /// Ends the hub-side subscription once no local receiver is left.
    async fn unsubscribe(&self, table: Table) -> Result<(), RemoteError> {
        {
            let mut feeds = self.feeds.lock();
            match feeds.get(&table) {
                Some(tx) if tx.receiver_count() > 0 => return Ok(()),
                Some(_) => {
                    feeds.remove(&table);
                }
                None => return Ok(()),
            }
        }
        match self.request(HubRequest::Unsubscribe { table }).await? {
            HubReply::Unsubscribed { .. } => {
                tracing::debug!(%table, "unsubscribed from hub feed");
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }
}

/// Background task that reads server frames and dispatches them.
///
/// Replies complete the matching pending request; change events go to the
/// table's broadcast channel. Malformed frames are logged and skipped.
/// On exit, pending requests and feeds are dropped so waiters observe the
/// disconnect.
async fn reader_loop(
    mut ws_reader: WsReader,
    pending: PendingMap,
    feeds: FeedMap,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match codec::decode_server(text.as_str()) {
                Ok(ServerFrame::Reply { request_id, reply }) => {
                    if let Some(tx) = pending.lock().remove(&request_id) {
                        let _ = tx.send(reply);
                    } else {
                        tracing::debug!(request_id, "reply for unknown request");
                    }
                }
                Ok(ServerFrame::Change { event }) => {
                    if let Some(tx) = feeds.lock().get(&event.table) {
                        let _ = tx.send(event);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed hub frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("hub closed the connection");
                break;
            }
            Ok(_) => {
                // Ping/pong and binary frames carry nothing for us.
            }
            Err(e) => {
                tracing::warn!(error = %e, "hub read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    pending.lock().clear();
    feeds.lock().clear();
    tracing::info!("hub reader task exiting");
}
