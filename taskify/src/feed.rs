//! Change feed listener.
//!
//! A [`FeedListener`] keeps exactly one subscription to one remote table
//! alive and forwards what it hears as [`FeedSignal`]s into a channel owned
//! by the session. It never touches a store itself: every signal means
//! "re-fetch this table".
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Disconnected (stop)
//!                                   |  ^
//!                                   v  |
//!                              Reconnecting
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use taskify_proto::feed::ChangeEvent;
use taskify_proto::wire::Table;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::remote::RemoteError;

/// Default wait before retrying a failed subscription.
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_millis(500);

/// Source of per-table change events.
pub trait ChangeFeed: Send + Sync {
    /// Opens a subscription to `table`. Each call yields an independent
    /// receiver; dropping it ends the subscription.
    fn subscribe(
        &self,
        table: Table,
    ) -> impl std::future::Future<Output = Result<broadcast::Receiver<ChangeEvent>, RemoteError>> + Send;

    /// Tells the source that this client no longer listens to `table`.
    ///
    /// Called after a listener has dropped its receiver. A source still
    /// serving other receivers for `table` keeps the subscription.
    fn unsubscribe(
        &self,
        table: Table,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;
}

/// Deferred `unsubscribe` call, bound to the feed a listener was started on.
type Release = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Listener connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Subscribed,
    /// The subscription was lost and is being re-established.
    Reconnecting,
}

/// What a listener tells its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    /// A change event arrived.
    Changed(ChangeEvent),
    /// Events may have been missed; re-fetch the table.
    Resync { table: Table },
}

impl FeedSignal {
    /// The table this signal concerns.
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::Changed(event) => event.table,
            Self::Resync { table } => *table,
        }
    }
}

/// Keeps one table subscription alive until stopped.
pub struct FeedListener {
    table: Table,
    state: Arc<watch::Sender<FeedState>>,
    task: Option<JoinHandle<()>>,
    release: Option<Release>,
    resubscribe_delay: Duration,
}

impl FeedListener {
    #[must_use]
    pub fn new(table: Table, resubscribe_delay: Duration) -> Self {
        let (state, _) = watch::channel(FeedState::Disconnected);
        Self {
            table,
            state: Arc::new(state),
            task: None,
            release: None,
            resubscribe_delay,
        }
    }

    #[must_use]
    pub const fn table(&self) -> Table {
        self.table
    }

    #[must_use]
    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Starts listening. Returns `false` if the listener is already
    /// running, in which case nothing changes.
    pub fn start<F>(&mut self, feed: Arc<F>, signals: mpsc::Sender<FeedSignal>) -> bool
    where
        F: ChangeFeed + 'static,
    {
        if self.is_running() {
            return false;
        }
        self.state.send_replace(FeedState::Connecting);
        tracing::debug!(table = %self.table, "feed listener starting");
        let table = self.table;
        let source = Arc::clone(&feed);
        self.release = Some(Box::new(move || {
            Box::pin(async move {
                if let Err(e) = source.unsubscribe(table).await {
                    tracing::debug!(%table, error = %e, "unsubscribe not delivered");
                }
            })
        }));
        self.task = Some(tokio::spawn(run(
            self.table,
            feed,
            signals,
            Arc::clone(&self.state),
            self.resubscribe_delay,
        )));
        true
    }

    /// Tears the subscription down and tells the source. Once this returns
    /// no further signal is sent. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Cancellation is the expected outcome.
            let _ = task.await;
            tracing::debug!(table = %self.table, "feed listener stopped");
        }
        if let Some(release) = self.release.take() {
            release().await;
        }
        self.state.send_replace(FeedState::Disconnected);
    }
}

impl Drop for FeedListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run<F: ChangeFeed>(
    table: Table,
    feed: Arc<F>,
    signals: mpsc::Sender<FeedSignal>,
    state: Arc<watch::Sender<FeedState>>,
    delay: Duration,
) {
    let mut resumed = false;
    loop {
        let mut rx = match feed.subscribe(table).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(%table, error = %e, "subscribe failed, retrying");
                if signals.is_closed() {
                    break;
                }
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        state.send_replace(FeedState::Subscribed);
        tracing::info!(%table, resumed, "subscribed to change feed");

        // Anything may have changed while we were away.
        if resumed && signals.send(FeedSignal::Resync { table }).await.is_err() {
            break;
        }

        loop {
            let signal = match rx.recv().await {
                Ok(event) => {
                    tracing::debug!(%table, kind = %event.kind, id = event.record_id().unwrap_or("?"), "change event");
                    FeedSignal::Changed(event)
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(%table, missed, "change feed lagged");
                    FeedSignal::Resync { table }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if signals.send(signal).await.is_err() {
                tracing::debug!(%table, "signal receiver dropped, listener exiting");
                state.send_replace(FeedState::Disconnected);
                return;
            }
        }

        tracing::warn!(%table, "change feed closed, resubscribing");
        state.send_replace(FeedState::Reconnecting);
        resumed = true;
        tokio::time::sleep(delay).await;
    }
    state.send_replace(FeedState::Disconnected);
}
