use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use log::{error, info, warn};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::StreamError;
use crate::metrics::{MetricsSnapshot, StreamMetrics};

use super::session::{run_session, SessionConfig, SessionOutcome};
use super::source::ReadingSource;
use super::state::SessionState;
use super::subscriber::{CloseReason, Subscriber};

/// Identity of one subscriber connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Returned to the transport on connect.
///
/// `closed()` resolves once the session has ended for any reason, so the
/// transport can tear its side of the connection down.
#[derive(Debug, Clone)]
pub struct StreamTicket {
    id: SubscriberId,
    closed: CancellationToken,
}

impl StreamTicket {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ManagerInner {
    source: Arc<dyn ReadingSource>,
    config: SessionConfig,
    sessions: Mutex<HashMap<SubscriberId, SessionHandle>>,
    shutdown: CancellationToken,
    metrics: StreamMetrics,
}

/// Owns every live stream session, one per subscriber connection.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<ManagerInner>,
}

impl StreamManager {
    pub fn new(
        source: Arc<dyn ReadingSource>,
        config: SessionConfig,
        metrics: StreamMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                source,
                config,
                sessions: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                metrics,
            }),
        }
    }

    /// Snapshot the store and start a session for `subscriber`.
    ///
    /// The snapshot read is the only await before the session is running.
    /// If it fails nothing is registered and the subscriber is closed.
    pub async fn on_connect<S: Subscriber>(
        &self,
        mut subscriber: S,
    ) -> Result<StreamTicket, StreamError> {
        if self.inner.shutdown.is_cancelled() {
            subscriber.close(CloseReason::ShuttingDown).await;
            return Err(StreamError::ShuttingDown);
        }

        let snapshot = match self.inner.source.readings_ascending().await {
            Ok(readings) => readings,
            Err(err) => {
                self.inner.metrics.record_store_read_failure();
                error!("Failed to snapshot readings for new subscriber: {err:#}");
                subscriber.close(CloseReason::SetupFailed).await;
                return Err(StreamError::StoreRead(format!("{err:#}")));
            }
        };

        let id = SubscriberId::new();
        let mut sessions = self.inner.sessions.lock().await;

        // shutdown() drains the map under this lock; re-check so no session
        // slips in after the drain.
        if self.inner.shutdown.is_cancelled() {
            drop(sessions);
            subscriber.close(CloseReason::ShuttingDown).await;
            return Err(StreamError::ShuttingDown);
        }

        let cancel = self.inner.shutdown.child_token();
        let session = run_session(
            id,
            SessionState::new(snapshot),
            subscriber,
            self.inner.config,
            cancel.clone(),
            self.inner.metrics.clone(),
        );

        let registry = Arc::downgrade(&self.inner);
        let session_token = cancel.clone();
        let task = tokio::spawn(async move {
            let report = session.await;
            session_token.cancel();

            // A session that failed on its own must leave the registry; the
            // lock is taken only after insertion below has released it.
            if let SessionOutcome::EmitFailed(_) = report.outcome {
                deregister(&registry, id).await;
            }
        });

        sessions.insert(id, SessionHandle { cancel: cancel.clone(), task });
        drop(sessions);

        self.inner.metrics.record_session_opened();
        info!("Subscriber {id} connected");

        Ok(StreamTicket { id, closed: cancel })
    }

    /// Close the session for `id` and wait until its task has stopped.
    ///
    /// Safe to call repeatedly and for ids that were never registered.
    pub async fn on_disconnect(&self, id: SubscriberId) {
        let handle = self.inner.sessions.lock().await.remove(&id);
        let Some(handle) = handle else {
            return;
        };

        info!("Subscriber {id} disconnected");
        close_session(id, handle).await;
    }

    pub async fn on_error(&self, id: SubscriberId, cause: impl fmt::Display) {
        let handle = self.inner.sessions.lock().await.remove(&id);
        let Some(handle) = handle else {
            return;
        };

        warn!("Subscriber {id} transport error: {cause}");
        close_session(id, handle).await;
    }

    /// Close every session and refuse new ones.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let drained: Vec<(SubscriberId, SessionHandle)> =
            self.inner.sessions.lock().await.drain().collect();

        if !drained.is_empty() {
            info!("Closing {} stream sessions", drained.len());
        }

        for (id, handle) in drained {
            close_session(id, handle).await;
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let active = self.active_sessions().await;
        self.inner.metrics.get_snapshot(active).await
    }
}

async fn close_session(id: SubscriberId, handle: SessionHandle) {
    handle.cancel.cancel();
    if let Err(err) = handle.task.await {
        error!("Stream session {id} task failed to join: {err}");
    }
}

async fn deregister(registry: &Weak<ManagerInner>, id: SubscriberId) {
    if let Some(inner) = registry.upgrade() {
        inner.sessions.lock().await.remove(&id);
    }
}
