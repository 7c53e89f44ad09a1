//! Bidirectional RPC peer bound to one byte stream and one role.
//!
//! A [`Connection`] composes the line codec, the pending-request table, and
//! the handler set into a single peer that issues requests and serves the
//! peer's requests concurrently on the same stream:
//!
//! - One **read loop** task decodes frames and routes them: responses
//!   resolve the pending table, requests and notifications dispatch as
//!   independent tasks so a slow handler never stalls the stream.
//! - One **writer task** owns the write half; every outbound frame —
//!   request, notification, or handler response — funnels through its
//!   channel, so frames are never interleaved on the wire.
//!
//! Lifecycle is `Open → Closing → Closed`, driven by [`Connection::close`],
//! stream EOF, or an unrecoverable transport error. Reaching `Closed` drains
//! the pending table so no caller stays suspended.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::role::Role;
use crate::rpc::codec::{JsonLineCodec, DEFAULT_MAX_FRAME_BYTES};
use crate::rpc::dispatch::{CancelRegistry, HandlerSet, RequestCx};
use crate::rpc::message::{
    notification_frame, request_frame, response_frame, ErrorObject, Frame, RequestId,
};
use crate::rpc::pending::PendingRequests;
use crate::{ConduitError, Result};

// ── Options ───────────────────────────────────────────────────────────────────

/// Tunables for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Maximum accepted inbound frame length in bytes.
    pub max_frame_bytes: usize,
    /// Capacity of the outbound write queue.
    pub write_queue: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            write_queue: 64,
        }
    }
}

// ── Connection state ──────────────────────────────────────────────────────────

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

// ── Connection ────────────────────────────────────────────────────────────────

/// Bidirectional RPC peer.
///
/// Cheap to clone; all clones share one underlying connection. The stream
/// halves are owned by the internal reader/writer tasks, which exit when the
/// connection closes.
#[derive(Clone, Debug)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    role: Role,
    pending: PendingRequests,
    handlers: HandlerSet,
    inflight: CancelRegistry,
    write_tx: mpsc::Sender<Value>,
    shutdown: CancellationToken,
    state: AtomicU8,
    anomalies: AtomicU64,
    tracker: TaskTracker,
    io_tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Bind a new connection to the given stream halves.
    ///
    /// Spawns the read loop and the writer task immediately; the connection
    /// is `Open` and ready to exchange frames when this returns.
    pub fn new<R, W>(role: Role, reader: R, writer: W, handlers: HandlerSet) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_options(role, reader, writer, handlers, ConnectionOptions::default())
    }

    /// [`Connection::new`] with explicit [`ConnectionOptions`].
    pub fn with_options<R, W>(
        role: Role,
        reader: R,
        writer: W,
        handlers: HandlerSet,
        options: ConnectionOptions,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (write_tx, write_rx) = mpsc::channel(options.write_queue.max(1));

        let inner = Arc::new(Inner {
            role,
            pending: PendingRequests::new(),
            handlers,
            inflight: CancelRegistry::new(),
            write_tx,
            shutdown: CancellationToken::new(),
            state: AtomicU8::new(STATE_OPEN),
            anomalies: AtomicU64::new(0),
            tracker: TaskTracker::new(),
            io_tasks: StdMutex::new(Vec::with_capacity(2)),
        });

        let reader_task = tokio::spawn(run_reader(
            Arc::clone(&inner),
            reader,
            options.max_frame_bytes,
        ));
        let writer_task = tokio::spawn(run_writer(Arc::clone(&inner), writer, write_rx));

        if let Ok(mut tasks) = inner.io_tasks.lock() {
            tasks.push(reader_task);
            tasks.push(writer_task);
        }

        Self { inner }
    }

    /// The role this side plays on the stream.
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Issue a request and suspend until its response arrives.
    ///
    /// # Errors
    ///
    /// - [`ConduitError::Closed`] if the connection is (or becomes) closed
    ///   before a response is consumed.
    /// - [`ConduitError::Rpc`] carrying the peer's structured error.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.is_open() {
            return Err(ConduitError::Closed(format!(
                "call to '{method}' on a closed connection"
            )));
        }

        let (id, mut rx) = self.inner.pending.register().await;
        let frame = request_frame(id, method, params);
        if let Err(err) = self.inner.enqueue(frame).await {
            // The frame never reached the transport; retire the slot so the
            // table does not leak.
            self.inner.pending.discard(id).await;
            return Err(err);
        }

        tokio::select! {
            biased;

            outcome = &mut rx => match outcome {
                Ok(outcome) => outcome,
                Err(_) => Err(ConduitError::Closed(
                    "connection closed before the response arrived".to_owned(),
                )),
            },

            () = self.inner.shutdown.cancelled() => {
                // Drain may already have fulfilled the slot; prefer that
                // outcome over the synthetic failure.
                match rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.inner.pending.discard(id).await;
                        Err(ConduitError::Closed(
                            "connection closed before the response arrived".to_owned(),
                        ))
                    }
                }
            }
        }
    }

    /// Send a one-way notification. Fire-and-forget: there is nothing to
    /// await and no response will ever arrive.
    ///
    /// # Errors
    ///
    /// [`ConduitError::Closed`] if the connection is closed and the frame
    /// cannot reach the transport.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.is_open() {
            return Err(ConduitError::Closed(format!(
                "notification '{method}' on a closed connection"
            )));
        }
        self.inner.enqueue(notification_frame(method, params)).await
    }

    /// Close the connection: stop the read loop and writer task, drain every
    /// pending request with a closed failure, and release the stream halves.
    ///
    /// Idempotent; concurrent calls are safe. In-flight handler tasks get
    /// their cancellation tokens fired but are never force-terminated.
    pub async fn close(&self) {
        self.inner
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_CLOSING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok();
        self.inner.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = match self.inner.io_tasks.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            let _ = task.await;
        }

        self.inner.finalize("connection closed").await;
    }

    /// Wait until the connection reaches `Closed` (explicit close, EOF, or
    /// transport failure).
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Whether the connection is still `Open`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == STATE_OPEN
    }

    /// Whether the connection has reached `Closed`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == STATE_CLOSED
    }

    /// Number of locally issued requests still awaiting a response.
    pub async fn pending_requests(&self) -> usize {
        self.inner.pending.len().await
    }

    /// Count of non-fatal protocol anomalies observed on this connection
    /// (unparseable lines, responses for unknown ids, unclassifiable frames).
    #[must_use]
    pub fn anomaly_count(&self) -> u64 {
        self.inner.anomalies.load(Ordering::Relaxed)
    }
}

// ── Inner: shared plumbing ────────────────────────────────────────────────────

impl Inner {
    /// Queue one outbound frame for the writer task.
    async fn enqueue(&self, frame: Value) -> Result<()> {
        self.write_tx
            .send(frame)
            .await
            .map_err(|_| ConduitError::Closed("write path is gone".to_owned()))
    }

    fn note_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    /// Transition to `Closed` and drain the pending table.
    ///
    /// Safe to call from both the read loop and [`Connection::close`]; the
    /// drain empties the table, so a second invocation is a no-op.
    async fn finalize(&self, reason: &str) {
        // Order matters: anyone woken by the token must already observe
        // `Closed`.
        let previous = self.state.swap(STATE_CLOSED, Ordering::SeqCst);
        self.shutdown.cancel();
        let drained = self.pending.drain(reason).await;
        if previous != STATE_CLOSED {
            debug!(
                role = %self.role,
                drained,
                reason,
                "connection closed"
            );
        }
        self.tracker.close();
    }
}

// ── Read loop ─────────────────────────────────────────────────────────────────

/// Read loop task — decodes frames and routes them until shutdown or EOF.
async fn run_reader<R>(inner: Arc<Inner>, reader: R, max_frame_bytes: usize)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut framed = FramedRead::new(reader, JsonLineCodec::with_limit(max_frame_bytes));

    let reason = loop {
        tokio::select! {
            biased;

            () = inner.shutdown.cancelled() => {
                break "connection closed";
            }

            item = framed.next() => match item {
                None => {
                    debug!(role = %inner.role, "stream EOF");
                    break "peer closed the stream";
                }

                Some(Err(ConduitError::Framing(msg))) => {
                    // Isolated to the offending line; keep reading.
                    warn!(role = %inner.role, error = msg.as_str(), "framing error, skipping frame");
                    inner.note_anomaly();
                }

                Some(Err(err)) => {
                    warn!(role = %inner.role, error = %err, "transport error, stopping");
                    break "transport error";
                }

                Some(Ok(line)) => {
                    process_line(&inner, &line).await;
                }
            }
        }
    };

    inner.finalize(reason).await;
}

/// Classify one decoded line and route it.
async fn process_line(inner: &Arc<Inner>, line: &str) {
    if line.trim().is_empty() {
        return;
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            warn!(role = %inner.role, error = %err, "malformed json frame, skipping");
            inner.note_anomaly();
            return;
        }
    };

    match Frame::classify(value) {
        Frame::Response { id, outcome } => {
            handle_response(inner, &id, outcome).await;
        }
        Frame::Request { id, method, params } => {
            handle_request(inner, id, method, params).await;
        }
        Frame::Notification { method, params } => {
            handle_notification(inner, method, params).await;
        }
        Frame::Invalid => {
            debug!(role = %inner.role, "frame with neither method nor id, ignoring");
            inner.note_anomaly();
        }
    }
}

/// Resolve the pending entry a response frame refers to.
async fn handle_response(
    inner: &Arc<Inner>,
    id: &RequestId,
    outcome: std::result::Result<Value, ErrorObject>,
) {
    let resolved = match id.as_table_key() {
        Some(key) => {
            inner
                .pending
                .resolve(key, outcome.map_err(ConduitError::from))
                .await
        }
        None => false,
    };

    if !resolved {
        // Late, duplicate, or never-issued id: anomalous but never fatal.
        warn!(role = %inner.role, %id, "response for unknown request id, ignoring");
        inner.note_anomaly();
    }
}

/// Dispatch an inbound request as an independent task.
///
/// The handler's completion — result, structured error, or panic mapped to
/// an internal error — is written back as exactly one response tagged with
/// the originating id, regardless of completion order across requests.
async fn handle_request(inner: &Arc<Inner>, id: RequestId, method: String, params: Option<Value>) {
    enum Routed {
        Plain(Arc<dyn crate::rpc::dispatch::RequestHandler>),
        Extension(Arc<dyn crate::rpc::dispatch::ExtRequestHandler>, String),
    }

    let routed = if let Some(handler) = inner.handlers.request_handler(&method) {
        Routed::Plain(handler)
    } else if let (Some(ext), Some(handler)) = (
        method.strip_prefix('_'),
        inner.handlers.ext_request_handler(),
    ) {
        Routed::Extension(handler, ext.to_owned())
    } else {
        debug!(role = %inner.role, method, "request for unregistered method");
        let response = response_frame(&id, Err(ErrorObject::method_not_found(&method)));
        if inner.enqueue(response).await.is_err() {
            debug!(role = %inner.role, method, "write path gone before method-not-found response");
        }
        return;
    };

    let cancel_key = inner.handlers.cancel_key_for(&method, params.as_ref());
    let task_inner = Arc::clone(inner);

    inner.tracker.spawn(async move {
        let token = task_inner.shutdown.child_token();
        if let Some(key) = &cancel_key {
            task_inner
                .inflight
                .register(key.clone(), token.clone())
                .await;
        }

        let cx = RequestCx::new(token);
        let future = match routed {
            Routed::Plain(handler) => handler.handle(params, cx),
            Routed::Extension(handler, ext_method) => handler.handle(ext_method, params, cx),
        };

        let outcome = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let detail = panic_detail(&panic);
                warn!(method, detail = detail.as_str(), "request handler panicked");
                Err(ErrorObject::internal_error_message(detail))
            }
        };

        if let Some(key) = &cancel_key {
            task_inner.inflight.remove(key).await;
        }

        if let Err(err) = &outcome {
            debug!(method, code = err.code, "request handler returned an error");
        }

        let response = response_frame(&id, outcome);
        if task_inner.enqueue(response).await.is_err() {
            debug!(method, "write path gone before handler response");
        }
    });
}

/// Route an inbound notification.
///
/// The designated cancel notification additionally fires the in-flight
/// token for its domain key before (optionally) reaching a registered
/// handler. Unknown notifications are skipped.
async fn handle_notification(inner: &Arc<Inner>, method: String, params: Option<Value>) {
    enum Routed {
        Plain(Arc<dyn crate::rpc::dispatch::NotificationHandler>),
        Extension(Arc<dyn crate::rpc::dispatch::ExtNotificationHandler>, String),
    }

    if let Some(route) = inner.handlers.cancel_route() {
        if route.method == method {
            match (route.key)(params.as_ref()) {
                Some(key) => {
                    inner.inflight.cancel(&key).await;
                }
                None => {
                    debug!(method, "cancel notification without a domain key, ignoring");
                }
            }
        }
    }

    let routed = if let Some(handler) = inner.handlers.notification_handler(&method) {
        Routed::Plain(handler)
    } else if let (Some(ext), Some(handler)) = (
        method.strip_prefix('_'),
        inner.handlers.ext_notification_handler(),
    ) {
        Routed::Extension(handler, ext.to_owned())
    } else {
        debug!(role = %inner.role, method, "no handler for notification, skipping");
        return;
    };

    inner.tracker.spawn(async move {
        let future = match routed {
            Routed::Plain(handler) => handler.handle(params),
            Routed::Extension(handler, ext_method) => handler.handle(ext_method, params),
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                // Notifications have no reply channel; report and move on.
                warn!(method, code = err.code, "notification handler failed");
            }
            Err(panic) => {
                warn!(
                    method,
                    detail = panic_detail(&panic).as_str(),
                    "notification handler panicked"
                );
            }
        }
    });
}

/// Best-effort description of a panic payload.
fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_owned())
}

// ── Writer task ───────────────────────────────────────────────────────────────

/// Writer task — serialises queued frames and writes them one per line.
///
/// The single consumer is what makes outbound frames atomic: no two frames
/// can interleave because only this task touches the write half.
async fn run_writer<W>(inner: Arc<Inner>, mut writer: W, mut rx: mpsc::Receiver<Value>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            biased;

            () = inner.shutdown.cancelled() => {
                debug!(role = %inner.role, "writer stopping on shutdown");
                break;
            }

            frame = rx.recv() => match frame {
                None => {
                    debug!(role = %inner.role, "write queue closed, writer stopping");
                    break;
                }
                Some(value) => {
                    let mut bytes = match serde_json::to_vec(&value) {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            // Should not happen for a Value; drop the frame.
                            warn!(role = %inner.role, error = %err, "failed to serialise outbound frame");
                            continue;
                        }
                    };
                    bytes.push(b'\n');

                    if let Err(err) = writer.write_all(&bytes).await {
                        warn!(role = %inner.role, error = %err, "write failed, closing connection");
                        inner.shutdown.cancel();
                        break;
                    }
                }
            }
        }
    }
}
