//! Handler registration and routing for inbound requests and notifications.
//!
//! A [`HandlerSet`] is built once, before any traffic flows, and is immutable
//! afterwards — dispatch lookups need no synchronization. Registering the
//! same method name twice is a construction-time error, surfaced by
//! [`HandlerSetBuilder::build`].
//!
//! Cancellation is cooperative and keyed by a domain-level value (for the
//! ACP roles, the session id), never by the transport request id: a request
//! method marked *cancellable* registers its in-flight task's token under
//! the extracted key, and the designated cancel notification fires that
//! token if — and only if — a matching task is still running.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::rpc::message::ErrorObject;
use crate::{ConduitError, Result};

// ── Handler contracts ─────────────────────────────────────────────────────────

/// Outcome of a request handler: a result payload or a structured error.
pub type HandlerOutcome = std::result::Result<Value, ErrorObject>;

/// Boxed future returned by request handlers.
pub type BoxRequestFuture = Pin<Box<dyn Future<Output = HandlerOutcome> + Send>>;

/// Boxed future returned by notification handlers.
pub type BoxNotifyFuture =
    Pin<Box<dyn Future<Output = std::result::Result<(), ErrorObject>> + Send>>;

/// Per-request context handed to request handlers.
///
/// Carries the cooperative cancellation token for this invocation. Handlers
/// observe it at their own checkpoints; the core never force-terminates a
/// running handler.
#[derive(Debug, Clone)]
pub struct RequestCx {
    cancel: CancellationToken,
}

impl RequestCx {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Context with a fresh, unlinked token — for invoking a handler
    /// directly, outside any connection.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Token fired when this request is cancelled or the connection closes.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether cancellation has already been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A callable serving one request method.
pub trait RequestHandler: Send + Sync {
    /// Serve a single request; the returned outcome becomes the response.
    fn handle(&self, params: Option<Value>, cx: RequestCx) -> BoxRequestFuture;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Option<Value>, RequestCx) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    fn handle(&self, params: Option<Value>, cx: RequestCx) -> BoxRequestFuture {
        Box::pin(self(params, cx))
    }
}

/// A callable consuming one notification method.
pub trait NotificationHandler: Send + Sync {
    /// Consume a notification; failures are logged and never answered.
    fn handle(&self, params: Option<Value>) -> BoxNotifyFuture;
}

impl<F, Fut> NotificationHandler for F
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), ErrorObject>> + Send + 'static,
{
    fn handle(&self, params: Option<Value>) -> BoxNotifyFuture {
        Box::pin(self(params))
    }
}

/// Catch-all for `_`-prefixed extension request methods.
pub trait ExtRequestHandler: Send + Sync {
    /// Serve an extension request; `method` has the leading `_` stripped.
    fn handle(&self, method: String, params: Option<Value>, cx: RequestCx) -> BoxRequestFuture;
}

impl<F, Fut> ExtRequestHandler for F
where
    F: Fn(String, Option<Value>, RequestCx) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    fn handle(&self, method: String, params: Option<Value>, cx: RequestCx) -> BoxRequestFuture {
        Box::pin(self(method, params, cx))
    }
}

/// Catch-all for `_`-prefixed extension notifications.
pub trait ExtNotificationHandler: Send + Sync {
    /// Consume an extension notification; `method` has the leading `_` stripped.
    fn handle(&self, method: String, params: Option<Value>) -> BoxNotifyFuture;
}

impl<F, Fut> ExtNotificationHandler for F
where
    F: Fn(String, Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), ErrorObject>> + Send + 'static,
{
    fn handle(&self, method: String, params: Option<Value>) -> BoxNotifyFuture {
        Box::pin(self(method, params))
    }
}

/// Derives the domain cancellation key from a frame's params.
pub type KeyExtractor = Arc<dyn Fn(Option<&Value>) -> Option<String> + Send + Sync>;

/// The designated one-way cancel notification and its key derivation.
#[derive(Clone)]
pub struct CancelRoute {
    /// Method name of the cancel notification.
    pub method: String,
    /// How to derive the domain key from the notification params.
    pub key: KeyExtractor,
}

// ── HandlerSet ────────────────────────────────────────────────────────────────

/// Immutable, validated set of handlers for one connection role.
pub struct HandlerSet {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
    ext_request: Option<Arc<dyn ExtRequestHandler>>,
    ext_notification: Option<Arc<dyn ExtNotificationHandler>>,
    cancel_route: Option<CancelRoute>,
    cancellable: HashMap<String, KeyExtractor>,
}

impl HandlerSet {
    /// Start building a handler set.
    #[must_use]
    pub fn builder() -> HandlerSetBuilder {
        HandlerSetBuilder::default()
    }

    /// Handler registered for a request `method`, if any.
    #[must_use]
    pub fn request_handler(&self, method: &str) -> Option<Arc<dyn RequestHandler>> {
        self.requests.get(method).cloned()
    }

    /// Handler registered for a notification `method`, if any.
    #[must_use]
    pub fn notification_handler(&self, method: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.notifications.get(method).cloned()
    }

    /// Extension request catch-all, if configured.
    #[must_use]
    pub fn ext_request_handler(&self) -> Option<Arc<dyn ExtRequestHandler>> {
        self.ext_request.clone()
    }

    /// Extension notification catch-all, if configured.
    #[must_use]
    pub fn ext_notification_handler(&self) -> Option<Arc<dyn ExtNotificationHandler>> {
        self.ext_notification.clone()
    }

    /// The configured cancel notification route, if any.
    #[must_use]
    pub fn cancel_route(&self) -> Option<&CancelRoute> {
        self.cancel_route.as_ref()
    }

    /// Domain key for an inbound request, if its method is cancellable.
    #[must_use]
    pub fn cancel_key_for(&self, method: &str, params: Option<&Value>) -> Option<String> {
        self.cancellable.get(method).and_then(|extract| extract(params))
    }

    /// Whether a request handler exists for `method`.
    #[must_use]
    pub fn has_request(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("requests", &self.requests.keys().collect::<Vec<_>>())
            .field("notifications", &self.notifications.keys().collect::<Vec<_>>())
            .field("cancel_route", &self.cancel_route.as_ref().map(|r| &r.method))
            .finish_non_exhaustive()
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Builder for [`HandlerSet`].
///
/// Registration problems (duplicate method names, a duplicate cancel route)
/// are collected and reported together by [`HandlerSetBuilder::build`], so a
/// misconfigured capability set is caught before any traffic flows.
#[derive(Default)]
pub struct HandlerSetBuilder {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
    ext_request: Option<Arc<dyn ExtRequestHandler>>,
    ext_notification: Option<Arc<dyn ExtNotificationHandler>>,
    cancel_route: Option<CancelRoute>,
    cancellable: HashMap<String, KeyExtractor>,
    problems: Vec<String>,
}

impl HandlerSetBuilder {
    /// Register a request handler for `method`.
    #[must_use]
    pub fn request(
        mut self,
        method: impl Into<String>,
        handler: impl RequestHandler + 'static,
    ) -> Self {
        let method = method.into();
        if self
            .requests
            .insert(method.clone(), Arc::new(handler))
            .is_some()
        {
            self.problems
                .push(format!("duplicate request handler for method '{method}'"));
        }
        self
    }

    /// Register a notification handler for `method`.
    #[must_use]
    pub fn notification(
        mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler + 'static,
    ) -> Self {
        let method = method.into();
        if self
            .notifications
            .insert(method.clone(), Arc::new(handler))
            .is_some()
        {
            self.problems.push(format!(
                "duplicate notification handler for method '{method}'"
            ));
        }
        self
    }

    /// Install the catch-all for `_`-prefixed extension requests.
    #[must_use]
    pub fn ext_request(mut self, handler: impl ExtRequestHandler + 'static) -> Self {
        if self.ext_request.replace(Arc::new(handler)).is_some() {
            self.problems
                .push("duplicate extension request handler".to_owned());
        }
        self
    }

    /// Install the catch-all for `_`-prefixed extension notifications.
    #[must_use]
    pub fn ext_notification(mut self, handler: impl ExtNotificationHandler + 'static) -> Self {
        if self.ext_notification.replace(Arc::new(handler)).is_some() {
            self.problems
                .push("duplicate extension notification handler".to_owned());
        }
        self
    }

    /// Designate `method` as the one-way cancel notification.
    ///
    /// `key` derives the domain cancellation key from the notification's
    /// params. At most one cancel route may be configured.
    #[must_use]
    pub fn cancellation(
        mut self,
        method: impl Into<String>,
        key: impl Fn(Option<&Value>) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        let method = method.into();
        if self
            .cancel_route
            .replace(CancelRoute {
                method: method.clone(),
                key: Arc::new(key),
            })
            .is_some()
        {
            self.problems.push(format!(
                "duplicate cancel route (second registration: '{method}')"
            ));
        }
        self
    }

    /// Mark a request `method` as cancellable under the key derived from its
    /// own params.
    #[must_use]
    pub fn cancellable(
        mut self,
        method: impl Into<String>,
        key: impl Fn(Option<&Value>) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        let method = method.into();
        if self
            .cancellable
            .insert(method.clone(), Arc::new(key))
            .is_some()
        {
            self.problems
                .push(format!("method '{method}' marked cancellable twice"));
        }
        self
    }

    /// Finish the set.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Registry`] listing every registration problem
    /// recorded while building.
    pub fn build(self) -> Result<HandlerSet> {
        if self.problems.is_empty() {
            Ok(HandlerSet {
                requests: self.requests,
                notifications: self.notifications,
                ext_request: self.ext_request,
                ext_notification: self.ext_notification,
                cancel_route: self.cancel_route,
                cancellable: self.cancellable,
            })
        } else {
            Err(ConduitError::Registry(self.problems.join("; ")))
        }
    }
}

// ── In-flight cancellation registry ───────────────────────────────────────────

/// Live map of domain key → cancellation token for in-flight request tasks.
///
/// One task per key: a second registration under the same key replaces the
/// first, matching the protocol's one-operation-per-session shape. Entries
/// are removed by the dispatch path when the owning task ends, so a cancel
/// notification arriving after completion finds nothing and does nothing.
#[derive(Clone, Debug, Default)]
pub(crate) struct CancelRegistry {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl CancelRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register the in-flight task serving `key`.
    pub(crate) async fn register(&self, key: String, token: CancellationToken) {
        self.inner.lock().await.insert(key, token);
    }

    /// Remove the entry for `key` once its task has ended.
    pub(crate) async fn remove(&self, key: &str) {
        self.inner.lock().await.remove(key);
    }

    /// Fire the token registered under `key`, if any.
    ///
    /// Returns whether a matching in-flight task existed. A miss is the
    /// advisory-cancellation no-op, logged at DEBUG only.
    pub(crate) async fn cancel(&self, key: &str) -> bool {
        let token = self.inner.lock().await.get(key).cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => {
                debug!(key, "cancel notification for no in-flight task, ignoring");
                false
            }
        }
    }
}
