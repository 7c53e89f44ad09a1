//! Protocol roles and their capability sets.
//!
//! A session has exactly two participants: the **agent** (the side doing the
//! work) and the **client** (the side orchestrating it). Each role answers a
//! fixed, disjoint set of methods, enumerated here as closed Rust enums so a
//! capability set is checked at construction time instead of discovered as
//! runtime string-lookup misses once traffic is already flowing.
//!
//! Payload shapes stay opaque: handlers receive and return
//! [`serde_json::Value`]s. Only the method *names* and the cancellation
//! wiring are fixed by this module.

use std::collections::HashSet;

use serde_json::Value;

use crate::rpc::dispatch::{
    ExtNotificationHandler, ExtRequestHandler, HandlerSet, HandlerSetBuilder, NotificationHandler,
    RequestHandler,
};
use crate::{ConduitError, Result};

// ── Roles ─────────────────────────────────────────────────────────────────────

/// One of the two fixed participant kinds on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The side performing the work and answering agent-bound methods.
    Agent,
    /// The side orchestrating the session and answering client-bound methods.
    Client,
}

impl Role {
    /// The role the peer on the other end of the stream plays.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Agent => Self::Client,
            Self::Client => Self::Agent,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => f.write_str("agent"),
            Self::Client => f.write_str("client"),
        }
    }
}

// ── Agent-bound methods ───────────────────────────────────────────────────────

/// Requests an agent must be able to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentMethod {
    /// Protocol handshake; first request on every connection.
    Initialize,
    /// Optional credential exchange.
    Authenticate,
    /// Create a new session.
    SessionNew,
    /// Restore a previously created session.
    SessionLoad,
    /// Switch the session's operating mode.
    SessionSetMode,
    /// Switch the session's backing model.
    SessionSetModel,
    /// Run one prompt turn; the method cancellable via `session/cancel`.
    SessionPrompt,
}

impl AgentMethod {
    /// Every agent-bound request method.
    pub const ALL: [Self; 7] = [
        Self::Initialize,
        Self::Authenticate,
        Self::SessionNew,
        Self::SessionLoad,
        Self::SessionSetMode,
        Self::SessionSetModel,
        Self::SessionPrompt,
    ];

    /// Methods every conforming agent must register.
    pub const REQUIRED: [Self; 3] = [Self::Initialize, Self::SessionNew, Self::SessionPrompt];

    /// Wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Authenticate => "authenticate",
            Self::SessionNew => "session/new",
            Self::SessionLoad => "session/load",
            Self::SessionSetMode => "session/set_mode",
            Self::SessionSetModel => "session/set_model",
            Self::SessionPrompt => "session/prompt",
        }
    }
}

impl std::fmt::Display for AgentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications consumed by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentNotification {
    /// Advisory cancellation of the in-flight prompt turn for a session.
    SessionCancel,
}

impl AgentNotification {
    /// Wire name of the notification.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionCancel => "session/cancel",
        }
    }
}

// ── Client-bound methods ──────────────────────────────────────────────────────

/// Requests a client must be able to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientMethod {
    /// Read a text file from the client's workspace.
    FsReadTextFile,
    /// Write a text file into the client's workspace.
    FsWriteTextFile,
    /// Ask the operator to approve a tool call.
    SessionRequestPermission,
    /// Start a terminal command.
    TerminalCreate,
    /// Fetch buffered terminal output.
    TerminalOutput,
    /// Release a terminal handle.
    TerminalRelease,
    /// Wait for a terminal command to exit.
    TerminalWaitForExit,
    /// Kill a running terminal command.
    TerminalKill,
}

impl ClientMethod {
    /// Every client-bound request method.
    pub const ALL: [Self; 8] = [
        Self::FsReadTextFile,
        Self::FsWriteTextFile,
        Self::SessionRequestPermission,
        Self::TerminalCreate,
        Self::TerminalOutput,
        Self::TerminalRelease,
        Self::TerminalWaitForExit,
        Self::TerminalKill,
    ];

    /// Methods every conforming client must register; the terminal surface
    /// is optional.
    pub const REQUIRED: [Self; 3] = [
        Self::FsReadTextFile,
        Self::FsWriteTextFile,
        Self::SessionRequestPermission,
    ];

    /// Wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FsReadTextFile => "fs/read_text_file",
            Self::FsWriteTextFile => "fs/write_text_file",
            Self::SessionRequestPermission => "session/request_permission",
            Self::TerminalCreate => "terminal/create",
            Self::TerminalOutput => "terminal/output",
            Self::TerminalRelease => "terminal/release",
            Self::TerminalWaitForExit => "terminal/wait_for_exit",
            Self::TerminalKill => "terminal/kill",
        }
    }
}

impl std::fmt::Display for ClientMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications consumed by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientNotification {
    /// Streaming session update (message chunks, tool-call progress, …).
    SessionUpdate,
}

impl ClientNotification {
    /// Wire name of the notification.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionUpdate => "session/update",
        }
    }
}

// ── Cancellation key ──────────────────────────────────────────────────────────

/// Domain cancellation key shared by `session/prompt` and `session/cancel`:
/// the `sessionId` field of their params.
fn session_key(params: Option<&Value>) -> Option<String> {
    params
        .and_then(|p| p.get("sessionId"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

// ── Agent capability builder ──────────────────────────────────────────────────

/// Builder for an agent's capability set.
///
/// Pre-wires the cancellation route: `session/cancel` notifications cancel
/// the in-flight `session/prompt` task for the same `sessionId`.
/// [`AgentHandlers::finish`] rejects a set missing any
/// [`AgentMethod::REQUIRED`] registration.
pub struct AgentHandlers {
    inner: HandlerSetBuilder,
    registered: HashSet<AgentMethod>,
}

impl AgentHandlers {
    /// Start an agent capability set.
    #[must_use]
    pub fn new() -> Self {
        let inner = HandlerSet::builder()
            .cancellation(AgentNotification::SessionCancel.as_str(), session_key)
            .cancellable(AgentMethod::SessionPrompt.as_str(), session_key);
        Self {
            inner,
            registered: HashSet::new(),
        }
    }

    /// Register the handler answering `method`.
    #[must_use]
    pub fn handle(mut self, method: AgentMethod, handler: impl RequestHandler + 'static) -> Self {
        self.registered.insert(method);
        self.inner = self.inner.request(method.as_str(), handler);
        self
    }

    /// Register the `session/cancel` notification handler.
    ///
    /// Optional: the in-flight prompt task's token fires whether or not a
    /// handler is registered here.
    #[must_use]
    pub fn on_cancel(mut self, handler: impl NotificationHandler + 'static) -> Self {
        self.inner = self
            .inner
            .notification(AgentNotification::SessionCancel.as_str(), handler);
        self
    }

    /// Install the catch-all for `_`-prefixed extension requests.
    #[must_use]
    pub fn ext_method(mut self, handler: impl ExtRequestHandler + 'static) -> Self {
        self.inner = self.inner.ext_request(handler);
        self
    }

    /// Install the catch-all for `_`-prefixed extension notifications.
    #[must_use]
    pub fn ext_notification(mut self, handler: impl ExtNotificationHandler + 'static) -> Self {
        self.inner = self.inner.ext_notification(handler);
        self
    }

    /// Validate and finish the capability set.
    ///
    /// # Errors
    ///
    /// [`ConduitError::Registry`] if a required method is missing or any
    /// registration problem was recorded while building.
    pub fn finish(self) -> Result<HandlerSet> {
        let missing: Vec<&'static str> = AgentMethod::REQUIRED
            .iter()
            .filter(|method| !self.registered.contains(*method))
            .map(|method| method.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ConduitError::Registry(format!(
                "agent capability set is missing required methods: {}",
                missing.join(", ")
            )));
        }
        self.inner.build()
    }
}

impl Default for AgentHandlers {
    fn default() -> Self {
        Self::new()
    }
}

// ── Client capability builder ─────────────────────────────────────────────────

/// Builder for a client's capability set.
///
/// [`ClientHandlers::finish`] rejects a set missing any
/// [`ClientMethod::REQUIRED`] registration or the `session/update`
/// notification handler.
pub struct ClientHandlers {
    inner: HandlerSetBuilder,
    registered: HashSet<ClientMethod>,
    session_update: bool,
}

impl ClientHandlers {
    /// Start a client capability set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: HandlerSet::builder(),
            registered: HashSet::new(),
            session_update: false,
        }
    }

    /// Register the handler answering `method`.
    #[must_use]
    pub fn handle(mut self, method: ClientMethod, handler: impl RequestHandler + 'static) -> Self {
        self.registered.insert(method);
        self.inner = self.inner.request(method.as_str(), handler);
        self
    }

    /// Register the `session/update` notification handler.
    #[must_use]
    pub fn on_session_update(mut self, handler: impl NotificationHandler + 'static) -> Self {
        self.session_update = true;
        self.inner = self
            .inner
            .notification(ClientNotification::SessionUpdate.as_str(), handler);
        self
    }

    /// Install the catch-all for `_`-prefixed extension requests.
    #[must_use]
    pub fn ext_method(mut self, handler: impl ExtRequestHandler + 'static) -> Self {
        self.inner = self.inner.ext_request(handler);
        self
    }

    /// Install the catch-all for `_`-prefixed extension notifications.
    #[must_use]
    pub fn ext_notification(mut self, handler: impl ExtNotificationHandler + 'static) -> Self {
        self.inner = self.inner.ext_notification(handler);
        self
    }

    /// Validate and finish the capability set.
    ///
    /// # Errors
    ///
    /// [`ConduitError::Registry`] if a required method or the
    /// `session/update` handler is missing, or any registration problem was
    /// recorded while building.
    pub fn finish(self) -> Result<HandlerSet> {
        let mut missing: Vec<&'static str> = ClientMethod::REQUIRED
            .iter()
            .filter(|method| !self.registered.contains(*method))
            .map(|method| method.as_str())
            .collect();
        if !self.session_update {
            missing.push(ClientNotification::SessionUpdate.as_str());
        }
        if !missing.is_empty() {
            return Err(ConduitError::Registry(format!(
                "client capability set is missing required methods: {}",
                missing.join(", ")
            )));
        }
        self.inner.build()
    }
}

impl Default for ClientHandlers {
    fn default() -> Self {
        Self::new()
    }
}
