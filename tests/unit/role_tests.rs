//! Unit tests for the role layer: method enumerations and capability-set
//! validation.

use serde_json::Value;

use agent_conduit::rpc::dispatch::{HandlerOutcome, RequestCx};
use agent_conduit::{
    AgentHandlers, AgentMethod, AgentNotification, ClientHandlers, ClientMethod,
    ClientNotification, ConduitError, ErrorObject, Role,
};

// ── Test handlers ─────────────────────────────────────────────────────────────

async fn ok_empty(_params: Option<Value>, _cx: RequestCx) -> HandlerOutcome {
    Ok(serde_json::json!({}))
}

async fn swallow(_params: Option<Value>) -> Result<(), ErrorObject> {
    Ok(())
}

// ── Roles ─────────────────────────────────────────────────────────────────────

#[test]
fn roles_are_opposites() {
    assert_eq!(Role::Agent.opposite(), Role::Client);
    assert_eq!(Role::Client.opposite(), Role::Agent);
}

/// Wire names match the protocol's role-scoped method strings.
#[test]
fn method_wire_names() {
    assert_eq!(AgentMethod::Initialize.as_str(), "initialize");
    assert_eq!(AgentMethod::SessionNew.as_str(), "session/new");
    assert_eq!(AgentMethod::SessionPrompt.as_str(), "session/prompt");
    assert_eq!(AgentNotification::SessionCancel.as_str(), "session/cancel");
    assert_eq!(ClientMethod::FsReadTextFile.as_str(), "fs/read_text_file");
    assert_eq!(
        ClientMethod::SessionRequestPermission.as_str(),
        "session/request_permission"
    );
    assert_eq!(ClientNotification::SessionUpdate.as_str(), "session/update");
}

/// The agent and client method surfaces are disjoint.
#[test]
fn role_method_sets_are_disjoint() {
    for agent_method in AgentMethod::ALL {
        for client_method in ClientMethod::ALL {
            assert_ne!(agent_method.as_str(), client_method.as_str());
        }
    }
}

// ── Agent capability sets ─────────────────────────────────────────────────────

/// A complete agent set builds and carries the cancellation wiring.
#[test]
fn complete_agent_set_builds() {
    let set = AgentHandlers::new()
        .handle(AgentMethod::Initialize, ok_empty)
        .handle(AgentMethod::SessionNew, ok_empty)
        .handle(AgentMethod::SessionPrompt, ok_empty)
        .on_cancel(swallow)
        .finish()
        .expect("complete agent set must build");

    assert!(set.has_request("initialize"));
    assert!(set.has_request("session/prompt"));
    assert!(
        !set.has_request("authenticate"),
        "optional methods left unregistered answer method-not-found at runtime"
    );

    let route = set.cancel_route().expect("agent sets pre-wire cancellation");
    assert_eq!(route.method, "session/cancel");

    let key = set.cancel_key_for(
        "session/prompt",
        Some(&serde_json::json!({"sessionId": "sess-7"})),
    );
    assert_eq!(key.as_deref(), Some("sess-7"));
}

/// A missing required method is caught before any traffic flows.
#[test]
fn agent_set_missing_required_method_is_rejected() {
    let result = AgentHandlers::new()
        .handle(AgentMethod::Initialize, ok_empty)
        .handle(AgentMethod::SessionNew, ok_empty)
        // session/prompt deliberately missing.
        .finish();

    match result {
        Err(ConduitError::Registry(msg)) => assert!(
            msg.contains("session/prompt"),
            "error must name the missing method, got: {msg}"
        ),
        other => panic!("expected Err(ConduitError::Registry), got: {other:?}"),
    }
}

/// Optional methods register on top of the required set.
#[test]
fn agent_set_accepts_optional_methods() {
    let set = AgentHandlers::new()
        .handle(AgentMethod::Initialize, ok_empty)
        .handle(AgentMethod::SessionNew, ok_empty)
        .handle(AgentMethod::SessionPrompt, ok_empty)
        .handle(AgentMethod::SessionLoad, ok_empty)
        .handle(AgentMethod::Authenticate, ok_empty)
        .handle(AgentMethod::SessionSetMode, ok_empty)
        .finish()
        .expect("optional methods must be accepted");

    assert!(set.has_request("session/load"));
    assert!(set.has_request("authenticate"));
}

// ── Client capability sets ────────────────────────────────────────────────────

/// A complete client set builds, including the session/update handler.
#[test]
fn complete_client_set_builds() {
    let set = ClientHandlers::new()
        .handle(ClientMethod::FsReadTextFile, ok_empty)
        .handle(ClientMethod::FsWriteTextFile, ok_empty)
        .handle(ClientMethod::SessionRequestPermission, ok_empty)
        .on_session_update(swallow)
        .finish()
        .expect("complete client set must build");

    assert!(set.has_request("fs/read_text_file"));
    assert!(set.notification_handler("session/update").is_some());
    assert!(
        set.cancel_route().is_none(),
        "clients consume no cancel notification"
    );
}

/// The session/update handler is required, not optional.
#[test]
fn client_set_requires_session_update() {
    let result = ClientHandlers::new()
        .handle(ClientMethod::FsReadTextFile, ok_empty)
        .handle(ClientMethod::FsWriteTextFile, ok_empty)
        .handle(ClientMethod::SessionRequestPermission, ok_empty)
        .finish();

    match result {
        Err(ConduitError::Registry(msg)) => assert!(
            msg.contains("session/update"),
            "error must name the missing notification, got: {msg}"
        ),
        other => panic!("expected Err(ConduitError::Registry), got: {other:?}"),
    }
}

/// The terminal surface is optional for clients.
#[test]
fn client_terminal_surface_is_optional() {
    let set = ClientHandlers::new()
        .handle(ClientMethod::FsReadTextFile, ok_empty)
        .handle(ClientMethod::FsWriteTextFile, ok_empty)
        .handle(ClientMethod::SessionRequestPermission, ok_empty)
        .handle(ClientMethod::TerminalCreate, ok_empty)
        .on_session_update(swallow)
        .finish()
        .expect("terminal methods register on top of the required set");

    assert!(set.has_request("terminal/create"));
    assert!(!set.has_request("terminal/kill"));
}
