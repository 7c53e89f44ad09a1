//! Unit tests for handler registration and dispatch routing.

use serde_json::{json, Value};

use agent_conduit::rpc::dispatch::{HandlerOutcome, HandlerSet, RequestCx};
use agent_conduit::{ConduitError, ErrorObject};

// ── Test handlers ─────────────────────────────────────────────────────────────

async fn echo(params: Option<Value>, _cx: RequestCx) -> HandlerOutcome {
    Ok(params.unwrap_or(Value::Null))
}

async fn reject(_params: Option<Value>, _cx: RequestCx) -> HandlerOutcome {
    Err(ErrorObject::invalid_params(None))
}

async fn swallow(_params: Option<Value>) -> Result<(), ErrorObject> {
    Ok(())
}

// ── Registration ──────────────────────────────────────────────────────────────

/// Unique method names build into a usable set.
#[test]
fn unique_registrations_build() {
    let set = HandlerSet::builder()
        .request("op/echo", echo)
        .request("op/reject", reject)
        .notification("op/note", swallow)
        .build()
        .expect("unique registrations must build");

    assert!(set.has_request("op/echo"));
    assert!(set.request_handler("op/reject").is_some());
    assert!(set.request_handler("op/unknown").is_none());
    assert!(set.notification_handler("op/note").is_some());
    assert!(set.notification_handler("op/echo").is_none());
}

/// Registering the same request method twice is a construction-time error.
#[test]
fn duplicate_request_method_is_rejected() {
    let result = HandlerSet::builder()
        .request("op/echo", echo)
        .request("op/echo", reject)
        .build();

    match result {
        Err(ConduitError::Registry(msg)) => assert!(
            msg.contains("duplicate request handler") && msg.contains("op/echo"),
            "error must name the duplicated method, got: {msg}"
        ),
        other => panic!("expected Err(ConduitError::Registry), got: {other:?}"),
    }
}

/// The same applies to notification handlers.
#[test]
fn duplicate_notification_method_is_rejected() {
    let result = HandlerSet::builder()
        .notification("op/note", swallow)
        .notification("op/note", swallow)
        .build();

    assert!(
        matches!(result, Err(ConduitError::Registry(_))),
        "duplicate notification registration must fail at build time"
    );
}

/// Only one cancel route may be designated per set.
#[test]
fn second_cancel_route_is_rejected() {
    let result = HandlerSet::builder()
        .cancellation("op/cancel", |_| None)
        .cancellation("op/other_cancel", |_| None)
        .build();

    assert!(
        matches!(result, Err(ConduitError::Registry(_))),
        "a second cancel route must fail at build time"
    );
}

/// Every problem is reported together, not just the first.
#[test]
fn all_problems_are_reported_together() {
    let result = HandlerSet::builder()
        .request("op/a", echo)
        .request("op/a", echo)
        .notification("op/n", swallow)
        .notification("op/n", swallow)
        .build();

    match result {
        Err(ConduitError::Registry(msg)) => {
            assert!(msg.contains("op/a"), "first problem missing: {msg}");
            assert!(msg.contains("op/n"), "second problem missing: {msg}");
        }
        other => panic!("expected Err(ConduitError::Registry), got: {other:?}"),
    }
}

// ── Cancellation wiring ───────────────────────────────────────────────────────

/// The cancel route and cancellable-method key extraction round-trip.
#[test]
fn cancel_key_extraction() {
    let set = HandlerSet::builder()
        .request("op/work", echo)
        .cancellation("op/cancel", |params| {
            params
                .and_then(|p| p.get("taskId"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        })
        .cancellable("op/work", |params| {
            params
                .and_then(|p| p.get("taskId"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        })
        .build()
        .expect("set must build");

    let route = set.cancel_route().expect("cancel route configured");
    assert_eq!(route.method, "op/cancel");

    let key = set.cancel_key_for("op/work", Some(&json!({"taskId": "t-9"})));
    assert_eq!(key.as_deref(), Some("t-9"));

    assert!(
        set.cancel_key_for("op/work", Some(&json!({}))).is_none(),
        "missing key field must extract nothing"
    );
    assert!(
        set.cancel_key_for("op/other", Some(&json!({"taskId": "t"})))
            .is_none(),
        "non-cancellable methods have no key"
    );
}

// ── Handler invocation ────────────────────────────────────────────────────────

/// Registered handlers are invocable through the trait object with a
/// detached context.
#[tokio::test]
async fn handlers_invoke_through_the_trait() {
    let set = HandlerSet::builder()
        .request("op/echo", echo)
        .build()
        .expect("set must build");

    let handler = set.request_handler("op/echo").expect("registered");
    let outcome = handler
        .handle(Some(json!({"text": "hi"})), RequestCx::detached())
        .await;

    assert_eq!(outcome.expect("echo succeeds"), json!({"text": "hi"}));
}

/// A detached context starts uncancelled and observes its own token.
#[test]
fn detached_context_token() {
    let cx = RequestCx::detached();
    assert!(!cx.is_cancelled());
    cx.cancellation().cancel();
    assert!(cx.is_cancelled());
}
