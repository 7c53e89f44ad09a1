//! Unit tests for the crate error type.

use agent_conduit::{ConduitError, ErrorObject};

/// Display output is prefixed by the failure domain.
#[test]
fn display_prefixes_the_domain() {
    let cases = [
        (
            ConduitError::Framing("line too long".to_owned()),
            "framing: line too long",
        ),
        (
            ConduitError::Transport("broken pipe".to_owned()),
            "transport: broken pipe",
        ),
        (
            ConduitError::Closed("peer closed the stream".to_owned()),
            "connection closed: peer closed the stream",
        ),
        (
            ConduitError::Registry("duplicate handler".to_owned()),
            "registry: duplicate handler",
        ),
        (
            ConduitError::Spawn("no such file".to_owned()),
            "spawn: no such file",
        ),
        (ConduitError::Io("eof".to_owned()), "io: eof"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

/// Structured peer errors render their code and message.
#[test]
fn rpc_errors_render_code_and_message() {
    let err = ConduitError::from(ErrorObject::method_not_found("session/x"));
    assert_eq!(err.to_string(), "rpc error -32601: Method not found");
}

/// An error object converts into the Rpc variant, preserving its payload.
#[test]
fn error_object_converts_to_rpc_variant() {
    let source = ErrorObject::invalid_params(Some(serde_json::json!({"field": "cwd"})));
    match ConduitError::from(source.clone()) {
        ConduitError::Rpc(inner) => assert_eq!(inner, source),
        other => panic!("expected ConduitError::Rpc, got: {other:?}"),
    }
}

/// I/O errors convert into the Io variant.
#[test]
fn io_errors_convert_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
    match ConduitError::from(io) {
        ConduitError::Io(msg) => assert!(msg.contains("pipe gone")),
        other => panic!("expected ConduitError::Io, got: {other:?}"),
    }
}
