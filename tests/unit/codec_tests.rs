//! Unit tests for the NDJSON line codec.
//!
//! Covers: single-line decode, batched lines, partial buffering, the
//! max-line limit, recovery after an over-long line, and encoder framing.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use agent_conduit::rpc::codec::{JsonLineCodec, DEFAULT_MAX_FRAME_BYTES};
use agent_conduit::ConduitError;

// ── Decoding ──────────────────────────────────────────────────────────────────

/// A complete newline-terminated line decodes as one frame, newline stripped.
#[test]
fn single_line_decodes() {
    let mut codec = JsonLineCodec::new();
    let mut buf = BytesMut::from("{\"method\":\"session/update\",\"params\":{}}\n");

    let frame = codec
        .decode(&mut buf)
        .expect("decode must succeed for a complete line");

    assert_eq!(
        frame,
        Some("{\"method\":\"session/update\",\"params\":{}}".to_owned()),
        "decoded frame must be the line without its trailing newline"
    );
}

/// Two lines delivered in one buffer decode as two successive frames.
#[test]
fn batched_lines_decode_separately() {
    let mut codec = JsonLineCodec::new();
    let raw = concat!(
        "{\"id\":0,\"method\":\"initialize\"}\n",
        "{\"id\":0,\"result\":{}}\n",
    );
    let mut buf = BytesMut::from(raw);

    assert!(codec.decode(&mut buf).expect("first decode").is_some());
    assert!(codec.decode(&mut buf).expect("second decode").is_some());
    assert!(
        codec.decode(&mut buf).expect("empty buffer").is_none(),
        "no third frame must be produced"
    );
}

/// A fragment without its newline is buffered, not emitted.
#[test]
fn partial_line_is_buffered() {
    let mut codec = JsonLineCodec::new();
    let mut buf = BytesMut::from("{\"id\":1,\"method\":\"session/pro");

    assert!(
        codec.decode(&mut buf).expect("partial decode").is_none(),
        "incomplete line must not be emitted"
    );

    buf.extend_from_slice(b"mpt\"}\n");
    assert!(
        codec.decode(&mut buf).expect("completed decode").is_some(),
        "frame must be emitted once the newline arrives"
    );
}

/// A line exceeding the limit yields a framing error, not an allocation.
#[test]
fn over_long_line_is_a_framing_error() {
    let mut codec = JsonLineCodec::with_limit(64);
    let big = "a".repeat(65) + "\n";
    let mut buf = BytesMut::from(big.as_str());

    match codec.decode(&mut buf) {
        Err(ConduitError::Framing(msg)) => assert!(
            msg.contains("line too long"),
            "error must mention 'line too long', got: {msg}"
        ),
        other => panic!("expected Err(ConduitError::Framing), got: {other:?}"),
    }
}

/// After an over-long line errors, the codec recovers and decodes the next
/// line — a framing error is isolated to the offending frame.
#[test]
fn decoder_recovers_after_over_long_line() {
    let mut codec = JsonLineCodec::with_limit(16);
    let raw = format!("{}\n{{\"ok\":1}}\n", "x".repeat(64));
    let mut buf = BytesMut::from(raw.as_str());

    assert!(
        codec.decode(&mut buf).is_err(),
        "first decode must report the over-long line"
    );

    // Drive the decoder until it has discarded the bad line.
    let mut recovered = None;
    for _ in 0..4 {
        if let Ok(Some(frame)) = codec.decode(&mut buf) {
            recovered = Some(frame);
            break;
        }
    }
    assert_eq!(
        recovered.as_deref(),
        Some("{\"ok\":1}"),
        "the line after the over-long one must still decode"
    );
}

/// The default limit matches the documented 1 MiB constant.
#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(DEFAULT_MAX_FRAME_BYTES, 1_048_576);
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// The encoder terminates each frame with a single `\n`.
#[test]
fn encoder_appends_newline() {
    let mut codec = JsonLineCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode("{\"id\":0,\"result\":null}".to_owned(), &mut buf)
        .expect("encode must succeed");

    assert_eq!(&buf[..], b"{\"id\":0,\"result\":null}\n");
}
