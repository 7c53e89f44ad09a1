//! Bidirectional JSON-RPC connection engine.
//!
//! Frames are newline-delimited JSON objects on a duplex byte stream; each
//! side of the stream is simultaneously an RPC caller and an RPC server.
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based NDJSON framing.
//! - `message`: wire model — request ids, frame classification, error objects.
//! - `pending`: correlation table for locally issued requests.
//! - `dispatch`: handler registration, routing, and cancellation plumbing.
//! - `connection`: the connection itself — read loop, writer task, lifecycle.

pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod message;
pub mod pending;
