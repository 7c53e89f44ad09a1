#![forbid(unsafe_code)]

//! Bidirectional JSON-RPC connection core for agent/client process pairs.
//!
//! Two processes — an *agent* and a *client* — exchange newline-delimited
//! JSON-RPC frames over a duplex byte stream, typically the stdin/stdout of
//! a spawned peer. Each side issues requests, serves the peer's requests
//! concurrently on the same stream, routes one-way notifications, and can
//! cooperatively cancel the peer's in-flight work.

pub mod errors;
pub mod process;
pub mod role;
pub mod rpc;

pub use errors::{ConduitError, Result};
pub use process::supervisor::{spawn_peer, PeerProcess, SpawnConfig};
pub use role::{
    AgentHandlers, AgentMethod, AgentNotification, ClientHandlers, ClientMethod,
    ClientNotification, Role,
};
pub use rpc::connection::{Connection, ConnectionOptions};
pub use rpc::dispatch::{HandlerOutcome, HandlerSet, RequestCx};
pub use rpc::message::{ErrorObject, RequestId};
