//! Process-supervision layer.
//!
//! Spawning a peer process and owning its lifecycle: stdio wiring to a
//! [`Connection`](crate::rpc::connection::Connection), stderr diagnostics,
//! and guaranteed termination on every exit path.

pub mod supervisor;
