//! Tokio driver for the protocol engine.
//!
//! [`connect`] returns a [`Client`] and the [`Connection`] that owns the
//! socket. The connection waits on socket readiness and on submissions, and
//! hands both to the engine; all protocol work happens inside its task.

mod conn;
mod stream;

pub use conn::{Client, Connection, connect};
pub use stream::Stream;
