//! A non-blocking, pipelined PostgreSQL protocol engine.
//!
//! # Features
//!
//! - **Sans-I/O engine**: [`NetworkConnection`] does the protocol work over
//!   any non-blocking [`Transport`]; a driver only forwards readiness events
//! - **Pipelining**: requests are written back to back; responses are matched
//!   to frames in write order
//! - **Zero-copy parsing**: frames are parsed in place from the read buffer
//! - **Pooled output**: outgoing messages are assembled in recycled buffers
//! - **Prepared statement cache**: repeated SQL is parsed once per connection
//!
//! # Example
//!
//! ```no_run
//! use pgnio::Opts;
//! use pgnio::protocol::Param;
//!
//! # async fn example() -> pgnio::Result<()> {
//! let opts = Opts {
//!     host: "localhost".into(),
//!     user: "postgres".into(),
//!     database: Some("mydb".into()),
//!     password: Some("secret".into()),
//!     ..Default::default()
//! };
//!
//! let (client, connection) = pgnio::tokio::connect(opts).await?;
//! tokio::spawn(connection.run());
//!
//! let set = client.execute("SELECT $1::int4 + 1", vec![Param::text("41")]).await?;
//! println!("{:?}", set.rows[0].get_str(0)?);
//!
//! client.close()?;
//! # Ok(())
//! # }
//! ```

pub mod buffer_pool;
pub mod connection;
pub mod error;
pub mod handler;
pub mod opts;
pub mod protocol;
pub mod request;
pub mod response;
pub mod row;
pub mod statement_cache;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use buffer_pool::{BufferPool, GLOBAL_BUFFER_POOL, PooledBuffer};
pub use connection::{
    ConnectionState, Handshake, Interest, NetworkConnection, StartupHandshake, Submitter,
    Transport, WriteSignal,
};
pub use error::{Error, ErrorFields, Result};
pub use handler::{CollectHandler, ResultHandler};
pub use opts::Opts;
pub use protocol::types::{FormatCode, Oid, Param, TransactionStatus};
pub use request::{Portal, Request};
pub use response::Response;
pub use row::{Column, ResultSet, Row};
pub use statement_cache::PreparedStatementCache;
