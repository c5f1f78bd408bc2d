//! gol RPC client
//!
//! Multiplexed request/response client for SurrealDB's CBOR RPC endpoint.
//! One WebSocket carries every call; a background task matches responses to
//! callers by request id, so calls can be issued concurrently and answered in
//! any order.
//!
//! # Example
//!
//! ```no_run
//! use gol_client::{at, ConnectionBuilder, NoVars};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gol_client::ClientError> {
//!     let conn = ConnectionBuilder::new("localhost:8000")
//!         .namespace("test")
//!         .auth("root", "root")
//!         .connect()
//!         .await?;
//!
//!     let results = conn.query("RETURN 1+1", NoVars {}).await?;
//!     let two: i64 = at(&results, 0)?;
//!     println!("1 + 1 = {}", two);
//!
//!     conn.close().await
//! }
//! ```

pub mod client;
pub mod protocol;
pub mod serial;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use client::{at, ClientConfig, Connection, ConnectionBuilder, NoVars};
pub use protocol::{
    ClientError, ClientResult, Datetime, QueryResult, Request, Response, RpcErr, Value,
};
pub use serial::Serial;
