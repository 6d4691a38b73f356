//! Async client library for the consoled stream-multiplexing protocol.
//!
//! A [`Client`] connects once, maintains a cache of server status and
//! subscribed streams, and exposes non-blocking request methods alongside a
//! handful of bounded-wait helpers built on top of them (`connect`,
//! `available_streams`, `subscribe`, `read_stream`).
//!
//! ```no_run
//! use consoled_client::{Client, ClientConfig};
//!
//! # async fn run() -> consoled_client::ConsoledResult<()> {
//! let mut client = Client::construct(ClientConfig::new("127.0.0.1")).await?;
//! client.subscribe("CONSOLE", Some("read")).await?;
//! let chunk = client.read_stream("CONSOLE").await?;
//! println!("{chunk}");
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod router;

pub use client::{Client, ClientConfig, ConsoledError, ConsoledResult};
pub use codec::{AckCommand, Message, PROTOCOL_MAJOR, PROTOCOL_MINOR, SERVER_PORT};
