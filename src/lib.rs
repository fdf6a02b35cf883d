//! memlink is a pipelined client for the memcached meta text protocol.
//!
//! The crate splits into two halves:
//!
//! - [`codec`]: typed request/response structs for `mg`, `ms`, `md`, `ma`
//!   and `version`, plus bulk framing with the `mn`/`MN` no-op sentinel and
//!   a process-wide opaque allocator for response correlation.
//! - [`net`]: the connection engine. Each socket runs a writer task and a
//!   reader task over bounded FIFO queues, preserving response order while
//!   keeping many requests in flight; a supervisor reconnects dropped
//!   sockets and completes stranded links with zombie errors. Lists
//!   round-robin over the sockets of one backend, and the pool fans out
//!   across backends through a pluggable hash function.
//!
//! The submission unit is a [`Link`](codec::Link): one encoder paired with
//! one decoder and a one-shot completion. [`Client`] wraps the common
//! build-submit-await cycle for callers that just want typed operations.
//!
//! ```no_run
//! use memlink::codec::MetaGetRequest;
//! use memlink::net::Backend;
//! use memlink::Client;
//!
//! async fn example() -> Result<(), memlink::Error> {
//!     let backend = Backend::new("127.0.0.1:11211".parse().unwrap(), 4, None);
//!     let client = Client::connect(vec![backend]).await?;
//!     let response = client.meta_get(MetaGetRequest::value("hello")).await?;
//!     println!("{:?} {:?}", response.status, response.value);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod net;

pub use client::Client;
pub use codec::{Completion, Link, LinkDecoder, LinkEncoder};
pub use error::Error;
pub use net::{Backend, Pool, PoolBuilder, TlsConfig};
