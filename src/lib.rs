//! A client library for a key/value server speaking the RESP wire protocol:
//! command encoding, reply decoding, a single-node connection (blocking and
//! async), pipelines/transactions, and optional cluster and Sentinel
//! support.
//!
//! Start with [`client::Client`] for a single node, or
//! [`cluster_client::ClusterClient`] when `cluster`/`cluster-async` is
//! enabled. [`cmd::cmd`] and [`pipeline::pipe`] build commands and batches;
//! [`commands::Commands`] is a representative convenience surface over any
//! [`connection::ConnectionLike`].

#[macro_use]
mod macros;

pub mod client;
pub mod cmd;
pub mod commands;
pub mod connection;
pub mod parser;
pub mod pipeline;
pub mod push_manager;
pub mod retry_strategies;
pub mod subscription;
pub mod types;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub mod aio;

#[cfg(feature = "cluster")]
pub mod cluster;
#[cfg(feature = "cluster")]
pub mod cluster_client;
#[cfg(feature = "cluster")]
pub mod cluster_routing;
#[cfg(feature = "cluster")]
pub mod cluster_slotmap;
#[cfg(feature = "cluster")]
pub mod cluster_topology;

#[cfg(feature = "cluster-async")]
pub mod cluster_async;

#[cfg(feature = "sentinel")]
pub mod sentinel;

pub use client::{Client, ClientBuilder, ClientOptions};
pub use cmd::{cmd, Cmd};
pub use commands::Commands;
pub use connection::{Connection, ConnectionAddr, ConnectionInfo, ConnectionLike, RedisConnectionInfo};
pub use pipeline::{pipe, Pipeline};
pub use types::{ErrorKind, FromRedisValue, RedisError, RedisResult, ToRedisArgs, Value};

#[cfg(feature = "cluster")]
pub use cluster_client::{ClusterClient, ClusterClientBuilder};
