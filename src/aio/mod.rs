//! Async connection types (§4.4, §4.9): the multiplexed connection lifecycle
//! state machine and the `ConnectionLike` trait it implements.

pub mod multiplexed_connection;
pub mod runtime;

pub use multiplexed_connection::{ConnectionState, MultiplexedConnection, MultiplexedConnectionConfig};

use crate::cmd::Cmd;
use crate::types::{RedisResult, Value};

/// The async counterpart of `connection::ConnectionLike`. `async_trait` keeps
/// the surface usable as `&mut dyn AsyncConnectionLike` the way the sync
/// trait is, at the cost of boxing each call's future.
#[async_trait::async_trait]
pub trait AsyncConnectionLike {
    async fn req_command(&mut self, cmd: &Cmd) -> RedisResult<Value>;

    async fn req_packed_commands(
        &mut self,
        packed: Vec<u8>,
        offset: usize,
        count: usize,
    ) -> RedisResult<Vec<Value>>;
}

#[async_trait::async_trait]
impl AsyncConnectionLike for MultiplexedConnection {
    async fn req_command(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        MultiplexedConnection::req_command(self, cmd).await
    }

    async fn req_packed_commands(
        &mut self,
        packed: Vec<u8>,
        offset: usize,
        count: usize,
    ) -> RedisResult<Vec<Value>> {
        MultiplexedConnection::req_packed_commands(self, packed, offset, count).await
    }
}
