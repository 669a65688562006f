//! `Client`: the entry point that turns a `ConnectionInfo` plus the
//! configuration table of §6 into connections, sync or async.

use std::time::Duration;

use crate::connection::{self, Connection, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use crate::retry_strategies::{ReconnectOnErrorFn, RetryStrategy, RetryStrategyFn};
use crate::types::{ErrorKind, RedisError, RedisResult};

/// The options from §6's configuration table that aren't part of
/// `ConnectionInfo` itself: timing, retry/reconnect policy, offline queueing
/// and the handful of client-side behavior toggles.
#[derive(Clone)]
pub struct ClientOptions {
    pub connect_timeout: Option<Duration>,
    pub retry_strategy: RetryStrategyFn,
    pub max_retries_per_request: u32,
    pub reconnect_on_error: Option<ReconnectOnErrorFn>,
    pub enable_offline_queue: bool,
    pub enable_ready_check: bool,
    pub max_loading_retry_time: Duration,
    pub lazy_connect: bool,
    pub auto_resubscribe: bool,
    pub auto_resend_unfulfilled_commands: bool,
    pub keep_alive: bool,
    pub no_delay: bool,
    pub read_only: bool,
    pub stringify_numbers: bool,
    pub key_prefix: Option<String>,
    pub show_friendly_error_stack: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            connect_timeout: None,
            retry_strategy: RetryStrategy::default().as_fn(),
            max_retries_per_request: 3,
            reconnect_on_error: None,
            enable_offline_queue: true,
            enable_ready_check: true,
            max_loading_retry_time: Duration::from_secs(10),
            lazy_connect: false,
            auto_resubscribe: true,
            auto_resend_unfulfilled_commands: true,
            keep_alive: false,
            no_delay: true,
            read_only: false,
            stringify_numbers: false,
            key_prefix: None,
            show_friendly_error_stack: false,
        }
    }
}

/// A single-node client: connection parameters plus the behavior options
/// that the sync and async connections both read from when they're built.
#[derive(Clone)]
pub struct Client {
    connection_info: ConnectionInfo,
    options: ClientOptions,
}

impl Client {
    pub fn open(connection_info: ConnectionInfo) -> RedisResult<Self> {
        Ok(Client {
            connection_info,
            options: ClientOptions::default(),
        })
    }

    pub fn with_options(connection_info: ConnectionInfo, options: ClientOptions) -> RedisResult<Self> {
        if options.max_retries_per_request == 0 && options.reconnect_on_error.is_some() {
            return Err(RedisError::new(
                ErrorKind::InvalidClientConfig,
                "max_retries_per_request must be nonzero when reconnect_on_error is set",
            ));
        }
        Ok(Client {
            connection_info,
            options,
        })
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.connection_info
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Opens a blocking connection. Async callers use
    /// `aio::multiplexed_connection::MultiplexedConnection::connect` instead,
    /// which also runs the full lifecycle state machine (§4.4).
    pub fn get_connection(&self) -> RedisResult<Connection> {
        connection::connect(&self.connection_info, self.options.connect_timeout)
    }
}

/// Builder mirroring the teacher's `ClientBuilder`, covering §6's
/// configuration table for a single node.
#[derive(Default)]
pub struct ClientBuilder {
    host: String,
    port: u16,
    use_tls: bool,
    insecure_tls: bool,
    redis: RedisConnectionInfo,
    options: ClientOptions,
}

impl ClientBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientBuilder {
            host: host.into(),
            port,
            use_tls: false,
            insecure_tls: false,
            redis: RedisConnectionInfo::default(),
            options: ClientOptions::default(),
        }
    }

    pub fn tls(mut self, insecure: bool) -> Self {
        self.use_tls = true;
        self.insecure_tls = insecure;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.redis.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.redis.password = Some(password.into());
        self
    }

    pub fn db(mut self, db: i64) -> Self {
        self.redis.db = db;
        self
    }

    pub fn connection_name(mut self, name: impl Into<String>) -> Self {
        self.redis.connection_name = Some(name.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = Some(timeout);
        self
    }

    pub fn retry_strategy(mut self, strategy: RetryStrategyFn) -> Self {
        self.options.retry_strategy = strategy;
        self
    }

    pub fn max_retries_per_request(mut self, n: u32) -> Self {
        self.options.max_retries_per_request = n;
        self
    }

    pub fn reconnect_on_error(mut self, f: ReconnectOnErrorFn) -> Self {
        self.options.reconnect_on_error = Some(f);
        self
    }

    pub fn enable_offline_queue(mut self, enabled: bool) -> Self {
        self.options.enable_offline_queue = enabled;
        self
    }

    pub fn enable_ready_check(mut self, enabled: bool) -> Self {
        self.options.enable_ready_check = enabled;
        self
    }

    pub fn lazy_connect(mut self, lazy: bool) -> Self {
        self.options.lazy_connect = lazy;
        self
    }

    pub fn auto_resubscribe(mut self, enabled: bool) -> Self {
        self.options.auto_resubscribe = enabled;
        self
    }

    pub fn auto_resend_unfulfilled_commands(mut self, enabled: bool) -> Self {
        self.options.auto_resend_unfulfilled_commands = enabled;
        self
    }

    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.options.keep_alive = enabled;
        self
    }

    pub fn read_only(mut self, enabled: bool) -> Self {
        self.options.read_only = enabled;
        self
    }

    pub fn stringify_numbers(mut self, enabled: bool) -> Self {
        self.options.stringify_numbers = enabled;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.key_prefix = Some(prefix.into());
        self
    }

    pub fn show_friendly_error_stack(mut self, enabled: bool) -> Self {
        self.options.show_friendly_error_stack = enabled;
        self
    }

    pub fn build(self) -> RedisResult<Client> {
        let addr = if self.use_tls {
            ConnectionAddr::TcpTls {
                host: self.host,
                port: self.port,
                insecure: self.insecure_tls,
            }
        } else {
            ConnectionAddr::Tcp {
                host: self.host,
                port: self.port,
            }
        };
        Client::with_options(
            ConnectionInfo {
                addr,
                redis: self.redis,
            },
            self.options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_a_tcp_connection_info() {
        let client = ClientBuilder::new("localhost", 6379)
            .db(2)
            .password("hunter2")
            .build()
            .unwrap();
        match &client.connection_info().addr {
            ConnectionAddr::Tcp { host, port } => {
                assert_eq!(host, "localhost");
                assert_eq!(*port, 6379);
            }
            other => panic!("expected Tcp, got {other:?}"),
        }
        assert_eq!(client.connection_info().redis.db, 2);
    }

    #[test]
    fn zero_retries_with_reconnect_on_error_is_rejected() {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp {
                host: "localhost".into(),
                port: 6379,
            },
            redis: RedisConnectionInfo::default(),
        };
        let mut options = ClientOptions::default();
        options.max_retries_per_request = 0;
        options.reconnect_on_error = Some(std::sync::Arc::new(|_err| {
            crate::retry_strategies::ReconnectDecision::Ignore
        }));
        assert!(Client::with_options(info, options).is_err());
    }
}
