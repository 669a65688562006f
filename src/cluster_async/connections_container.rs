//! The async connection pool (§4.6): one `MultiplexedConnection` per
//! discovered node, created lazily and kept behind a concurrent map so
//! requests never block each other waiting on a write lock.

use dashmap::DashMap;
use std::sync::Arc;

use crate::aio::{MultiplexedConnection, MultiplexedConnectionConfig};
use crate::client::ClientOptions;
use crate::cluster_client::ClusterParams;
use crate::connection::{ConnectionAddr, ConnectionInfo};
use crate::types::{ErrorKind, RedisError, RedisResult};

/// Holds one live connection per node key, created on first use and dropped
/// when a refresh finds the node is no longer part of the cluster.
#[derive(Default)]
pub struct ConnectionsContainer {
    connections: DashMap<String, MultiplexedConnection>,
}

impl ConnectionsContainer {
    pub fn new() -> Self {
        ConnectionsContainer::default()
    }

    /// Returns the existing connection for `node_key`, or creates one.
    pub async fn find_or_create(&self, node_key: &str, params: &ClusterParams) -> RedisResult<MultiplexedConnection> {
        if let Some(existing) = self.connections.get(node_key) {
            return Ok(existing.clone());
        }
        let (host, port) = split_node_key(node_key)?;
        let config = MultiplexedConnectionConfig::new(
            ConnectionInfo {
                addr: ConnectionAddr::Tcp { host, port },
                redis: params.redis.clone(),
            },
            &ClientOptions {
                connect_timeout: params.connect_timeout,
                ..ClientOptions::default()
            },
        );
        let connection = MultiplexedConnection::connect(config).await?;
        self.connections.insert(node_key.to_string(), connection.clone());
        Ok(connection)
    }

    /// Drops a node's connection, e.g. because a refresh found it gone or a
    /// `MOVED` pointed away from it permanently.
    pub fn drop_node(&self, node_key: &str) {
        self.connections.remove(node_key);
    }

    /// Keeps only the connections for node keys still present after a
    /// topology refresh.
    pub fn retain_only(&self, live: &[String]) {
        let live: std::collections::HashSet<&str> = live.iter().map(String::as_str).collect();
        self.connections.retain(|k, _| live.contains(k.as_str()));
    }

    pub fn sample_any(&self) -> Option<String> {
        self.connections.iter().next().map(|entry| entry.key().clone())
    }

    pub fn node_keys(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }
}

pub fn split_node_key(key: &str) -> RedisResult<(String, u16)> {
    let (host, port) = key
        .rsplit_once(':')
        .ok_or_else(|| RedisError::new(ErrorKind::Protocol, "malformed node key"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| RedisError::new(ErrorKind::Protocol, "malformed node key port"))?;
    Ok((host.to_string(), port))
}

pub type SharedConnectionsContainer = Arc<ConnectionsContainer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_node_key_parses_host_and_port() {
        assert_eq!(split_node_key("127.0.0.1:7000").unwrap(), ("127.0.0.1".to_string(), 7000));
    }

    #[test]
    fn new_container_has_no_nodes() {
        let c = ConnectionsContainer::new();
        assert!(c.sample_any().is_none());
        assert!(c.node_keys().is_empty());
    }
}
