//! Sentinel-based discovery (§4.10): ask a list of Sentinel processes for
//! the current master (or a replica) of a named service, trying each
//! Sentinel in turn until one answers.

use crate::client::ClientBuilder;
use crate::commands::Commands;
use crate::connection::{node_key, ConnectionAddr};
use crate::types::{ErrorKind, RedisError, RedisResult};

/// Which role to resolve a service name to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelRole {
    Master,
    Replica,
}

/// Rewrites a discovered node's address before connecting, for deployments
/// where Sentinel reports addresses on a private network (§4.10 "NAT map").
pub type NatMap = std::collections::HashMap<String, (String, u16)>;

pub struct SentinelClient {
    sentinels: Vec<ConnectionAddr>,
    service_name: String,
    nat_map: NatMap,
}

impl SentinelClient {
    pub fn new(sentinels: Vec<ConnectionAddr>, service_name: impl Into<String>) -> Self {
        SentinelClient {
            sentinels,
            service_name: service_name.into(),
            nat_map: NatMap::new(),
        }
    }

    pub fn with_nat_map(mut self, nat_map: NatMap) -> Self {
        self.nat_map = nat_map;
        self
    }

    /// Resolves the current address for `role` by asking each Sentinel in
    /// turn, stopping at the first one that answers.
    pub fn resolve(&self, role: SentinelRole) -> RedisResult<ConnectionAddr> {
        let mut last_err = None;
        for sentinel_addr in &self.sentinels {
            match self.ask_sentinel(sentinel_addr, role) {
                Ok(addr) => return Ok(addr),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            RedisError::new(ErrorKind::ClusterAllFailed, "no sentinel in the list could be reached")
        }))
    }

    fn ask_sentinel(&self, sentinel_addr: &ConnectionAddr, role: SentinelRole) -> RedisResult<ConnectionAddr> {
        let ConnectionAddr::Tcp { host, port } = sentinel_addr else {
            return Err(RedisError::new(
                ErrorKind::InvalidClientConfig,
                "sentinel addresses must be plain TCP endpoints",
            ));
        };
        let client = ClientBuilder::new(host.clone(), *port).build()?;
        let mut conn = client.get_connection()?;

        let (host, port) = match role {
            SentinelRole::Master => {
                let reply: Vec<String> = conn.get_master_addr_by_name(&self.service_name)?;
                if reply.len() != 2 {
                    return Err(RedisError::new(ErrorKind::Protocol, "unexpected SENTINEL reply shape"));
                }
                let port: u16 = reply[1]
                    .parse()
                    .map_err(|_| RedisError::new(ErrorKind::Protocol, "non-numeric port in SENTINEL reply"))?;
                (reply[0].clone(), port)
            }
            SentinelRole::Replica => {
                let replicas: Vec<std::collections::HashMap<String, String>> = conn.sentinel_replicas(&self.service_name)?;
                let replica = replicas
                    .iter()
                    .find(|r| r.get("flags").map(|f| !f.contains("s_down") && !f.contains("disconnected")).unwrap_or(true))
                    .ok_or_else(|| RedisError::new(ErrorKind::ClusterAllFailed, "no healthy replica reported"))?;
                let ip = replica.get("ip").cloned().ok_or_else(|| RedisError::new(ErrorKind::Protocol, "replica missing ip"))?;
                let port: u16 = replica
                    .get("port")
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| RedisError::new(ErrorKind::Protocol, "replica missing port"))?;
                (ip, port)
            }
        };
        let (host, port) = self.apply_nat_map(host, port);
        Ok(ConnectionAddr::Tcp { host, port })
    }

    fn apply_nat_map(&self, host: String, port: u16) -> (String, u16) {
        self.nat_map
            .get(&node_key(&host, port))
            .cloned()
            .unwrap_or((host, port))
    }
}

/// Sentinel-specific commands, built the same way the rest of the crate's
/// `Commands` trait exposes a representative method set (§1 non-goal: not
/// every Sentinel subcommand).
pub trait SentinelCommands: Commands {
    fn get_master_addr_by_name<T: crate::types::FromRedisValue>(&mut self, service_name: &str) -> RedisResult<T> {
        let mut cmd = crate::cmd::Cmd::with_name("SENTINEL");
        cmd.arg("get-master-addr-by-name").arg(service_name);
        self.req_command(&cmd).and_then(T::from_owned_redis_value)
    }

    fn sentinel_replicas<T: crate::types::FromRedisValue>(&mut self, service_name: &str) -> RedisResult<T> {
        let mut cmd = crate::cmd::Cmd::with_name("SENTINEL");
        cmd.arg("replicas").arg(service_name);
        self.req_command(&cmd).and_then(T::from_owned_redis_value)
    }

    fn sentinels<T: crate::types::FromRedisValue>(&mut self, service_name: &str) -> RedisResult<T> {
        let mut cmd = crate::cmd::Cmd::with_name("SENTINEL");
        cmd.arg("sentinels").arg(service_name);
        self.req_command(&cmd).and_then(T::from_owned_redis_value)
    }
}

impl<C: Commands> SentinelCommands for C {}
