//! Cluster-wide configuration (§6): seed nodes, redirection limits and the
//! background topology refresh schedule.

use std::time::Duration;

use crate::cluster_slotmap::ReadFromReplicaStrategy;
use crate::connection::{ConnectionAddr, RedisConnectionInfo};
use crate::types::{ErrorKind, RedisError, RedisResult};

#[derive(Clone)]
pub struct ClusterParams {
    pub redis: RedisConnectionInfo,
    pub read_from_replica: ReadFromReplicaStrategy,
    pub max_redirections: u32,
    pub retry_delay_on_moved: Duration,
    pub retry_delay_on_try_again: Duration,
    pub slots_refresh_interval: Option<Duration>,
    pub slots_refresh_timeout: Duration,
    pub connect_timeout: Option<Duration>,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            redis: RedisConnectionInfo::default(),
            read_from_replica: ReadFromReplicaStrategy::default(),
            max_redirections: 16,
            retry_delay_on_moved: Duration::from_millis(0),
            retry_delay_on_try_again: Duration::from_millis(100),
            slots_refresh_interval: Some(Duration::from_secs(30)),
            slots_refresh_timeout: Duration::from_secs(1),
            connect_timeout: None,
        }
    }
}

/// Builds a cluster client from one or more seed node addresses. Only one
/// seed needs to be reachable; `CLUSTER SLOTS` against it discovers the rest.
#[derive(Default)]
pub struct ClusterClientBuilder {
    seeds: Vec<ConnectionAddr>,
    params: ClusterParams,
}

impl ClusterClientBuilder {
    pub fn new(seeds: Vec<ConnectionAddr>) -> Self {
        ClusterClientBuilder {
            seeds,
            params: ClusterParams::default(),
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.params.redis.password = Some(password.into());
        self
    }

    pub fn read_from_replica(mut self, strategy: ReadFromReplicaStrategy) -> Self {
        self.params.read_from_replica = strategy;
        self
    }

    pub fn max_redirections(mut self, n: u32) -> Self {
        self.params.max_redirections = n;
        self
    }

    pub fn retry_delay_on_moved(mut self, delay: Duration) -> Self {
        self.params.retry_delay_on_moved = delay;
        self
    }

    pub fn retry_delay_on_try_again(mut self, delay: Duration) -> Self {
        self.params.retry_delay_on_try_again = delay;
        self
    }

    pub fn slots_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.params.slots_refresh_interval = interval;
        self
    }

    pub fn slots_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.params.slots_refresh_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.params.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> RedisResult<ClusterClient> {
        if self.seeds.is_empty() {
            return Err(RedisError::new(
                ErrorKind::InvalidClientConfig,
                "a cluster client needs at least one seed node",
            ));
        }
        Ok(ClusterClient {
            seeds: self.seeds,
            params: self.params,
        })
    }
}

/// Seed nodes plus cluster-wide parameters; the actual slot map and node
/// connections live in `cluster::ClusterConnection` /
/// `cluster_async::ClusterConnection`, built from this.
#[derive(Clone)]
pub struct ClusterClient {
    pub(crate) seeds: Vec<ConnectionAddr>,
    pub(crate) params: ClusterParams,
}

impl ClusterClient {
    pub fn seeds(&self) -> &[ConnectionAddr] {
        &self.seeds
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }
}
