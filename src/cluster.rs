//! Synchronous cluster connection (§4.6, §4.7): owns one blocking connection
//! per discovered node, keeps a refreshed slot map, and follows
//! `MOVED`/`ASK`/`TRYAGAIN`/`CLUSTERDOWN` redirects up to `max_redirections`.

use std::collections::HashMap;
use std::thread;

use crate::cluster_client::{ClusterClient, ClusterParams};
use crate::cluster_routing::{
    analyze_pipeline_results, redirect_from_error, resolve_node, routing_for_command, routing_for_pipeline,
    PipelineOutcome, Redirect, RoutingInfo, SingleNodeRoutingInfo,
};
use crate::cluster_slotmap::SlotMap;
use crate::cluster_topology::parse_cluster_slots;
use crate::cmd::Cmd;
use crate::commands::transform_reply;
use crate::connection::{self, Connection, ConnectionAddr, ConnectionInfo, ConnectionLike};
use crate::pipeline::Pipeline;
use crate::types::{ErrorKind, RedisError, RedisResult, Value};

pub struct ClusterConnection {
    connections: HashMap<String, Connection>,
    slots: SlotMap,
    params: ClusterParams,
    seeds: Vec<ConnectionAddr>,
}

impl ClusterConnection {
    pub fn new(client: &ClusterClient) -> RedisResult<Self> {
        let mut conn = ClusterConnection {
            connections: HashMap::new(),
            slots: SlotMap::new(),
            params: client.params().clone(),
            seeds: client.seeds().to_vec(),
        };
        conn.refresh_slots()?;
        Ok(conn)
    }

    fn connect_node(&mut self, node_key: &str) -> RedisResult<&mut Connection> {
        if !self.connections.contains_key(node_key) {
            let (host, port) = split_node_key(node_key)?;
            let info = ConnectionInfo {
                addr: ConnectionAddr::Tcp { host, port },
                redis: self.params.redis.clone(),
            };
            let c = connection::connect(&info, self.params.connect_timeout)?;
            self.connections.insert(node_key.to_string(), c);
        }
        Ok(self.connections.get_mut(node_key).expect("just inserted"))
    }

    fn any_connected_node(&mut self) -> RedisResult<String> {
        if let Some(key) = self.slots.all_node_keys().into_iter().next() {
            return Ok(key);
        }
        for seed in self.seeds.clone() {
            if let ConnectionAddr::Tcp { host, port } = seed {
                let key = connection::node_key(&host, port);
                if self.connect_node(&key).is_ok() {
                    return Ok(key);
                }
            }
        }
        Err(RedisError::new(ErrorKind::ClusterAllFailed, "no seed node could be reached"))
    }

    /// Re-fetches `CLUSTER SLOTS` from any reachable node and rebuilds the
    /// slot map (§4.6).
    pub fn refresh_slots(&mut self) -> RedisResult<()> {
        let node_key = self.any_connected_node()?;
        let mut cluster_slots_cmd = Cmd::with_name("CLUSTER");
        cluster_slots_cmd.arg("SLOTS");
        let reply = {
            let conn = self.connect_node(&node_key)?;
            conn.req_command(&cluster_slots_cmd)?
        };
        let slots = parse_cluster_slots(&reply)?;
        self.slots = SlotMap::from_slots(&slots);
        Ok(())
    }

    fn route_command(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        let RoutingInfo::SingleNode(routing) = routing_for_command(cmd)?;
        let known_nodes = self.slots.all_node_keys();
        let Some(node_key) = resolve_node(&routing, &self.slots, self.params.read_from_replica, 0, &known_nodes).map(str::to_string) else {
            return Err(RedisError::new(ErrorKind::ClusterAllFailed, "no node is known for this command's slot"));
        };
        self.dispatch_with_redirects(cmd, node_key, None, 0)
    }

    fn dispatch_with_redirects(
        &mut self,
        cmd: &Cmd,
        mut node_key: String,
        mut pending_ask: Option<()>,
        mut redirections: u32,
    ) -> RedisResult<Value> {
        loop {
            if pending_ask.take().is_some() {
                let conn = self.connect_node(&node_key)?;
                conn.req_command(&Cmd::with_name("ASKING"))?;
            }
            let result = {
                let conn = self.connect_node(&node_key)?;
                conn.req_command(cmd)
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if redirections >= self.params.max_redirections {
                return Err(RedisError::new(ErrorKind::MaxRedirections, "exhausted max_redirections"));
            }
            match redirect_from_error(&err) {
                Some(Redirect::Moved { target, .. }) => {
                    let (host, port) = split_node_key(&target)?;
                    node_key = connection::node_key(&host, port);
                    self.refresh_slots().ok();
                    redirections += 1;
                    thread::sleep(self.params.retry_delay_on_moved);
                    continue;
                }
                Some(Redirect::Ask { target, .. }) => {
                    let (host, port) = split_node_key(&target)?;
                    node_key = connection::node_key(&host, port);
                    pending_ask = Some(());
                    redirections += 1;
                    continue;
                }
                None if err.kind() == ErrorKind::TryAgain => {
                    thread::sleep(self.params.retry_delay_on_try_again);
                    redirections += 1;
                    continue;
                }
                None if err.kind() == ErrorKind::ClusterDown => {
                    self.refresh_slots().ok();
                    redirections += 1;
                    thread::sleep(self.params.retry_delay_on_try_again);
                    continue;
                }
                None => return Err(err),
            }
        }
    }

    /// Executes a pipeline/transaction against whichever single node owns
    /// its slot (§4.9 "cluster-aware pipeline retry"), resending the whole
    /// batch on `MOVED`/`ASK` and after `TRYAGAIN`/`CLUSTERDOWN`.
    pub fn req_pipeline(&mut self, pipeline: &Pipeline) -> RedisResult<Vec<Value>> {
        let route = routing_for_pipeline(pipeline.commands())?;
        let routing = match route {
            Some(r) => SingleNodeRoutingInfo::Route(r),
            None => SingleNodeRoutingInfo::Random,
        };
        let known_nodes = self.slots.all_node_keys();
        let Some(mut node_key) = resolve_node(&routing, &self.slots, self.params.read_from_replica, 0, &known_nodes).map(str::to_string) else {
            return Err(RedisError::new(ErrorKind::ClusterAllFailed, "no node is known for this pipeline's slot"));
        };
        let mut redirections = 0u32;
        let mut needs_asking = false;
        loop {
            if needs_asking {
                let conn = self.connect_node(&node_key)?;
                conn.req_command(&Cmd::with_name("ASKING"))?;
                needs_asking = false;
            }
            let raw = {
                let conn = self.connect_node(&node_key)?;
                pipeline.raw_results(conn)
            };
            let raw = match raw {
                Ok(raw) => raw,
                Err(err) => return Err(err),
            };
            if redirections >= self.params.max_redirections {
                return Err(RedisError::new(ErrorKind::MaxRedirections, "exhausted max_redirections"));
            }
            match analyze_pipeline_results(&raw, pipeline.commands(), pipeline.is_atomic()) {
                PipelineOutcome::Done => return pipeline.make_pipeline_results(raw),
                PipelineOutcome::RetryWhole { target, needs_asking: ask } => {
                    let (host, port) = split_node_key(&target)?;
                    node_key = connection::node_key(&host, port);
                    needs_asking = ask;
                    self.refresh_slots().ok();
                    redirections += 1;
                    thread::sleep(self.params.retry_delay_on_moved);
                }
                PipelineOutcome::RetrySameNode => {
                    self.refresh_slots().ok();
                    thread::sleep(self.params.retry_delay_on_try_again);
                    redirections += 1;
                }
                PipelineOutcome::Failed(err) => return Err(err),
            }
        }
    }
}

fn split_node_key(node_key: &str) -> RedisResult<(String, u16)> {
    let (host, port) = node_key
        .rsplit_once(':')
        .ok_or_else(|| RedisError::new(ErrorKind::Protocol, "malformed node key"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| RedisError::new(ErrorKind::Protocol, "malformed node key port"))?;
    Ok((host.to_string(), port))
}

impl ConnectionLike for ClusterConnection {
    fn req_command(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        let reply = self.route_command(cmd)?;
        Ok(transform_reply(cmd.name(), reply))
    }

    fn req_packed_commands(&mut self, _packed: &[u8], _offset: usize, _count: usize) -> RedisResult<Vec<Value>> {
        Err(RedisError::new(
            ErrorKind::InvalidClientConfig,
            "use ClusterConnection::req_pipeline instead of raw packed commands on a cluster connection",
        ))
    }

    fn supports_pipelining(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_node_key_parses_host_and_port() {
        assert_eq!(split_node_key("127.0.0.1:7000").unwrap(), ("127.0.0.1".to_string(), 7000));
    }

    #[test]
    fn split_node_key_rejects_malformed_input() {
        assert!(split_node_key("not-a-node-key").is_err());
    }
}
