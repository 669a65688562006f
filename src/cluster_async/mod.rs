//! The async cluster client (§4.6–§4.9): boots from a seed list, keeps the
//! slot map fresh in the background, and dispatches commands with
//! `MOVED`/`ASK`/`TRYAGAIN`/`CLUSTERDOWN` redirection.

pub mod connections_container;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;

use self::connections_container::{ConnectionsContainer, SharedConnectionsContainer};
use crate::aio::AsyncConnectionLike;
use crate::cluster_client::{ClusterClient, ClusterParams};
use crate::cluster_routing::{
    analyze_pipeline_results, redirect_from_error, resolve_node, routing_for_command, routing_for_pipeline,
    PipelineOutcome, Redirect, RoutingInfo, SingleNodeRoutingInfo,
};
use crate::cluster_slotmap::SlotMap;
use crate::cluster_topology::parse_cluster_slots;
use crate::cmd::Cmd;
use crate::commands::transform_reply;
use crate::connection::{ConnectionAddr, node_key as make_node_key};
use crate::pipeline::Pipeline;
use crate::types::{ErrorKind, RedisError, RedisResult, Value};

struct Inner {
    slots: ArcSwap<SlotMap>,
    connections: SharedConnectionsContainer,
    params: ClusterParams,
    seeds: Vec<ConnectionAddr>,
    refresh_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.refresh_task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

/// A cloneable handle to a cluster client. Cloning shares the connection
/// pool and slot map; dropping the last clone stops the background refresh
/// task (§4.6's graceful shutdown).
#[derive(Clone)]
pub struct ClusterConnection {
    inner: Arc<Inner>,
}

impl ClusterConnection {
    pub async fn connect(client: &ClusterClient) -> RedisResult<Self> {
        let connections = SharedConnectionsContainer::new(ConnectionsContainer::new());
        let params = client.params().clone();
        let seeds = client.seeds().to_vec();

        let slots = fetch_slots(&connections, &params, &seeds).await?;
        let slots = ArcSwap::new(Arc::new(slots));

        let inner = Arc::new(Inner {
            slots,
            connections,
            params: params.clone(),
            seeds: seeds.clone(),
            refresh_task: std::sync::Mutex::new(None),
        });

        if let Some(interval) = params.slots_refresh_interval {
            let refresh_inner = inner.clone();
            let handle = crate::aio::runtime::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let _ = refresh_once(&refresh_inner.connections, &refresh_inner.params, &refresh_inner.seeds)
                        .await
                        .map(|slots| refresh_inner.slots.store(Arc::new(slots)));
                }
            });
            *inner.refresh_task.lock().expect("refresh task mutex poisoned") = Some(handle);
        }

        Ok(ClusterConnection { inner })
    }

    pub async fn refresh_slots(&self) -> RedisResult<()> {
        let slots = refresh_once(&self.inner.connections, &self.inner.params, &self.inner.seeds).await?;
        self.inner.connections.retain_only(&slots.all_node_keys());
        self.inner.slots.store(Arc::new(slots));
        Ok(())
    }

    async fn node_for(&self, routing: &SingleNodeRoutingInfo) -> RedisResult<String> {
        let slots = self.inner.slots.load_full();
        let known = self.inner.connections.node_keys();
        let fallback = if known.is_empty() { self.default_node_keys() } else { known };
        resolve_node(routing, &slots, self.inner.params.read_from_replica, 0, &fallback)
            .map(str::to_string)
            .ok_or_else(|| RedisError::new(ErrorKind::ClusterAllFailed, "no node is known for this command's slot"))
    }

    fn default_node_keys(&self) -> Vec<String> {
        self.inner
            .seeds
            .iter()
            .filter_map(|addr| match addr {
                ConnectionAddr::Tcp { host, port } => Some(make_node_key(host, *port)),
                _ => None,
            })
            .collect()
    }

    pub async fn req_command(&self, cmd: &Cmd) -> RedisResult<Value> {
        let RoutingInfo::SingleNode(routing) = routing_for_command(cmd)?;
        let mut node_key = self.node_for(&routing).await?;
        let mut redirections = 0u32;
        let mut needs_asking = false;
        loop {
            let connection = self.inner.connections.find_or_create(&node_key, &self.inner.params).await?;
            if needs_asking {
                connection.req_command(&Cmd::with_name("ASKING")).await?;
                needs_asking = false;
            }
            match connection.req_command(cmd).await {
                Ok(value) => return Ok(transform_reply(cmd.name(), value)),
                Err(err) => {
                    if redirections >= self.inner.params.max_redirections {
                        return Err(RedisError::new(ErrorKind::MaxRedirections, "exhausted max_redirections"));
                    }
                    redirections += 1;
                    match redirect_from_error(&err) {
                        Some(Redirect::Moved { target, .. }) => {
                            let _ = self.refresh_slots().await;
                            node_key = target;
                        }
                        Some(Redirect::Ask { target, .. }) => {
                            node_key = target;
                            needs_asking = true;
                        }
                        None if err.kind() == ErrorKind::TryAgain => {
                            tokio::time::sleep(self.inner.params.retry_delay_on_try_again).await;
                        }
                        None if err.kind() == ErrorKind::ClusterDown => {
                            let _ = self.refresh_slots().await;
                            tokio::time::sleep(self.inner.params.retry_delay_on_try_again).await;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }

    /// Executes a pipeline/transaction against whichever single node owns
    /// its slot (§4.9 "cluster-aware pipeline retry"), resending the whole
    /// batch on `MOVED`/`ASK` and after `TRYAGAIN`/`CLUSTERDOWN`.
    pub async fn req_pipeline(&self, pipeline: &Pipeline) -> RedisResult<Vec<Value>> {
        let route = routing_for_pipeline(pipeline.commands())?;
        let routing = match route {
            Some(r) => SingleNodeRoutingInfo::Route(r),
            None => SingleNodeRoutingInfo::Random,
        };
        let mut node_key = self.node_for(&routing).await?;
        let mut redirections = 0u32;
        let mut needs_asking = false;
        loop {
            let connection = self.inner.connections.find_or_create(&node_key, &self.inner.params).await?;
            if needs_asking {
                connection.req_command(&Cmd::with_name("ASKING")).await?;
                needs_asking = false;
            }
            let packed = pipeline.get_packed_pipeline();
            let total = pipeline.len() + if pipeline.is_atomic() { 2 } else { 0 };
            let raw = connection.req_packed_commands(packed, 0, total).await;
            let raw = match raw {
                Ok(raw) => raw,
                Err(err) => return Err(err),
            };
            let raw = if pipeline.is_atomic() {
                match raw.into_iter().last() {
                    Some(Value::Bulk(items)) => items,
                    Some(Value::Nil) => {
                        return Err(RedisError::new(ErrorKind::ExecAbort, "transaction aborted: a watched key changed"))
                    }
                    _ => return Err(RedisError::new(ErrorKind::Protocol, "no reply received for EXEC")),
                }
            } else {
                raw
            };
            if redirections >= self.inner.params.max_redirections {
                return Err(RedisError::new(ErrorKind::MaxRedirections, "exhausted max_redirections"));
            }
            match analyze_pipeline_results(&raw, pipeline.commands(), pipeline.is_atomic()) {
                PipelineOutcome::Done => return pipeline.make_pipeline_results(raw),
                PipelineOutcome::RetryWhole { target, needs_asking: ask } => {
                    let _ = self.refresh_slots().await;
                    node_key = target;
                    needs_asking = ask;
                    redirections += 1;
                }
                PipelineOutcome::RetrySameNode => {
                    let _ = self.refresh_slots().await;
                    tokio::time::sleep(self.inner.params.retry_delay_on_try_again).await;
                    redirections += 1;
                }
                PipelineOutcome::Failed(err) => return Err(err),
            }
        }
    }
}

#[async_trait::async_trait]
impl AsyncConnectionLike for ClusterConnection {
    async fn req_command(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        ClusterConnection::req_command(self, cmd).await
    }

    async fn req_packed_commands(
        &mut self,
        _packed: Vec<u8>,
        _offset: usize,
        _count: usize,
    ) -> RedisResult<Vec<Value>> {
        Err(RedisError::new(
            ErrorKind::InvalidClientConfig,
            "use ClusterConnection::req_pipeline for batches instead of raw packed commands",
        ))
    }
}

async fn fetch_slots(connections: &ConnectionsContainer, params: &ClusterParams, seeds: &[ConnectionAddr]) -> RedisResult<SlotMap> {
    refresh_once(connections, params, seeds).await
}

async fn refresh_once(connections: &ConnectionsContainer, params: &ClusterParams, seeds: &[ConnectionAddr]) -> RedisResult<SlotMap> {
    let mut candidates: Vec<String> = connections.node_keys();
    for seed in seeds {
        if let ConnectionAddr::Tcp { host, port } = seed {
            candidates.push(make_node_key(host, *port));
        }
    }
    let mut last_err = None;
    for node_key in candidates {
        match connections.find_or_create(&node_key, params).await {
            Ok(connection) => {
                let mut cluster_slots_cmd = Cmd::with_name("CLUSTER");
                cluster_slots_cmd.arg("SLOTS");
                match tokio::time::timeout(params.slots_refresh_timeout, connection.req_command(&cluster_slots_cmd)).await {
                    Ok(Ok(reply)) => {
                        if let Ok(slots) = parse_cluster_slots(&reply) {
                            return Ok(SlotMap::from_slots(&slots));
                        }
                    }
                    Ok(Err(err)) => last_err = Some(err),
                    Err(_) => {
                        last_err = Some(RedisError::new(ErrorKind::ConnectTimeout, "CLUSTER SLOTS timed out"));
                    }
                }
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| RedisError::new(ErrorKind::ClusterAllFailed, "no seed node could be reached")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_node_keys_are_derived_from_tcp_seeds() {
        let cc = ClusterConnection {
            inner: Arc::new(Inner {
                slots: ArcSwap::new(Arc::new(SlotMap::new())),
                connections: SharedConnectionsContainer::new(ConnectionsContainer::new()),
                params: ClusterParams::default(),
                seeds: vec![ConnectionAddr::Tcp { host: "localhost".into(), port: 7000 }],
                refresh_task: std::sync::Mutex::new(None),
            }),
        };
        assert_eq!(cc.default_node_keys(), vec!["localhost:7000".to_string()]);
    }
}
