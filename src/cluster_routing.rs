//! Command → node routing (§4.7): key extraction, slot computation, and the
//! `MOVED`/`ASK` redirect model consumed by both the sync and async cluster
//! connections.

use crate::cmd::{Cmd, Routable};
use crate::commands::{extract_keys, lookup_command};
use crate::cluster_slotmap::ReadFromReplicaStrategy;
use crate::cluster_topology::single_slot;
use crate::types::{ErrorKind, RedisError, RedisResult, Value};

/// Where a single command should be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleNodeRoutingInfo {
    /// Routed by key hash to whichever node owns that slot.
    Route(Route),
    /// No key to route by (e.g. `PING`, `CLUSTER SLOTS`); any connected node
    /// will do, so the random/first available one is used.
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub slot: u16,
    pub is_write: bool,
}

/// The outcome of routing a single command: a specific node (by key), or
/// "any" for keyless commands. Pipeline-level cross-slot rejection is
/// handled separately by `routing_for_pipeline` (§4.9), since a single
/// command is never itself multi-slot once `single_slot` has validated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingInfo {
    SingleNode(SingleNodeRoutingInfo),
}

/// Computes routing for one command, consulting the static command table for
/// its key positions and read/write classification.
pub fn routing_for_command(cmd: &Cmd) -> RedisResult<RoutingInfo> {
    let Some(flags) = lookup_command(cmd.name()) else {
        // Unknown (custom) commands have no key spec to route by; treat as
        // keyless rather than rejecting here — rejection inside a pipeline
        // is a pipeline-level decision (§4.7 `CustomInPipeline`).
        return Ok(RoutingInfo::SingleNode(SingleNodeRoutingInfo::Random));
    };
    let keys = extract_keys(cmd as &dyn Routable, &flags.key_spec);
    if keys.is_empty() {
        return Ok(RoutingInfo::SingleNode(SingleNodeRoutingInfo::Random));
    }
    match single_slot(&keys)? {
        Some(slot) => Ok(RoutingInfo::SingleNode(SingleNodeRoutingInfo::Route(Route {
            slot,
            is_write: flags.is_write,
        }))),
        None => Ok(RoutingInfo::SingleNode(SingleNodeRoutingInfo::Random)),
    }
}

/// Routes every command in a pipeline/transaction and confirms they share a
/// single slot (§4.9's cross-slot rejection for atomic batches and for
/// cluster pipelines in general).
pub fn routing_for_pipeline(commands: &[Cmd]) -> RedisResult<Option<Route>> {
    let mut route: Option<Route> = None;
    for cmd in commands {
        let Some(flags) = lookup_command(cmd.name()) else {
            return Err(RedisError::new(
                ErrorKind::CustomInPipeline,
                "custom commands are not supported inside a cluster pipeline",
            ));
        };
        let keys = extract_keys(cmd as &dyn Routable, &flags.key_spec);
        if keys.is_empty() {
            continue;
        }
        let Some(slot) = single_slot(&keys)? else {
            continue;
        };
        match &route {
            None => route = Some(Route { slot, is_write: flags.is_write }),
            Some(existing) if existing.slot != slot => {
                return Err(RedisError::new(
                    ErrorKind::CrossSlot,
                    "pipeline's commands do not all hash to the same slot",
                ))
            }
            Some(existing) => {
                route = Some(Route {
                    slot: existing.slot,
                    is_write: existing.is_write || flags.is_write,
                })
            }
        }
    }
    Ok(route)
}

/// A redirect returned by a cluster node (§4.7): `MOVED` updates the slot map
/// permanently; `ASK` is a one-shot retry against the target node, preceded
/// by a synthetic `ASKING` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Moved { slot: u16, target: String },
    Ask { slot: u16, target: String },
}

/// Classifies a `RedisError` as a redirect, if it is one.
pub fn redirect_from_error(err: &RedisError) -> Option<Redirect> {
    let (slot, target) = err.redirect_target()?;
    match err.kind() {
        ErrorKind::Moved => Some(Redirect::Moved { slot, target }),
        ErrorKind::Ask => Some(Redirect::Ask { slot, target }),
        _ => None,
    }
}

/// What should happen next after looking at a cluster pipeline's raw,
/// pre-ignore-compaction results (§4.9 "Cluster-aware pipeline retry").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every command got a non-redirect reply; return the results as-is.
    Done,
    /// At least one result requires the whole batch to be resent to a
    /// different node, since a pipeline's commands are required to share a
    /// slot and so are retried whole, not command-by-command.
    RetryWhole { target: String, needs_asking: bool },
    /// A retriable transient condition (`TRYAGAIN`/`CLUSTERDOWN`) that should
    /// be retried against the same node after a delay and a slot refresh.
    RetrySameNode,
    /// A non-retriable error occurred; propagate it.
    Failed(RedisError),
}

/// Inspects a pipeline's raw results for a redirect or transient cluster
/// error, per the retriable `ErrorKind`s. A whole-batch retry is only safe
/// when every error in the batch is the *same* error (identical kind, code
/// and detail) and no non-error position is a write that already succeeded
/// outside of a transaction — otherwise resending the batch risks silently
/// double-applying a write that already landed. `commands` must be the exact
/// commands that produced `results`, positionally; `is_atomic` marks a
/// transaction, where a non-error reply only exists because the whole batch
/// already committed and so isn't itself a partial write.
pub fn analyze_pipeline_results(results: &[Value], commands: &[Cmd], is_atomic: bool) -> PipelineOutcome {
    let errors: Vec<(usize, RedisError)> = results
        .iter()
        .enumerate()
        .filter_map(|(i, value)| match value {
            Value::ServerError(server_err) => Some((i, RedisError::from(server_err.clone()))),
            _ => None,
        })
        .collect();
    let Some((_, first)) = errors.first() else {
        return PipelineOutcome::Done;
    };
    let all_identical = errors.iter().all(|(_, e)| {
        (e.kind(), e.code(), e.detail()) == (first.kind(), first.code(), first.detail())
    });
    if !all_identical {
        return PipelineOutcome::Failed(first.clone());
    }
    if !is_atomic {
        let error_positions: std::collections::HashSet<usize> = errors.iter().map(|(i, _)| *i).collect();
        let already_applied_write = results.iter().enumerate().any(|(i, _)| {
            !error_positions.contains(&i)
                && commands
                    .get(i)
                    .map(|cmd| lookup_command(cmd.name()).map(|f| f.is_write).unwrap_or(true))
                    .unwrap_or(false)
        });
        if already_applied_write {
            return PipelineOutcome::Failed(first.clone());
        }
    }
    if let Some(redirect) = redirect_from_error(first) {
        return match redirect {
            Redirect::Moved { target, .. } => PipelineOutcome::RetryWhole { target, needs_asking: false },
            Redirect::Ask { target, .. } => PipelineOutcome::RetryWhole { target, needs_asking: true },
        };
    }
    match first.kind() {
        ErrorKind::TryAgain | ErrorKind::ClusterDown => PipelineOutcome::RetrySameNode,
        _ if first.is_cluster_retriable() => PipelineOutcome::RetrySameNode,
        _ => PipelineOutcome::Failed(first.clone()),
    }
}

pub use crate::cluster_slotmap::SlotMap;

/// Resolves a `SingleNodeRoutingInfo` to a concrete node key using the
/// current slot map, falling back to any known node for `Random`.
pub fn resolve_node<'a>(
    routing: &SingleNodeRoutingInfo,
    slot_map: &'a SlotMap,
    strategy: ReadFromReplicaStrategy,
    attempt: usize,
    fallback: &'a [String],
) -> Option<&'a str> {
    match routing {
        SingleNodeRoutingInfo::Route(route) => slot_map.node_for(route.slot, route.is_write, strategy, attempt),
        SingleNodeRoutingInfo::Random => fallback.first().map(String::as_str),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::cmd;

    #[test]
    fn routes_a_single_keyed_command_to_its_slot() {
        let mut c = cmd("GET");
        c.arg("foo");
        let RoutingInfo::SingleNode(SingleNodeRoutingInfo::Route(route)) = routing_for_command(&c).unwrap() else {
            panic!("expected a routed command");
        };
        assert!(!route.is_write);
    }

    #[test]
    fn keyless_command_routes_randomly() {
        let c = cmd("PING");
        assert_eq!(
            routing_for_command(&c).unwrap(),
            RoutingInfo::SingleNode(SingleNodeRoutingInfo::Random)
        );
    }

    #[test]
    fn pipeline_routing_rejects_cross_slot_keys() {
        let mut a = cmd("GET");
        a.arg("a");
        let mut b = cmd("GET");
        b.arg("totally-different-key");
        let err = routing_for_pipeline(&[a, b]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossSlot);
    }

    #[test]
    fn pipeline_routing_rejects_custom_commands() {
        let c = cmd("FOO.BAR");
        let err = routing_for_pipeline(&[c]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CustomInPipeline);
    }

    #[test]
    fn moved_error_is_recognized_as_a_redirect() {
        let err: RedisError = crate::types::ServerError::parse("MOVED 100 127.0.0.1:7001").into();
        assert_eq!(
            redirect_from_error(&err),
            Some(Redirect::Moved { slot: 100, target: "127.0.0.1:7001".into() })
        );
    }

    #[test]
    fn a_clean_batch_is_done() {
        let results = vec![Value::Okay, Value::Int(1)];
        let commands = vec![cmd("SET"), cmd("INCR")];
        assert_eq!(analyze_pipeline_results(&results, &commands, false), PipelineOutcome::Done);
    }

    #[test]
    fn a_moved_error_alone_triggers_a_whole_batch_retry() {
        let results = vec![Value::ServerError(crate::types::ServerError::parse("MOVED 100 127.0.0.1:7001"))];
        let commands = vec![cmd("GET")];
        assert_eq!(
            analyze_pipeline_results(&results, &commands, false),
            PipelineOutcome::RetryWhole { target: "127.0.0.1:7001".into(), needs_asking: false }
        );
    }

    #[test]
    fn the_same_moved_error_repeated_still_retries_the_whole_batch() {
        let results = vec![
            Value::ServerError(crate::types::ServerError::parse("MOVED 100 127.0.0.1:7001")),
            Value::ServerError(crate::types::ServerError::parse("MOVED 100 127.0.0.1:7001")),
        ];
        let commands = vec![cmd("GET"), cmd("GET")];
        assert_eq!(
            analyze_pipeline_results(&results, &commands, false),
            PipelineOutcome::RetryWhole { target: "127.0.0.1:7001".into(), needs_asking: false }
        );
    }

    #[test]
    fn an_ask_error_requires_asking_before_retry() {
        let results = vec![Value::ServerError(crate::types::ServerError::parse("ASK 100 127.0.0.1:7002"))];
        let commands = vec![cmd("GET")];
        assert_eq!(
            analyze_pipeline_results(&results, &commands, false),
            PipelineOutcome::RetryWhole { target: "127.0.0.1:7002".into(), needs_asking: true }
        );
    }

    #[test]
    fn a_plain_error_fails_the_batch() {
        let results = vec![Value::ServerError(crate::types::ServerError::parse("WRONGTYPE bad key"))];
        let commands = vec![cmd("GET")];
        match analyze_pipeline_results(&results, &commands, false) {
            PipelineOutcome::Failed(err) => assert_eq!(err.kind(), ErrorKind::Reply),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn disagreeing_errors_in_one_batch_fail_rather_than_retry() {
        let results = vec![
            Value::ServerError(crate::types::ServerError::parse("MOVED 100 10.0.0.9:7009")),
            Value::ServerError(crate::types::ServerError::parse("WRONGTYPE nope")),
        ];
        let commands = vec![cmd("GET"), cmd("GET")];
        match analyze_pipeline_results(&results, &commands, false) {
            PipelineOutcome::Failed(_) => {}
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn a_redirect_is_not_retried_whole_if_an_earlier_write_already_applied() {
        let results = vec![
            Value::Okay,
            Value::ServerError(crate::types::ServerError::parse("MOVED 100 127.0.0.1:7001")),
        ];
        let commands = vec![cmd("SET"), cmd("GET")];
        match analyze_pipeline_results(&results, &commands, false) {
            PipelineOutcome::Failed(_) => {}
            other => panic!("expected Failed to avoid double-applying the SET, got {other:?}"),
        }
    }

    #[test]
    fn a_redirect_after_an_already_applied_write_inside_a_transaction_still_retries() {
        let results = vec![
            Value::Okay,
            Value::ServerError(crate::types::ServerError::parse("MOVED 100 127.0.0.1:7001")),
        ];
        let commands = vec![cmd("SET"), cmd("GET")];
        assert_eq!(
            analyze_pipeline_results(&results, &commands, true),
            PipelineOutcome::RetryWhole { target: "127.0.0.1:7001".into(), needs_asking: false }
        );
    }
}
