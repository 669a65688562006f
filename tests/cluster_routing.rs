//! Cluster slot hashing and routing, exercised through the public
//! `cluster_routing`/`cluster_slotmap`/`cluster_topology` modules rather than
//! any live node.

#![cfg(feature = "cluster")]

use resp_client::cluster_routing::{
    resolve_node, routing_for_command, routing_for_pipeline, RoutingInfo, SingleNodeRoutingInfo,
};
use resp_client::cluster_slotmap::{ReadFromReplicaStrategy, SlotMap};
use resp_client::cluster_topology::{parse_cluster_slots, slot_for_key, Slot};
use resp_client::{cmd, Value};

fn three_node_map() -> SlotMap {
    SlotMap::from_slots(&[
        Slot {
            start: 0,
            end: 5460,
            primary: ("10.0.0.1".into(), 7000),
            replicas: vec![("10.0.0.4".into(), 7003)],
        },
        Slot {
            start: 5461,
            end: 10922,
            primary: ("10.0.0.2".into(), 7001),
            replicas: vec![],
        },
        Slot {
            start: 10923,
            end: 16383,
            primary: ("10.0.0.3".into(), 7002),
            replicas: vec![("10.0.0.5".into(), 7004)],
        },
    ])
}

#[test]
fn hashtagged_keys_route_to_the_same_node_as_a_pipeline() {
    let map = three_node_map();
    let mut get_a = cmd("GET");
    get_a.arg("{user1000}.name");
    let mut get_b = cmd("GET");
    get_b.arg("{user1000}.email");

    let route = routing_for_pipeline(&[get_a, get_b]).unwrap().unwrap();
    let known = map.all_node_keys();
    let node = resolve_node(
        &SingleNodeRoutingInfo::Route(route),
        &map,
        ReadFromReplicaStrategy::AlwaysFromPrimary,
        0,
        &known,
    );
    assert!(node.is_some());
}

#[test]
fn a_write_command_always_resolves_to_the_primary_even_with_round_robin_reads() {
    let map = three_node_map();
    let mut set = cmd("SET");
    set.arg("somekey").arg("v");
    let RoutingInfo::SingleNode(SingleNodeRoutingInfo::Route(route)) = routing_for_command(&set).unwrap() else {
        panic!("expected a routed command");
    };
    assert!(route.is_write);

    let known = map.all_node_keys();
    let primary = resolve_node(
        &SingleNodeRoutingInfo::Route(route),
        &map,
        ReadFromReplicaStrategy::RoundRobin,
        5,
        &known,
    );
    assert_eq!(primary, map.primary_of(slot_for_key(b"somekey")));
}

#[test]
fn keyless_commands_fall_back_to_any_known_node() {
    let map = three_node_map();
    let known = map.all_node_keys();
    let node = resolve_node(
        &SingleNodeRoutingInfo::Random,
        &map,
        ReadFromReplicaStrategy::AlwaysFromPrimary,
        0,
        &known,
    );
    assert!(node.is_some());
}

#[test]
fn cluster_slots_reply_builds_a_map_that_agrees_with_hand_built_slots() {
    let reply = Value::Bulk(vec![Value::Bulk(vec![
        Value::Int(0),
        Value::Int(16383),
        Value::Bulk(vec![Value::Data(b"127.0.0.1".to_vec()), Value::Int(7000)]),
    ])]);
    let slots = parse_cluster_slots(&reply).unwrap();
    let map = SlotMap::from_slots(&slots);
    assert_eq!(map.primary_of(0), Some("127.0.0.1:7000"));
    assert_eq!(map.primary_of(16383), Some("127.0.0.1:7000"));
}
