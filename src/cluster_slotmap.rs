//! The slot map (§4.6): which node owns which slot, built from `CLUSTER
//! SLOTS` and consulted on every routed command.

use std::collections::BTreeMap;

use crate::connection::node_key;
use crate::cluster_topology::Slot;

/// How reads may be distributed across a slot's primary and replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFromReplicaStrategy {
    /// Always read from the primary (default; matches write routing).
    #[default]
    AlwaysFromPrimary,
    /// Spread reads round-robin-ish across the primary and its replicas.
    RoundRobin,
}

#[derive(Debug, Clone)]
struct SlotEntry {
    primary: String,
    replicas: Vec<String>,
}

/// Maps every slot to its owning node key, keyed by each range's end so a
/// lookup is a single `BTreeMap::range` call.
#[derive(Debug, Clone, Default)]
pub struct SlotMap {
    by_end: BTreeMap<u16, (u16, SlotEntry)>,
}

impl SlotMap {
    pub fn new() -> Self {
        SlotMap::default()
    }

    pub fn from_slots(slots: &[Slot]) -> Self {
        let mut map = SlotMap::new();
        for slot in slots {
            let primary = node_key(&slot.primary.0, slot.primary.1);
            let replicas = slot.replicas.iter().map(|(h, p)| node_key(h, *p)).collect();
            map.by_end.insert(slot.end, (slot.start, SlotEntry { primary, replicas }));
        }
        map
    }

    fn entry_for(&self, slot: u16) -> Option<&SlotEntry> {
        self.by_end
            .range(slot..)
            .next()
            .filter(|(_, (start, _))| *start <= slot)
            .map(|(_, (_, entry))| entry)
    }

    pub fn primary_of(&self, slot: u16) -> Option<&str> {
        self.entry_for(slot).map(|e| e.primary.as_str())
    }

    pub fn replicas_of(&self, slot: u16) -> &[String] {
        self.entry_for(slot).map(|e| e.replicas.as_slice()).unwrap_or(&[])
    }

    /// Picks the node to route a command to given the read/write kind and
    /// the configured `ReadFromReplicaStrategy`.
    pub fn node_for(&self, slot: u16, is_write: bool, strategy: ReadFromReplicaStrategy, attempt: usize) -> Option<&str> {
        if is_write || strategy == ReadFromReplicaStrategy::AlwaysFromPrimary {
            return self.primary_of(slot);
        }
        let entry = self.entry_for(slot)?;
        if entry.replicas.is_empty() {
            return Some(entry.primary.as_str());
        }
        let pool_size = entry.replicas.len() + 1;
        let pick = attempt % pool_size;
        if pick == 0 {
            Some(entry.primary.as_str())
        } else {
            Some(entry.replicas[pick - 1].as_str())
        }
    }

    pub fn all_node_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for (_, (_, entry)) in self.by_end.iter() {
            keys.push(entry.primary.clone());
            keys.extend(entry.replicas.iter().cloned());
        }
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.by_end.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SlotMap {
        SlotMap::from_slots(&[Slot {
            start: 0,
            end: 100,
            primary: ("h1".into(), 7000),
            replicas: vec![("h2".into(), 7001)],
        }])
    }

    #[test]
    fn writes_always_go_to_the_primary() {
        let map = sample();
        assert_eq!(
            map.node_for(50, true, ReadFromReplicaStrategy::RoundRobin, 3),
            Some("h1:7000")
        );
    }

    #[test]
    fn reads_round_robin_across_primary_and_replicas_when_configured() {
        let map = sample();
        assert_eq!(map.node_for(50, false, ReadFromReplicaStrategy::RoundRobin, 0), Some("h1:7000"));
        assert_eq!(map.node_for(50, false, ReadFromReplicaStrategy::RoundRobin, 1), Some("h2:7001"));
        assert_eq!(map.node_for(50, false, ReadFromReplicaStrategy::RoundRobin, 2), Some("h1:7000"));
    }

    #[test]
    fn unknown_slot_resolves_to_nothing() {
        let map = sample();
        assert_eq!(map.primary_of(200), None);
    }

    #[test]
    fn all_node_keys_are_deduplicated_and_sorted() {
        let map = sample();
        assert_eq!(map.all_node_keys(), vec!["h1:7000".to_string(), "h2:7001".to_string()]);
    }
}
