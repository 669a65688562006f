//! Subscription set (§4.5, §3): tracks which channels/patterns a connection
//! is subscribed to, so a reconnect can replay them (§4.4 "auto_resubscribe").

use std::collections::HashSet;

/// Whether a subscription targets an exact channel or a glob pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Channel,
    Pattern,
}

/// Two disjoint sets of subscriptions: channels and patterns. `unsubscribe`
/// mutates the channel set, `punsubscribe` the pattern set — the two names
/// address the same underlying set per kind (§4.5).
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    channels: HashSet<String>,
    patterns: HashSet<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: SubscriptionKind, target: impl Into<String>) {
        match kind {
            SubscriptionKind::Channel => self.channels.insert(target.into()),
            SubscriptionKind::Pattern => self.patterns.insert(target.into()),
        };
    }

    pub fn remove(&mut self, kind: SubscriptionKind, target: &str) {
        match kind {
            SubscriptionKind::Channel => self.channels.remove(target),
            SubscriptionKind::Pattern => self.patterns.remove(target),
        };
    }

    pub fn list(&self, kind: SubscriptionKind) -> Vec<&str> {
        let set = match kind {
            SubscriptionKind::Channel => &self.channels,
            SubscriptionKind::Pattern => &self.patterns,
        };
        set.iter().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty()
    }

    /// Builds the `SUBSCRIBE`/`PSUBSCRIBE` commands needed to replay this set
    /// on a fresh connection, in a stable (sorted) order.
    pub fn replay_commands(&self) -> Vec<crate::cmd::Cmd> {
        let mut cmds = Vec::new();
        if !self.channels.is_empty() {
            let mut channels: Vec<_> = self.channels.iter().cloned().collect();
            channels.sort();
            let mut c = crate::cmd::cmd("SUBSCRIBE");
            for ch in channels {
                c.arg(ch);
            }
            cmds.push(c);
        }
        if !self.patterns.is_empty() {
            let mut patterns: Vec<_> = self.patterns.iter().cloned().collect();
            patterns.sort();
            let mut c = crate::cmd::cmd("PSUBSCRIBE");
            for p in patterns {
                c.arg(p);
            }
            cmds.push(c);
        }
        cmds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsubscribe_mutates_the_channel_set_and_psubscribe_the_pattern_set() {
        let mut set = SubscriptionSet::new();
        set.add(SubscriptionKind::Channel, "ch1");
        set.add(SubscriptionKind::Pattern, "news.*");
        set.remove(SubscriptionKind::Channel, "ch1");
        assert!(set.list(SubscriptionKind::Channel).is_empty());
        assert_eq!(set.list(SubscriptionKind::Pattern), vec!["news.*"]);
    }

    #[test]
    fn set_equals_sequence_of_add_remove_applied_to_empty() {
        let mut set = SubscriptionSet::new();
        set.add(SubscriptionKind::Channel, "a");
        set.add(SubscriptionKind::Channel, "b");
        set.remove(SubscriptionKind::Channel, "a");
        set.add(SubscriptionKind::Channel, "c");

        let mut expected = SubscriptionSet::new();
        expected.add(SubscriptionKind::Channel, "b");
        expected.add(SubscriptionKind::Channel, "c");

        let mut got = set.list(SubscriptionKind::Channel);
        let mut want = expected.list(SubscriptionKind::Channel);
        got.sort();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn replay_commands_are_empty_for_an_empty_set() {
        assert!(SubscriptionSet::new().replay_commands().is_empty());
    }

    #[test]
    fn replay_commands_cover_both_kinds() {
        let mut set = SubscriptionSet::new();
        set.add(SubscriptionKind::Channel, "ch1");
        set.add(SubscriptionKind::Channel, "ch2");
        set.add(SubscriptionKind::Pattern, "p*");
        let cmds = set.replay_commands();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].name(), "SUBSCRIBE");
        assert_eq!(cmds[1].name(), "PSUBSCRIBE");
    }
}
