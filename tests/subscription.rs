//! Subscription bookkeeping (§4.5): tracking channels/patterns and replaying
//! them after a reconnect, through the public `SubscriptionSet` API.

use resp_client::subscription::{SubscriptionKind, SubscriptionSet};

#[test]
fn replay_commands_carry_every_tracked_channel_and_pattern_in_sorted_order() {
    let mut set = SubscriptionSet::new();
    set.add(SubscriptionKind::Channel, "zeta");
    set.add(SubscriptionKind::Channel, "alpha");
    set.add(SubscriptionKind::Pattern, "news.*");

    let cmds = set.replay_commands();
    assert_eq!(cmds.len(), 2);
    assert_eq!(cmds[0].name(), "SUBSCRIBE");
    assert_eq!(cmds[0].args()[1], b"alpha");
    assert_eq!(cmds[0].args()[2], b"zeta");
    assert_eq!(cmds[1].name(), "PSUBSCRIBE");
    assert_eq!(cmds[1].args()[1], b"news.*");
}

#[test]
fn an_unsubscribed_channel_is_absent_from_a_later_replay() {
    let mut set = SubscriptionSet::new();
    set.add(SubscriptionKind::Channel, "a");
    set.add(SubscriptionKind::Channel, "b");
    set.remove(SubscriptionKind::Channel, "a");

    let cmds = set.replay_commands();
    assert_eq!(cmds.len(), 1);
    assert_eq!(cmds[0].args()[1..].to_vec(), vec![b"b".to_vec()]);
}

#[test]
fn an_empty_set_replays_to_nothing_and_reports_empty() {
    let set = SubscriptionSet::new();
    assert!(set.is_empty());
    assert!(set.replay_commands().is_empty());
}

#[test]
fn channels_and_patterns_are_tracked_independently() {
    let mut set = SubscriptionSet::new();
    set.add(SubscriptionKind::Channel, "shared-name");
    set.add(SubscriptionKind::Pattern, "shared-name");
    set.remove(SubscriptionKind::Channel, "shared-name");

    assert!(set.list(SubscriptionKind::Channel).is_empty());
    assert_eq!(set.list(SubscriptionKind::Pattern), vec!["shared-name"]);
}
