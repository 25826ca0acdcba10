//! Subscriptions: fan-out, ordering, isolation and lifecycle.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use punchcard::{Backpressure, DecodeError, Entity, Job, JsonDecoder, Subscription, Utf8Decoder};

use crate::mock_transport::{client_with, client_with_backpressure};

const WAIT: Duration = Duration::from_secs(2);

fn next(sub: &Subscription<Entity>) -> Entity {
    sub.recv_timeout(WAIT).expect("no value within timeout")
}

// ── Fan-out ───────────────────────────────────────────────────

#[test]
fn every_subscriber_of_an_identifier_gets_each_reply() {
    let (client, mock) = client_with(10);
    mock.set_reply("entity:1", r#"{"name":"foo","id":1}"#);
    mock.set_reply("entity:2", r#"{"name":"bar","id":2}"#);

    let a = client.subscribe_json::<Entity>("entity:1").unwrap();
    let b = client.subscribe_json::<Entity>("entity:1").unwrap();
    let c = client.subscribe_json::<Entity>("entity:2").unwrap();
    assert_eq!(client.subscriber_count("entity:1"), 2);

    assert_eq!(next(&a), Entity::new("foo", 1));
    assert_eq!(next(&b), Entity::new("foo", 1));
    assert_eq!(next(&c), Entity::new("bar", 2));

    mock.set_reply("entity:1", r#"{"name":"baz","id":1}"#);
    let changed = |sub: &Subscription<Entity>| sub.iter().any(|e| e.name == "baz");
    assert!(changed(&a));
    assert!(changed(&b));
    assert_eq!(next(&c).name, "bar");
}

#[test]
fn reply_change_reaches_a_one_second_subscription() {
    let (client, mock) = client_with(1000);
    mock.set_reply("entity:0", r#"{"name":"foo","id":1}"#);
    assert_eq!(
        client.query_json::<Entity>("entity:0").unwrap(),
        Entity::new("foo", 1)
    );

    let start = Instant::now();
    let sub = client.subscribe_json::<Entity>("entity:0").unwrap();
    assert_eq!(next(&sub), Entity::new("foo", 1));
    assert!(start.elapsed() < Duration::from_secs(1));

    thread::sleep(Duration::from_millis(1500).saturating_sub(start.elapsed()));
    mock.set_reply("entity:0", r#"{"name":"bar","id":2}"#);

    let bar = loop {
        let e = sub.recv_timeout(Duration::from_secs(3)).expect("poll stalled");
        if e.name != "foo" {
            break e;
        }
    };
    assert_eq!(bar, Entity::new("bar", 2));
    let at = start.elapsed();
    assert!(at >= Duration::from_millis(1500) && at < Duration::from_secs(3), "{at:?}");
}

#[test]
fn first_poll_is_immediate() {
    let (client, mock) = client_with(60_000);
    mock.set_reply("entity:1", r#"{"name":"now","id":1}"#);
    let sub = client.subscribe_json::<Entity>("entity:1").unwrap();
    assert_eq!(next(&sub).name, "now");
}

#[test]
fn values_arrive_in_poll_order() {
    let (client, mock) = client_with(2);
    mock.count_up("entity:1");
    let sub = client.subscribe_json::<Entity>("entity:1").unwrap();

    let ids: Vec<i64> = (0..10).map(|_| next(&sub).id).collect();
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
}

#[test]
fn stalled_subscriber_loses_nothing_by_default() {
    let (client, mock) = client_with(2);
    mock.count_up("entity:1");
    let sub = client.subscribe_json::<Entity>("entity:1").unwrap();

    // Many more polls than a small bounded mailbox would hold.
    thread::sleep(Duration::from_millis(200));
    let handle = sub.handle().clone();
    client.unsubscribe(&handle);

    let ids: Vec<i64> = sub.iter().map(|e| e.id).collect();
    assert!(ids.len() > 16, "only {} polls", ids.len());
    assert_eq!(ids, (1..=ids.len() as i64).collect::<Vec<_>>());
    assert_eq!(sub.dropped(), 0);
}

#[test]
fn drop_oldest_keeps_the_newest_values_and_counts_the_rest() {
    let depth = 4;
    let (client, mock) = client_with_backpressure(2, Backpressure::DropOldest { depth });
    mock.count_up("entity:1");
    let sub = client.subscribe_json::<Entity>("entity:1").unwrap();

    thread::sleep(Duration::from_millis(200));
    let handle = sub.handle().clone();
    client.unsubscribe(&handle);
    // Let a poll that was already in flight settle.
    thread::sleep(Duration::from_millis(20));

    let ids: Vec<i64> = sub.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), depth);
    assert!(ids.windows(2).all(|w| w[1] == w[0] + 1), "{ids:?}");
    assert_eq!(sub.dropped() + depth as u64, *ids.last().unwrap() as u64);
}

#[test]
fn identifiers_never_leak_into_each_other() {
    let (client, mock) = client_with(2);
    mock.count_up("entity:1");
    mock.count_up("entity:2");
    let one = client.subscribe_json::<Entity>("entity:1").unwrap();
    let two = client.subscribe_json::<Entity>("entity:2").unwrap();

    for _ in 0..10 {
        assert_eq!(next(&one).name, "entity:1");
        assert_eq!(next(&two).name, "entity:2");
    }
}

#[test]
fn subscribers_pick_their_own_types() {
    let (client, mock) = client_with(10);
    mock.set_reply("entity:1", r#"{"name":"foo","id":1}"#);

    let typed = client.subscribe_json::<Entity>("entity:1").unwrap();
    let raw = client.subscribe("entity:1", Utf8Decoder).unwrap();
    let ids = client
        .subscribe("entity:1", |b: &[u8]| -> Result<i64, DecodeError> {
            let e: Entity = serde_json::from_slice(b)?;
            Ok(e.id)
        })
        .unwrap();

    assert_eq!(next(&typed).name, "foo");
    assert_eq!(raw.recv_timeout(WAIT).unwrap(), r#"{"name":"foo","id":1}"#);
    assert_eq!(ids.recv_timeout(WAIT), Some(1));
}

// ── Failure isolation ─────────────────────────────────────────

#[test]
fn failed_poll_is_skipped_and_polling_continues() {
    let (client, mock) = client_with(5);
    mock.count_up("entity:1");
    mock.fail_next("entity:1");
    let sub = client.subscribe_json::<Entity>("entity:1").unwrap();

    // The injected failure fires before the counter advances.
    assert_eq!(next(&sub).id, 1);
    assert!(mock.sends_for("entity:1") >= 2);
    assert!(!sub.is_closed());
}

#[test]
fn decode_failure_only_affects_that_subscriber() {
    let (client, mock) = client_with(5);
    mock.set_reply("entity:1", "plain text");

    let typed = client.subscribe_json::<Entity>("entity:1").unwrap();
    let raw = client.subscribe("entity:1", Utf8Decoder).unwrap();

    assert_eq!(raw.recv_timeout(WAIT).unwrap(), "plain text");
    assert_eq!(raw.recv_timeout(WAIT).unwrap(), "plain text");
    assert!(typed.try_recv().is_none());
    assert!(!typed.is_closed());

    mock.set_reply("entity:1", r#"{"name":"fixed","id":1}"#);
    assert!(typed.iter().any(|e| e.name == "fixed"));
}

// ── Lifecycle ─────────────────────────────────────────────────

#[test]
fn unsubscribe_is_idempotent_and_stops_polling() {
    let (client, mock) = client_with(5);
    let sub = client.subscribe("entity:1", Utf8Decoder).unwrap();
    assert!(sub.recv_timeout(WAIT).is_some());

    let handle = sub.handle().clone();
    assert!(client.unsubscribe(&handle));
    assert!(!client.unsubscribe(&handle));
    assert_eq!(client.subscriber_count("entity:1"), 0);

    // One poll may already have been in flight.
    thread::sleep(Duration::from_millis(30));
    let settled = mock.sends_for("entity:1");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(mock.sends_for("entity:1"), settled);

    assert!(sub.is_closed());
    while sub.try_recv().is_some() {}
    assert_eq!(sub.recv(), None);
}

#[test]
fn dropping_a_subscription_unsubscribes() {
    let (client, _mock) = client_with(5);
    let keep = client.subscribe("entity:1", Utf8Decoder).unwrap();
    let gone = client.subscribe("entity:1", Utf8Decoder).unwrap();
    assert_eq!(client.subscriber_count("entity:1"), 2);

    drop(gone);
    assert_eq!(client.subscriber_count("entity:1"), 1);
    assert!(keep.recv_timeout(WAIT).is_some());

    keep.cancel();
    assert_eq!(client.subscriber_count("entity:1"), 0);
}

#[test]
fn shutdown_ends_every_subscription() {
    let (client, _mock) = client_with(5);
    let a = client.subscribe("entity:1", Utf8Decoder).unwrap();
    let b = client.subscribe("entity:2", Utf8Decoder).unwrap();
    assert!(a.recv_timeout(WAIT).is_some());

    client.shutdown();
    assert!(a.is_closed() && b.is_closed());
    // Queued values stay readable, then the stream ends.
    a.iter().for_each(drop);
    b.iter().for_each(drop);
    assert_eq!(a.recv(), None);
    assert_eq!(b.recv(), None);
}

#[test]
fn watch_runs_actions_on_the_consumer_thread() {
    let (client, mock) = client_with(5);
    mock.count_up("entity:1");

    let (jobs, inbox) = mpsc::channel::<Job>();
    let (seen_tx, seen) = mpsc::channel();
    let handle = client
        .watch("entity:1", JsonDecoder::<Entity>::new(), jobs, move |e: Entity| {
            seen_tx.send((e.id, thread::current().id())).unwrap();
        })
        .unwrap();

    for _ in 0..3 {
        let job = inbox.recv_timeout(WAIT).unwrap();
        job();
    }
    let got: Vec<_> = seen.try_iter().collect();
    assert_eq!(got.iter().map(|g| g.0).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(got.iter().all(|g| g.1 == thread::current().id()));

    assert!(client.unsubscribe(&handle));
    assert!(!client.unsubscribe(&handle));
}
