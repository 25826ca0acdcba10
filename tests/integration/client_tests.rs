//! One-shot queries, channel exclusivity and shutdown.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use punchcard::{Entity, Error, JsonDecoder, TransportError, Utf8Decoder};

use crate::mock_transport::{Call, client_with};

// ── Queries ───────────────────────────────────────────────────

#[test]
fn query_returns_decoded_reply() {
    let (client, mock) = client_with(1000);
    mock.set_reply("entity:1", r#"{"name":"test","id":42}"#);

    let e: Entity = client.query_json("entity:1").unwrap();
    assert_eq!(e, Entity::new("test", 42));

    let text = client.query("hello", &Utf8Decoder).unwrap();
    assert_eq!(text, "YES!");
}

#[test]
fn decode_failure_does_not_poison_the_channel() {
    let (client, mock) = client_with(1000);
    mock.set_reply("entity:1", "not json");

    let err = client.query("entity:1", &JsonDecoder::<Entity>::new());
    assert!(matches!(err, Err(Error::Decode(_))), "got {err:?}");

    mock.set_reply("entity:1", r#"{"name":"ok","id":1}"#);
    let e: Entity = client.query_json("entity:1").unwrap();
    assert_eq!(e.name, "ok");
}

#[test]
fn failed_exchange_recovers_before_next_request() {
    let (client, mock) = client_with(1000);
    mock.fail_next("entity:1");

    assert_eq!(
        client.request("entity:1"),
        Err(Error::Transport(TransportError::Timeout))
    );
    assert_eq!(client.request("entity:1").unwrap(), b"YES!");

    let calls = mock.calls();
    let recover = calls.iter().position(|c| *c == Call::Recover).unwrap();
    assert_eq!(calls[recover + 1], Call::Send("entity:1".into()));
}

// ── Exclusivity ───────────────────────────────────────────────

#[test]
fn concurrent_queries_never_overlap_on_the_channel() {
    let (client, mock) = client_with(5);
    mock.set_latency(Duration::from_millis(1));
    let client = Arc::new(client);

    // Polling traffic competes with the one-shot queries.
    let _a = client.subscribe("poll:a", Utf8Decoder).unwrap();
    let _b = client.subscribe("poll:b", Utf8Decoder).unwrap();

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for i in 0..10 {
                    let id = format!("q:{t}:{i}");
                    assert_eq!(client.request(&id).unwrap(), b"YES!");
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(mock.max_outstanding(), 1);
    assert_eq!(mock.max_concurrent(), 1);

    // Strict send/recv alternation, each recv matching its send.
    let calls = mock.calls();
    for pair in calls.chunks(2) {
        match pair {
            [Call::Send(s), Call::Recv(r)] => assert_eq!(s, r),
            [Call::Send(_)] => {}
            other => panic!("out of sequence: {other:?}"),
        }
    }
}

// ── Shutdown ──────────────────────────────────────────────────

#[test]
fn calls_after_shutdown_fail_with_channel_closed() {
    let (client, mock) = client_with(1000);
    client.shutdown();
    client.shutdown();

    assert!(client.is_closed());
    assert_eq!(client.request("entity:1"), Err(Error::ChannelClosed));
    assert!(matches!(
        client.subscribe("entity:1", Utf8Decoder),
        Err(Error::ChannelClosed)
    ));
    assert_eq!(mock.sends_for("entity:1"), 0);
    assert_eq!(
        mock.calls().iter().filter(|c| **c == Call::Close).count(),
        1,
        "transport closed exactly once"
    );
}

#[test]
fn shutdown_releases_a_blocked_query() {
    let (client, mock) = client_with(1000);
    mock.hang();
    let client = Arc::new(client);

    let waiter = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.request("entity:1"))
    };
    while mock.sends_for("entity:1") == 0 {
        thread::sleep(Duration::from_millis(2));
    }

    let start = Instant::now();
    client.shutdown();
    let result = waiter.join().unwrap();
    assert_eq!(result, Err(Error::ChannelClosed));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn dropping_the_client_stops_the_worker() {
    let (client, mock) = client_with(5);
    let sub = client.subscribe("entity:1", Utf8Decoder).unwrap();
    assert!(sub.recv_timeout(Duration::from_secs(1)).is_some());

    drop(client);
    let sent = mock.sends_for("entity:1");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(mock.sends_for("entity:1"), sent);
    assert!(sub.is_closed());
}
