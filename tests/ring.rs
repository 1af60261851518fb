//! End-to-end ring scenarios over loopback TCP.
//!
//! Every test builds a real ring: each peer binds its own server and runs
//! its own maintenance thread. The churn-heavy cases are `#[ignore]`d since
//! they run for tens of seconds; run them explicitly with
//! `cargo test -- --ignored`.

use std::net::Ipv4Addr;
use std::time::Duration;

use ringwall::{ChordPeer, Config, DhashPeer, IdaParams};

const LOCALHOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn dhash_peer(port: u16, num_succs: usize, ida: IdaParams) -> DhashPeer {
    DhashPeer::with_config(
        LOCALHOST,
        port,
        Config::default().with_num_succs(num_succs).with_ida(ida),
    )
    .unwrap()
}

fn small_ida() -> IdaParams {
    IdaParams::new(3, 2, 257).unwrap()
}

#[test]
fn two_dhash_peers_store_and_read() {
    init_logging();

    let first = dhash_peer(43000, 4, small_ida());
    first.start_chord();
    let second = dhash_peer(43002, 4, small_ida());
    second.join(LOCALHOST, 43000).unwrap();

    first.create("hello", "world").unwrap();

    assert_eq!(second.read("hello").unwrap(), "world");
    assert_eq!(first.read("hello").unwrap(), "world");
}

#[test]
fn dhash_ring_tolerates_losing_a_fragment_holder() {
    init_logging();

    let first = dhash_peer(43010, 4, small_ida());
    first.start_chord();
    let second = dhash_peer(43012, 4, small_ida());
    second.join(LOCALHOST, 43010).unwrap();
    let third = dhash_peer(43014, 4, small_ida());
    third.join(LOCALHOST, 43010).unwrap();

    // Let one stabilize round fill every successor list before the churn.
    std::thread::sleep(Duration::from_secs(6));

    let keys: Vec<String> = (0..10).map(|i| format!("key-{i}")).collect();
    for key in &keys {
        first.create(key, "payload").unwrap();
    }

    // With (n, m) = (3, 2) and three members, every peer holds one
    // fragment of every key; losing one leaves the threshold intact.
    second.fail();

    // Give the survivors time to rectify routing around the failure.
    std::thread::sleep(Duration::from_secs(12));

    for key in &keys {
        assert_eq!(first.read(key).unwrap(), "payload", "{key} via first");
        assert_eq!(third.read(key).unwrap(), "payload", "{key} via third");
    }
}

#[test]
fn cascading_leaves_funnel_keys_to_the_survivor() {
    init_logging();

    let peers: Vec<ChordPeer> = [43020, 43022, 43024]
        .iter()
        .map(|&port| ChordPeer::new(LOCALHOST, port, 4).unwrap())
        .collect();
    peers[0].start_chord();
    peers[1].join(LOCALHOST, 43020).unwrap();
    peers[2].join(LOCALHOST, 43020).unwrap();

    let keys: Vec<String> = (0..20).map(|i| format!("key-{i}")).collect();
    for (i, key) in keys.iter().enumerate() {
        peers[i % peers.len()].create(key, "value").unwrap();
    }

    // One stabilize round, so every successor list is populated before
    // the departures begin.
    std::thread::sleep(Duration::from_secs(6));

    peers[0].leave().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    peers[1].leave().unwrap();
    std::thread::sleep(Duration::from_millis(300));

    let survivor = &peers[2];
    assert_eq!(survivor.min_key(), survivor.id().add(1));
    for key in &keys {
        assert_eq!(survivor.read(key).unwrap(), "value", "{key}");
    }
}

// Churn scenarios that run for tens of seconds; not for CI.

#[test]
#[ignore]
fn six_peer_ring_survives_cascading_leaves() {
    init_logging();

    let ports: Vec<u16> = (0..6).map(|i| 43100 + i * 2).collect();
    let peers: Vec<ChordPeer> = ports
        .iter()
        .map(|&port| ChordPeer::new(LOCALHOST, port, 4).unwrap())
        .collect();

    peers[0].start_chord();
    for peer in &peers[1..] {
        peer.join(LOCALHOST, ports[0]).unwrap();
    }
    std::thread::sleep(Duration::from_secs(6));

    let keys: Vec<String> = (0..100).map(|i| format!("key-{i}")).collect();
    for (i, key) in keys.iter().enumerate() {
        peers[i % peers.len()].create(key, &format!("value-{i}")).unwrap();
    }

    for peer in &peers[..5] {
        peer.leave().unwrap();
        std::thread::sleep(Duration::from_millis(500));
    }

    let survivor = peers.last().unwrap();
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(survivor.read(key).unwrap(), format!("value-{i}"), "{key}");
    }
}

#[test]
#[ignore]
fn eighteen_peer_ring_tolerates_four_failures() {
    init_logging();

    let ida = IdaParams::new(14, 10, 257).unwrap();
    let ports: Vec<u16> = (0..18).map(|i| 43200 + i * 2).collect();
    let peers: Vec<DhashPeer> = ports
        .iter()
        .map(|&port| dhash_peer(port, 14, ida))
        .collect();

    peers[0].start_chord();
    for peer in &peers[1..] {
        peer.join(LOCALHOST, ports[0]).unwrap();
    }
    std::thread::sleep(Duration::from_secs(6));

    let keys: Vec<String> = (0..100).map(|i| format!("key-{i}")).collect();
    for (i, key) in keys.iter().enumerate() {
        peers[0].create(key, &format!("value-{i}")).unwrap();
    }

    for index in [3, 7, 11, 15] {
        peers[index].fail();
    }

    // At least four maintenance cycles: rectification repairs routing and
    // the maintenance passes restore fragment counts.
    std::thread::sleep(Duration::from_secs(20));

    for (i, peer) in peers.iter().enumerate() {
        if [3, 7, 11, 15].contains(&i) {
            continue;
        }
        for (k, key) in keys.iter().enumerate() {
            assert_eq!(
                peer.read(key).unwrap(),
                format!("value-{k}"),
                "{key} via peer {i}"
            );
        }
    }
}
