//! End-to-end event loop tests against a real raw socket. These require
//! `CAP_NET_RAW` (typically root) to open `SOCK_RAW` sockets, so they're
//! `#[ignore]`d by default; run with `cargo test -- --ignored` as root
//! (or with the capability granted) to exercise them.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use probez::algorithm::AlgorithmOptions;
use probez::config::LoopConfig;
use probez::event_loop::{log_user_events, EventLoop};
use probez::probe::Probe;

#[test]
#[ignore = "requires CAP_NET_RAW to open a SOCK_RAW socket"]
fn ping_localhost_completes_within_its_timeout() {
    let config = LoopConfig {
        target: IpAddr::V4(Ipv4Addr::LOCALHOST),
        timeout_seconds: 2,
        traceroute: false,
        max_ttl: 30,
    };
    let skeleton = Probe::set_protocols(&["ipv4", "icmpv4"]).unwrap();
    let options = AlgorithmOptions {
        target: config.target,
        max_ttl: config.max_ttl,
        timeout: config.timeout(),
    };

    let mut event_loop = EventLoop::new(&config, log_user_events).unwrap();
    event_loop.add_instance("ping", options, skeleton).unwrap();
    let results = event_loop.run().unwrap();

    assert_eq!(results.len(), 1);
}

#[test]
#[ignore = "requires CAP_NET_RAW to open a SOCK_RAW socket"]
fn traceroute_to_localhost_reaches_target_in_one_hop() {
    let config = LoopConfig {
        target: IpAddr::V4(Ipv4Addr::LOCALHOST),
        timeout_seconds: 1,
        traceroute: true,
        max_ttl: 5,
    };
    let skeleton = Probe::set_protocols(&["ipv4", "icmpv4"]).unwrap();
    let options = AlgorithmOptions {
        target: config.target,
        max_ttl: config.max_ttl,
        timeout: Duration::from_secs(1),
    };

    let mut event_loop = EventLoop::new(&config, log_user_events).unwrap();
    event_loop.add_instance("traceroute", options, skeleton).unwrap();
    let results = event_loop.run().unwrap();

    assert_eq!(results.len(), 1);
}
